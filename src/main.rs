// =============================================================================
// VULKAN TRIANGLE - Initialization walk-through
// =============================================================================
//
// Sets up a Vulkan context step by step and then idles:
//
// ┌─────────────────────────────────────────────────────────────────┐
// │  Window (winit)                                                 │
// │    └── Instance (+ validation layers, debug messenger)          │
// │          └── Surface                                            │
// │                └── Physical device -> Logical device + queues   │
// │                      └── Swapchain + image views                │
// │                            └── Render pass + graphics pipeline  │
// └─────────────────────────────────────────────────────────────────┘
//
// Nothing is ever drawn. The event loop only pumps window events until
// the window is closed.
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use backend::{GraphicsPipeline, Swapchain, VulkanDevice};
use config::Config;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    init_logging();
    log::info!("Starting Vulkan triangle");

    let config = Config::load();
    log::info!(
        "Window: {}x{} \"{}\"",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    // Never block waiting for events
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop failed")?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// RUST_LOG overrides the default Info level
fn init_logging() {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Holds the window and every Vulkan object created during setup.
///
/// Resources are released in reverse order of creation in `Drop`.
pub struct App {
    config: Config,

    window: Option<Window>,
    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<Swapchain>,
    pipeline: Option<GraphicsPipeline>,

    /// First fatal error raised inside the event loop, returned from main
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            device: None,
            swapchain: None,
            pipeline: None,
            error: None,
        }
    }

    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Runs the whole setup sequence once the window exists:
    /// 1. Instance, surface, physical + logical device
    /// 2. Swapchain and image views
    /// 3. Render pass, pipeline layout, graphics pipeline
    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let device = VulkanDevice::new(
            &self.config.window.title,
            self.config.enable_validation(),
            window,
        )?;

        log::debug!(
            "Queues: graphics={:?} present={:?}",
            device.graphics_queue,
            device.present_queue
        );

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            size.width,
            size.height,
            self.config.present_mode(),
        )?;

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            swapchain.format,
            swapchain.extent,
            &self.config.shaders.vertex,
            &self.config.shaders.fragment,
        )?;

        self.device = Some(device);
        self.swapchain = Some(swapchain);
        self.pipeline = Some(pipeline);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    /// Stops the loop; main reports the error once it returns
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
        }

        // Kept even on failure so the surface never outlives it
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    if let Err(e) = device.wait_idle() {
                        log::warn!("Device wait failed during shutdown: {}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            let _ = device.wait_idle();
        }

        // Reverse order of creation. The device goes last among the Vulkan
        // objects (the others hold Arcs to it), and the window after that.
        self.pipeline = None;
        self.swapchain = None;
        self.device = None;
        self.window = None;

        log::info!("Cleanup complete");
    }
}
