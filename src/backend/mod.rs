// Vulkan backend - one-shot setup of everything up to the graphics pipeline

pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;

pub use device::VulkanDevice;
pub use pipeline::GraphicsPipeline;
pub use swapchain::Swapchain;
