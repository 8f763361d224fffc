// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file (or a missing key) gives the
// stock 800x600 "Triangle" setup.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Triangle".to_string(),
            width: 800,
            height: 600,
            resizable: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when the surface doesn't offer it
    pub present_mode: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
        }
    }
}

/// Compiled SPIR-V locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vert.spv"),
            fragment: PathBuf::from("shaders/frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Validation layers only ever run in debug builds
    pub fn enable_validation(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Get the preferred present mode as a Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_setup() {
        let config = Config::default();
        assert_eq!(config.window.title, "Triangle");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(!config.window.resizable);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("shaders/frag.spv"));
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 1024

            [graphics]
            present_mode = "FIFO"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/vert.spv"));
    }

    #[test]
    fn present_mode_names() {
        let mut config = Config::default();
        for (name, mode) in [
            ("immediate", vk::PresentModeKHR::IMMEDIATE),
            ("Mailbox", vk::PresentModeKHR::MAILBOX),
            ("fifo", vk::PresentModeKHR::FIFO),
            ("fifo_relaxed", vk::PresentModeKHR::FIFO_RELAXED),
            ("vsync-please", vk::PresentModeKHR::MAILBOX),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.present_mode(), mode, "{}", name);
        }
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("vulkan-triangle-no-such-config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.window.title, "Triangle");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!(
            "vulkan-triangle-bad-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let result = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(format!("{}", err).starts_with("Failed to parse config file"));
    }
}
