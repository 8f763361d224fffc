// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The compiled .spv files are read from
// disk at startup; the modules only live until the pipeline is built.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Decode raw SPIR-V bytes into words, checking length and magic number
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    // read_spv copies into an aligned buffer and fixes endianness
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V")
}

/// Read a compiled shader from `path`
pub fn read_shader_file(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open shader file: {}", path.display()))?;

    log::debug!("Read {} bytes of SPIR-V from {}", bytes.len(), path.display());

    decode_spirv(&bytes).with_context(|| format!("Failed to load shader {}", path.display()))
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Load a shader module straight from a .spv file
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let code = read_shader_file(path)?;
    create_shader_module(device, &code)
}
