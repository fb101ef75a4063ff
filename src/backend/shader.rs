// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. build.rs compiles the GLSL
// sources next to them; this loads the .spv files at startup.

use super::error::{RendererError, Result, VkResultExt};
use super::VulkanDevice;
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into words, rejecting anything that is not a module.
pub fn parse_spirv(bytes: &[u8]) -> std::result::Result<Vec<u32>, String> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(format!("size {} is not a multiple of 4", bytes.len()));
    }

    // read_spv copies into aligned storage and fixes up endianness
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| e.to_string())?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(format!("bad magic number {other:#010x}")),
        None => Err("empty module".into()),
    }
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn from_file(device: Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| RendererError::asset(path, e))?;
        let code = parse_spirv(&bytes).map_err(|reason| RendererError::asset(path, reason))?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .vk_call("vkCreateShaderModule")?;

        log::debug!("Loaded shader {}", path.display());
        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_header_is_accepted() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        assert_eq!(parse_spirv(&bytes).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn truncated_module_is_rejected() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(parse_spirv(&bytes).unwrap_err().contains("multiple of 4"));
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = 0xdead_beefu32.to_le_bytes();
        assert!(parse_spirv(&bytes).unwrap_err().contains("magic"));
    }

    #[test]
    fn compiled_shaders_parse_when_present() {
        // Only checked when glslc was available at build time
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
        for name in ["triangle.vert.spv", "triangle.frag.spv", "quad.vert.spv", "quad.frag.spv"] {
            if let Ok(bytes) = std::fs::read(dir.join(name)) {
                assert!(parse_spirv(&bytes).is_ok(), "{name}");
            }
        }
    }
}
