//! SPIR-V loading and shader modules.
//!
//! - [`ShaderSource`] is the loaded SPIR-V of one stage. It is plain data, so
//!   reflection and pipeline keys work on it without a device.
//! - [`Shader`] wraps the `VkShaderModule` created from a source.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use vp_rhi::device::Device;
//! use vp_rhi::shader::{Shader, ShaderSource, ShaderStage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), vp_rhi::RhiError> {
//! let source = ShaderSource::from_file(Path::new("vert.spv"), ShaderStage::Vertex, "main")?;
//! let module = Shader::new(device, &source)?;
//! let _stage_info = module.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Words in the SPIR-V module header: magic, version, generator, bound, schema.
pub const SPIRV_HEADER_WORDS: usize = 5;

/// Graphics pipeline stage a shader runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// SPIR-V words of one stage plus its entry point.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderSource {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub code: Vec<u32>,
}

impl ShaderSource {
    pub fn from_file(path: &Path, stage: ShaderStage, entry_point: &str) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::Shader(format!("failed to read shader file {:?}: {}", path, e))
        })?;

        Self::from_bytes(&bytes, stage, entry_point)
    }

    /// Checks alignment and the header, then converts to words.
    pub fn from_bytes(bytes: &[u8], stage: ShaderStage, entry_point: &str) -> RhiResult<Self> {
        if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
            return Err(RhiError::Shader(format!(
                "SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
                bytes.len()
            )));
        }

        let code: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        check_header(&code, stage)?;

        Ok(Self {
            stage,
            entry_point: entry_point.to_string(),
            code,
        })
    }
}

/// Rejects words that cannot start a SPIR-V module: too short for the
/// header or a wrong magic number.
pub fn check_header(code: &[u32], stage: ShaderStage) -> RhiResult<()> {
    if code.len() < SPIRV_HEADER_WORDS {
        return Err(RhiError::Shader(format!(
            "{} shader is truncated: {} words, the SPIR-V header alone is {}",
            stage,
            code.len(),
            SPIRV_HEADER_WORDS
        )));
    }
    if code[0] != SPIRV_MAGIC {
        return Err(RhiError::Shader(format!(
            "{} shader is not SPIR-V (magic {:#010x})",
            stage, code[0]
        )));
    }
    Ok(())
}

/// Vulkan shader module wrapper.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    pub fn new(device: Arc<Device>, source: &ShaderSource) -> RhiResult<Self> {
        let entry_point = CString::new(source.entry_point.as_str())
            .map_err(|e| RhiError::Shader(format!("invalid entry point name: {}", e)))?;

        check_header(&source.code, source.stage)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&source.code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!(
            "Created {} shader module with entry point '{}'",
            source.stage, source.entry_point
        );

        Ok(Self {
            device,
            module,
            stage: source.stage,
            entry_point,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_shader_stage_to_vk() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_from_bytes_rejects_misaligned() {
        let err = ShaderSource::from_bytes(&[0x03, 0x02, 0x23], ShaderStage::Vertex, "main")
            .unwrap_err();
        assert!(matches!(err, RhiError::Shader(_)));
    }

    #[test]
    fn test_from_bytes_rejects_wrong_magic() {
        let bytes = words_to_bytes(&[0xdead_beef, 0x0001_0000]);
        let err = ShaderSource::from_bytes(&bytes, ShaderStage::Fragment, "main").unwrap_err();
        assert!(err.to_string().contains("not SPIR-V"));
    }

    #[test]
    fn test_from_bytes_keeps_words() {
        let words = [SPIRV_MAGIC, 0x0001_0300, 0, 7, 0];
        let bytes = words_to_bytes(&words);
        let source = ShaderSource::from_bytes(&bytes, ShaderStage::Vertex, "main").unwrap();
        assert_eq!(source.code, words.to_vec());
        assert_eq!(source.entry_point, "main");
    }

    #[test]
    fn test_from_bytes_rejects_truncated_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0300, 7]);
        let err = ShaderSource::from_bytes(&bytes, ShaderStage::Vertex, "main").unwrap_err();
        assert!(matches!(err, RhiError::Shader(_)));
        assert!(err.to_string().contains("vertex shader is truncated"), "{err}");
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("vp_rhi_missing_shader.spv");
        let err = ShaderSource::from_file(&path, ShaderStage::Vertex, "main").unwrap_err();
        assert!(matches!(err, RhiError::Shader(_)));
    }
}
