//! RHI error taxonomy.
//!
//! Raw `vk::Result` codes are classified on conversion so callers can match
//! on what happened instead of on driver codes:
//!
//! | variant                | handling                                     |
//! |------------------------|----------------------------------------------|
//! | `Initialization`, `UnsupportedSurface`, `NoSuitableGpu`, `Loading` | fatal at startup |
//! | `OutOfDate`            | recreate the swapchain and retry the frame   |
//! | `OutOfMemory`          | evict and retry, or escalate                 |
//! | `PipelineLink`         | fatal at startup, a shader/layout mismatch   |
//! | `DeviceLost`           | fatal, the process must restart              |

use std::fmt;

use ash::vk;
use thiserror::Error;

/// Which heap ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Host,
    Device,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Host => write!(f, "host"),
            MemoryKind::Device => write!(f, "device"),
        }
    }
}

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Instance, device or feature setup failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The surface offers no usable format or present mode
    #[error("Unsupported surface: {0}")]
    UnsupportedSurface(String),

    /// The swapchain no longer matches the surface
    #[error("Swapchain is out of date")]
    OutOfDate,

    /// Host or device allocation failure
    #[error("Out of {kind} memory while {context}")]
    OutOfMemory { kind: MemoryKind, context: String },

    /// Shader interface does not match the vertex or descriptor layout
    #[error("Pipeline link error at {slot}: {reason}")]
    PipelineLink { slot: String, reason: String },

    /// The logical device was lost
    #[error("Device lost")]
    DeviceLost,

    /// A bounded wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Any other Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error other than exhaustion
    #[error("Allocator error: {0}")]
    Allocator(gpu_allocator::AllocationError),

    /// No physical device satisfies the renderer's requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// SPIR-V loading or reflection error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Caller passed something the RHI cannot use
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RhiError {
    /// Replaces the context of an out-of-memory error; other variants pass through.
    pub fn in_context(self, what: impl Into<String>) -> Self {
        match self {
            RhiError::OutOfMemory { kind, .. } => RhiError::OutOfMemory {
                kind,
                context: what.into(),
            },
            other => other,
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, RhiError::DeviceLost)
    }

    pub fn is_out_of_date(&self) -> bool {
        matches!(self, RhiError::OutOfDate)
    }

    /// Errors that can only happen while bringing the renderer up.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            RhiError::Initialization(_)
                | RhiError::UnsupportedSurface(_)
                | RhiError::NoSuitableGpu
                | RhiError::Loading(_)
        )
    }

    /// Errors a caller may recover from without restarting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RhiError::OutOfDate | RhiError::OutOfMemory { .. })
    }

    /// Errors that end the process.
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => RhiError::OutOfMemory {
                kind: MemoryKind::Host,
                context: "executing a Vulkan call".to_string(),
            },
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => RhiError::OutOfMemory {
                kind: MemoryKind::Device,
                context: "executing a Vulkan call".to_string(),
            },
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => RhiError::OutOfDate,
            vk::Result::TIMEOUT => RhiError::Timeout("the GPU"),
            vk::Result::ERROR_INITIALIZATION_FAILED
            | vk::Result::ERROR_INCOMPATIBLE_DRIVER
            | vk::Result::ERROR_LAYER_NOT_PRESENT
            | vk::Result::ERROR_EXTENSION_NOT_PRESENT
            | vk::Result::ERROR_FEATURE_NOT_PRESENT => RhiError::Initialization(result.to_string()),
            other => RhiError::Vulkan(other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for RhiError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        match err {
            gpu_allocator::AllocationError::OutOfMemory => RhiError::OutOfMemory {
                kind: MemoryKind::Device,
                context: "allocating GPU memory".to_string(),
            },
            other => RhiError::Allocator(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_errors_distinguish_heaps() {
        let host = RhiError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let device = RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        assert!(matches!(host, RhiError::OutOfMemory { kind: MemoryKind::Host, .. }));
        assert!(matches!(device, RhiError::OutOfMemory { kind: MemoryKind::Device, .. }));
        assert!(host.is_recoverable());
    }

    #[test]
    fn test_device_lost_and_out_of_date() {
        assert!(RhiError::from(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!RhiError::DeviceLost.is_recoverable());
    }

    #[test]
    fn test_initialization_codes() {
        for code in [
            vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT,
            vk::Result::ERROR_LAYER_NOT_PRESENT,
        ] {
            assert!(RhiError::from(code).is_initialization(), "{code:?}");
        }
        assert!(RhiError::UnsupportedSurface("no formats".into()).is_initialization());
    }

    #[test]
    fn test_unclassified_code_is_kept() {
        let err = RhiError::from(vk::Result::ERROR_FRAGMENTED_POOL);
        assert!(matches!(err, RhiError::Vulkan(vk::Result::ERROR_FRAGMENTED_POOL)));
    }

    #[test]
    fn test_allocator_exhaustion_is_device_oom() {
        let err = RhiError::from(gpu_allocator::AllocationError::OutOfMemory);
        assert!(matches!(err, RhiError::OutOfMemory { kind: MemoryKind::Device, .. }));
    }

    #[test]
    fn test_in_context_only_touches_oom() {
        let err = RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .in_context("uploading texture");
        assert_eq!(err.to_string(), "Out of device memory while uploading texture");

        let err = RhiError::DeviceLost.in_context("ignored");
        assert!(err.is_device_lost());
    }

    #[test]
    fn test_pipeline_link_names_slot() {
        let err = RhiError::PipelineLink {
            slot: "vertex input location 2".into(),
            reason: "no vertex attribute".into(),
        };
        assert!(err.to_string().contains("vertex input location 2"));
    }
}
