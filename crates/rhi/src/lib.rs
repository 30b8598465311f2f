//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin, owning wrappers over `ash` handles. Every wrapper holds an
//! `Arc<Device>` and destroys its handle on drop. Covers:
//! - Instance, physical device selection and the logical device
//! - Buffers, images, samplers and the [`upload::ResourceUploader`]
//! - Command recording, descriptors and synchronization primitives
//! - Shader reflection, link validation and graphics pipelines
//! - Swapchain management

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod reflect;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod upload;
pub mod vertex;

pub use error::{MemoryKind, RhiError, RhiResult};

pub use ash::vk;
