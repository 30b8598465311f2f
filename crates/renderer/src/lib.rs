//! Frame loop and the machinery around it.
//!
//! - [`RenderContext`]: instance, surface and device for one window
//! - [`frame_sync`]: frames in flight and their synchronization
//! - [`SurfaceState`]: when the swapchain must be rebuilt
//! - [`PipelineCache`]: pipelines keyed by content hash
//! - [`DeletionQueue`]: epoch-based deferred destruction
//! - [`Renderer`]: acquire, record, submit, present

pub mod context;
pub mod deletion_queue;
pub mod error;
pub mod frame_sync;
pub mod pipeline_cache;
pub mod render_targets;
pub mod renderer;
pub mod surface_state;
pub mod ubo;

pub use context::RenderContext;
pub use deletion_queue::DeletionQueue;
pub use error::{RenderError, RenderResult};
pub use frame_sync::{FrameRing, FrameSlot, FrameSynchronizer, SlotState};
pub use pipeline_cache::PipelineCache;
pub use renderer::{FrameStatus, Renderer};
pub use surface_state::{AcquireAction, FrameStart, SurfaceState};
