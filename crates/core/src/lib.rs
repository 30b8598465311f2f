//! Shared foundations for the `vp` viewer.
//!
//! - [`Error`] and the crate-wide [`Result`] alias
//! - [`init_logging`] for the `tracing` subscriber
//! - [`RendererConfig`], the validated startup configuration
//! - [`Timer`] and [`FrameStats`] for animation and frame pacing

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::{AssetPaths, RendererConfig};
pub use error::{Error, Result};
pub use logging::{DEFAULT_DIRECTIVES, init_logging};
pub use timer::{FrameStats, Timer};
