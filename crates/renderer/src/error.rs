//! Error type for the frame loop and its setup.

use thiserror::Error;
use vp_resources::ResourceError;
use vp_rhi::RhiError;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Model or texture could not be loaded
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Window, surface or configuration failure
    #[error(transparent)]
    Platform(#[from] vp_core::Error),
}

impl RenderError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RenderError::Rhi(e) if e.is_device_lost())
    }

    /// Errors that mean the renderer never came up.
    pub fn is_initialization(&self) -> bool {
        match self {
            RenderError::Rhi(e) => e.is_initialization(),
            RenderError::Resource(_) | RenderError::Platform(_) => true,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
