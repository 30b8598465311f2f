//! Top-level error type shared by the viewer crates.

use thiserror::Error;

/// Errors raised outside the GPU layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Vulkan surface creation or extension enumeration errors
    #[error("Surface error: {0}")]
    Surface(String),

    /// Rejected configuration values
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the viewer's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
