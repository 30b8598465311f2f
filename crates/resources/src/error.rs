//! Error types for asset loading.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("OBJ error: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The file parsed but its contents are unusable
    #[error("Invalid data in {path}: {reason}")]
    InvalidData { path: PathBuf, reason: String },
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
