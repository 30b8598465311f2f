//! Asset decoding.
//!
//! Turns OBJ models into indexed [`ModelVertex`](vp_rhi::vertex::ModelVertex)
//! meshes and image files into RGBA8 pixel buffers. Nothing here touches the
//! GPU.

pub mod error;
pub mod model;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use model::{MeshData, load_obj, parse_obj};
pub use texture::{ImageData, decode_image, load_image};
