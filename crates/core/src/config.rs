//! Startup configuration for the viewer.
//!
//! [`RendererConfig::default`] reproduces the stock viewer: an 800x600
//! window, two frames in flight and the `viking_room` assets next to the
//! working directory. The binary overrides fields from its command line and
//! calls [`RendererConfig::validate`] before anything touches the GPU.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Smallest ring that still lets the CPU record while the GPU executes.
pub const MIN_FRAMES_IN_FLIGHT: usize = 2;
/// Largest ring; deeper rings only add latency.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Locations of the model, texture and compiled shaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    /// Directory every relative path below is resolved against.
    pub root: PathBuf,
    pub model: PathBuf,
    pub texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl AssetPaths {
    pub fn model_path(&self) -> PathBuf {
        self.resolve(&self.model)
    }

    pub fn texture_path(&self) -> PathBuf {
        self.resolve(&self.texture)
    }

    pub fn vertex_shader_path(&self) -> PathBuf {
        self.resolve(&self.vertex_shader)
    }

    pub fn fragment_shader_path(&self) -> PathBuf {
        self.resolve(&self.fragment_shader)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            model: PathBuf::from("viking_room.obj"),
            texture: PathBuf::from("viking_room.png"),
            vertex_shader: PathBuf::from("vert.spv"),
            fragment_shader: PathBuf::from("frag.spv"),
        }
    }
}

/// Everything the renderer needs to know before it creates a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    /// Number of frame slots the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Enables `VK_LAYER_KHRONOS_validation` and the debug messenger.
    pub enable_validation: bool,
    /// Prefer `MAILBOX` over `FIFO` when the surface offers it.
    pub prefer_mailbox: bool,
    /// Upper bound on the MSAA sample count; `1` disables multisampling.
    pub max_msaa_samples: u32,
    /// Generate a full mip chain for textures.
    pub generate_mipmaps: bool,
    /// Timeout for swapchain image acquisition, in nanoseconds.
    pub acquire_timeout_ns: u64,
    /// Timeout for the per-slot fence wait, in nanoseconds.
    pub fence_timeout_ns: u64,
    /// Draw the model a second time through a wireframe pipeline.
    pub wireframe_overlay: bool,
    pub assets: AssetPaths,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_title: String::from("vp"),
            window_width: 800,
            window_height: 600,
            frames_in_flight: MIN_FRAMES_IN_FLIGHT,
            enable_validation: cfg!(debug_assertions),
            prefer_mailbox: true,
            max_msaa_samples: 64,
            generate_mipmaps: true,
            acquire_timeout_ns: u64::MAX,
            fence_timeout_ns: u64::MAX,
            wireframe_overlay: true,
            assets: AssetPaths::default(),
        }
    }
}

impl RendererConfig {
    /// Rejects values the renderer cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }

        if !(MIN_FRAMES_IN_FLIGHT..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames in flight must be between {} and {}, got {}",
                MIN_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }

        if !self.max_msaa_samples.is_power_of_two() || self.max_msaa_samples > 64 {
            return Err(Error::Config(format!(
                "MSAA sample cap must be a power of two up to 64, got {}",
                self.max_msaa_samples
            )));
        }

        if self.acquire_timeout_ns == 0 || self.fence_timeout_ns == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }

        Ok(())
    }
}
