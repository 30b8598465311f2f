//! Uniform and push-constant data shared with `shaders/shader.vert`.

use std::f32::consts::FRAC_PI_2;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Model rotation speed around +Z, in radians per second.
pub const ROTATION_SPEED: f32 = FRAC_PI_2;
pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);
pub const FOV_Y_DEGREES: f32 = 45.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10.0;

/// Per-frame uniform block at set 0, binding 0.
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Offset 128: projection matrix (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// The spinning-model camera after `elapsed_secs` seconds.
    pub fn animated(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * ROTATION_SPEED);
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        // Vulkan clip space has Y pointing down.
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

/// Vertex-stage push constant: the draw item's own transform.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub model: Mat4,
}

impl DrawPushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}
