//! Vertex formats and their pipeline input layout.
//!
//! [`VertexLayout`] is the value form of a vertex binding: the pipeline
//! builder hashes it into the pipeline key and checks vertex shader inputs
//! against it.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// One attribute of binding 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

impl VertexAttribute {
    /// Number of components the format provides, `None` for formats the
    /// renderer never uses as vertex input.
    pub fn component_count(&self) -> Option<u32> {
        format_component_count(self.format)
    }
}

pub fn format_component_count(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R32_SFLOAT | vk::Format::R32_UINT | vk::Format::R32_SINT => Some(1),
        vk::Format::R32G32_SFLOAT | vk::Format::R32G32_UINT | vk::Format::R32G32_SINT => Some(2),
        vk::Format::R32G32B32_SFLOAT
        | vk::Format::R32G32B32_UINT
        | vk::Format::R32G32B32_SINT => Some(3),
        vk::Format::R32G32B32A32_SFLOAT
        | vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R8G8B8A8_UNORM => Some(4),
        _ => None,
    }
}

/// Per-vertex input layout of a single interleaved binding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn attribute(&self, location: u32) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|attr| attr.location == location)
    }

    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                binding: 0,
                location: attr.location,
                format: attr.format,
                offset: attr.offset,
            })
            .collect()
    }
}

/// Vertex of a loaded model.
///
/// Memory layout (`#[repr(C)]`, 32 bytes):
/// - location 0: position (vec3)
/// - location 1: normal (vec3)
/// - location 2: tex_coord (vec2)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
}

impl ModelVertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }

    /// Bit pattern of every component, for exact deduplication.
    pub fn bit_key(&self) -> [u32; 8] {
        let words: [u32; 8] = bytemuck::cast(*self);
        words
    }

    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: std::mem::size_of::<Self>() as u32,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: std::mem::offset_of!(ModelVertex, position) as u32,
                },
                VertexAttribute {
                    location: 1,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: std::mem::offset_of!(ModelVertex, normal) as u32,
                },
                VertexAttribute {
                    location: 2,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: std::mem::offset_of!(ModelVertex, tex_coord) as u32,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_vertex_size() {
        assert_eq!(std::mem::size_of::<ModelVertex>(), 32);
        assert_eq!(ModelVertex::layout().stride, 32);
    }

    #[test]
    fn test_model_vertex_layout() {
        let layout = ModelVertex::layout();
        let attrs = layout.attribute_descriptions();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(layout.binding_description().stride, 32);
    }

    #[test]
    fn test_attribute_lookup() {
        let layout = ModelVertex::layout();
        assert_eq!(layout.attribute(2).and_then(|a| a.component_count()), Some(2));
        assert!(layout.attribute(3).is_none());
    }

    #[test]
    fn test_bit_key_distinguishes_negative_zero() {
        let a = ModelVertex::new(Vec3::ZERO, Vec3::Z, Vec2::ZERO);
        let b = ModelVertex::new(Vec3::new(-0.0, 0.0, 0.0), Vec3::Z, Vec2::ZERO);
        assert_eq!(a, b);
        assert_ne!(a.bit_key(), b.bit_key());
        assert_eq!(a.bit_key(), a.bit_key());
    }

    #[test]
    fn test_format_component_count() {
        assert_eq!(format_component_count(vk::Format::R32G32B32A32_SFLOAT), Some(4));
        assert_eq!(format_component_count(vk::Format::D32_SFLOAT), None);
    }
}
