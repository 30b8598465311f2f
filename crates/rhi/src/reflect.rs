//! SPIR-V reflection and shader interface linking.
//!
//! [`reflect`] extracts what a stage reads from outside: vertex inputs and
//! descriptor bindings. [`validate_link`] checks those interfaces against a
//! [`VertexLayout`] and the set 0 [`DescriptorBinding`]s before any pipeline
//! is created, so mismatches surface as [`RhiError::PipelineLink`] naming
//! the offending slot instead of as undefined behaviour on the GPU.

use tracing::debug;

use crate::descriptor::{DescriptorBinding, DescriptorKind};
use crate::error::{RhiError, RhiResult};
use crate::shader::{ShaderSource, ShaderStage, check_header};
use crate::vertex::VertexLayout;

/// A stage input variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceInput {
    pub location: u32,
    pub component_count: u32,
    pub name: Option<String>,
}

/// A descriptor a stage accesses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub set: u32,
    pub binding: u32,
    /// `None` for descriptor types the renderer never binds
    pub kind: Option<DescriptorKind>,
    pub name: Option<String>,
}

/// Resources one stage expects from the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderInterface {
    pub stage: ShaderStage,
    pub inputs: Vec<InterfaceInput>,
    pub descriptors: Vec<InterfaceDescriptor>,
}

/// Reflects the entry point of `source`.
pub fn reflect(source: &ShaderSource) -> RhiResult<ShaderInterface> {
    // spirq slices the header unchecked.
    check_header(&source.code, source.stage)?;

    let entry_points = spirq::ReflectConfig::new()
        .spv(source.code.as_slice())
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| RhiError::Shader(format!("SPIR-V reflection failed: {:?}", e)))?;

    let entry_point = entry_points
        .iter()
        .find(|ep| ep.name == source.entry_point)
        .ok_or_else(|| {
            RhiError::Shader(format!(
                "{} shader has no entry point '{}'",
                source.stage, source.entry_point
            ))
        })?;

    let mut interface = ShaderInterface {
        stage: source.stage,
        inputs: Vec::new(),
        descriptors: Vec::new(),
    };

    for var in entry_point.vars.iter() {
        match var {
            spirq::var::Variable::Input { name, location, ty } => {
                interface.inputs.push(InterfaceInput {
                    location: location.loc(),
                    component_count: component_count(ty),
                    name: name.clone(),
                });
            }
            spirq::var::Variable::Descriptor {
                name,
                desc_bind,
                desc_ty,
                ..
            } => {
                interface.descriptors.push(InterfaceDescriptor {
                    set: desc_bind.set(),
                    binding: desc_bind.bind(),
                    kind: descriptor_kind(desc_ty),
                    name: name.clone(),
                });
            }
            _ => {}
        }
    }

    interface.inputs.sort_by_key(|input| input.location);

    debug!(
        "Reflected {} shader: {} input(s), {} descriptor(s)",
        source.stage,
        interface.inputs.len(),
        interface.descriptors.len()
    );

    Ok(interface)
}

fn component_count(ty: &spirq::ty::Type) -> u32 {
    match ty {
        spirq::ty::Type::Vector(v) => v.nscalar,
        spirq::ty::Type::Matrix(m) => m.nvector * m.vector_ty.nscalar,
        _ => 1,
    }
}

fn descriptor_kind(desc_ty: &spirq::ty::DescriptorType) -> Option<DescriptorKind> {
    use spirq::ty::DescriptorType;
    match desc_ty {
        DescriptorType::UniformBuffer() => Some(DescriptorKind::UniformBuffer),
        DescriptorType::CombinedImageSampler() => Some(DescriptorKind::CombinedImageSampler),
        _ => None,
    }
}

fn link_error(slot: String, reason: impl Into<String>) -> RhiError {
    RhiError::PipelineLink {
        slot,
        reason: reason.into(),
    }
}

/// Checks every stage interface against the vertex layout and the set 0
/// bindings.
///
/// Vertex stage inputs need an attribute at the same location with the same
/// component count. Descriptors used by any stage need a binding of the same
/// kind whose stage flags include that stage.
pub fn validate_link(
    interfaces: &[ShaderInterface],
    vertex_layout: &VertexLayout,
    bindings: &[DescriptorBinding],
) -> RhiResult<()> {
    for interface in interfaces {
        if interface.stage == ShaderStage::Vertex {
            for input in &interface.inputs {
                let slot = format!("vertex input location {}", input.location);
                let attribute = vertex_layout
                    .attribute(input.location)
                    .ok_or_else(|| link_error(slot.clone(), "no vertex attribute at this location"))?;

                match attribute.component_count() {
                    Some(count) if count == input.component_count => {}
                    Some(count) => {
                        return Err(link_error(
                            slot,
                            format!(
                                "shader reads {} component(s) but the attribute provides {}",
                                input.component_count, count
                            ),
                        ));
                    }
                    None => {
                        return Err(link_error(
                            slot,
                            format!("unsupported attribute format {:?}", attribute.format),
                        ));
                    }
                }
            }
        }

        for descriptor in &interface.descriptors {
            let slot = format!("set {} binding {}", descriptor.set, descriptor.binding);
            if descriptor.set != 0 {
                return Err(link_error(slot, "only descriptor set 0 is laid out"));
            }

            let binding = bindings
                .iter()
                .find(|b| b.binding == descriptor.binding)
                .ok_or_else(|| link_error(slot.clone(), "no binding in the descriptor set layout"))?;

            let Some(kind) = descriptor.kind else {
                return Err(link_error(slot, "unsupported descriptor type"));
            };
            if kind != binding.kind {
                return Err(link_error(
                    slot,
                    format!(
                        "{} shader expects a {} but the layout has a {}",
                        interface.stage,
                        kind.name(),
                        binding.kind.name()
                    ),
                ));
            }
            if !binding.stages.contains(interface.stage.to_vk_stage()) {
                return Err(link_error(
                    slot,
                    format!("binding is not visible to the {} stage", interface.stage),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::vertex::ModelVertex;

    fn vertex_interface(inputs: &[(u32, u32)]) -> ShaderInterface {
        ShaderInterface {
            stage: ShaderStage::Vertex,
            inputs: inputs
                .iter()
                .map(|&(location, component_count)| InterfaceInput {
                    location,
                    component_count,
                    name: None,
                })
                .collect(),
            descriptors: vec![InterfaceDescriptor {
                set: 0,
                binding: 0,
                kind: Some(DescriptorKind::UniformBuffer),
                name: Some("ubo".into()),
            }],
        }
    }

    fn fragment_interface(binding: u32, kind: DescriptorKind) -> ShaderInterface {
        ShaderInterface {
            stage: ShaderStage::Fragment,
            inputs: Vec::new(),
            descriptors: vec![InterfaceDescriptor {
                set: 0,
                binding,
                kind: Some(kind),
                name: Some("texSampler".into()),
            }],
        }
    }

    fn bindings() -> Vec<DescriptorBinding> {
        vec![
            DescriptorBinding::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
            DescriptorBinding::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
        ]
    }

    fn slot_of(err: RhiError) -> String {
        match err {
            RhiError::PipelineLink { slot, .. } => slot,
            other => panic!("expected a link error, got {other:?}"),
        }
    }

    #[test]
    fn test_matching_interfaces_link() {
        let interfaces = [
            vertex_interface(&[(0, 3), (1, 3), (2, 2)]),
            fragment_interface(1, DescriptorKind::CombinedImageSampler),
        ];
        validate_link(&interfaces, &ModelVertex::layout(), &bindings()).unwrap();
    }

    #[test]
    fn test_missing_vertex_attribute_names_location() {
        let interfaces = [vertex_interface(&[(0, 3), (3, 4)])];
        let err = validate_link(&interfaces, &ModelVertex::layout(), &bindings()).unwrap_err();
        assert_eq!(slot_of(err), "vertex input location 3");
    }

    #[test]
    fn test_component_count_mismatch() {
        let interfaces = [vertex_interface(&[(2, 3)])];
        let err = validate_link(&interfaces, &ModelVertex::layout(), &bindings()).unwrap_err();
        assert!(err.to_string().contains("vertex input location 2"));
        assert!(err.to_string().contains("provides 2"));
    }

    #[test]
    fn test_missing_binding_names_set_and_binding() {
        let interfaces = [fragment_interface(2, DescriptorKind::CombinedImageSampler)];
        let err = validate_link(&interfaces, &ModelVertex::layout(), &bindings()).unwrap_err();
        assert_eq!(slot_of(err), "set 0 binding 2");
    }

    #[test]
    fn test_descriptor_kind_mismatch() {
        let interfaces = [fragment_interface(1, DescriptorKind::UniformBuffer)];
        let err = validate_link(&interfaces, &ModelVertex::layout(), &bindings()).unwrap_err();
        assert_eq!(slot_of(err), "set 0 binding 1");
    }

    #[test]
    fn test_stage_visibility() {
        // Binding 0 is vertex-only.
        let interfaces = [fragment_interface(0, DescriptorKind::UniformBuffer)];
        let err = validate_link(&interfaces, &ModelVertex::layout(), &bindings()).unwrap_err();
        assert!(err.to_string().contains("not visible to the fragment stage"));
    }

    #[test]
    fn test_non_zero_set_rejected() {
        let mut interface = fragment_interface(1, DescriptorKind::CombinedImageSampler);
        interface.descriptors[0].set = 1;
        let err = validate_link(&[interface], &ModelVertex::layout(), &bindings()).unwrap_err();
        assert_eq!(slot_of(err), "set 1 binding 1");
    }

    #[test]
    fn test_fragment_inputs_are_not_vertex_attributes() {
        let mut interface = fragment_interface(1, DescriptorKind::CombinedImageSampler);
        interface.inputs.push(InterfaceInput {
            location: 7,
            component_count: 4,
            name: None,
        });
        validate_link(&[interface], &ModelVertex::layout(), &bindings()).unwrap();
    }

    #[test]
    fn test_reflect_rejects_truncated_module() {
        let source = ShaderSource {
            stage: ShaderStage::Vertex,
            entry_point: "main".into(),
            code: vec![crate::shader::SPIRV_MAGIC, 0, 0],
        };
        let err = reflect(&source).unwrap_err();
        assert!(matches!(err, RhiError::Shader(_)));
        assert!(err.to_string().contains("vertex"), "{err}");
    }

    #[test]
    fn test_reflect_rejects_header_only_garbage() {
        let source = ShaderSource {
            stage: ShaderStage::Fragment,
            entry_point: "main".into(),
            code: vec![0xdead_beef, 0, 0, 0, 0],
        };
        assert!(matches!(reflect(&source), Err(RhiError::Shader(_))));
    }
}
