//! Fragment-stage compilation and interface checks, done entirely in naga.
//!
//! "Compile" parses and validates the candidate on its own. "Link" checks the
//! candidate against the fixed vertex stage and bind group layout. Pipeline
//! creation still runs inside a wgpu error scope for whatever naga accepts.

use super::bindings;
use super::uniforms::{DetectionUniforms, FrameUniforms};
use super::ShaderSource;
use crate::error::ShaderError;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{
    AddressSpace, Binding, GlobalVariable, Handle, ImageClass, ImageDimension, Interpolation, Module, Sampling,
    ScalarKind, ShaderStage, Type, TypeInner, VectorSize,
};

/// A validated fragment stage that is not yet part of any pipeline.
#[derive(Debug)]
pub struct CompiledFragment {
    pub source: ShaderSource,
    pub module: Module,
    pub info: ModuleInfo,
    pub entry_point: String,
    /// The module re-emitted as WGSL for `wgpu`.
    pub wgsl: String,
}

/// Which bind group entries a fragment stage reads.
///
/// Consumers skip work for bindings the active program ignores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramBindings {
    pub video: bool,
    pub sampler: bool,
    pub frame_uniforms: bool,
    pub detections: bool,
}

fn link_error(message: impl Into<String>) -> ShaderError {
    ShaderError::Link(message.into())
}

/// Parse and validate a fragment stage.
pub fn compile_fragment(source: &ShaderSource) -> Result<CompiledFragment, ShaderError> {
    let module = match source {
        ShaderSource::Glsl(code) => {
            let mut frontend = Frontend::default();
            frontend
                .parse(&Options::from(ShaderStage::Fragment), code)
                .map_err(|e| ShaderError::Compile(e.emit_to_string(code)))?
        }
        ShaderSource::Wgsl(code) => {
            naga::front::wgsl::parse_str(code).map_err(|e| ShaderError::Compile(e.emit_to_string(code)))?
        }
    };

    let entry_point = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Fragment)
        .map(|ep| ep.name.clone())
        .ok_or_else(|| ShaderError::Compile("no fragment entry point".to_string()))?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::empty());
    let info = validator
        .validate(&module)
        .map_err(|e| ShaderError::Compile(e.emit_to_string(source.text())))?;

    let wgsl = naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
        .map_err(|e| ShaderError::Compile(format!("WGSL generation error: {}", e)))?;

    Ok(CompiledFragment {
        source: source.clone(),
        module,
        info,
        entry_point,
        wgsl,
    })
}

/// Check a compiled fragment against the fixed vertex outputs and bind group layout.
pub fn link_interface(fragment: &CompiledFragment) -> Result<ProgramBindings, ShaderError> {
    let module = &fragment.module;
    let ep = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Fragment && ep.name == fragment.entry_point)
        .ok_or_else(|| link_error(format!("entry point '{}' not found", fragment.entry_point)))?;

    // No pipeline constants are ever supplied.
    if let Some((_, o)) = module.overrides.iter().find(|(_, o)| o.init.is_none()) {
        return Err(link_error(format!(
            "override '{}' has no default value",
            o.name.as_deref().unwrap_or("<unnamed>")
        )));
    }

    for arg in &ep.function.arguments {
        check_input(module, arg.ty, arg.binding.as_ref())?;
    }

    let result = ep
        .function
        .result
        .as_ref()
        .ok_or_else(|| link_error("fragment stage writes no color output"))?;
    let mut color_outputs = 0;
    check_output(module, result.ty, result.binding.as_ref(), &mut color_outputs)?;
    if color_outputs == 0 {
        return Err(link_error("fragment stage writes no color output at location 0"));
    }

    let mut used = ProgramBindings::default();
    for (_, var) in module.global_variables.iter() {
        let Some(rb) = &var.binding else { continue };
        let name = var.name.as_deref().unwrap_or("<unnamed>");
        if rb.group != 0 {
            return Err(link_error(format!(
                "resource '{}' uses group {}; only group 0 is bound",
                name, rb.group
            )));
        }
        let inner = &module.types[var.ty].inner;
        match rb.binding {
            bindings::VIDEO_TEXTURE => {
                let sampled_2d = matches!(
                    inner,
                    TypeInner::Image {
                        dim: ImageDimension::D2,
                        arrayed: false,
                        class: ImageClass::Sampled { kind: ScalarKind::Float, multi: false },
                    }
                );
                if !sampled_2d {
                    return Err(link_error(format!("binding 0 ('{}') must be a 2D float texture", name)));
                }
                used.video = true;
            }
            bindings::VIDEO_SAMPLER => {
                if !matches!(inner, TypeInner::Sampler { comparison: false }) {
                    return Err(link_error(format!("binding 1 ('{}') must be a filtering sampler", name)));
                }
                used.sampler = true;
            }
            bindings::FRAME_UNIFORMS => {
                check_uniform_block(module, var, name, std::mem::size_of::<FrameUniforms>())?;
                used.frame_uniforms = true;
            }
            bindings::DETECTION_UNIFORMS => {
                check_uniform_block(module, var, name, std::mem::size_of::<DetectionUniforms>())?;
                used.detections = true;
            }
            other => {
                return Err(link_error(format!("binding {} ('{}') is not provided", other, name)));
            }
        }
    }

    Ok(used)
}

fn is_f32_vector(module: &Module, ty: Handle<Type>, want: VectorSize) -> bool {
    matches!(module.types[ty].inner, TypeInner::Vector { size, scalar } if size == want && scalar == naga::Scalar::F32)
}

fn check_input(module: &Module, ty: Handle<Type>, binding: Option<&Binding>) -> Result<(), ShaderError> {
    match binding {
        Some(Binding::BuiltIn(_)) => Ok(()),
        Some(Binding::Location {
            location,
            interpolation,
            sampling,
            ..
        }) => {
            if *location != 0 {
                return Err(link_error(format!(
                    "fragment input at location {} has no matching vertex output",
                    location
                )));
            }
            if !is_f32_vector(module, ty, VectorSize::Bi) {
                return Err(link_error("fragment input at location 0 must be a vec2<f32> UV"));
            }
            let interpolation_ok = matches!(interpolation, None | Some(Interpolation::Perspective));
            let sampling_ok = matches!(sampling, None | Some(Sampling::Center));
            if !interpolation_ok || !sampling_ok {
                return Err(link_error("UV input must use default perspective interpolation"));
            }
            Ok(())
        }
        None => match &module.types[ty].inner {
            TypeInner::Struct { members, .. } => {
                for member in members {
                    check_input(module, member.ty, member.binding.as_ref())?;
                }
                Ok(())
            }
            _ => Err(link_error("fragment input without a binding")),
        },
    }
}

fn check_output(
    module: &Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    color_outputs: &mut u32,
) -> Result<(), ShaderError> {
    match binding {
        Some(Binding::BuiltIn(_)) => Ok(()),
        Some(Binding::Location { location, .. }) => {
            if *location != 0 {
                return Err(link_error(format!(
                    "fragment output at location {} has no color target",
                    location
                )));
            }
            if !is_f32_vector(module, ty, VectorSize::Quad) {
                return Err(link_error("color output must be a vec4<f32>"));
            }
            *color_outputs += 1;
            Ok(())
        }
        None => match &module.types[ty].inner {
            TypeInner::Struct { members, .. } => {
                for member in members {
                    check_output(module, member.ty, member.binding.as_ref(), color_outputs)?;
                }
                Ok(())
            }
            _ => Err(link_error("fragment output without a binding")),
        },
    }
}

fn check_uniform_block(module: &Module, var: &GlobalVariable, name: &str, available: usize) -> Result<(), ShaderError> {
    if var.space != AddressSpace::Uniform {
        return Err(link_error(format!("'{}' must be declared as a uniform block", name)));
    }
    let size = module.types[var.ty].inner.size(module.to_ctx()) as usize;
    if size > available {
        return Err(link_error(format!(
            "uniform block '{}' needs {} bytes but only {} are bound",
            name, size, available
        )));
    }
    Ok(())
}
