//! GPU shader pipeline: fragment compilation, hot-swap and the per-frame renderer.

pub mod adapter;
pub mod compile;
mod gpu_context;
pub mod program;
pub mod renderer;
pub mod uniforms;

pub use adapter::{AdapterContext, AdapterKind, DefaultAdapter, NormalizedAdapter, UniformAdapter, UniformSink};
pub use compile::{compile_fragment, link_interface, CompiledFragment, ProgramBindings};
pub use gpu_context::GpuContext;
pub use program::{ActiveProgram, ProgramManager, SwapReport};
pub use renderer::Renderer;
pub use uniforms::{DetectionUniforms, FrameUniforms};

use std::path::Path;

/// Fragment shader text tagged with its language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// GLSL 450 fragment shader, entry point `main`
    Glsl(String),
    /// WGSL shader; the first `@fragment` entry point is used
    Wgsl(String),
}

impl ShaderSource {
    /// Guess the language of free-form text, e.g. a generated response.
    pub fn detect(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.contains("@fragment") {
            ShaderSource::Wgsl(text)
        } else {
            ShaderSource::Glsl(text)
        }
    }

    /// Pick the language from the file extension, falling back to content sniffing.
    pub fn from_path(path: &Path, text: String) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("wgsl") => ShaderSource::Wgsl(text),
            Some("frag" | "glsl" | "fs") => ShaderSource::Glsl(text),
            _ => ShaderSource::detect(text),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ShaderSource::Glsl(s) | ShaderSource::Wgsl(s) => s,
        }
    }

    pub fn language(&self) -> &'static str {
        match self {
            ShaderSource::Glsl(_) => "glsl",
            ShaderSource::Wgsl(_) => "wgsl",
        }
    }
}

/// Binding slots of the fixed bind group (group 0).
pub mod bindings {
    pub const VIDEO_TEXTURE: u32 = 0;
    pub const VIDEO_SAMPLER: u32 = 1;
    pub const FRAME_UNIFORMS: u32 = 2;
    pub const DETECTION_UNIFORMS: u32 = 3;
}

/// Fixed vertex stage. Passes the UV coordinate to location 0.
pub const VERTEX_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coords = in.tex_coords;
    return out;
}
"#;

/// Passthrough fragment stage installed at startup and on reset.
pub const DEFAULT_FRAGMENT_SHADER: &str = r#"
@group(0) @binding(0) var t_video: texture_2d<f32>;
@group(0) @binding(1) var s_video: sampler;

@fragment
fn fs_main(@location(0) tex_coords: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(t_video, s_video, tex_coords);
}
"#;

/// GLSL declarations every candidate fragment stage may rely on.
/// Sent to the generation service as the expected interface.
pub const GLSL_INTERFACE: &str = r#"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;
layout(set = 0, binding = 0) uniform texture2D u_video;
layout(set = 0, binding = 1) uniform sampler u_sampler;
layout(set = 0, binding = 2) uniform Frame {
    float u_time;
    float u_frame;
    vec2 u_resolution;
    vec2 u_source_size;
};
layout(set = 0, binding = 3) uniform Detections {
    int u_count;
    vec4 u_boxes[16];
    int u_class_ids[16];
    float u_scores[16];
};
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_language_detection() {
        assert_eq!(ShaderSource::detect("@fragment fn f() {}").language(), "wgsl");
        assert_eq!(ShaderSource::detect("#version 450\nvoid main() {}").language(), "glsl");
        assert_eq!(
            ShaderSource::from_path(&PathBuf::from("a.wgsl"), String::new()).language(),
            "wgsl"
        );
        assert_eq!(
            ShaderSource::from_path(&PathBuf::from("a.frag"), "@fragment".into()).language(),
            "glsl"
        );
    }
}
