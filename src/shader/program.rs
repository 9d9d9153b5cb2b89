//! Owns the active render pipeline and swaps its fragment stage at runtime.

use super::compile::{compile_fragment, link_interface, CompiledFragment, ProgramBindings};
use super::{ShaderSource, DEFAULT_FRAGMENT_SHADER, VERTEX_SHADER};
use crate::error::{SetupError, ShaderError};
use crate::frame::QuadVertex;
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The program used by every draw until the next successful swap.
pub struct ActiveProgram {
    pipeline: wgpu::RenderPipeline,
    fragment: CompiledFragment,
    bindings: ProgramBindings,
    installed_at: Instant,
}

impl ActiveProgram {
    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub fn bindings(&self) -> ProgramBindings {
        self.bindings
    }

    pub fn source(&self) -> &ShaderSource {
        &self.fragment.source
    }

    pub fn entry_point(&self) -> &str {
        &self.fragment.entry_point
    }

    pub fn installed_at(&self) -> Instant {
        self.installed_at
    }
}

/// Timings of a successful swap.
#[derive(Debug, Clone, Copy)]
pub struct SwapReport {
    pub compile_time: Duration,
    pub link_time: Duration,
    pub bindings: ProgramBindings,
}

pub struct ProgramManager {
    device: wgpu::Device,
    vertex_module: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    target_format: wgpu::TextureFormat,
    active: ActiveProgram,
    swaps: u64,
}

impl ProgramManager {
    /// Build the fixed vertex stage and install the passthrough fragment stage.
    pub fn new(
        device: &wgpu::Device,
        bind_group_layout: &wgpu::BindGroupLayout,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self, SetupError> {
        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(VERTEX_SHADER)),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[bind_group_layout],
            immediate_size: 0,
        });

        let fragment = compile_fragment(&ShaderSource::Wgsl(DEFAULT_FRAGMENT_SHADER.to_string()))?;
        let bindings = link_interface(&fragment)?;
        let pipeline = build_pipeline(device, &vertex_module, &pipeline_layout, target_format, &fragment, 0)?;

        Ok(Self {
            device: device.clone(),
            vertex_module,
            pipeline_layout,
            target_format,
            active: ActiveProgram {
                pipeline,
                fragment,
                bindings,
                installed_at: Instant::now(),
            },
            swaps: 0,
        })
    }

    /// Compile and link `source`, and make it the active fragment stage on success.
    ///
    /// On any error the previously active program stays installed untouched.
    pub fn replace_fragment_stage(&mut self, source: ShaderSource) -> Result<SwapReport, ShaderError> {
        let started = Instant::now();
        let fragment = compile_fragment(&source).inspect_err(|e| warn!("Fragment stage rejected: {}", e))?;
        let compile_time = started.elapsed();

        let link_started = Instant::now();
        let bindings = link_interface(&fragment).inspect_err(|e| warn!("Fragment stage rejected: {}", e))?;
        let pipeline = build_pipeline(
            &self.device,
            &self.vertex_module,
            &self.pipeline_layout,
            self.target_format,
            &fragment,
            self.swaps + 1,
        )
        .inspect_err(|e| warn!("Fragment stage rejected: {}", e))?;
        let link_time = link_started.elapsed();

        self.active = ActiveProgram {
            pipeline,
            fragment,
            bindings,
            installed_at: Instant::now(),
        };
        self.swaps += 1;

        info!(
            "Installed {} fragment stage #{} (compile {:?}, link {:?}, detections bound: {})",
            self.active.source().language(),
            self.swaps,
            compile_time,
            link_time,
            bindings.detections
        );

        Ok(SwapReport {
            compile_time,
            link_time,
            bindings,
        })
    }

    /// Reinstall the passthrough fragment stage.
    pub fn reset_to_default(&mut self) -> Result<SwapReport, ShaderError> {
        self.replace_fragment_stage(ShaderSource::Wgsl(DEFAULT_FRAGMENT_SHADER.to_string()))
    }

    pub fn active(&self) -> &ActiveProgram {
        &self.active
    }

    pub fn current_source(&self) -> &ShaderSource {
        self.active.source()
    }

    /// Number of successful swaps since startup.
    pub fn swap_count(&self) -> u64 {
        self.swaps
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }
}

/// Create the fragment module and pipeline, capturing any wgpu error as a link error.
///
/// Without the scopes a rejected candidate would reach the device's uncaptured-error handler, which panics.
fn build_pipeline(
    device: &wgpu::Device,
    vertex_module: &wgpu::ShaderModule,
    pipeline_layout: &wgpu::PipelineLayout,
    target_format: wgpu::TextureFormat,
    fragment: &CompiledFragment,
    index: u64,
) -> Result<wgpu::RenderPipeline, ShaderError> {
    let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let internal = device.push_error_scope(wgpu::ErrorFilter::Internal);

    let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("Fragment Shader {}", index)),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&fragment.wgsl)),
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("Render Pipeline {}", index)),
        layout: Some(pipeline_layout),
        vertex: wgpu::VertexState {
            module: vertex_module,
            entry_point: Some("vs_main"),
            buffers: &[QuadVertex::layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &fragment_module,
            entry_point: Some(&fragment.entry_point),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    });

    // Scopes pop innermost first.
    let internal_error = pollster::block_on(internal.pop());
    let validation_error = pollster::block_on(validation.pop());
    match validation_error.or(internal_error) {
        Some(error) => Err(ShaderError::Link(error.to_string())),
        None => Ok(pipeline),
    }
}
