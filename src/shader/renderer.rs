//! Per-frame drawing of the active program over the latest video frame.

use super::adapter::{AdapterContext, UniformAdapter, UniformSink};
use super::bindings;
use super::program::ProgramManager;
use super::uniforms::{DetectionUniforms, FrameUniforms};
use crate::detect::DetectionSnapshot;
use crate::error::SetupError;
use crate::frame::{PixelFormat, QuadVertex, VideoFrame};
use crate::utils::FpsCounter;
use std::borrow::Cow;
use std::time::Instant;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// Uploads detection bytes straight into the uniform buffer.
struct QueueSink<'a> {
    queue: &'a wgpu::Queue,
    buffer: &'a wgpu::Buffer,
}

impl UniformSink for QueueSink<'_> {
    fn write_detections(&mut self, offset: u64, bytes: &[u8]) {
        self.queue.write_buffer(self.buffer, offset, bytes);
    }
}

pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: ProgramManager,
    adapter: Box<dyn UniformAdapter>,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    frame_uniforms: wgpu::Buffer,
    detection_uniforms: wgpu::Buffer,
    video_texture: wgpu::Texture,
    video_size: (u32, u32),
    source_size: (u32, u32),
    bind_group: wgpu::BindGroup,
    started: Instant,
    frame_index: u64,
    fps: FpsCounter,
}

impl Renderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target_format: wgpu::TextureFormat,
        adapter: Box<dyn UniformAdapter>,
    ) -> Result<Self, SetupError> {
        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Prism Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: bindings::VIDEO_TEXTURE,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: bindings::VIDEO_SAMPLER,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                uniform_entry(bindings::FRAME_UNIFORMS),
                uniform_entry(bindings::DETECTION_UNIFORMS),
            ],
        });

        let programs = ProgramManager::new(device, &bind_group_layout, target_format)?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Video Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let frame_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Uniforms"),
            contents: bytemuck::bytes_of(&FrameUniforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let detection_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Detection Uniforms"),
            contents: bytemuck::bytes_of(&DetectionUniforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        // 1x1 black placeholder until the first valid frame arrives
        let video_texture = create_video_texture(device, 1, 1);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &video_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let bind_group = create_bind_group(
            device,
            &bind_group_layout,
            &video_texture,
            &sampler,
            &frame_uniforms,
            &detection_uniforms,
        );

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            programs,
            adapter,
            bind_group_layout,
            sampler,
            vertex_buffer,
            frame_uniforms,
            detection_uniforms,
            video_texture,
            video_size: (1, 1),
            source_size: (0, 0),
            bind_group,
            started: Instant::now(),
            frame_index: 0,
            fps: FpsCounter::new(),
        })
    }

    /// Draw one frame into `view`. Returns the frame rate when a reporting window closes.
    pub fn render(
        &mut self,
        view: &wgpu::TextureView,
        target_size: (u32, u32),
        frame: Option<&VideoFrame>,
        snapshot: &DetectionSnapshot,
    ) -> Option<f32> {
        let (width, height) = target_size;
        if width == 0 || height == 0 {
            return None;
        }

        if let Some(frame) = frame.filter(|f| f.is_ready()) {
            self.upload_frame(frame);
        }

        let uniforms = FrameUniforms {
            time: self.started.elapsed().as_secs_f32(),
            frame: self.frame_index as f32,
            resolution: [width as f32, height as f32],
            source_size: [self.source_size.0 as f32, self.source_size.1 as f32],
            _pad: [0.0; 2],
        };
        self.queue
            .write_buffer(&self.frame_uniforms, 0, bytemuck::bytes_of(&uniforms));

        let active = self.programs.active();
        let mut sink = QueueSink {
            queue: &self.queue,
            buffer: &self.detection_uniforms,
        };
        let mut ctx = AdapterContext {
            sink: &mut sink,
            bindings: active.bindings(),
            snapshot,
            resolution: uniforms.resolution,
            source_size: uniforms.source_size,
        };
        self.adapter.apply(&mut ctx);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            render_pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            render_pass.set_pipeline(active.pipeline());
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.draw(0..QuadVertex::VERTICES.len() as u32, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        self.frame_index += 1;
        self.fps.update()
    }

    fn upload_frame(&mut self, frame: &VideoFrame) {
        let size = (frame.width, frame.height);
        if size != self.video_size {
            info!("Creating video texture {}x{}", frame.width, frame.height);
            self.video_texture = create_video_texture(&self.device, frame.width, frame.height);
            self.bind_group = create_bind_group(
                &self.device,
                &self.bind_group_layout,
                &self.video_texture,
                &self.sampler,
                &self.frame_uniforms,
                &self.detection_uniforms,
            );
            self.video_size = size;
        }

        let rgba: Cow<'_, [u8]> = match frame.format {
            PixelFormat::Rgba => Cow::Borrowed(&frame.data),
            PixelFormat::Rgb => Cow::Owned(frame.to_rgba().data),
        };

        let upload_start = Instant::now();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.video_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba[..(frame.width as usize) * (frame.height as usize) * 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        debug!("  [Perf] Texture Upload: {:?}", upload_start.elapsed());
        self.source_size = size;
    }

    pub fn programs(&self) -> &ProgramManager {
        &self.programs
    }

    pub fn programs_mut(&mut self) -> &mut ProgramManager {
        &mut self.programs
    }

    pub fn set_adapter(&mut self, adapter: Box<dyn UniformAdapter>) {
        info!("Uniform adapter: {}", adapter.name());
        self.adapter = adapter;
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Size of the last uploaded video frame, `(0, 0)` before the first one.
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

fn create_video_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Video Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    video_texture: &wgpu::Texture,
    sampler: &wgpu::Sampler,
    frame_uniforms: &wgpu::Buffer,
    detection_uniforms: &wgpu::Buffer,
) -> wgpu::BindGroup {
    let video_view = video_texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Prism Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: bindings::VIDEO_TEXTURE,
                resource: wgpu::BindingResource::TextureView(&video_view),
            },
            wgpu::BindGroupEntry {
                binding: bindings::VIDEO_SAMPLER,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: bindings::FRAME_UNIFORMS,
                resource: frame_uniforms.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: bindings::DETECTION_UNIFORMS,
                resource: detection_uniforms.as_entire_binding(),
            },
        ],
    })
}
