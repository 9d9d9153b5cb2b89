//! Offscreen render target with CPU readback, used by headless runs and tests.

use crate::detect::DetectionSnapshot;
use crate::error::SetupError;
use crate::frame::{PixelFormat, VideoFrame};
use crate::shader::{GpuContext, Renderer, UniformAdapter};
use anyhow::{anyhow, Result};
use std::time::Instant;
use tracing::debug;

/// An `Rgba8Unorm` texture plus a mappable buffer sized for row-aligned copies.
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
}

impl OffscreenTarget {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_row = padded_bytes_per_row(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            readback,
            width,
            height,
            padded_row,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy the target back to the CPU, blocking until the GPU is done.
    pub fn read_back(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<VideoFrame> {
        let readback_start = Instant::now();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = self.readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| anyhow!("GPU poll failed: {:?}", e))?;
        receiver.recv()??;

        let row_bytes = (self.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks_exact(self.padded_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        self.readback.unmap();
        debug!("  [Perf] GPU Readback: {:?}", readback_start.elapsed());

        Ok(VideoFrame::from_data(self.width, self.height, PixelFormat::Rgba, pixels))
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// A complete GPU stack drawing into an [`OffscreenTarget`].
pub struct HeadlessRenderer {
    gpu: GpuContext,
    renderer: Renderer,
    target: OffscreenTarget,
}

impl HeadlessRenderer {
    pub fn new(width: u32, height: u32, adapter: Box<dyn UniformAdapter>) -> Result<Self, SetupError> {
        let gpu = GpuContext::headless()?;
        let renderer = Renderer::new(&gpu.device, &gpu.queue, OffscreenTarget::FORMAT, adapter)?;
        let target = OffscreenTarget::new(&gpu.device, width, height);
        Ok(Self { gpu, renderer, target })
    }

    /// Draw one frame and read it back.
    pub fn render(&mut self, frame: Option<&VideoFrame>, snapshot: &DetectionSnapshot) -> Result<VideoFrame> {
        self.renderer
            .render(self.target.view(), self.target.size(), frame, snapshot);
        self.target.read_back(&self.gpu.device, &self.gpu.queue)
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn size(&self) -> (u32, u32) {
        self.target.size()
    }
}
