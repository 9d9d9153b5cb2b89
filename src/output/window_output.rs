//! Window output using winit and a wgpu surface.

use crate::detect::DetectionSnapshot;
use crate::error::SetupError;
use crate::frame::VideoFrame;
use crate::shader::{GpuContext, Renderer, UniformAdapter};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Configuration for window output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Prism".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Handles window rendering state: the surface and the renderer drawing into it.
pub struct WindowRenderer {
    surface: wgpu::Surface<'static>,
    gpu: GpuContext,
    config: wgpu::SurfaceConfiguration,
    renderer: Renderer,
    window: Arc<Window>,
}

impl WindowRenderer {
    pub fn new(window: Arc<Window>, adapter: Box<dyn UniformAdapter>) -> Result<Self, SetupError> {
        let (gpu, surface) = GpuContext::for_window(window.clone())?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&gpu.adapter);
        // Video bytes are already gamma encoded, so avoid a second sRGB encode on store.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| SetupError::Surface("surface reports no formats".to_string()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);

        let renderer = Renderer::new(&gpu.device, &gpu.queue, surface_format, adapter)?;

        Ok(Self {
            surface,
            gpu,
            config,
            renderer,
            window,
        })
    }

    /// Resizes the surface.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.gpu.device, &self.config);
        }
    }

    /// Draw one frame to the window. Returns the frame rate when a reporting window closes.
    pub fn render(&mut self, frame: Option<&VideoFrame>, snapshot: &DetectionSnapshot) -> Result<Option<f32>> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("Surface lost, reconfiguring");
                self.surface.configure(&self.gpu.device, &self.config);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let fps = self
            .renderer
            .render(&view, (self.config.width, self.config.height), frame, snapshot);

        self.window.pre_present_notify();
        output.present();
        Ok(fps)
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// Returns a reference to the window.
    pub fn window(&self) -> &Window {
        &self.window
    }
}
