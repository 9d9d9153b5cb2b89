//! Shared GPU context for wgpu resources.

use crate::error::SetupError;
use std::sync::Arc;
use tracing::info;
use winit::window::Window;

/// Shared GPU resources used by the renderer and its output targets.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Initialize a context for offscreen rendering only.
    pub fn headless() -> Result<Self, SetupError> {
        let instance = Self::instance();
        Self::with_surface(instance, None)
    }

    /// Initialize a context compatible with the window, returning the window's surface too.
    pub fn for_window(window: Arc<Window>) -> Result<(Self, wgpu::Surface<'static>), SetupError> {
        let instance = Self::instance();
        let surface = instance
            .create_surface(window)
            .map_err(|e| SetupError::Surface(e.to_string()))?;
        let context = Self::with_surface(instance, Some(&surface))?;
        Ok((context, surface))
    }

    fn instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    fn with_surface(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self, SetupError> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))
        .map_err(|e| SetupError::NoAdapter(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Prism Device"),
            required_features: wgpu::Features::empty(),
            required_limits: if surface.is_some() {
                wgpu::Limits::default()
            } else {
                wgpu::Limits::downlevel_defaults()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| SetupError::NoDevice(e.to_string()))?;

        let adapter_info = adapter.get_info();
        info!("Using GPU adapter: {} ({:?})", adapter_info.name, adapter_info.backend);

        Ok(Self {
            device,
            queue,
            instance,
            adapter,
        })
    }
}
