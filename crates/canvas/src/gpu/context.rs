use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::device::WgpuDevice;
use crate::device::{CapabilityLevel, ContextError, ContextOptions, DeviceFactory};
use crate::target::SurfaceSize;

/// Surface, device and queue for one window.
pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if self.config.width == width && self.config.height == height {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    pub(crate) fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }
}

/// Creates [`WgpuDevice`]s presenting into `window`.
pub struct WgpuFactory<W> {
    window: Arc<W>,
    size: SurfaceSize,
}

impl<W> WgpuFactory<W>
where
    W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
{
    /// `size` is the initial drawable size in physical pixels.
    pub fn new(window: Arc<W>, size: SurfaceSize) -> Self {
        Self { window, size }
    }
}

impl<W> DeviceFactory for WgpuFactory<W>
where
    W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
{
    type Device = WgpuDevice;

    fn create_device(
        &self,
        level: CapabilityLevel,
        options: &ContextOptions,
    ) -> Result<WgpuDevice, ContextError> {
        create_context(Arc::clone(&self.window), self.size, level, options)
            .map(|context| WgpuDevice::new(context, options))
            .map_err(|err| ContextError::Unavailable {
                level,
                reason: format!("{err:#}"),
            })
    }
}

fn backends_for(level: CapabilityLevel) -> wgpu::Backends {
    match level {
        CapabilityLevel::HighPerformance | CapabilityLevel::LowPower => wgpu::Backends::PRIMARY,
        CapabilityLevel::Compatibility => wgpu::Backends::GL,
        CapabilityLevel::Software => wgpu::Backends::all(),
    }
}

fn create_context<W>(
    window: Arc<W>,
    size: SurfaceSize,
    level: CapabilityLevel,
    options: &ContextOptions,
) -> Result<GpuContext>
where
    W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
{
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: backends_for(level),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    });

    let surface = instance
        .create_surface(window)
        .context("failed to create rendering surface")?;

    let power_preference = match level {
        CapabilityLevel::HighPerformance => wgpu::PowerPreference::HighPerformance,
        CapabilityLevel::LowPower | CapabilityLevel::Software => wgpu::PowerPreference::LowPower,
        CapabilityLevel::Compatibility => wgpu::PowerPreference::None,
    };
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference,
        compatible_surface: Some(&surface),
        force_fallback_adapter: level == CapabilityLevel::Software,
    }))
    .context("failed to find a suitable GPU adapter")?;

    let info = adapter.get_info();
    tracing::debug!(
        %level,
        name = %info.name,
        backend = ?info.backend,
        device_type = ?info.device_type,
        "selected GPU adapter"
    );
    if level != CapabilityLevel::Software && info.device_type == wgpu::DeviceType::Cpu {
        anyhow::bail!("adapter {} is a software rasterizer", info.name);
    }

    let limits = adapter.limits();
    let width = size.width.max(1);
    let height = size.height.max(1);
    let max_dimension = limits.max_texture_dimension_2d;
    if width > max_dimension || height > max_dimension {
        anyhow::bail!(
            "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}"
        );
    }

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("shaderpad device"),
        required_features: wgpu::Features::empty(),
        required_limits: limits,
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")?;

    let caps = surface.get_capabilities(&adapter);
    // GLSL sources write display-referred values, so skip the sRGB encode.
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .context("surface reports no supported formats")?;

    let present_mode = if options.vsync {
        wgpu::PresentMode::Fifo
    } else {
        [wgpu::PresentMode::Immediate, wgpu::PresentMode::Mailbox]
            .into_iter()
            .find(|mode| caps.present_modes.contains(mode))
            .unwrap_or(wgpu::PresentMode::Fifo)
    };

    let alpha_mode = if options.transparent
        && caps
            .alpha_modes
            .contains(&wgpu::CompositeAlphaMode::PreMultiplied)
    {
        wgpu::CompositeAlphaMode::PreMultiplied
    } else {
        caps.alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto)
    };
    tracing::debug!(?format, ?present_mode, ?alpha_mode, "configuring surface");

    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width,
        height,
        present_mode,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&device, &config);

    Ok(GpuContext {
        _instance: instance,
        surface,
        device,
        queue,
        config,
    })
}
