use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::types::{GpuPowerPreference, SurfaceSize, WindowConfig};

/// Instance, device and configured surface for one window.
pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub size: SurfaceSize,
    pub surface_format: wgpu::TextureFormat,
}

impl GpuContext {
    /// Creates a surface for `target`.
    ///
    /// `target` must outlive the returned context; the window owner keeps the
    /// window alive for as long as the context exists.
    pub(crate) fn new<T>(target: &T, initial_size: SurfaceSize, config: &WindowConfig) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;

        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let power_preference = match config.power {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let size = initial_size.at_least_one();
        let max_dimension = limits.max_texture_dimension_2d;
        if size.width > max_dimension || size.height > max_dimension {
            anyhow::bail!("GPU max texture dimension is {max_dimension}, requested surface is {size}");
        }

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no supported formats")?;
        if surface_format.is_srgb() {
            tracing::warn!(?surface_format, "no linear (non-sRGB) surface format available");
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("shaderstack device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let wanted = if config.vsync {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::Immediate
        };
        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wanted)
            .unwrap_or(wgpu::PresentMode::Fifo);
        tracing::debug!(?present_mode, vsync = config.vsync, "using present mode");

        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        Ok(Self {
            _instance: instance,
            surface,
            device,
            queue,
            config: surface_config,
            size,
            surface_format,
        })
    }

    pub(crate) fn resize(&mut self, new_size: SurfaceSize) {
        if new_size.is_empty() {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Reapplies the current configuration after a lost or outdated surface.
    pub(crate) fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
    }
}
