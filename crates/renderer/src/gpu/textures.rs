use std::collections::HashMap;
use std::sync::{Arc, Weak};

use curves::{TextureHandle, TextureImage};
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::types::SurfaceSize;

/// Format of offscreen targets and uploaded images.
pub(crate) const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uploaded images kept resident at most.
const RESIDENT_LIMIT: usize = 64;

pub(crate) fn linear_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("stack sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn upload(device: &wgpu::Device, queue: &wgpu::Queue, image: &TextureImage) -> wgpu::TextureView {
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(image.label.as_str()),
            size: wgpu::Extent3d {
                width: image.width.max(1),
                height: image.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        &image.rgba,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

struct Resident {
    source: Weak<TextureImage>,
    view: wgpu::TextureView,
    last_used: u64,
}

/// GPU copies of decoded images, keyed by the image allocation.
pub(crate) struct TextureCache {
    resident: HashMap<usize, Resident>,
    placeholder: wgpu::TextureView,
    clock: u64,
}

impl TextureCache {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let transparent = TextureImage::from_rgba(1, 1, vec![0, 0, 0, 0], "placeholder texture");
        Self {
            resident: HashMap::new(),
            placeholder: upload(device, queue, &transparent),
            clock: 0,
        }
    }

    /// Samples as transparent black, like an empty binding.
    pub fn placeholder(&self) -> &wgpu::TextureView {
        &self.placeholder
    }

    pub fn view(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &TextureHandle,
    ) -> &wgpu::TextureView {
        self.clock += 1;
        let key = Arc::as_ptr(image) as usize;
        let fresh = self.resident.get(&key).is_some_and(|entry| {
            entry
                .source
                .upgrade()
                .is_some_and(|live| Arc::ptr_eq(&live, image))
        });
        if !fresh {
            self.resident.remove(&key);
            self.evict();
        }
        let clock = self.clock;
        let entry = self.resident.entry(key).or_insert_with(|| {
            tracing::debug!(label = %image.label, width = image.width, height = image.height, "uploading texture");
            Resident {
                source: Arc::downgrade(image),
                view: upload(device, queue, image),
                last_used: clock,
            }
        });
        entry.last_used = clock;
        &entry.view
    }

    fn evict(&mut self) {
        self.resident.retain(|_, entry| entry.source.strong_count() > 0);
        while self.resident.len() >= RESIDENT_LIMIT {
            let Some(oldest) = self
                .resident
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| *key)
            else {
                break;
            };
            self.resident.remove(&oldest);
        }
    }
}

/// Offscreen color target.
pub(crate) struct RenderTarget {
    pub view: wgpu::TextureView,
    pub size: SurfaceSize,
}

impl RenderTarget {
    pub fn new(device: &wgpu::Device, size: SurfaceSize) -> Self {
        let size = size.at_least_one();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("stack render target"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            size,
        }
    }
}
