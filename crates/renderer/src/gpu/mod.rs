//! `wgpu` implementation of [`GraphicsBackend`].
//!
//! - `context` owns instance, device and surface wiring and reconfigures the
//!   swapchain on resize.
//! - `layout` turns a program spec into a std140 block, texture bindings and
//!   the GLSL header that maps plain uniform names onto them.
//! - `program` compiles wrapped GLSL through naga and keeps one pipeline per
//!   color format.
//! - `textures` uploads decoded images once and allocates offscreen targets.
//!
//! Every draw is recorded and submitted on its own, so the post pass always
//! sees the finished offscreen pass. Screen draws go to the swapchain image
//! acquired for the frame, which `present` hands back.

mod context;
mod layout;
mod program;
mod textures;

use std::collections::BTreeMap;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{Destination, DrawError, GraphicsBackend, LinkError, ProgramHandle};
use crate::program::ProgramSpec;
use crate::types::{SurfaceSize, WindowConfig};
use crate::uniforms::{TargetId, TextureBinding, UniformSet};

use context::GpuContext;
use program::GpuProgram;
use textures::{linear_sampler, RenderTarget, TextureCache, TEXTURE_FORMAT};

struct AcquiredFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

pub struct GpuBackend {
    context: GpuContext,
    programs: Vec<GpuProgram>,
    targets: BTreeMap<TargetId, RenderTarget>,
    next_target: u32,
    textures: TextureCache,
    sampler: wgpu::Sampler,
    frame: Option<AcquiredFrame>,
}

impl GpuBackend {
    pub fn new<T>(target: &T, config: &WindowConfig) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = GpuContext::new(target, config.surface_size, config)?;
        let textures = TextureCache::new(&context.device, &context.queue);
        let sampler = linear_sampler(&context.device);
        Ok(Self {
            context,
            programs: Vec::new(),
            targets: BTreeMap::new(),
            next_target: 1,
            textures,
            sampler,
            frame: None,
        })
    }

    fn acquire(&mut self) -> Result<&wgpu::TextureView, DrawError> {
        if self.frame.is_none() {
            let texture = match self.context.surface.get_current_texture() {
                Ok(texture) => texture,
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    self.context.reconfigure();
                    return Err(DrawError::SurfaceLost("surface lost or outdated".to_string()));
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    return Err(DrawError::SurfaceLost("timed out acquiring frame".to_string()));
                }
                Err(err) => return Err(DrawError::ContextLost(err.to_string())),
            };
            let view = texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            self.frame = Some(AcquiredFrame { texture, view });
        }
        self.frame
            .as_ref()
            .map(|frame| &frame.view)
            .ok_or_else(|| DrawError::SurfaceLost("no frame acquired".to_string()))
    }

    fn texture_bind_group(&mut self, index: usize, uniforms: &UniformSet) -> Result<wgpu::BindGroup, DrawError> {
        let program = &self.programs[index];
        let mut views = Vec::with_capacity(program.layout.textures().len());
        for name in program.layout.textures() {
            let binding = uniforms
                .get(name)
                .and_then(|cell| cell.with(|value| value.as_texture().cloned()))
                .unwrap_or_default();
            views.push(binding);
        }

        let mut resolved = Vec::with_capacity(views.len());
        for binding in &views {
            let view = match binding {
                TextureBinding::Empty => self.textures.placeholder().clone(),
                TextureBinding::Image(image) => self
                    .textures
                    .view(&self.context.device, &self.context.queue, image)
                    .clone(),
                TextureBinding::Target(target) => self
                    .targets
                    .get(target)
                    .map(|target| target.view.clone())
                    .ok_or(DrawError::UnknownTarget(*target))?,
            };
            resolved.push(view);
        }

        let mut entries = Vec::with_capacity(resolved.len() * 2);
        for (index, view) in resolved.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32 * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32 * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        Ok(self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture bind group"),
            layout: &self.programs[index].texture_layout,
            entries: &entries,
        }))
    }
}

impl GraphicsBackend for GpuBackend {
    fn surface_size(&self) -> SurfaceSize {
        self.context.size
    }

    fn resize_surface(&mut self, size: SurfaceSize) {
        // A frame acquired at the old size must not be presented.
        self.frame = None;
        self.context.resize(size);
    }

    fn link_program(&mut self, spec: &ProgramSpec) -> Result<ProgramHandle, LinkError> {
        let program = GpuProgram::link(&self.context.device, spec, self.context.surface_format)?;
        let handle = ProgramHandle(self.programs.len() as u32);
        tracing::debug!(program = %spec.name, handle = handle.0, "linked GPU program");
        self.programs.push(program);
        Ok(handle)
    }

    fn create_target(&mut self, size: SurfaceSize) -> TargetId {
        let target = TargetId(self.next_target);
        self.next_target += 1;
        self.targets
            .insert(target, RenderTarget::new(&self.context.device, size));
        target
    }

    fn resize_target(&mut self, target: TargetId, size: SurfaceSize) -> Result<(), DrawError> {
        let current = self
            .targets
            .get(&target)
            .ok_or(DrawError::UnknownTarget(target))?;
        if current.size != size.at_least_one() {
            self.targets
                .insert(target, RenderTarget::new(&self.context.device, size));
        }
        Ok(())
    }

    fn draw(
        &mut self,
        program: ProgramHandle,
        uniforms: &UniformSet,
        destination: Destination,
    ) -> Result<(), DrawError> {
        let index = program.0 as usize;
        if index >= self.programs.len() {
            return Err(DrawError::UnknownProgram(program));
        }
        let textures = self.texture_bind_group(index, uniforms)?;
        let (view, format) = match destination {
            Destination::Screen => (self.acquire()?.clone(), self.context.surface_format),
            Destination::Target(target) => (
                self.targets
                    .get(&target)
                    .map(|target| target.view.clone())
                    .ok_or(DrawError::UnknownTarget(target))?,
                TEXTURE_FORMAT,
            ),
        };

        let device = &self.context.device;
        let queue = &self.context.queue;
        let linked = &mut self.programs[index];
        linked.upload(queue, uniforms);
        let pipeline = linked.pipeline(device, format);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&linked.name),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("stack pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &linked.uniform_bind_group, &[]);
            pass.set_bind_group(1, &textures, &[]);
            pass.draw(0..3, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
        tracing::trace!(program = %linked.name, ?destination, "GPU draw submitted");
        Ok(())
    }

    fn present(&mut self) -> Result<(), DrawError> {
        if let Some(frame) = self.frame.take() {
            drop(frame.view);
            frame.texture.present();
        }
        Ok(())
    }
}
