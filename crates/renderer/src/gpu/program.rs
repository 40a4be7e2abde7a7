use std::borrow::Cow;
use std::collections::HashMap;

use wgpu::naga::ShaderStage;

use crate::backend::LinkError;
use crate::program::ProgramSpec;
use crate::uniforms::UniformSet;

use super::layout::UniformLayout;

/// Linked program: compiled modules, its uniform buffer and one pipeline per
/// color format it has drawn to.
pub(crate) struct GpuProgram {
    pub name: String,
    pub layout: UniformLayout,
    pub uniform_buffer: wgpu::Buffer,
    pub uniform_bind_group: wgpu::BindGroup,
    pub texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    staging: Vec<u8>,
}

fn texture_layout_entries(count: usize) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(count * 2);
    for index in 0..count as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    vertex: &wgpu::ShaderModule,
    fragment: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex,
            entry_point: Some("main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: fragment,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

impl GpuProgram {
    /// Compiles the wrapped sources and builds a pipeline for `format`.
    /// Validation errors are captured with an error scope and returned as a
    /// link failure instead of reaching the device's uncaptured handler.
    pub fn link(
        device: &wgpu::Device,
        spec: &ProgramSpec,
        format: wgpu::TextureFormat,
    ) -> Result<Self, LinkError> {
        let layout = UniformLayout::new(spec);
        let fragment_source = layout.wrap(&spec.source.fragment);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} vertex", spec.source.label)),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(spec.source.vertex.clone()),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} fragment", spec.source.label)),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(fragment_source),
                stage: ShaderStage::Fragment,
                defines: &[],
            },
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &texture_layout_entries(layout.textures().len()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&spec.name),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform buffer"),
            size: layout.size() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let pipeline = create_pipeline(device, &spec.name, &pipeline_layout, &vertex, &fragment, format);

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(LinkError {
                program: spec.name.clone(),
                message: err.to_string(),
            });
        }

        let staging = vec![0; layout.size()];
        Ok(Self {
            name: spec.name.clone(),
            layout,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            pipeline_layout,
            vertex,
            fragment,
            pipelines: HashMap::from([(format, pipeline)]),
            staging,
        })
    }

    pub fn pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        let Self {
            name,
            pipeline_layout,
            vertex,
            fragment,
            pipelines,
            ..
        } = self;
        pipelines.entry(format).or_insert_with(|| {
            tracing::debug!(program = %name, ?format, "building pipeline for additional format");
            create_pipeline(device, name, pipeline_layout, vertex, fragment, format)
        })
        .clone()
    }

    /// Packs `uniforms` and queues the buffer write.
    pub fn upload(&mut self, queue: &wgpu::Queue, uniforms: &UniformSet) {
        self.layout.write(uniforms, &mut self.staging);
        queue.write_buffer(&self.uniform_buffer, 0, &self.staging);
    }
}
