use std::collections::{BTreeMap, HashMap};

use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::glsl::{self, StageInterface};
use super::layout::{self, BlockLayout, BlockSlot};
use super::texture::GpuTexture;
use crate::device::{
    AttributeBinding, ContextOptions, DeviceError, GraphicsDevice, ProgramHandle, StageHandle,
    StageKind, TextureHandle, UniformLocation,
};
use crate::textures::{TextureImage, TextureOptions};
use crate::uniforms::UniformData;

#[derive(Debug, Clone, Copy)]
enum UniformSlot {
    Block(BlockSlot),
    Sampler(usize),
}

struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    layout: BlockLayout,
    staging: Vec<u8>,
    samplers: Vec<String>,
    sampler_units: Vec<Option<u32>>,
    slots: Vec<UniformSlot>,
    slot_names: HashMap<String, UniformLocation>,
}

struct Geometry {
    positions: wgpu::Buffer,
    texcoords: wgpu::Buffer,
}

/// [`GraphicsDevice`] rendering into a window surface through `wgpu`.
pub struct WgpuDevice {
    context: GpuContext,
    stages: HashMap<StageHandle, StageInterface>,
    programs: HashMap<ProgramHandle, WgpuProgram>,
    textures: HashMap<TextureHandle, GpuTexture>,
    units: BTreeMap<u32, TextureHandle>,
    placeholder: GpuTexture,
    uniform_layout: wgpu::BindGroupLayout,
    geometry: Option<Geometry>,
    clear_color: wgpu::Color,
    next_id: u32,
}

impl WgpuDevice {
    pub(crate) fn new(context: GpuContext, options: &ContextOptions) -> Self {
        let placeholder =
            GpuTexture::placeholder(&context.device, &context.queue, "unbound texture unit");
        let uniform_layout =
            context
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("canvas uniform layout"),
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
        Self {
            context,
            stages: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            units: BTreeMap::new(),
            placeholder,
            uniform_layout,
            geometry: None,
            clear_color: to_color(options.background),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Surface format chosen when the context was created.
    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.context.config.format
    }

    fn build_program(
        &self,
        vertex: &StageInterface,
        fragment: &StageInterface,
        attributes: &[AttributeBinding],
    ) -> Result<WgpuProgram, String> {
        let interface = glsl::link_interface(vertex, fragment, attributes)?;
        let vertex_source = glsl::emit_stage(vertex, &interface);
        let fragment_source = glsl::emit_stage(fragment, &interface);
        let device = &self.context.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("canvas vertex stage"),
            source: glsl::shader_source(&vertex_source, StageKind::Vertex),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("canvas fragment stage"),
            source: glsl::shader_source(&fragment_source, StageKind::Fragment),
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("canvas texture layout"),
            entries: &texture_layout_entries(interface.samplers.len()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("canvas pipeline layout"),
            bind_group_layouts: &[&self.uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let vertex_buffers = [
            vertex_buffer_layout(&ATTRIBUTES[0]),
            vertex_buffer_layout(&ATTRIBUTES[1]),
        ];
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("canvas pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &vertex_buffers,
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
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.context.config.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(format!("ERROR: Linking failed: {error}"));
        }

        let layout = BlockLayout::new(&interface.uniforms);
        let staging = vec![0u8; layout.size() as usize];
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("canvas uniforms"),
            contents: &staging,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("canvas uniform bind group"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        tracing::debug!(
            uniforms = interface.uniforms.len(),
            samplers = interface.samplers.len(),
            block_size = layout.size(),
            "linked program"
        );
        Ok(WgpuProgram {
            pipeline,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            layout,
            staging,
            sampler_units: vec![None; interface.samplers.len()],
            samplers: interface.samplers,
            slots: Vec::new(),
            slot_names: HashMap::new(),
        })
    }
}

const ATTRIBUTES: [[wgpu::VertexAttribute; 1]; 2] = [
    [wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 0,
        shader_location: 0,
    }],
    [wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 0,
        shader_location: 1,
    }],
];

fn vertex_buffer_layout(attributes: &[wgpu::VertexAttribute]) -> wgpu::VertexBufferLayout<'_> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    }
}

fn texture_layout_entries(samplers: usize) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(samplers * 2);
    for index in 0..samplers as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

fn to_color(color: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: color[0] as f64,
        g: color[1] as f64,
        b: color[2] as f64,
        a: color[3] as f64,
    }
}

impl GraphicsDevice for WgpuDevice {
    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<StageHandle, String> {
        let stage = glsl::parse_stage(kind, source)?;
        let generated = glsl::emit_stage(&stage, &glsl::standalone_interface(&stage));
        glsl::validate(kind, &generated)?;
        let handle = StageHandle::new(self.next_id());
        self.stages.insert(handle, stage);
        Ok(handle)
    }

    fn release_stage(&mut self, stage: StageHandle) {
        self.stages.remove(&stage);
    }

    fn link_program(
        &mut self,
        stages: &[StageHandle],
        attributes: &[AttributeBinding],
    ) -> Result<ProgramHandle, String> {
        let mut vertex = None;
        let mut fragment = None;
        for handle in stages {
            let stage = self
                .stages
                .get(handle)
                .ok_or_else(|| format!("ERROR: Linking failed: unknown stage {}", handle.raw()))?;
            let slot = match stage.kind {
                StageKind::Vertex => &mut vertex,
                StageKind::Fragment => &mut fragment,
            };
            if slot.replace(stage).is_some() {
                return Err(format!(
                    "ERROR: Linking failed: more than one {} shader attached",
                    stage.kind
                ));
            }
        }
        let vertex = vertex.ok_or("ERROR: Linking failed: no vertex shader attached")?;
        let fragment = fragment.ok_or("ERROR: Linking failed: no fragment shader attached")?;

        let program = self.build_program(vertex, fragment, attributes)?;
        let handle = ProgramHandle::new(self.next_id());
        self.programs.insert(handle, program);
        Ok(handle)
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn upload_geometry(&mut self, positions: &[[f32; 2]], texcoords: &[[f32; 2]]) {
        let device = &self.context.device;
        let buffer = |label: &str, data: &[[f32; 2]]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::VERTEX,
            })
        };
        self.geometry = Some(Geometry {
            positions: buffer("canvas quad positions", positions),
            texcoords: buffer("canvas quad texcoords", texcoords),
        });
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get_mut(&program)?;
        if let Some(location) = program.slot_names.get(name) {
            return Some(*location);
        }
        let slot = match program.samplers.iter().position(|sampler| sampler == name) {
            Some(index) => UniformSlot::Sampler(index),
            None => UniformSlot::Block(program.layout.locate(name)?),
        };
        let location = UniformLocation::new(program.slots.len() as u32);
        program.slots.push(slot);
        program.slot_names.insert(name.to_owned(), location);
        Some(location)
    }

    fn upload_uniform(
        &mut self,
        program: ProgramHandle,
        location: UniformLocation,
        value: &UniformData,
    ) {
        let Some(program) = self.programs.get_mut(&program) else {
            return;
        };
        match program.slots.get(location.raw() as usize) {
            Some(UniformSlot::Block(slot)) => {
                layout::write_uniform(&mut program.staging, *slot, value);
            }
            Some(UniformSlot::Sampler(index)) => match value {
                UniformData::Int(unit) if *unit >= 0 => {
                    program.sampler_units[*index] = Some(*unit as u32);
                }
                other => tracing::debug!(
                    value = other.type_name(),
                    "ignoring non-unit value for sampler uniform"
                ),
            },
            None => tracing::warn!(location = location.raw(), "unknown uniform location"),
        }
    }

    fn create_texture(&mut self, label: &str) -> Result<TextureHandle, DeviceError> {
        let texture = GpuTexture::placeholder(&self.context.device, &self.context.queue, label);
        let handle = TextureHandle::new(self.next_id());
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        image: &TextureImage,
        options: &TextureOptions,
    ) -> Result<(), DeviceError> {
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or(DeviceError::UnknownTexture(texture))?;
        let max = self.context.device.limits().max_texture_dimension_2d;
        if image.width() > max || image.height() > max {
            return Err(DeviceError::Other(format!(
                "texture is {}x{}, device maximum is {max}",
                image.width(),
                image.height()
            )));
        }
        entry.write(&self.context.device, &self.context.queue, image, options);
        Ok(())
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        self.units.retain(|_, bound| *bound != texture);
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.units.insert(unit, texture);
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.clear_color = to_color(color);
    }

    fn draw(&mut self, program: ProgramHandle, vertex_count: u32) -> Result<(), DeviceError> {
        let geometry = self.geometry.as_ref().ok_or(DeviceError::MissingGeometry)?;
        let handle = program;
        let program = self
            .programs
            .get_mut(&handle)
            .ok_or(DeviceError::UnknownProgram(handle))?;

        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.context.reconfigure();
                return Err(DeviceError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::Timeout) => return Err(DeviceError::Timeout),
            Err(err) => return Err(DeviceError::Other(err.to_string())),
        };

        layout::write_viewport(
            &mut program.staging,
            self.context.config.width,
            self.context.config.height,
        );
        self.context
            .queue
            .write_buffer(&program.uniform_buffer, 0, &program.staging);

        let bound: Vec<&GpuTexture> = program
            .sampler_units
            .iter()
            .map(|unit| {
                unit.and_then(|unit| self.units.get(&unit))
                    .and_then(|texture| self.textures.get(texture))
                    .unwrap_or(&self.placeholder)
            })
            .collect();
        let mut entries = Vec::with_capacity(bound.len() * 2);
        for (index, texture) in bound.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32 * 2,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32 * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            });
        }
        let texture_bind_group = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("canvas texture bind group"),
                layout: &program.texture_layout,
                entries: &entries,
            });

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("canvas frame encoder"),
                });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("canvas pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &program.uniform_bind_group, &[]);
            pass.set_bind_group(1, &texture_bind_group, &[]);
            pass.set_vertex_buffer(0, geometry.positions.slice(..));
            pass.set_vertex_buffer(1, geometry.texcoords.slice(..));
            pass.draw(0..vertex_count, 0..1);
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}
