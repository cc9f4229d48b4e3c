//! wgpu backend: the screen-space field pass as a fragment shader.
//!
//! Sources live in a storage buffer that grows on demand; every other knob
//! sits in one uniform block rewritten each frame.

mod shader;

use std::sync::Arc;

use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{GpuError, RenderError};
use crate::field::FieldConfig;
use crate::render::{FrameContext, RenderBackend, RenderConfig, SourceSnapshot};

pub use shader::field_shader;
use shader::{FieldUniforms, GpuSource};

/// Draws the field into a window surface.
pub struct GpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    source_buffer: wgpu::Buffer,
    source_capacity: usize,
    uniforms: FieldUniforms,
    revision: Option<u64>,
    /// Set while the window is minimized or after dispose.
    suspended: bool,
    disposed: bool,
}

impl GpuBackend {
    pub async fn new(window: Arc<Window>, render: &RenderConfig, field: &FieldConfig) -> Result<Self, GpuError> {
        let size = window.inner_size();
        let render = render.clamped();
        let field = field.clamped();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        info!(adapter = ?adapter.get_info().name, "GPU adapter selected");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        // Colours are computed in display space, same as the CPU backends.
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        let suspended = size.width == 0 || size.height == 0;
        if !suspended {
            surface.configure(&device, &config);
        }

        let uniforms = FieldUniforms::new(&render, &field);
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Field Uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let source_capacity = 16;
        let source_buffer = create_source_buffer(&device, source_capacity);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Field Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let bind_group = create_bind_group(&device, &bind_group_layout, &uniform_buffer, &source_buffer);

        let shader_src = field_shader();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Field Shader"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Field Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Field Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok(Self {
            surface,
            device,
            queue,
            config,
            pipeline,
            bind_group_layout,
            bind_group,
            uniform_buffer,
            source_buffer,
            source_capacity,
            uniforms,
            revision: None,
            suspended,
            disposed: false,
        })
    }

    /// Current surface size in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}

impl RenderBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn upload_sources(&mut self, snapshot: &SourceSnapshot) {
        let z = self.uniforms.z_plane;
        let data: Vec<GpuSource> = snapshot
            .sources
            .iter()
            .filter(|s| s.radius > 0.0 && s.weight > 0.0 && s.position.is_finite())
            .map(|s| GpuSource {
                position_radius: [s.position.x, s.position.y, z, s.radius],
                weight: s.weight,
                _padding: [0.0; 3],
            })
            .collect();

        if data.len() > self.source_capacity {
            self.source_capacity = data.len().next_power_of_two();
            self.source_buffer = create_source_buffer(&self.device, self.source_capacity);
            self.bind_group = create_bind_group(&self.device, &self.bind_group_layout, &self.uniform_buffer, &self.source_buffer);
            debug!(capacity = self.source_capacity, "grew source buffer");
        }
        if !data.is_empty() {
            self.queue.write_buffer(&self.source_buffer, 0, bytemuck::cast_slice(&data));
        }
        self.uniforms.source_count = data.len() as u32;
        self.revision = Some(snapshot.revision);
    }

    fn uploaded_revision(&self) -> Option<u64> {
        self.revision
    }

    fn draw_frame(&mut self, ctx: &FrameContext<'_>) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::SurfaceUnavailable("backend disposed".into()));
        }
        if self.suspended {
            return Err(RenderError::SurfaceUnavailable("zero-sized surface".into()));
        }

        self.uniforms.resolution = [self.config.width as f32, self.config.height as f32];
        self.uniforms.time = ctx.time;
        self.uniforms.frame = ctx.frame as u32;
        self.queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                warn!("surface {e}, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Err(RenderError::SurfaceUnavailable(e.to_string()));
            }
            Err(e) => return Err(RenderError::SurfaceUnavailable(e.to_string())),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Field Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Field Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.suspended = width == 0 || height == 0;
        if !self.suspended && !self.disposed {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    fn dispose(&mut self) {
        if !self.disposed {
            let _ = self.device.poll(wgpu::Maintain::Wait);
            self.source_buffer.destroy();
            self.uniform_buffer.destroy();
            self.disposed = true;
            self.revision = None;
            info!("GPU backend disposed");
        }
    }
}

fn create_source_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Source Buffer"),
        size: (capacity.max(1) * std::mem::size_of::<GpuSource>()) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniforms: &wgpu::Buffer,
    sources: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Field Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: sources.as_entire_binding(),
            },
        ],
    })
}
