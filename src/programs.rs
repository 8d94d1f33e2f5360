// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::bail;

use crate::backend::{FieldFormat, FilterMode, PassUniforms, Program};

pub const SHADER_SOURCE: &str = include_str!("../shaders/fluid.wgsl");

/// One pipeline per sampling mode; the mode follows the pass inputs.
pub struct FilterPipelines {
    linear: wgpu::RenderPipeline,
    nearest: wgpu::RenderPipeline,
}

impl FilterPipelines {
    pub fn get(&self, filter: FilterMode) -> &wgpu::RenderPipeline {
        match filter {
            FilterMode::Linear => &self.linear,
            FilterMode::Nearest => &self.nearest,
        }
    }
}

/// Every program compiled for one output format.
pub struct FieldPipelines {
    splat: FilterPipelines,
    advect: FilterPipelines,
    divergence: FilterPipelines,
    pressure: FilterPipelines,
    gradient_subtract: FilterPipelines,
    display: FilterPipelines,
}

impl FieldPipelines {
    pub fn get(&self, program: Program, filter: FilterMode) -> &wgpu::RenderPipeline {
        let pipelines = match program {
            Program::Splat => &self.splat,
            Program::Advect => &self.advect,
            Program::Divergence => &self.divergence,
            Program::Pressure => &self.pressure,
            Program::GradientSubtract => &self.gradient_subtract,
            Program::Display => &self.display,
        };
        pipelines.get(filter)
    }
}

/// Compiled fluid programs for every renderable field format and the display surface.
pub struct ShaderProgramSet {
    linear_layout: wgpu::BindGroupLayout,
    nearest_layout: wgpu::BindGroupLayout,
    fields: HashMap<FieldFormat, Arc<FieldPipelines>>,
    display: FilterPipelines,
}

struct Builder<'a> {
    device: &'a wgpu::Device,
    module: wgpu::ShaderModule,
    linear: wgpu::PipelineLayout,
    nearest: wgpu::PipelineLayout,
}

impl Builder<'_> {
    fn filter_pair(&self, program: Program, format: wgpu::TextureFormat) -> FilterPipelines {
        FilterPipelines {
            linear: create_pipeline(self.device, &self.module, &self.linear, program, format),
            nearest: create_pipeline(self.device, &self.module, &self.nearest, program, format),
        }
    }

    fn field(&self, format: wgpu::TextureFormat) -> FieldPipelines {
        FieldPipelines {
            splat: self.filter_pair(Program::Splat, format),
            advect: self.filter_pair(Program::Advect, format),
            divergence: self.filter_pair(Program::Divergence, format),
            pressure: self.filter_pair(Program::Pressure, format),
            gradient_subtract: self.filter_pair(Program::GradientSubtract, format),
            display: self.filter_pair(Program::Display, format),
        }
    }
}

impl ShaderProgramSet {
    /// Compiles and links everything up front. Any validation error fails the whole set.
    ///
    /// `field_formats` are the formats the device can render fields into.
    pub fn new(
        device: &wgpu::Device,
        field_formats: &[FieldFormat],
        display_format: wgpu::TextureFormat,
    ) -> anyhow::Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Fluid Programs"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });

        let linear_layout = create_bind_group_layout(device, FilterMode::Linear);
        let nearest_layout = create_bind_group_layout(device, FilterMode::Nearest);
        let pipeline_layout = |layout: &wgpu::BindGroupLayout| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Fluid Pipeline Layout"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            })
        };
        let builder = Builder {
            device,
            linear: pipeline_layout(&linear_layout),
            nearest: pipeline_layout(&nearest_layout),
            module,
        };

        let fields = field_formats
            .iter()
            .map(|&format| (format, Arc::new(builder.field(format.texture_format()))))
            .collect();
        let display = builder.filter_pair(Program::Display, display_format);

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            bail!("Fluid programs failed to compile: {err}");
        }

        Ok(Self {
            linear_layout,
            nearest_layout,
            fields,
            display,
        })
    }

    /// Pipelines for fields of `format`, if that format was compiled.
    pub fn field(&self, format: FieldFormat) -> Option<Arc<FieldPipelines>> {
        self.fields.get(&format).cloned()
    }

    pub fn display(&self) -> &FilterPipelines {
        &self.display
    }

    pub fn layout(&self, filter: FilterMode) -> &wgpu::BindGroupLayout {
        match filter {
            FilterMode::Linear => &self.linear_layout,
            FilterMode::Nearest => &self.nearest_layout,
        }
    }
}

// binding 0: PassUniforms (dynamic offset), 1: sampler, 2-3: input fields
fn create_bind_group_layout(device: &wgpu::Device, filter: FilterMode) -> wgpu::BindGroupLayout {
    let filterable = filter == FilterMode::Linear;
    let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    let sampler_type = if filterable {
        wgpu::SamplerBindingType::Filtering
    } else {
        wgpu::SamplerBindingType::NonFiltering
    };

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(if filterable {
            "Fluid Bind Group Layout (linear)"
        } else {
            "Fluid Bind Group Layout (nearest)"
        }),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<PassUniforms>() as u64),
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(sampler_type),
                count: None,
            },
            texture_entry(2),
            texture_entry(3),
        ],
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    program: Program,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(program.label()),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: program.entry_point(),
            // Float32 targets are not blendable; every pass overwrites.
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
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
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}
