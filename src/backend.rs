// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! The seam between the solver and whatever executes its passes.
//!
//! The stepper only ever talks to a [`FieldBackend`]: allocate render
//! targets, clear them, run one of the fixed [`Program`]s from some input
//! targets into an output target, and draw density to the surface.

use bytemuck::{Pod, Zeroable};

/// Numeric texel format of a field, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldFormat {
    Float32,
    Float16,
    Unorm8,
}

impl FieldFormat {
    pub const PREFERENCE: [FieldFormat; 3] = [FieldFormat::Float32, FieldFormat::Float16, FieldFormat::Unorm8];

    pub fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            FieldFormat::Float32 => wgpu::TextureFormat::Rgba32Float,
            FieldFormat::Float16 => wgpu::TextureFormat::Rgba16Float,
            FieldFormat::Unorm8 => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            FieldFormat::Float32 => 16,
            FieldFormat::Float16 => 8,
            FieldFormat::Unorm8 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        !matches!(self, FieldFormat::Unorm8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Linear,
    Nearest,
}

impl FilterMode {
    pub fn to_wgpu(self) -> wgpu::FilterMode {
        match self {
            FilterMode::Linear => wgpu::FilterMode::Linear,
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
        }
    }
}

/// The fixed program set. Every program shares the full-viewport vertex stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Splat,
    Advect,
    Divergence,
    Pressure,
    GradientSubtract,
    Display,
}

impl Program {
    pub const ALL: [Program; 6] = [
        Program::Splat,
        Program::Advect,
        Program::Divergence,
        Program::Pressure,
        Program::GradientSubtract,
        Program::Display,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            Program::Splat => "fs_splat",
            Program::Advect => "fs_advect",
            Program::Divergence => "fs_divergence",
            Program::Pressure => "fs_pressure",
            Program::GradientSubtract => "fs_gradient_subtract",
            Program::Display => "fs_display",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Program::Splat => "Splat",
            Program::Advect => "Advect",
            Program::Divergence => "Divergence",
            Program::Pressure => "Pressure Jacobi",
            Program::GradientSubtract => "Gradient Subtract",
            Program::Display => "Display",
        }
    }
}

/// Per-pass parameters (must match `PassUniforms` in fluid.wgsl).
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2], // offset 0
    pub point: [f32; 2],      // offset 8
    pub color: [f32; 4],      // offset 16 (vec4 aligns to 16)
    pub resolution: [f32; 2], // offset 32
    pub radius: f32,          // offset 40
    pub dt: f32,              // offset 44
    pub dissipation: f32,     // offset 48
    pub aspect: f32,          // offset 52
    pub _pad: [f32; 2],       // offset 56, struct size 64
}

const _: [(); 64] = [(); std::mem::size_of::<PassUniforms>()];

impl PassUniforms {
    /// Uniforms for a pass writing a `width` x `height` target.
    pub fn for_target(width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self {
            texel_size: [1.0 / w, 1.0 / h],
            resolution: [w, h],
            aspect: w / h,
            ..Self::default()
        }
    }

    pub fn with_splat(mut self, point: [f32; 2], color: [f32; 3], radius: f32) -> Self {
        self.point = point;
        self.color = [color[0], color[1], color[2], 0.0];
        self.radius = radius;
        self
    }

    pub fn with_advection(mut self, dt: f32, dissipation: f32) -> Self {
        self.dt = dt;
        self.dissipation = dissipation;
        self
    }
}

/// Host copy of a field. Row 0 is the bottom row (simulation rows grow upward).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldImage {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl FieldImage {
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        self.texels[(y * self.width + x) as usize]
    }

    /// Sum of squared values over the first `channels` channels.
    pub fn energy(&self, channels: usize) -> f64 {
        self.texels
            .iter()
            .map(|t| t[..channels].iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>())
            .sum()
    }

    pub fn mean_abs(&self, channel: usize) -> f64 {
        if self.texels.is_empty() {
            return 0.0;
        }
        let total: f64 = self.texels.iter().map(|t| t[channel].abs() as f64).sum();
        total / self.texels.len() as f64
    }

    pub fn is_finite(&self) -> bool {
        self.texels.iter().all(|t| t.iter().all(|v| v.is_finite()))
    }

    pub fn is_zero(&self, channels: usize) -> bool {
        self.texels.iter().all(|t| t[..channels].iter().all(|&v| v == 0.0))
    }
}

/// What every backend target can report about itself.
pub trait RenderTarget {
    fn size(&self) -> (u32, u32);
    fn format(&self) -> FieldFormat;
    fn filter(&self) -> FilterMode;
}

/// Inputs of one pass are sampled with a single filter: nearest if any input is nearest.
pub fn pass_filter<T: RenderTarget>(inputs: &[&T]) -> FilterMode {
    if inputs.iter().all(|t| t.filter() == FilterMode::Linear) {
        FilterMode::Linear
    } else {
        FilterMode::Nearest
    }
}

pub trait FieldBackend {
    type Target: RenderTarget;

    /// Completeness probe: can a small target of `format` be rendered into and sampled?
    fn supports_format(&mut self, format: FieldFormat) -> bool;

    fn supports_linear_filtering(&self, format: FieldFormat) -> bool;

    /// Allocates one render target. An error means the target would be incomplete.
    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: FieldFormat,
        filter: FilterMode,
    ) -> anyhow::Result<Self::Target>;

    fn clear(&mut self, target: &mut Self::Target);

    /// Frees the target's storage now. A released target must not be drawn or read again.
    fn release(&mut self, target: &mut Self::Target);

    /// Runs `program` reading `inputs` (one or two targets) and writing `output`.
    fn draw(&mut self, program: Program, inputs: &[&Self::Target], uniforms: &PassUniforms, output: &mut Self::Target);

    /// Draws `density` over the whole visible surface.
    fn display(&mut self, density: &Self::Target) -> anyhow::Result<()>;

    fn surface_size(&self) -> (u32, u32);

    fn resize_surface(&mut self, width: u32, height: u32);

    /// Submits any recorded work.
    fn flush(&mut self);

    fn read_field(&mut self, target: &Self::Target) -> anyhow::Result<FieldImage>;

    /// Reads back the last displayed frame, when the surface is readable.
    fn read_display(&mut self) -> anyhow::Result<FieldImage>;
}
