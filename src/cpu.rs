// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Host-memory reference backend.
//!
//! Evaluates the same six programs as `shaders/fluid.wgsl`, one texel at a
//! time, with clamp-to-edge addressing, nearest/linear filtering and 8-bit
//! quantization on write. Half floats are kept at single precision.

use anyhow::bail;

use crate::backend::{
    pass_filter, FieldBackend, FieldFormat, FieldImage, FilterMode, PassUniforms, Program, RenderTarget,
};

/// What the emulated device supports.
#[derive(Debug, Clone)]
pub struct CpuDeviceConfig {
    pub supported_formats: Vec<FieldFormat>,
    pub linear_float_filtering: bool,
    /// Float allocations larger than this (in either dimension) come back incomplete.
    pub max_float_extent: Option<u32>,
    /// Makes program compilation fail at construction.
    pub reject_programs: bool,
}

impl Default for CpuDeviceConfig {
    fn default() -> Self {
        Self {
            supported_formats: FieldFormat::PREFERENCE.to_vec(),
            linear_float_filtering: true,
            max_float_extent: None,
            reject_programs: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CpuField {
    width: u32,
    height: u32,
    format: FieldFormat,
    filter: FilterMode,
    texels: Vec<[f32; 4]>,
}

impl CpuField {
    fn new(width: u32, height: u32, format: FieldFormat, filter: FilterMode) -> Self {
        Self {
            width,
            height,
            format,
            filter,
            texels: vec![[0.0; 4]; (width * height) as usize],
        }
    }

    /// Overwrites one texel, quantized to the field format. Row 0 is the bottom row.
    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let index = (y * self.width + x) as usize;
        self.texels[index] = quantize(value, self.format);
    }

    fn fetch(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1);
        let y = y.clamp(0, self.height as i64 - 1);
        self.texels[(y * self.width as i64 + x) as usize]
    }

    fn sample(&self, uv: [f32; 2], filter: FilterMode) -> [f32; 4] {
        let w = self.width as f32;
        let h = self.height as f32;
        match filter {
            FilterMode::Nearest => self.fetch((uv[0] * w).floor() as i64, (uv[1] * h).floor() as i64),
            FilterMode::Linear => {
                let x = uv[0] * w - 0.5;
                let y = uv[1] * h - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let fx = x - x0;
                let fy = y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let s00 = self.fetch(x0, y0);
                let s10 = self.fetch(x0 + 1, y0);
                let s01 = self.fetch(x0, y0 + 1);
                let s11 = self.fetch(x0 + 1, y0 + 1);
                let mut out = [0.0; 4];
                for c in 0..4 {
                    let bottom = s00[c] + (s10[c] - s00[c]) * fx;
                    let top = s01[c] + (s11[c] - s01[c]) * fx;
                    out[c] = bottom + (top - bottom) * fy;
                }
                out
            }
        }
    }

    fn to_image(&self) -> FieldImage {
        FieldImage {
            width: self.width,
            height: self.height,
            texels: self.texels.clone(),
        }
    }
}

impl RenderTarget for CpuField {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn format(&self) -> FieldFormat {
        self.format
    }

    fn filter(&self) -> FilterMode {
        self.filter
    }
}

fn quantize(value: [f32; 4], format: FieldFormat) -> [f32; 4] {
    match format {
        FieldFormat::Unorm8 => value.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() / 255.0),
        FieldFormat::Float32 | FieldFormat::Float16 => value,
    }
}

/// One fragment-stage evaluation per output texel.
fn evaluate(program: Program, inputs: &[&CpuField], u: &PassUniforms, output: &mut CpuField) {
    let filter = pass_filter(inputs);
    let a = inputs[0];
    let b = inputs.get(1).copied().unwrap_or(a);
    let [tx, ty] = u.texel_size;
    let (w, h) = (output.width, output.height);

    for j in 0..h {
        for i in 0..w {
            let uv = [(i as f32 + 0.5) / w as f32, (j as f32 + 0.5) / h as f32];
            let left = [uv[0] - tx, uv[1]];
            let right = [uv[0] + tx, uv[1]];
            let top = [uv[0], uv[1] + ty];
            let bottom = [uv[0], uv[1] - ty];

            let value = match program {
                Program::Splat => {
                    let px = (uv[0] - u.point[0]) * u.aspect;
                    let py = uv[1] - u.point[1];
                    let falloff = (-(px * px + py * py) / u.radius).exp();
                    let base = a.sample(uv, filter);
                    [
                        base[0] + falloff * u.color[0],
                        base[1] + falloff * u.color[1],
                        base[2] + falloff * u.color[2],
                        1.0,
                    ]
                }
                Program::Advect => {
                    let velocity = a.sample(uv, filter);
                    let coord = [uv[0] - u.dt * velocity[0] * tx, uv[1] - u.dt * velocity[1] * ty];
                    b.sample(coord, filter).map(|v| v * u.dissipation)
                }
                Program::Divergence => {
                    let l = a.sample(left, filter)[0];
                    let r = a.sample(right, filter)[0];
                    let t = a.sample(top, filter)[1];
                    let bt = a.sample(bottom, filter)[1];
                    [0.5 * (r - l + t - bt), 0.0, 0.0, 1.0]
                }
                Program::Pressure => {
                    let l = a.sample(left, filter)[0];
                    let r = a.sample(right, filter)[0];
                    let t = a.sample(top, filter)[0];
                    let bt = a.sample(bottom, filter)[0];
                    let divergence = b.sample(uv, filter)[0];
                    [(l + r + t + bt - divergence) * 0.25, 0.0, 0.0, 1.0]
                }
                Program::GradientSubtract => {
                    let l = a.sample(left, filter)[0];
                    let r = a.sample(right, filter)[0];
                    let t = a.sample(top, filter)[0];
                    let bt = a.sample(bottom, filter)[0];
                    let velocity = b.sample(uv, filter);
                    [velocity[0] - (r - l), velocity[1] - (t - bt), 0.0, 1.0]
                }
                Program::Display => {
                    let color = a.sample(uv, filter);
                    [color[0], color[1], color[2], 1.0]
                }
            };
            output.texels[(j * w + i) as usize] = quantize(value, output.format);
        }
    }
}

pub struct CpuBackend {
    config: CpuDeviceConfig,
    surface: CpuField,
    pass_log: Vec<Program>,
    live_texels: u64,
    peak_texels: u64,
}

impl CpuBackend {
    pub fn new(config: CpuDeviceConfig, surface_width: u32, surface_height: u32) -> anyhow::Result<Self> {
        if config.reject_programs {
            bail!("Program link failed: fragment stages rejected by device");
        }
        Ok(Self {
            config,
            surface: CpuField::new(surface_width, surface_height, FieldFormat::Unorm8, FilterMode::Nearest),
            pass_log: Vec::new(),
            live_texels: 0,
            peak_texels: 0,
        })
    }

    /// Programs run since the last call, in submission order.
    pub fn take_pass_log(&mut self) -> Vec<Program> {
        std::mem::take(&mut self.pass_log)
    }

    /// Field texels allocated and not yet released.
    pub fn live_texels(&self) -> u64 {
        self.live_texels
    }

    /// High-water mark of `live_texels`.
    pub fn peak_texels(&self) -> u64 {
        self.peak_texels
    }
}

impl FieldBackend for CpuBackend {
    type Target = CpuField;

    fn supports_format(&mut self, format: FieldFormat) -> bool {
        format == FieldFormat::Unorm8 || self.config.supported_formats.contains(&format)
    }

    fn supports_linear_filtering(&self, format: FieldFormat) -> bool {
        format.is_float() && self.config.linear_float_filtering
    }

    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: FieldFormat,
        filter: FilterMode,
    ) -> anyhow::Result<CpuField> {
        if width == 0 || height == 0 {
            bail!("Render target {width}x{height} is empty");
        }
        if !self.supports_format(format) {
            bail!("Render target format {format:?} is incomplete");
        }
        if let Some(max) = self.config.max_float_extent {
            if format.is_float() && (width > max || height > max) {
                bail!("Render target {width}x{height} {format:?} exceeds float extent {max}");
            }
        }
        self.live_texels += width as u64 * height as u64;
        self.peak_texels = self.peak_texels.max(self.live_texels);
        Ok(CpuField::new(width, height, format, filter))
    }

    fn clear(&mut self, target: &mut CpuField) {
        target.texels.fill([0.0; 4]);
    }

    fn release(&mut self, target: &mut CpuField) {
        self.live_texels -= target.texels.len() as u64;
        target.texels = Vec::new();
    }

    fn draw(&mut self, program: Program, inputs: &[&CpuField], uniforms: &PassUniforms, output: &mut CpuField) {
        self.pass_log.push(program);
        evaluate(program, inputs, uniforms, output);
    }

    fn display(&mut self, density: &CpuField) -> anyhow::Result<()> {
        self.pass_log.push(Program::Display);
        let uniforms = PassUniforms::for_target(self.surface.width, self.surface.height);
        evaluate(Program::Display, &[density], &uniforms, &mut self.surface);
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = CpuField::new(width, height, FieldFormat::Unorm8, FilterMode::Nearest);
    }

    fn flush(&mut self) {}

    fn read_field(&mut self, target: &CpuField) -> anyhow::Result<FieldImage> {
        Ok(target.to_image())
    }

    fn read_display(&mut self) -> anyhow::Result<FieldImage> {
        Ok(self.surface.to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(w: u32, h: u32, filter: FilterMode) -> CpuField {
        CpuField::new(w, h, FieldFormat::Float32, filter)
    }

    #[test]
    fn linear_sampling_at_texel_centers_is_exact() {
        let mut f = field(4, 4, FilterMode::Linear);
        f.set(1, 2, [3.0, 0.0, 0.0, 0.0]);
        assert_eq!(f.sample([1.5 / 4.0, 2.5 / 4.0], FilterMode::Linear)[0], 3.0);
        let halfway = f.sample([2.0 / 4.0, 2.5 / 4.0], FilterMode::Linear)[0];
        assert!((halfway - 1.5).abs() < 1e-6);
    }

    #[test]
    fn sampling_clamps_to_edge() {
        let mut f = field(2, 2, FilterMode::Nearest);
        f.set(0, 0, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(f.sample([-0.5, -0.5], FilterMode::Nearest)[0], 1.0);
        assert_eq!(f.sample([-0.5, -0.5], FilterMode::Linear)[0], 1.0);
    }

    #[test]
    fn unorm8_writes_clamp_and_quantize() {
        let mut f = CpuField::new(1, 1, FieldFormat::Unorm8, FilterMode::Nearest);
        f.set(0, 0, [-2.0, 0.5, 7.0, 1.0]);
        assert_eq!(f.texels[0], [0.0, 128.0 / 255.0, 1.0, 1.0]);
    }

    #[test]
    fn pressure_pass_averages_neighbours_minus_divergence() {
        let mut pressure = field(3, 3, FilterMode::Nearest);
        for (x, y) in [(0, 1), (2, 1), (1, 0), (1, 2)] {
            pressure.set(x, y, [1.0, 0.0, 0.0, 0.0]);
        }
        let mut divergence = field(3, 3, FilterMode::Nearest);
        divergence.set(1, 1, [2.0, 0.0, 0.0, 0.0]);
        let mut out = field(3, 3, FilterMode::Nearest);
        evaluate(Program::Pressure, &[&pressure, &divergence], &PassUniforms::for_target(3, 3), &mut out);
        assert!((out.texels[4][0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn float_allocation_beyond_extent_is_incomplete() {
        let config = CpuDeviceConfig {
            max_float_extent: Some(16),
            ..CpuDeviceConfig::default()
        };
        let mut backend = CpuBackend::new(config, 64, 64).unwrap();
        assert!(backend.allocate(32, 8, FieldFormat::Float32, FilterMode::Linear).is_err());
        assert!(backend.allocate(32, 8, FieldFormat::Unorm8, FilterMode::Nearest).is_ok());
        assert!(backend.allocate(16, 16, FieldFormat::Float16, FilterMode::Linear).is_ok());
    }

    #[test]
    fn rejected_programs_fail_construction() {
        let config = CpuDeviceConfig {
            reject_programs: true,
            ..CpuDeviceConfig::default()
        };
        assert!(CpuBackend::new(config, 8, 8).is_err());
    }
}
