// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::backend::{
    pass_filter, FieldBackend, FieldFormat, FieldImage, FilterMode, PassUniforms, Program, RenderTarget,
};
use crate::probe::PROBE_EXTENT;
use crate::programs::{FieldPipelines, ShaderProgramSet};

/// Uniform slots recorded before a batch is submitted.
const UNIFORM_SLOTS: u32 = 128;

pub struct GpuField {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: FieldFormat,
    filter: FilterMode,
    // Fields only exist for formats with compiled programs.
    pipelines: Arc<FieldPipelines>,
}

impl RenderTarget for GpuField {
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

fn field_descriptor(label: &'static str, width: u32, height: u32, format: wgpu::TextureFormat) -> wgpu::TextureDescriptor<'static> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    }
}

/// Every pass gets its own slot so `queue.write_buffer` cannot clobber earlier passes.
struct UniformBatch {
    buffer: wgpu::Buffer,
    stride: u64,
    staged: Vec<u8>,
    len: u32,
}

impl UniformBatch {
    fn new(device: &wgpu::Device) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let size = std::mem::size_of::<PassUniforms>() as u64;
        let stride = size.div_ceil(alignment) * alignment;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Fluid Pass Uniforms"),
            size: stride * UNIFORM_SLOTS as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            stride,
            staged: Vec::with_capacity((stride * UNIFORM_SLOTS as u64) as usize),
            len: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.len == UNIFORM_SLOTS
    }

    /// Returns the dynamic offset of the new slot.
    fn push(&mut self, uniforms: &PassUniforms) -> u32 {
        let offset = self.len as u64 * self.stride;
        self.staged.resize(offset as usize, 0);
        self.staged.extend_from_slice(bytemuck::bytes_of(uniforms));
        self.len += 1;
        offset as u32
    }

    fn upload(&mut self, queue: &wgpu::Queue) {
        if !self.staged.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.staged);
        }
        self.staged.clear();
        self.len = 0;
    }
}

struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

enum DisplayTarget {
    Window {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        target: OffscreenTarget,
    },
}

/// Runs the fluid programs as wgpu render passes.
pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: ShaderProgramSet,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    uniforms: UniformBatch,
    encoder: Option<wgpu::CommandEncoder>,
    display: DisplayTarget,
    surface_size: (u32, u32),
}

async fn request_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'static>>,
) -> anyhow::Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .context("No compatible graphics adapter")?;

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Fluid Device"),
                // Linear filtering of full-float fields when the adapter allows it.
                required_features: adapter.features() & wgpu::Features::FLOAT32_FILTERABLE,
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .context("Failed to create graphics device")?;

    Ok((adapter, device, queue))
}

impl WgpuBackend {
    pub fn for_window(window: Arc<winit::window::Window>, vsync: bool) -> anyhow::Result<Self> {
        pollster::block_on(Self::for_window_async(window, vsync))
    }

    async fn for_window_async(window: Arc<winit::window::Window>, vsync: bool) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("Failed to create window surface")?;
        let (adapter, device, queue) = request_device(&instance, Some(&surface)).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        // Field values are written to the surface as-is, so prefer a linear format.
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("Surface reports no usable formats")?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let surface_size = (config.width, config.height);
        let programs = ShaderProgramSet::new(&device, &renderable_formats(&adapter), format)?;
        Ok(Self::assemble(
            adapter,
            device,
            queue,
            programs,
            DisplayTarget::Window { surface, config },
            surface_size,
        ))
    }

    /// Renders the display pass into an offscreen `Rgba8Unorm` texture.
    pub fn headless(width: u32, height: u32) -> anyhow::Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
            let (adapter, device, queue) = request_device(&instance, None).await?;
            let programs =
                ShaderProgramSet::new(&device, &renderable_formats(&adapter), wgpu::TextureFormat::Rgba8Unorm)?;
            let target = create_offscreen(&device, width, height);
            Ok(Self::assemble(
                adapter,
                device,
                queue,
                programs,
                DisplayTarget::Offscreen { target },
                (width, height),
            ))
        })
    }

    fn assemble(
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        programs: ShaderProgramSet,
        display: DisplayTarget,
        surface_size: (u32, u32),
    ) -> Self {
        let sampler = |filter: FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Field Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter.to_wgpu(),
                min_filter: filter.to_wgpu(),
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let linear_sampler = sampler(FilterMode::Linear);
        let nearest_sampler = sampler(FilterMode::Nearest);
        let uniforms = UniformBatch::new(&device);
        log::info!("Fluid device: {:?}", adapter.get_info().name);

        Self {
            adapter,
            device,
            queue,
            programs,
            linear_sampler,
            nearest_sampler,
            uniforms,
            encoder: None,
            display,
            surface_size,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn bind_group(&self, filter: FilterMode, a: &wgpu::TextureView, b: &wgpu::TextureView) -> wgpu::BindGroup {
        let sampler = match filter {
            FilterMode::Linear => &self.linear_sampler,
            FilterMode::Nearest => &self.nearest_sampler,
        };
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Fluid Pass Bind Group"),
            layout: self.programs.layout(filter),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniforms.buffer,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<PassUniforms>() as u64),
                    }),
                },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(a) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(b) },
            ],
        })
    }
}

fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    format: FieldFormat,
) -> anyhow::Result<FieldImage> {
    let bytes_per_texel = format.bytes_per_texel();
    let unpadded_row = width * bytes_per_texel;
    let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Field Readback"),
        size: padded_row as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Read"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging_buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = staging_buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);
    pollster::block_on(receiver.receive())
        .context("Readback channel closed")?
        .context("Failed to map readback buffer")?;

    let data = buffer_slice.get_mapped_range();
    let mut texels = Vec::with_capacity((width * height) as usize);
    // Texture row 0 is the top of the image; FieldImage row 0 is the bottom.
    for row in (0..height).rev() {
        let start = (row * padded_row) as usize;
        let bytes = &data[start..start + unpadded_row as usize];
        texels.extend(bytes.chunks_exact(bytes_per_texel as usize).map(|t| decode_texel(t, format)));
    }
    drop(data);
    staging_buffer.unmap();

    Ok(FieldImage { width, height, texels })
}

const FIELD_USAGES: wgpu::TextureUsages =
    wgpu::TextureUsages::RENDER_ATTACHMENT.union(wgpu::TextureUsages::TEXTURE_BINDING);

fn renderable_formats(adapter: &wgpu::Adapter) -> Vec<FieldFormat> {
    FieldFormat::PREFERENCE
        .into_iter()
        .filter(|f| {
            adapter
                .get_texture_format_features(f.texture_format())
                .allowed_usages
                .contains(FIELD_USAGES)
        })
        .collect()
}

fn create_offscreen(device: &wgpu::Device, width: u32, height: u32) -> OffscreenTarget {
    let texture = device.create_texture(&field_descriptor(
        "Offscreen Display",
        width.max(1),
        height.max(1),
        wgpu::TextureFormat::Rgba8Unorm,
    ));
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    OffscreenTarget {
        texture,
        view,
        width: width.max(1),
        height: height.max(1),
    }
}

fn encoder_for<'a>(slot: &'a mut Option<wgpu::CommandEncoder>, device: &wgpu::Device) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fluid Step"),
        })
    })
}

fn record_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    draw: Option<(&wgpu::RenderPipeline, &wgpu::BindGroup, u32)>,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    if let Some((pipeline, bind_group, offset)) = draw {
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[offset]);
        pass.draw(0..3, 0..1); // Full-screen triangle
    }
}

fn decode_texel(bytes: &[u8], format: FieldFormat) -> [f32; 4] {
    match format {
        FieldFormat::Float32 => bytemuck::pod_read_unaligned::<[f32; 4]>(bytes),
        FieldFormat::Float16 => bytemuck::pod_read_unaligned::<[half::f16; 4]>(bytes).map(f32::from),
        FieldFormat::Unorm8 => [
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            bytes[3] as f32 / 255.0,
        ],
    }
}

impl FieldBackend for WgpuBackend {
    type Target = GpuField;

    fn supports_format(&mut self, format: FieldFormat) -> bool {
        let texture_format = format.texture_format();
        let features = self.adapter.get_texture_format_features(texture_format);
        if !features.allowed_usages.contains(FIELD_USAGES) {
            return false;
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let probe = self
            .device
            .create_texture(&field_descriptor("Format Probe", PROBE_EXTENT, PROBE_EXTENT, texture_format));
        let view = probe.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Format Probe"),
        });
        record_pass(&mut encoder, "Format Probe", &view, None);
        self.queue.submit(std::iter::once(encoder.finish()));
        let complete = pollster::block_on(self.device.pop_error_scope()).is_none();
        probe.destroy();
        complete
    }

    fn supports_linear_filtering(&self, format: FieldFormat) -> bool {
        let flags = self.adapter.get_texture_format_features(format.texture_format()).flags;
        match format {
            FieldFormat::Float32 => self.device.features().contains(wgpu::Features::FLOAT32_FILTERABLE),
            FieldFormat::Float16 => flags.contains(wgpu::TextureFormatFeatureFlags::FILTERABLE),
            FieldFormat::Unorm8 => false,
        }
    }

    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: FieldFormat,
        filter: FilterMode,
    ) -> anyhow::Result<GpuField> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            bail!("Render target {width}x{height} outside device limit {max}");
        }
        let pipelines = self
            .programs
            .field(format)
            .with_context(|| format!("No fluid programs compiled for {format:?} targets"))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self
            .device
            .create_texture(&field_descriptor("Fluid Field", width, height, format.texture_format()));
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            bail!("Render target {width}x{height} {format:?} is incomplete: {err}");
        }

        Ok(GpuField {
            texture,
            view,
            width,
            height,
            format,
            filter,
            pipelines,
        })
    }

    fn clear(&mut self, target: &mut GpuField) {
        let encoder = encoder_for(&mut self.encoder, &self.device);
        record_pass(encoder, "Clear Field", &target.view, None);
    }

    fn release(&mut self, target: &mut GpuField) {
        target.texture.destroy();
    }

    fn draw(&mut self, program: Program, inputs: &[&GpuField], uniforms: &PassUniforms, output: &mut GpuField) {
        if self.uniforms.is_full() {
            self.flush();
        }
        let filter = pass_filter(inputs);
        let pipeline = output.pipelines.get(program, filter);
        let a = inputs[0];
        let b = inputs.get(1).copied().unwrap_or(a);
        let bind_group = self.bind_group(filter, &a.view, &b.view);
        let offset = self.uniforms.push(uniforms);

        let encoder = encoder_for(&mut self.encoder, &self.device);
        record_pass(encoder, program.label(), &output.view, Some((pipeline, &bind_group, offset)));
    }

    fn display(&mut self, density: &GpuField) -> anyhow::Result<()> {
        let frame = match &self.display {
            DisplayTarget::Window { surface, config } => match surface.get_current_texture() {
                Ok(frame) => Some(frame),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    surface.configure(&self.device, config);
                    return Ok(());
                }
                Err(err) => bail!("Surface frame unavailable: {err}"),
            },
            DisplayTarget::Offscreen { .. } => None,
        };

        if self.uniforms.is_full() {
            self.flush();
        }
        let (width, height) = self.surface_size;
        let offset = self.uniforms.push(&PassUniforms::for_target(width, height));
        let pipeline = self.programs.display().get(density.filter);
        let bind_group = self.bind_group(density.filter, &density.view, &density.view);

        {
            let frame_view = frame
                .as_ref()
                .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()));
            let view = match (&frame_view, &self.display) {
                (Some(view), _) => view,
                (None, DisplayTarget::Offscreen { target }) => &target.view,
                (None, DisplayTarget::Window { .. }) => bail!("Window surface produced no frame"),
            };
            let encoder = encoder_for(&mut self.encoder, &self.device);
            record_pass(encoder, Program::Display.label(), view, Some((pipeline, &bind_group, offset)));
        }

        self.flush();
        if let Some(frame) = frame {
            frame.present();
        }
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.flush();
        match &mut self.display {
            DisplayTarget::Window { surface, config } => {
                config.width = width.max(1);
                config.height = height.max(1);
                surface.configure(&self.device, config);
            }
            DisplayTarget::Offscreen { target } => {
                *target = create_offscreen(&self.device, width, height);
            }
        }
        self.surface_size = (width, height);
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.uniforms.upload(&self.queue);
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn read_field(&mut self, target: &GpuField) -> anyhow::Result<FieldImage> {
        self.flush();
        read_texture(&self.device, &self.queue, &target.texture, target.width, target.height, target.format)
    }

    fn read_display(&mut self) -> anyhow::Result<FieldImage> {
        self.flush();
        let DisplayTarget::Offscreen { target } = &self.display else {
            bail!("Window surfaces cannot be read back");
        };
        read_texture(&self.device, &self.queue, &target.texture, target.width, target.height, FieldFormat::Unorm8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_floats_decode() {
        let bits: [u16; 4] = [0x3c00, 0xc000, 0x3800, 0x0001];
        let texel = decode_texel(bytemuck::bytes_of(&bits), FieldFormat::Float16);
        assert_eq!(texel, [1.0, -2.0, 0.5, 2f32.powi(-24)]);

        let special: [u16; 4] = [0x7c00, 0x7e00, 0x8000, 0x3555];
        let texel = decode_texel(bytemuck::bytes_of(&special), FieldFormat::Float16);
        assert_eq!(texel[0], f32::INFINITY);
        assert!(texel[1].is_nan());
        assert_eq!(texel[2], 0.0);
        assert!((texel[3] - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn unorm_texels_decode_to_unit_range() {
        assert_eq!(decode_texel(&[0, 255, 51, 255], FieldFormat::Unorm8), [0.0, 1.0, 0.2, 1.0]);
    }

    #[test]
    fn float_texels_decode_unaligned() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(bytemuck::bytes_of(&[1.5f32, -2.0, 0.0, 4.0]));
        assert_eq!(decode_texel(&bytes[1..], FieldFormat::Float32), [1.5, -2.0, 0.0, 4.0]);
    }
}
