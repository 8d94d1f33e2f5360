// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use anyhow::{bail, Context};

use crate::backend::{FieldBackend, FieldFormat, FilterMode, RenderTarget};
use crate::probe::{probe_capabilities, Capabilities};

/// Two same-shaped targets. Passes read `current`, write `scratch`, then the caller swaps.
pub struct FieldPair<T> {
    pub current: T,
    pub scratch: T,
}

impl<T> FieldPair<T> {
    pub fn new(current: T, scratch: T) -> Self {
        Self { current, scratch }
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.scratch);
    }
}

/// Simulation resolution for a surface: half its linear dimensions.
pub fn simulation_size(surface_width: u32, surface_height: u32) -> (u32, u32) {
    (surface_width >> 1, surface_height >> 1)
}

/// Every field of one simulation instance, at simulation resolution.
pub struct FieldPool<T> {
    pub velocity: FieldPair<T>,
    pub density: FieldPair<T>,
    pub divergence: T, // rewritten from scratch every step, no ping-pong
    pub pressure: FieldPair<T>,
    capabilities: Capabilities,
    width: u32,
    height: u32,
}

impl<T: RenderTarget> FieldPool<T> {
    /// Probes the device and allocates all seven targets, cleared to zero.
    pub fn build<B>(backend: &mut B, surface_width: u32, surface_height: u32) -> anyhow::Result<Self>
    where
        B: FieldBackend<Target = T>,
    {
        let (width, height) = simulation_size(surface_width, surface_height);
        if width == 0 || height == 0 {
            bail!("Surface {surface_width}x{surface_height} is too small for a {width}x{height} simulation");
        }

        let capabilities = probe_capabilities(backend);
        let mut allocate = |name: &str| -> anyhow::Result<T> {
            let mut target = allocate_field(backend, width, height, capabilities)
                .with_context(|| format!("Failed to allocate {name} field ({width}x{height})"))?;
            backend.clear(&mut target);
            Ok(target)
        };

        let velocity = FieldPair::new(allocate("velocity")?, allocate("velocity scratch")?);
        let density = FieldPair::new(allocate("density")?, allocate("density scratch")?);
        let divergence = allocate("divergence")?;
        let pressure = FieldPair::new(allocate("pressure")?, allocate("pressure scratch")?);

        log::info!(
            "Field pool {width}x{height} ({:?}, {:?} filtering)",
            capabilities.format,
            capabilities.filter
        );

        Ok(Self {
            velocity,
            density,
            divergence,
            pressure,
            capabilities,
            width,
            height,
        })
    }

    /// Releases every target, then allocates fresh ones for the new surface size.
    ///
    /// The old fields are gone even if this fails; a pool whose rebuild failed must be dropped.
    pub fn rebuild<B>(&mut self, backend: &mut B, surface_width: u32, surface_height: u32) -> anyhow::Result<()>
    where
        B: FieldBackend<Target = T>,
    {
        for target in self.targets_mut() {
            backend.release(target);
        }
        *self = Self::build(backend, surface_width, surface_height)?;
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// What the probe chose. Individual targets may still have fallen back.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn targets_mut(&mut self) -> [&mut T; 7] {
        [
            &mut self.velocity.current,
            &mut self.velocity.scratch,
            &mut self.density.current,
            &mut self.density.scratch,
            &mut self.divergence,
            &mut self.pressure.current,
            &mut self.pressure.scratch,
        ]
    }

    pub fn targets(&self) -> [&T; 7] {
        [
            &self.velocity.current,
            &self.velocity.scratch,
            &self.density.current,
            &self.density.scratch,
            &self.divergence,
            &self.pressure.current,
            &self.pressure.scratch,
        ]
    }
}

/// Allocates in the probed format, dropping to 8-bit nearest for this target alone if incomplete.
fn allocate_field<B: FieldBackend>(
    backend: &mut B,
    width: u32,
    height: u32,
    capabilities: Capabilities,
) -> anyhow::Result<B::Target> {
    match backend.allocate(width, height, capabilities.format, capabilities.filter) {
        Ok(target) => Ok(target),
        Err(err) if capabilities.format != FieldFormat::Unorm8 => {
            log::info!("Falling back to 8-bit field at {width}x{height}: {err}");
            backend.allocate(width, height, FieldFormat::Unorm8, FilterMode::Nearest)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuBackend, CpuDeviceConfig};

    #[test]
    fn swap_exchanges_roles() {
        let mut pair = FieldPair::new("a", "b");
        pair.swap();
        assert_eq!((pair.current, pair.scratch), ("b", "a"));
        pair.swap();
        assert_eq!(pair.current, "a");
    }

    #[test]
    fn build_halves_surface_size() {
        let mut backend = CpuBackend::new(CpuDeviceConfig::default(), 801, 599).unwrap();
        let pool = FieldPool::build(&mut backend, 801, 599).unwrap();
        assert_eq!(pool.size(), (400, 299));
        assert!(pool.targets().iter().all(|t| t.size() == (400, 299)));
    }

    #[test]
    fn rebuild_releases_old_fields_before_allocating() {
        let mut backend = CpuBackend::new(CpuDeviceConfig::default(), 64, 64).unwrap();
        let mut pool = FieldPool::build(&mut backend, 64, 64).unwrap();
        let one_pool = 7 * 32 * 32;
        assert_eq!(backend.live_texels(), one_pool);

        pool.rebuild(&mut backend, 64, 64).unwrap();
        assert_eq!(backend.live_texels(), one_pool);
        assert_eq!(backend.peak_texels(), one_pool);

        pool.rebuild(&mut backend, 40, 20).unwrap();
        assert_eq!(backend.live_texels(), 7 * 20 * 10);
        assert_eq!(backend.peak_texels(), one_pool);
    }

    #[test]
    fn degenerate_surface_is_rejected() {
        let mut backend = CpuBackend::new(CpuDeviceConfig::default(), 1, 600).unwrap();
        assert!(FieldPool::build(&mut backend, 1, 600).is_err());
    }

    #[test]
    fn oversized_float_targets_fall_back_individually() {
        let config = CpuDeviceConfig {
            max_float_extent: Some(64),
            ..CpuDeviceConfig::default()
        };
        let mut backend = CpuBackend::new(config, 256, 64).unwrap();
        let pool = FieldPool::build(&mut backend, 256, 64).unwrap();
        assert_eq!(pool.capabilities().format, FieldFormat::Float32);
        for target in pool.targets() {
            assert_eq!(target.format(), FieldFormat::Unorm8);
            assert_eq!(target.filter(), FilterMode::Nearest);
        }
    }
}
