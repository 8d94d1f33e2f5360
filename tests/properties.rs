// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use fluid_backdrop::backend::RenderTarget;
use fluid_backdrop::config::SolverConstants;
use fluid_backdrop::cpu::{CpuBackend, CpuDeviceConfig};
use fluid_backdrop::driver::FixedRateTicks;
use fluid_backdrop::input::Splat;
use fluid_backdrop::{DriverState, FieldFormat, FilterMode, FluidSettings, FrameDriver, Simulation};

fn simulation(width: u32, height: u32) -> Simulation<CpuBackend> {
    let backend = CpuBackend::new(CpuDeviceConfig::default(), width, height).unwrap();
    Simulation::new(backend, SolverConstants::default()).unwrap()
}

fn assert_pool_size(sim: &Simulation<CpuBackend>, width: u32, height: u32) {
    let expected = (width >> 1, height >> 1);
    assert_eq!(sim.pool().size(), expected, "surface {width}x{height}");
    for target in sim.pool().targets() {
        assert_eq!(target.size(), expected, "surface {width}x{height}");
    }
}

#[test]
fn pool_tracks_half_surface_across_resizes() {
    let mut sim = simulation(800, 600);
    assert_pool_size(&sim, 800, 600);
    for (w, h) in [(801, 601), (3, 5), (1279, 719), (2, 2), (64, 33), (800, 600)] {
        sim.rebuild(w, h).unwrap();
        assert_pool_size(&sim, w, h);
    }
    sim.step().unwrap();
}

#[test]
fn resize_to_a_degenerate_surface_fails() {
    let mut sim = simulation(64, 64);
    assert!(sim.rebuild(1, 400).is_err());
}

#[test]
fn zero_fields_stay_exactly_zero() {
    let mut sim = simulation(40, 30);
    for _ in 0..10 {
        sim.step().unwrap();
    }
    assert!(sim.read_velocity().unwrap().is_zero(2));
    assert!(sim.read_density().unwrap().is_zero(3));
    assert!(sim.read_pressure().unwrap().is_zero(1));
    assert!(sim.read_divergence().unwrap().is_zero(1));
    assert!(sim.read_display().unwrap().is_zero(3));
}

#[test]
fn centered_splat_peaks_at_center() {
    // 33x33 cells: the center texel sits exactly at uv (0.5, 0.5).
    let mut sim = simulation(66, 66);
    let radius = 0.002;
    sim.apply_splat(&Splat {
        point: [0.5, 0.5],
        force: [30.0, -20.0],
        color: [0.0; 3],
        radius,
    });

    let velocity = sim.read_velocity().unwrap();
    let magnitude = |x: u32, y: u32| {
        let v = velocity.get(x, y);
        (v[0] * v[0] + v[1] * v[1]).sqrt()
    };
    let center = magnitude(16, 16);
    assert!(center > 30.0);

    let mut far_cells = 0;
    for y in 0..33 {
        for x in 0..33 {
            let dx = (x as f32 + 0.5) / 33.0 - 0.5;
            let dy = (y as f32 + 0.5) / 33.0 - 0.5;
            if (dx * dx + dy * dy).sqrt() > 3.0 * radius {
                far_cells += 1;
                assert!(center > magnitude(x, y), "cell ({x}, {y})");
            }
        }
    }
    assert_eq!(far_cells, 33 * 33 - 1);
}

#[test]
fn density_energy_decays_monotonically_to_zero() {
    let mut sim = simulation(32, 32);
    sim.apply_splat(&Splat {
        point: [0.5, 0.5],
        force: [0.0; 2],
        color: [1.0, 0.6, 0.2],
        radius: 0.01,
    });

    let initial = sim.read_density().unwrap().energy(3);
    assert!(initial > 0.0);
    let mut previous = initial;
    for step in 0..300 {
        sim.step().unwrap();
        let energy = sim.read_density().unwrap().energy(3);
        assert!(energy <= previous, "energy grew at step {step}: {previous} -> {energy}");
        previous = energy;
    }
    assert!(previous < initial * 1e-6);
}

#[test]
fn projection_reduces_divergence() {
    let mut sim = simulation(64, 64);
    sim.apply_splat(&Splat {
        point: [0.4, 0.55],
        force: [60.0, 25.0],
        color: [0.0; 3],
        radius: 0.01,
    });
    sim.advect();
    sim.compute_divergence();
    let before = sim.read_divergence().unwrap().mean_abs(0);
    assert!(before > 0.0);

    sim.solve_pressure();
    sim.subtract_gradient();
    sim.compute_divergence();
    let after = sim.read_divergence().unwrap().mean_abs(0);
    assert!(after < before, "divergence {before} -> {after}");
}

#[test]
fn seeded_burst_is_visible_after_sixty_frames() {
    let settings = FluidSettings {
        seed: Some(7),
        ..FluidSettings::default()
    };
    let mut driver = FrameDriver::new(settings);
    driver.start(|| CpuBackend::new(CpuDeviceConfig::default(), 800, 600));
    assert_eq!(driver.state(), DriverState::Running);

    assert_eq!(driver.run(&mut FixedRateTicks::new(60.0, 60)), 60);

    let sim = driver.simulation_mut().unwrap();
    assert_eq!(sim.steps(), 60);
    let display = sim.read_display().unwrap();
    assert_eq!((display.width, display.height), (800, 600));
    assert!(display.is_finite());
    assert!(!display.is_zero(3));
    assert!(sim.read_velocity().unwrap().is_finite());
    assert!(sim.read_density().unwrap().is_finite());
}

#[test]
fn float_probe_failure_falls_back_to_nearest_unorm8() {
    let config = CpuDeviceConfig {
        supported_formats: vec![FieldFormat::Unorm8],
        ..CpuDeviceConfig::default()
    };
    let backend = CpuBackend::new(config, 120, 80).unwrap();
    let mut sim = Simulation::new(backend, SolverConstants::default()).unwrap();

    let capabilities = sim.pool().capabilities();
    assert_eq!(capabilities.format, FieldFormat::Unorm8);
    assert_eq!(capabilities.filter, FilterMode::Nearest);
    for target in sim.pool().targets() {
        assert_eq!(target.format(), FieldFormat::Unorm8);
        assert_eq!(target.filter(), FilterMode::Nearest);
    }

    sim.stage(Splat {
        point: [0.5, 0.5],
        force: [0.0; 2],
        color: [0.8; 3],
        radius: 0.01,
    });
    sim.step().unwrap();
    assert!(!sim.read_display().unwrap().is_zero(3));
}

#[test]
fn oversized_float_targets_fall_back_individually() {
    let config = CpuDeviceConfig {
        max_float_extent: Some(64),
        ..CpuDeviceConfig::default()
    };
    let backend = CpuBackend::new(config, 400, 100).unwrap();
    let sim = Simulation::new(backend, SolverConstants::default()).unwrap();

    assert_eq!(sim.pool().capabilities().format, FieldFormat::Float32);
    for target in sim.pool().targets() {
        assert_eq!(target.format(), FieldFormat::Unorm8);
        assert_eq!(target.filter(), FilterMode::Nearest);
    }
}
