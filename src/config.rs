// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE_NAME: &str = "fluid_settings.json";

pub const VELOCITY_DISSIPATION: f32 = 0.98;
pub const DENSITY_DISSIPATION: f32 = 0.97;
pub const TIME_STEP: f32 = 0.016; // ~1/60 s
pub const PRESSURE_ITERATIONS: u32 = 20;

pub const POINTER_FORCE_GAIN: f32 = 5.0;
pub const POINTER_SPLAT_RADIUS: f32 = 0.005;
pub const POINTER_DYE_AMOUNT: f32 = 0.5;

pub const FOLLOW_UP_BURST_DELAY_SECS: f32 = 0.1;

/// Fixed per-step constants of the solver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConstants {
    pub velocity_dissipation: f32,
    pub density_dissipation: f32,
    pub dt: f32,
    pub pressure_iterations: u32,
}

impl Default for SolverConstants {
    fn default() -> Self {
        Self {
            velocity_dissipation: VELOCITY_DISSIPATION,
            density_dissipation: DENSITY_DISSIPATION,
            dt: TIME_STEP,
            pressure_iterations: PRESSURE_ITERATIONS,
        }
    }
}

/// Inclusive splat-count range for a random burst.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BurstRange {
    pub min: u32,
    pub max: u32,
}

impl BurstRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FluidSettings {
    pub solver: SolverConstants,
    pub pointer_force_gain: f32,
    pub pointer_splat_radius: f32,
    pub pointer_dye_amount: f32,
    pub startup_burst: BurstRange,   // also used to reseed after a resize
    pub follow_up_burst: BurstRange, // staged once, shortly after start
    pub follow_up_delay_secs: f32,
    pub seed: Option<u64>,
    pub vsync: bool,
}

impl Default for FluidSettings {
    fn default() -> Self {
        Self {
            solver: SolverConstants::default(),
            pointer_force_gain: POINTER_FORCE_GAIN,
            pointer_splat_radius: POINTER_SPLAT_RADIUS,
            pointer_dye_amount: POINTER_DYE_AMOUNT,
            startup_burst: BurstRange::new(5, 24),
            follow_up_burst: BurstRange::new(5, 19),
            follow_up_delay_secs: FOLLOW_UP_BURST_DELAY_SECS,
            seed: None,
            vsync: true,
        }
    }
}

impl FluidSettings {
    pub fn default_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        let mut settings: Self = serde_json::from_str(&data)
            .with_context(|| format!("Malformed settings in {}", path.display()))?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create settings directory {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write settings {}", path.display()))?;
        Ok(())
    }

    /// Loads `path` if it exists; any failure falls back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_disk(path) {
            Ok(settings) => {
                log::info!("Loaded fluid settings from {}", path.display());
                settings
            }
            Err(err) => {
                log::warn!("Ignoring unreadable settings {}: {err:?}", path.display());
                Self::default()
            }
        }
    }

    pub fn sanitize(&mut self) {
        self.solver.velocity_dissipation = self.solver.velocity_dissipation.clamp(0.0, 1.0);
        self.solver.density_dissipation = self.solver.density_dissipation.clamp(0.0, 1.0);
        self.solver.dt = self.solver.dt.clamp(1.0 / 480.0, 0.1);
        self.solver.pressure_iterations = self.solver.pressure_iterations.clamp(1, 200);
        self.pointer_force_gain = self.pointer_force_gain.clamp(0.0, 100.0);
        self.pointer_splat_radius = self.pointer_splat_radius.clamp(0.0001, 0.1);
        self.pointer_dye_amount = self.pointer_dye_amount.clamp(0.0, 10.0);
        for range in [&mut self.startup_burst, &mut self.follow_up_burst] {
            range.max = range.max.min(64);
            range.min = range.min.min(range.max);
        }
        self.follow_up_delay_secs = self.follow_up_delay_secs.clamp(0.0, 10.0);
    }
}
