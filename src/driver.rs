// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backend::FieldBackend;
use crate::config::FluidSettings;
use crate::field::simulation_size;
use crate::input::{random_burst, PointerTracker};
use crate::simulation::Simulation;

/// Something that says when the next frame is due, in seconds.
pub trait TickSource {
    /// `None` ends the run.
    fn next_tick(&mut self) -> Option<f64>;
}

/// A fixed number of evenly spaced ticks, for headless runs.
#[derive(Debug, Clone)]
pub struct FixedRateTicks {
    time: f64,
    interval: f64,
    remaining: u64,
}

impl FixedRateTicks {
    pub fn new(rate_hz: f64, count: u64) -> Self {
        Self {
            time: 0.0,
            interval: 1.0 / rate_hz,
            remaining: count,
        }
    }
}

impl TickSource for FixedRateTicks {
    fn next_tick(&mut self) -> Option<f64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let now = self.time;
        self.time += self.interval;
        Some(now)
    }
}

/// Wall-clock ticks, one per display refresh delivered by the host.
#[derive(Debug, Clone)]
pub struct VsyncTicks {
    origin: Instant,
}

impl VsyncTicks {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for VsyncTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for VsyncTicks {
    fn next_tick(&mut self) -> Option<f64> {
        Some(self.origin.elapsed().as_secs_f64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Running,
    /// Running with a resize queued; the fields are rebuilt at the top of the next tick.
    Resizing,
    /// Setup failed; nothing will ever render.
    Disabled,
    TornDown,
}

pub struct FrameDriver<B: FieldBackend> {
    state: DriverState,
    settings: FluidSettings,
    simulation: Option<Simulation<B>>,
    pointer: PointerTracker,
    rng: StdRng,
    surface: (u32, u32),
    pending_resize: Option<(u32, u32)>,
    active_touch: Option<u64>,
    start_time: Option<f64>,
    follow_up_pending: bool,
}

impl<B: FieldBackend> FrameDriver<B> {
    pub fn new(settings: FluidSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pointer = PointerTracker::new(
            settings.pointer_force_gain,
            settings.pointer_splat_radius,
            settings.pointer_dye_amount,
        );
        Self {
            state: DriverState::Uninitialized,
            settings,
            simulation: None,
            pointer,
            rng,
            surface: (0, 0),
            pending_resize: None,
            active_touch: None,
            start_time: None,
            follow_up_pending: false,
        }
    }

    /// Acquires the backend and seeds the first simulation.
    ///
    /// Any failure leaves the driver permanently `Disabled`; it is logged, never returned.
    pub fn start<F>(&mut self, acquire: F)
    where
        F: FnOnce() -> anyhow::Result<B>,
    {
        if self.state != DriverState::Uninitialized {
            log::warn!("Ignoring start() in state {:?}", self.state);
            return;
        }

        let simulation = acquire().and_then(|backend| Simulation::new(backend, self.settings.solver));
        match simulation {
            Ok(mut simulation) => {
                self.surface = simulation.backend().surface_size();
                simulation.stage_burst(random_burst(&mut self.rng, self.settings.startup_burst));
                self.simulation = Some(simulation);
                self.follow_up_pending = true;
                self.state = DriverState::Running;
                log::info!("Fluid background running at {}x{}", self.surface.0, self.surface.1);
            }
            Err(err) => {
                log::error!("Fluid background disabled: {err:?}");
                self.state = DriverState::Disabled;
            }
        }
    }

    /// Runs one step and display. Pending resizes are applied first.
    pub fn tick(&mut self, time_secs: f64) {
        if self.state != DriverState::Running {
            return;
        }
        let Some(simulation) = self.simulation.as_mut() else {
            return;
        };

        if let Some((width, height)) = self.pending_resize.take() {
            if let Err(err) = simulation.rebuild(width, height) {
                log::error!("Fluid background disabled after resize to {width}x{height}: {err:?}");
                self.simulation = None;
                self.state = DriverState::Disabled;
                return;
            }
            self.surface = (width, height);
            simulation.stage_burst(random_burst(&mut self.rng, self.settings.startup_burst));
            log::debug!("Rebuilt fields for {width}x{height}");
        }

        let start = *self.start_time.get_or_insert(time_secs);
        if self.follow_up_pending && time_secs - start >= self.settings.follow_up_delay_secs as f64 {
            self.follow_up_pending = false;
            simulation.stage_burst(random_burst(&mut self.rng, self.settings.follow_up_burst));
        }

        if let Some(splat) = self.pointer.take_splat(self.surface, time_secs) {
            simulation.stage(splat);
        }

        if let Err(err) = simulation.step() {
            log::warn!("Skipped frame: {err:?}");
        }
    }

    /// Drives ticks until the source runs dry or the driver stops running.
    pub fn run<T: TickSource>(&mut self, ticks: &mut T) -> u64 {
        let mut frames = 0;
        while self.state == DriverState::Running {
            let Some(time) = ticks.next_tick() else {
                break;
            };
            self.tick(time);
            frames += 1;
        }
        frames
    }

    /// Records a new surface size, applied at the top of the next tick.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        let (sim_w, sim_h) = simulation_size(width, height);
        if sim_w == 0 || sim_h == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return;
        }
        if self.state == DriverState::Running {
            self.pending_resize = Some((width, height));
        }
    }

    pub fn pointer_moved(&mut self, x: f32, y: f32) {
        if self.state == DriverState::Running {
            self.pointer.moved(x, y);
        }
    }

    /// Only the first finger down drives the pointer; later fingers are ignored until it lifts.
    pub fn touch_started(&mut self, id: u64, x: f32, y: f32) {
        if self.state != DriverState::Running || self.active_touch.is_some() {
            return;
        }
        self.active_touch = Some(id);
        self.pointer.touch_started(x, y);
    }

    pub fn touch_moved(&mut self, id: u64, x: f32, y: f32) {
        if self.active_touch == Some(id) {
            self.pointer_moved(x, y);
        }
    }

    /// A lifted or cancelled touch.
    pub fn touch_ended(&mut self, id: u64) {
        if self.active_touch == Some(id) {
            self.active_touch = None;
        }
    }

    /// Releases programs and fields. Safe between any two ticks.
    pub fn stop(&mut self) {
        if self.state == DriverState::TornDown {
            return;
        }
        self.simulation = None;
        self.pending_resize = None;
        self.active_touch = None;
        self.follow_up_pending = false;
        self.pointer = PointerTracker::new(
            self.settings.pointer_force_gain,
            self.settings.pointer_splat_radius,
            self.settings.pointer_dye_amount,
        );
        if self.state != DriverState::Disabled {
            log::info!("Fluid background torn down");
        }
        self.state = DriverState::TornDown;
    }

    pub fn state(&self) -> DriverState {
        match self.state {
            DriverState::Running if self.pending_resize.is_some() => DriverState::Resizing,
            state => state,
        }
    }

    /// Running or resizing: ticks will step the simulation.
    pub fn is_running(&self) -> bool {
        self.state == DriverState::Running
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    pub fn simulation(&self) -> Option<&Simulation<B>> {
        self.simulation.as_ref()
    }

    pub fn simulation_mut(&mut self) -> Option<&mut Simulation<B>> {
        self.simulation.as_mut()
    }
}
