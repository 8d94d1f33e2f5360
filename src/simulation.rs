// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! One stable-fluids step as a fixed sequence of passes.
//!
//! Each pass reads the `current` member of a pair and writes `scratch`;
//! the pair is swapped right after that pass, never batched.

use crate::backend::{FieldBackend, FieldImage, PassUniforms, Program};
use crate::config::SolverConstants;
use crate::field::FieldPool;
use crate::input::{Splat, SplatInbox};

pub struct Simulation<B: FieldBackend> {
    backend: B,
    pool: FieldPool<B::Target>,
    constants: SolverConstants,
    inbox: SplatInbox,
    steps: u64,
}

impl<B: FieldBackend> Simulation<B> {
    /// Builds the field pool for the backend's current surface.
    pub fn new(mut backend: B, constants: SolverConstants) -> anyhow::Result<Self> {
        let (width, height) = backend.surface_size();
        let pool = FieldPool::build(&mut backend, width, height)?;
        Ok(Self {
            backend,
            pool,
            constants,
            inbox: SplatInbox::default(),
            steps: 0,
        })
    }

    /// Resizes the surface and replaces every field. Staged splats are discarded.
    pub fn rebuild(&mut self, surface_width: u32, surface_height: u32) -> anyhow::Result<()> {
        self.backend.flush();
        self.backend.resize_surface(surface_width, surface_height);
        self.pool.rebuild(&mut self.backend, surface_width, surface_height)?;
        self.inbox.clear();
        Ok(())
    }

    pub fn stage(&mut self, splat: Splat) {
        self.inbox.post(splat);
    }

    pub fn stage_burst(&mut self, splats: impl IntoIterator<Item = Splat>) {
        self.inbox.post_burst(splats);
    }

    pub fn has_pending_splats(&self) -> bool {
        self.inbox.is_pending()
    }

    /// Runs one full step and draws the result.
    pub fn step(&mut self) -> anyhow::Result<()> {
        self.apply_pending();
        self.advect();
        self.compute_divergence();
        self.solve_pressure();
        self.subtract_gradient();
        let shown = self.display();
        self.backend.flush();
        self.steps += 1;
        shown
    }

    /// Step 1: applies and clears every staged splat.
    pub fn apply_pending(&mut self) {
        for splat in self.inbox.drain() {
            self.apply_splat(&splat);
        }
    }

    /// Adds one splat's force to velocity and its color to density.
    pub fn apply_splat(&mut self, splat: &Splat) {
        let (w, h) = self.pool.size();
        let base = PassUniforms::for_target(w, h);

        let force = base.with_splat(splat.point, [splat.force[0], splat.force[1], 0.0], splat.radius);
        let velocity = &mut self.pool.velocity;
        self.backend
            .draw(Program::Splat, &[&velocity.current], &force, &mut velocity.scratch);
        velocity.swap();

        let dye = base.with_splat(splat.point, splat.color, splat.radius);
        let density = &mut self.pool.density;
        self.backend
            .draw(Program::Splat, &[&density.current], &dye, &mut density.scratch);
        density.swap();
    }

    /// Steps 2-3: velocity advects itself, then density rides the updated velocity.
    pub fn advect(&mut self) {
        let (w, h) = self.pool.size();
        let base = PassUniforms::for_target(w, h);

        let uniforms = base.with_advection(self.constants.dt, self.constants.velocity_dissipation);
        let velocity = &mut self.pool.velocity;
        self.backend.draw(
            Program::Advect,
            &[&velocity.current, &velocity.current],
            &uniforms,
            &mut velocity.scratch,
        );
        velocity.swap();

        let uniforms = base.with_advection(self.constants.dt, self.constants.density_dissipation);
        let density = &mut self.pool.density;
        self.backend.draw(
            Program::Advect,
            &[&self.pool.velocity.current, &density.current],
            &uniforms,
            &mut density.scratch,
        );
        density.swap();
    }

    /// Step 4.
    pub fn compute_divergence(&mut self) {
        let (w, h) = self.pool.size();
        let uniforms = PassUniforms::for_target(w, h);
        self.backend.draw(
            Program::Divergence,
            &[&self.pool.velocity.current],
            &uniforms,
            &mut self.pool.divergence,
        );
    }

    /// Step 5: Jacobi relaxation warm-started from last frame's pressure.
    pub fn solve_pressure(&mut self) {
        let (w, h) = self.pool.size();
        let uniforms = PassUniforms::for_target(w, h);
        for _ in 0..self.constants.pressure_iterations {
            let pressure = &mut self.pool.pressure;
            self.backend.draw(
                Program::Pressure,
                &[&pressure.current, &self.pool.divergence],
                &uniforms,
                &mut pressure.scratch,
            );
            pressure.swap();
        }
    }

    /// Step 6: projects velocity toward divergence-free.
    pub fn subtract_gradient(&mut self) {
        let (w, h) = self.pool.size();
        let uniforms = PassUniforms::for_target(w, h);
        let velocity = &mut self.pool.velocity;
        self.backend.draw(
            Program::GradientSubtract,
            &[&self.pool.pressure.current, &velocity.current],
            &uniforms,
            &mut velocity.scratch,
        );
        velocity.swap();
    }

    /// Step 7.
    pub fn display(&mut self) -> anyhow::Result<()> {
        self.backend.display(&self.pool.density.current)
    }

    pub fn read_velocity(&mut self) -> anyhow::Result<FieldImage> {
        self.backend.flush();
        self.backend.read_field(&self.pool.velocity.current)
    }

    pub fn read_density(&mut self) -> anyhow::Result<FieldImage> {
        self.backend.flush();
        self.backend.read_field(&self.pool.density.current)
    }

    pub fn read_divergence(&mut self) -> anyhow::Result<FieldImage> {
        self.backend.flush();
        self.backend.read_field(&self.pool.divergence)
    }

    pub fn read_pressure(&mut self) -> anyhow::Result<FieldImage> {
        self.backend.flush();
        self.backend.read_field(&self.pool.pressure.current)
    }

    pub fn read_display(&mut self) -> anyhow::Result<FieldImage> {
        self.backend.flush();
        self.backend.read_display()
    }

    pub fn pool(&self) -> &FieldPool<B::Target> {
        &self.pool
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn constants(&self) -> SolverConstants {
        self.constants
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}
