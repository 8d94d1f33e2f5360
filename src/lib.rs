// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! A stable-fluids solver that paints an animated, pointer-reactive background.
//!
//! [`driver::FrameDriver`] owns the lifecycle. Each tick it hands staged splats to a
//! [`simulation::Simulation`], which runs the fixed pass sequence on a
//! [`backend::FieldBackend`]: [`gpu::WgpuBackend`] on real hardware, or
//! [`cpu::CpuBackend`] as a host-side reference.

pub mod backend;
pub mod config;
pub mod cpu;
pub mod driver;
pub mod field;
pub mod gpu;
pub mod input;
pub mod probe;
pub mod programs;
pub mod simulation;

pub use backend::{FieldBackend, FieldFormat, FieldImage, FilterMode, Program};
pub use config::FluidSettings;
pub use driver::{DriverState, FrameDriver, TickSource};
pub use simulation::Simulation;
