// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::sync::Arc;
use std::time::Instant;

use fluid_backdrop::driver::{TickSource, VsyncTicks};
use fluid_backdrop::gpu::WgpuBackend;
use fluid_backdrop::{DriverState, FluidSettings, FrameDriver};
use winit::{
    event::{ElementState, Event, KeyEvent, TouchPhase, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
};

const WINDOW_TITLE: &str = "Fluid Backdrop";

struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            frames: 0,
            since: Instant::now(),
        }
    }

    /// Returns the rate once per second.
    fn frame(&mut self) -> Option<f32> {
        self.frames += 1;
        let elapsed = self.since.elapsed().as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }
        let fps = self.frames as f32 / elapsed;
        self.frames = 0;
        self.since = Instant::now();
        Some(fps)
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = FluidSettings::load_or_default(&FluidSettings::default_path());
    let vsync = settings.vsync;

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        event_loop.create_window(
            winit::window::WindowAttributes::default()
                .with_title(WINDOW_TITLE)
                .with_inner_size(winit::dpi::PhysicalSize::new(1280, 720)),
        )?,
    );

    let mut driver: FrameDriver<WgpuBackend> = FrameDriver::new(settings);
    let backend_window = window.clone();
    driver.start(move || WgpuBackend::for_window(backend_window, vsync));
    if driver.state() == DriverState::Disabled {
        window.set_title(&format!("{WINDOW_TITLE} (disabled)"));
    }

    let mut ticks = VsyncTicks::new();
    let mut fps = FpsCounter::new();

    event_loop.run(move |event, target| match event {
        Event::WindowEvent { event, window_id } if window_id == window.id() => match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                driver.stop();
                target.exit();
            }
            WindowEvent::Resized(size) => driver.request_resize(size.width, size.height),
            WindowEvent::CursorMoved { position, .. } => {
                driver.pointer_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::Touch(touch) => {
                let (x, y) = (touch.location.x as f32, touch.location.y as f32);
                match touch.phase {
                    TouchPhase::Started => driver.touch_started(touch.id, x, y),
                    TouchPhase::Moved => driver.touch_moved(touch.id, x, y),
                    TouchPhase::Ended | TouchPhase::Cancelled => driver.touch_ended(touch.id),
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(time) = ticks.next_tick() {
                    driver.tick(time);
                }
                if let Some(rate) = fps.frame() {
                    window.set_title(&format!("{WINDOW_TITLE} - {rate:.1} FPS"));
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            if driver.is_running() {
                window.request_redraw();
            }
        }
        _ => {}
    })?;

    Ok(())
}
