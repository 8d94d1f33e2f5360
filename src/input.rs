// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use rand::Rng;

use crate::config::BurstRange;

/// A localized impulse. `point` is normalized with y pointing up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    pub point: [f32; 2],
    pub force: [f32; 2],
    pub color: [f32; 3],
    pub radius: f32,
}

/// Splats waiting for the next step.
///
/// The pointer slot holds at most one splat and a newer one replaces it;
/// bursts queue in full.
#[derive(Debug, Default)]
pub struct SplatInbox {
    burst: Vec<Splat>,
    pointer: Option<Splat>,
}

impl SplatInbox {
    pub fn post(&mut self, splat: Splat) {
        self.pointer = Some(splat);
    }

    pub fn post_burst(&mut self, splats: impl IntoIterator<Item = Splat>) {
        self.burst.extend(splats);
    }

    pub fn is_pending(&self) -> bool {
        self.pointer.is_some() || !self.burst.is_empty()
    }

    pub fn len(&self) -> usize {
        self.burst.len() + usize::from(self.pointer.is_some())
    }

    pub fn is_empty(&self) -> bool {
        !self.is_pending()
    }

    /// Takes everything staged: burst splats first, then the pointer splat.
    pub fn drain(&mut self) -> Vec<Splat> {
        let mut splats = std::mem::take(&mut self.burst);
        splats.extend(self.pointer.take());
        splats
    }

    pub fn clear(&mut self) {
        self.burst.clear();
        self.pointer = None;
    }
}

/// Slowly cycling dye hue: phase-shifted sines across the three channels.
pub fn dye_color(time_secs: f64, amount: f32) -> [f32; 3] {
    let t = time_secs as f32;
    [
        (t.sin() * 0.5 + 0.5) * amount,
        ((t + 2.0).sin() * 0.5 + 0.5) * amount,
        ((t + 4.0).sin() * 0.5 + 0.5) * amount,
    ]
}

/// Tracks the pointer/touch position in surface pixels (rows grow downward).
#[derive(Debug)]
pub struct PointerTracker {
    gain: f32,
    radius: f32,
    dye_amount: f32,
    current: Option<[f32; 2]>,
    previous: [f32; 2],
    moved: bool,
}

impl PointerTracker {
    pub fn new(gain: f32, radius: f32, dye_amount: f32) -> Self {
        Self {
            gain,
            radius,
            dye_amount,
            current: None,
            previous: [0.0; 2],
            moved: false,
        }
    }

    /// Pointer or touch motion. The first event ever seen carries no force.
    pub fn moved(&mut self, x: f32, y: f32) {
        self.previous = self.current.unwrap_or([x, y]);
        self.current = Some([x, y]);
        self.moved = true;
    }

    /// A new touch starts from rest at the touch point.
    pub fn touch_started(&mut self, x: f32, y: f32) {
        self.previous = [x, y];
        self.current = Some([x, y]);
        self.moved = true;
    }

    pub fn is_pending(&self) -> bool {
        self.moved
    }

    /// Converts the latest motion into a splat and clears the pending flag.
    pub fn take_splat(&mut self, surface: (u32, u32), time_secs: f64) -> Option<Splat> {
        if !std::mem::take(&mut self.moved) {
            return None;
        }
        let [x, y] = self.current?;
        let [px, py] = self.previous;
        let w = surface.0.max(1) as f32;
        let h = surface.1.max(1) as f32;
        Some(Splat {
            point: [x / w, 1.0 - y / h],
            force: [(x - px) * self.gain, -(y - py) * self.gain],
            color: dye_color(time_secs, self.dye_amount),
            radius: self.radius,
        })
    }
}

/// Randomly placed, colored and directed splats covering the surface.
pub fn random_burst<R: Rng>(rng: &mut R, range: BurstRange) -> Vec<Splat> {
    let count = rng.gen_range(range.min..=range.max.max(range.min));
    (0..count)
        .map(|_| {
            let color = [rng.gen::<f32>() * 10.0, rng.gen::<f32>() * 10.0, rng.gen::<f32>() * 10.0];
            let point = [rng.gen::<f32>(), 1.0 - rng.gen::<f32>()];
            let force = [100.0 * (rng.gen::<f32>() - 0.5), 100.0 * (rng.gen::<f32>() - 0.5)];
            Splat {
                point,
                force,
                color,
                radius: 0.005 + rng.gen::<f32>() * 0.01,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn splat(x: f32) -> Splat {
        Splat {
            point: [x, 0.5],
            force: [0.0; 2],
            color: [1.0; 3],
            radius: 0.01,
        }
    }

    #[test]
    fn pointer_slot_is_latest_wins() {
        let mut inbox = SplatInbox::default();
        inbox.post(splat(0.1));
        inbox.post(splat(0.9));
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox.drain(), vec![splat(0.9)]);
        assert!(!inbox.is_pending());
    }

    #[test]
    fn drain_orders_burst_before_pointer() {
        let mut inbox = SplatInbox::default();
        inbox.post(splat(0.5));
        inbox.post_burst([splat(0.1), splat(0.2)]);
        assert_eq!(inbox.drain(), vec![splat(0.1), splat(0.2), splat(0.5)]);
    }

    #[test]
    fn motion_maps_to_flipped_force_and_point() {
        let mut pointer = PointerTracker::new(5.0, 0.005, 0.5);
        pointer.moved(100.0, 100.0);
        pointer.moved(110.0, 90.0);
        let splat = pointer.take_splat((200, 400), 0.0).unwrap();
        assert_eq!(splat.point, [0.55, 1.0 - 90.0 / 400.0]);
        assert_eq!(splat.force, [50.0, 50.0]);
        assert_eq!(splat.radius, 0.005);
        assert!(pointer.take_splat((200, 400), 0.0).is_none());
    }

    #[test]
    fn first_motion_and_touch_start_carry_no_force() {
        let mut pointer = PointerTracker::new(5.0, 0.005, 0.5);
        pointer.moved(40.0, 40.0);
        assert_eq!(pointer.take_splat((100, 100), 0.0).unwrap().force, [0.0, 0.0]);
        pointer.moved(60.0, 40.0);
        pointer.touch_started(10.0, 10.0);
        assert_eq!(pointer.take_splat((100, 100), 0.0).unwrap().force, [0.0, 0.0]);
    }

    #[test]
    fn dye_color_cycles_within_amount() {
        for step in 0..200 {
            let color = dye_color(step as f64 * 0.1, 0.5);
            assert!(color.iter().all(|&c| (0.0..=0.5).contains(&c)));
        }
        assert_ne!(dye_color(0.0, 0.5), dye_color(1.5, 0.5));
    }

    #[test]
    fn burst_respects_range_and_seed() {
        let range = BurstRange::new(5, 24);
        let a = random_burst(&mut StdRng::seed_from_u64(3), range);
        let b = random_burst(&mut StdRng::seed_from_u64(3), range);
        assert_eq!(a, b);
        assert!((5..=24).contains(&a.len()));
        for s in &a {
            assert!((0.0..=1.0).contains(&s.point[0]) && (0.0..=1.0).contains(&s.point[1]));
            assert!(s.force.iter().all(|f| f.abs() <= 50.0));
            assert!((0.005..=0.015).contains(&s.radius));
        }
    }
}
