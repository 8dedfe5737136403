//! Scripted controller motion for the simulated compositor.
//!
//! Every hand sweeps its ray across the panel and cycles through a tap and a
//! press-and-sweep on the trigger. Hand 0 periodically grips and carries the
//! panel sideways; hand 1 periodically drops out of tracking.

use glam::{DMat4, DQuat, DVec3};
use overlay_core::bridge::ControllerId;
use overlay_core::math;
use overlay_core::sim::SimulatedCompositor;
use overlay_core::OverlayHandle;
use std::collections::BTreeMap;
use std::ops::Range;
use tokio::time::Instant;

/// Angular rate of the cursor sweep (rad/s).
const SWEEP_RATE: f64 = 0.8;
const SWEEP_AMPLITUDE: f64 = 0.3;

const TRIGGER_CYCLE_S: f64 = 4.0;
const TAP: Range<f64> = 1.0..1.15;
const HOLD: Range<f64> = 2.5..3.3;

const GRIP_CYCLE_S: f64 = 20.0;
const GRIP: Range<f64> = 8.0..10.0;
const GRIP_TRAVEL_M_PER_S: f64 = 0.15;

const DROPOUT_CYCLE_S: f64 = 15.0;
const DROPOUT: Range<f64> = 12.0..13.0;

const HAND_HEIGHT_M: f64 = 1.3;
const HAND_DEPTH_M: f64 = -0.25;

/// What one hand does at a given moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandPlan {
    /// Aim point on the panel, texture space.
    pub u: f64,
    pub v: f64,
    /// Displacement from the hand's rest position.
    pub offset: DVec3,
    pub trigger: bool,
    pub grip: bool,
}

fn sweep(phase: f64, t: f64) -> (f64, f64) {
    (
        0.5 + SWEEP_AMPLITUDE * (SWEEP_RATE * t + phase).sin(),
        0.5 + SWEEP_AMPLITUDE * (0.7 * SWEEP_RATE * t + phase).cos(),
    )
}

/// Plan for `hand` (0-based) at `t` seconds into the script. `None` while the
/// hand is out of tracking.
pub fn plan(hand: u32, t: f64) -> Option<HandPlan> {
    let phase = f64::from(hand) * 1.3;

    if hand == 1 && DROPOUT.contains(&t.rem_euclid(DROPOUT_CYCLE_S)) {
        return None;
    }

    if hand == 0 {
        let g = t.rem_euclid(GRIP_CYCLE_S);
        if GRIP.contains(&g) {
            // Alternate direction so the panel drifts back and forth.
            let direction = if (t / GRIP_CYCLE_S).floor() as i64 % 2 == 0 { 1.0 } else { -1.0 };
            return Some(HandPlan {
                u: 0.5,
                v: 0.5,
                offset: DVec3::X * direction * GRIP_TRAVEL_M_PER_S * (g - GRIP.start),
                trigger: false,
                grip: true,
            });
        }
    }

    let c = (t + phase).rem_euclid(TRIGGER_CYCLE_S);
    let tapping = TAP.contains(&c);
    // Taps hold still so they register as clicks.
    let (u, v) = if tapping {
        sweep(phase, t - (c - TAP.start))
    } else {
        sweep(phase, t)
    };
    Some(HandPlan {
        u,
        v,
        offset: DVec3::ZERO,
        trigger: tapping || HOLD.contains(&c),
        grip: false,
    })
}

/// Right hands on even indices, left on odd, spreading outward.
fn rest_position(hand: u32) -> DVec3 {
    let side = if hand % 2 == 0 { 1.0 } else { -1.0 };
    let spread = 0.2 + 0.1 * f64::from(hand / 2);
    DVec3::new(side * spread, HAND_HEIGHT_M, HAND_DEPTH_M)
}

/// Pose at `origin` whose -Z axis points at `target`.
fn aim(origin: DVec3, target: DVec3) -> DMat4 {
    let at = DMat4::from_translation(origin);
    math::face_toward(&at, origin * 2.0 - target).unwrap_or(at)
}

pub struct ControllerScript {
    hands: u32,
    started: Instant,
    /// Orientation frozen when a grip begins.
    grip_rotation: BTreeMap<u32, DQuat>,
}

impl ControllerScript {
    pub fn new(hands: u32, started: Instant) -> Self {
        Self {
            hands,
            started,
            grip_rotation: BTreeMap::new(),
        }
    }

    /// Device index a hand is tracked under. The headset owns index 0.
    pub fn device_index(hand: u32) -> ControllerId {
        hand + 1
    }

    /// Pushes every hand's pose and buttons for `now` into the compositor,
    /// aiming at `front` wherever it currently is.
    pub fn advance_at(&mut self, sim: &SimulatedCompositor, front: OverlayHandle, now: Instant) {
        let t = now.saturating_duration_since(self.started).as_secs_f64();
        let Some(panel) = sim.snapshot(front) else {
            return;
        };
        let Some(world) = panel.world_transform else {
            return;
        };
        let aspect = sim
            .last_texture_size(front)
            .filter(|&(w, _)| w > 0)
            .map_or(1.0, |(w, h)| f64::from(h) / f64::from(w));
        let height = panel.width * aspect;

        for hand in 0..self.hands {
            let device = Self::device_index(hand);
            let Some(plan) = plan(hand, t) else {
                sim.remove_device(device);
                self.grip_rotation.remove(&hand);
                continue;
            };

            let origin = rest_position(hand) + plan.offset;
            let target = world.transform_point3(DVec3::new(
                (plan.u - 0.5) * panel.width,
                (plan.v - 0.5) * height,
                0.0,
            ));
            let pose = if plan.grip {
                let rotation = *self.grip_rotation.entry(hand).or_insert_with(|| {
                    let (_, rotation, _) = aim(origin, target).to_scale_rotation_translation();
                    rotation
                });
                DMat4::from_rotation_translation(rotation, origin)
            } else {
                self.grip_rotation.remove(&hand);
                aim(origin, target)
            };

            sim.set_device_pose(device, pose);
            sim.set_buttons(device, plan.trigger, plan.grip);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::bridge::{OverlayBridge, HMD_DEVICE_INDEX};
    use overlay_core::events::PointerEvent;
    use overlay_core::{overlay, InputLoop, InputOptions, RuntimeState};
    use std::time::Duration;

    fn setup() -> (RuntimeState, SimulatedCompositor, OverlayHandle) {
        let sim = SimulatedCompositor::new();
        sim.set_device_pose(HMD_DEVICE_INDEX, DMat4::from_translation(DVec3::new(0.0, 1.6, 0.0)));
        let mut state = RuntimeState::default();
        let handles = overlay::init_overlay(&mut state, &sim, 0.5).unwrap();
        overlay::show_all(&mut state, &sim).unwrap();
        (state, sim, handles.front)
    }

    #[test]
    fn test_tap_holds_still_and_hold_sweeps() {
        // Hand 1 taps while (t + 1.3) mod 4 is in [1.0, 1.15).
        let a = plan(1, 3.75).unwrap();
        let b = plan(1, 3.8).unwrap();
        assert!(a.trigger && b.trigger);
        assert!((a.u - b.u).abs() < 1e-9 && (a.v - b.v).abs() < 1e-9);

        let a = plan(1, 1.6).unwrap();
        let b = plan(1, 1.7).unwrap();
        assert!(a.trigger && b.trigger);
        assert_ne!((a.u, a.v), (b.u, b.v));
    }

    #[test]
    fn test_dropout_and_grip_windows() {
        assert!(plan(1, 12.5).is_none());
        assert!(plan(0, 12.5).is_some());

        let out = plan(0, 9.0).unwrap();
        assert!(out.grip && !out.trigger);
        assert!((out.offset.x - 0.15).abs() < 1e-9);
        let back = plan(0, 29.0).unwrap();
        assert!((back.offset.x + 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_rays_land_on_planned_point() {
        let (_state, sim, front) = setup();
        let start = Instant::now();
        let mut script = ControllerScript::new(2, start);
        script.advance_at(&sim, front, start);

        let expected = plan(0, 0.0).unwrap();
        let raw = sim
            .get_controller_pose(ControllerScript::device_index(0))
            .unwrap()
            .unwrap();
        let pose = math::from_row_major(&raw);
        let hit = sim
            .compute_overlay_intersection(
                front,
                math::position(&pose).to_array(),
                math::forward(&pose).to_array(),
            )
            .unwrap()
            .unwrap();
        assert!((hit.u - expected.u).abs() < 1e-6);
        assert!((hit.v - expected.v).abs() < 1e-6);
    }

    #[test]
    fn test_grip_window_carries_panel() {
        let (mut state, sim, front) = setup();
        let start_x = math::position(&sim.snapshot(front).unwrap().world_transform.unwrap()).x;

        let start = Instant::now();
        let mut script = ControllerScript::new(2, start);
        let mut input = InputLoop::new(InputOptions::default());
        let mut events: Vec<PointerEvent> = Vec::new();
        let step = Duration::from_secs_f64(1.0 / 60.0);
        let mut now = start + Duration::from_secs_f64(7.9);
        while now < start + Duration::from_secs_f64(9.5) {
            script.advance_at(&sim, front, now);
            input.tick_at(&mut state, &sim, &mut events, now);
            now += step;
        }

        assert_eq!(state.drag.dragging_controller(), Some(ControllerScript::device_index(0)));
        let moved_x = math::position(&sim.snapshot(front).unwrap().world_transform.unwrap()).x;
        assert!(moved_x - start_x > 0.15, "panel moved {}", moved_x - start_x);
    }
}
