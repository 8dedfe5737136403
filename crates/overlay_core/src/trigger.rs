//! Click, drag and scroll disambiguation for a single binary trigger.
//!
//! Per controller: Idle -> Pressed -> {Pressed(moved) | Dragging} -> Idle.
//! A small wobble during a tap keeps the click; a vertical sweep past the
//! drag threshold closes the press with `click_count == 0` and turns further
//! motion into scroll deltas. One physical press never yields two mouseDowns.

use crate::bridge::ControllerId;
use crate::events::{PointerEvent, PointerSink};
use crate::state::Hit;
use std::collections::BTreeMap;

/// Viewport height assumed for scroll scaling before the surface reports one.
pub const DEFAULT_VIEWPORT_HEIGHT: f64 = 700.0;

/// Tunable thresholds of the trigger gesture recognizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerTuning {
    /// `|dU| + |dV|` from the press point above which a release is no click.
    pub click_cancel_threshold: f64,
    /// `|dV|` from the press point above which the press becomes a scroll.
    pub drag_threshold: f64,
    pub scroll_multiplier: f64,
    /// Largest scroll delta (pixels) emitted in one tick.
    pub scroll_max: f64,
}

impl Default for TriggerTuning {
    fn default() -> Self {
        Self {
            click_cancel_threshold: 0.02,
            drag_threshold: 0.03,
            scroll_multiplier: 1.0,
            scroll_max: 120.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerDragState {
    pub start_u: f64,
    pub start_v: f64,
    pub last_u: f64,
    pub last_v: f64,
    pub dragging: bool,
    pub moved: bool,
    /// A mouseDown is outstanding and still owes a mouseUp.
    pub down_sent: bool,
}

impl TriggerDragState {
    fn pressed_at(hit: Hit) -> Self {
        Self {
            start_u: hit.u,
            start_v: hit.v,
            last_u: hit.u,
            last_v: hit.v,
            dragging: false,
            moved: false,
            down_sent: true,
        }
    }
}

/// Trigger gesture state for every controller. A missing entry is Idle.
#[derive(Debug, Default)]
pub struct TriggerMachine {
    states: BTreeMap<ControllerId, TriggerDragState>,
}

impl TriggerMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, controller: ControllerId) -> Option<&TriggerDragState> {
        self.states.get(&controller)
    }

    pub fn controllers(&self) -> impl Iterator<Item = ControllerId> + '_ {
        self.states.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drops all state without emitting anything.
    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Feeds one tick of trigger state for `controller`.
    ///
    /// `viewport_height` is the render surface height in pixels; zero or
    /// unknown falls back to [`DEFAULT_VIEWPORT_HEIGHT`].
    pub fn handle<S: PointerSink + ?Sized>(
        &mut self,
        tuning: &TriggerTuning,
        viewport_height: u32,
        controller: ControllerId,
        pressed: bool,
        hit: Option<Hit>,
        sink: &mut S,
    ) {
        if !pressed {
            self.release(controller, None, sink);
            return;
        }

        let Some(existing) = self.states.get_mut(&controller) else {
            let Some(hit) = hit else {
                return;
            };
            sink.send(PointerEvent::MouseDown {
                controller,
                u: hit.u,
                v: hit.v,
            });
            self.states.insert(controller, TriggerDragState::pressed_at(hit));
            return;
        };

        let Some(hit) = hit else {
            existing.moved = true;
            return;
        };

        let total_u = hit.u - existing.start_u;
        let total_v = hit.v - existing.start_v;
        if !existing.moved && total_u.abs() + total_v.abs() > tuning.click_cancel_threshold {
            existing.moved = true;
        }

        if !existing.dragging && total_v.abs() > tuning.drag_threshold {
            if existing.down_sent {
                sink.send(PointerEvent::MouseUp {
                    controller,
                    u: hit.u,
                    v: hit.v,
                    click_count: 0,
                });
                existing.down_sent = false;
            }
            existing.dragging = true;
            existing.moved = true;
        }

        if existing.dragging {
            let height = if viewport_height > 0 {
                f64::from(viewport_height)
            } else {
                DEFAULT_VIEWPORT_HEIGHT
            };
            let delta_v = hit.v - existing.last_v;
            let delta_y = (delta_v * height * tuning.scroll_multiplier)
                .clamp(-tuning.scroll_max, tuning.scroll_max);
            if delta_y != 0.0 {
                sink.send(PointerEvent::Scroll { controller, delta_y });
            }
        }

        existing.last_u = hit.u;
        existing.last_v = hit.v;
    }

    /// Ends the press for `controller`, emitting the owed mouseUp if any.
    ///
    /// `click_count_override` replaces the computed click count (forced
    /// releases pass `Some(0)`). Releasing an Idle controller is a no-op, so
    /// calling this twice never emits a second mouseUp.
    pub fn release<S: PointerSink + ?Sized>(
        &mut self,
        controller: ControllerId,
        click_count_override: Option<u32>,
        sink: &mut S,
    ) {
        let Some(state) = self.states.remove(&controller) else {
            return;
        };
        if !state.down_sent {
            return;
        }
        let computed = if state.dragging || state.moved { 0 } else { 1 };
        sink.send(PointerEvent::MouseUp {
            controller,
            u: state.last_u,
            v: state.last_v,
            click_count: click_count_override.unwrap_or(computed),
        });
    }

    /// Force-releases every controller with `click_count`.
    pub fn release_all<S: PointerSink + ?Sized>(&mut self, click_count: u32, sink: &mut S) {
        let ids: Vec<ControllerId> = self.controllers().collect();
        for id in ids {
            self.release(id, Some(click_count), sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(u: f64, v: f64) -> Option<Hit> {
        Some(Hit { u, v })
    }

    fn press(
        m: &mut TriggerMachine,
        events: &mut Vec<PointerEvent>,
        id: ControllerId,
        height: u32,
        at: Option<Hit>,
    ) {
        m.handle(&TriggerTuning::default(), height, id, true, at, events);
    }

    fn lift(m: &mut TriggerMachine, events: &mut Vec<PointerEvent>, id: ControllerId) {
        m.handle(&TriggerTuning::default(), 0, id, false, None, events);
    }

    #[test]
    fn test_tap_without_motion_is_single_click() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 2, 0, hit(0.25, 0.35));
        press(&mut m, &mut events, 2, 0, hit(0.25, 0.35));
        lift(&mut m, &mut events, 2);

        assert_eq!(
            events,
            vec![
                PointerEvent::MouseDown { controller: 2, u: 0.25, v: 0.35 },
                PointerEvent::MouseUp { controller: 2, u: 0.25, v: 0.35, click_count: 1 },
            ]
        );
        assert!(m.is_empty());
    }

    #[test]
    fn test_small_wobble_keeps_click_but_large_cancels() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 1, 0, hit(0.5, 0.5));
        press(&mut m, &mut events, 1, 0, hit(0.505, 0.505));
        lift(&mut m, &mut events, 1);
        assert!(matches!(events[1], PointerEvent::MouseUp { click_count: 1, .. }));

        events.clear();
        press(&mut m, &mut events, 1, 0, hit(0.5, 0.5));
        press(&mut m, &mut events, 1, 0, hit(0.525, 0.5));
        lift(&mut m, &mut events, 1);
        assert!(matches!(
            events.last(),
            Some(PointerEvent::MouseUp { click_count: 0, .. })
        ));
    }

    #[test]
    fn test_vertical_sweep_closes_press_and_scrolls() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 4, 1000, hit(0.3, 0.3));
        press(&mut m, &mut events, 4, 1000, hit(0.3, 0.35));

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            PointerEvent::MouseUp { controller: 4, u: 0.3, v: 0.35, click_count: 0 }
        );
        match events[2] {
            PointerEvent::Scroll { controller: 4, delta_y } => {
                assert!((delta_y - 50.0).abs() < 1e-9, "delta_y = {delta_y}")
            }
            ref other => panic!("expected scroll, got {other:?}"),
        }

        // The press was already closed; releasing emits nothing further.
        lift(&mut m, &mut events, 4);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_scroll_is_clamped_and_uses_default_height() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 3, 0, hit(0.5, 0.1));
        press(&mut m, &mut events, 3, 0, hit(0.5, 0.9));
        match events.last() {
            Some(PointerEvent::Scroll { delta_y, .. }) => assert_eq!(*delta_y, 120.0),
            other => panic!("expected scroll, got {other:?}"),
        }

        // Holding still while dragging produces no zero-length scroll.
        let before = events.len();
        press(&mut m, &mut events, 3, 0, hit(0.5, 0.9));
        assert_eq!(events.len(), before);

        press(&mut m, &mut events, 3, 0, hit(0.5, 0.89));
        match events.last() {
            Some(PointerEvent::Scroll { delta_y, .. }) => {
                assert!((delta_y + 7.0).abs() < 1e-6, "delta_y = {delta_y}")
            }
            other => panic!("expected scroll, got {other:?}"),
        }
    }

    #[test]
    fn test_hit_loss_then_release_uses_last_hit() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 1, 0, hit(0.1, 0.2));
        press(&mut m, &mut events, 1, 0, None);
        lift(&mut m, &mut events, 1);

        assert_eq!(
            events,
            vec![
                PointerEvent::MouseDown { controller: 1, u: 0.1, v: 0.2 },
                PointerEvent::MouseUp { controller: 1, u: 0.1, v: 0.2, click_count: 0 },
            ]
        );
    }

    #[test]
    fn test_press_without_hit_is_ignored() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 5, 0, None);
        assert!(events.is_empty());
        assert!(m.get(5).is_none());
    }

    #[test]
    fn test_force_release_is_idempotent() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 6, 0, hit(0.4, 0.4));
        m.release(6, Some(0), &mut events);
        m.release(6, Some(0), &mut events);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], PointerEvent::MouseUp { click_count: 0, .. }));
    }

    #[test]
    fn test_release_all_closes_every_outstanding_press() {
        let mut m = TriggerMachine::new();
        let mut events = Vec::new();
        press(&mut m, &mut events, 1, 0, hit(0.1, 0.1));
        press(&mut m, &mut events, 2, 0, hit(0.2, 0.2));
        events.clear();

        m.release_all(0, &mut events);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, PointerEvent::MouseUp { click_count: 0, .. })));
        assert!(m.is_empty());
    }
}
