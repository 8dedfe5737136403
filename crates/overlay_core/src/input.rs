//! Controller polling loop.
//!
//! Each tick enumerates tracked controllers, casts each controller's ray at
//! the active overlay and feeds the hit into the trigger machine, the grip
//! drag and the cursor/mouse signals. Ticks come from a fixed-rate timer or,
//! in capture-synced mode, from delivered frames with a slow fallback timer.

use crate::bridge::{ControllerId, OverlayBridge, OverlayHandle, HMD_DEVICE_INDEX};
use crate::capture::{CapturePipeline, ListenerId};
use crate::cursor;
use crate::drag;
use crate::error::BridgeError;
use crate::events::{PointerEvent, PointerSink};
use crate::math;
use crate::smoothing::{PointerStabilizer, StabilizerParams};
use crate::state::{Hit, InputState, RuntimeState};
use crate::trigger::TriggerTuning;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub const DEFAULT_INPUT_FPS: f64 = 60.0;
/// Fallback rate never exceeds this in capture-synced mode.
pub const MAX_FALLBACK_FPS: f64 = 30.0;
/// Smallest UV change that counts as the cursor moving.
pub const CURSOR_MOVE_EPSILON: f64 = 0.001;
/// An enumerated controller without a pose for this long is purged.
pub const TRACKING_LOSS_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputOptions {
    pub fps: f64,
    /// Tick on every delivered capture frame instead of a fixed timer.
    pub sync_with_capture: bool,
    /// Fallback timer rate in capture-synced mode; `min(30, fps)` when unset.
    pub fallback_fps: Option<f64>,
    pub tuning: TriggerTuning,
    pub stabilizer: StabilizerParams,
    pub move_epsilon: f64,
    pub tracking_loss_timeout: Duration,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            fps: DEFAULT_INPUT_FPS,
            sync_with_capture: false,
            fallback_fps: None,
            tuning: TriggerTuning::default(),
            stabilizer: StabilizerParams::default(),
            move_epsilon: CURSOR_MOVE_EPSILON,
            tracking_loss_timeout: TRACKING_LOSS_TIMEOUT,
        }
    }
}

/// Hides the cursor, force-releases the trigger (no click), ends an owned
/// drag and forgets the controller.
fn purge<S: PointerSink + ?Sized>(state: &mut RuntimeState, sink: &mut S, id: ControllerId) {
    if state.input.cursor_hit.get(&id) == Some(&true) {
        sink.send(PointerEvent::CursorHide { controller: id });
    }
    state.input.triggers.release(id, Some(0), sink);
    state.input.forget(id);
    if state.drag.dragging_controller() == Some(id) {
        drag::end_drag(state);
    }
}

fn period_for(fps: f64) -> Duration {
    let fps = if fps.is_finite() && fps >= 1.0 { fps } else { 1.0 };
    Duration::from_millis(((1000.0 / fps).floor() as u64).max(1))
}

/// Why a tick is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickCause {
    Timer,
    Frame,
    Fallback,
}

enum Schedule {
    Stopped,
    Interval(Interval),
    CaptureSynced {
        frames: Rc<Notify>,
        last_frame: Rc<Cell<Instant>>,
        fallback: Interval,
        fallback_period: Duration,
    },
}

fn interval(period: Duration) -> Interval {
    let mut iv = tokio::time::interval_at(Instant::now() + period, period);
    iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
    iv
}

/// A hitting controller competing for the mouse pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerCandidate {
    pub controller: ControllerId,
    pub u: f64,
    pub v: f64,
}

/// The controller that most recently moved wins; otherwise the previous
/// primary keeps the pointer; otherwise the first candidate.
pub fn select_primary(
    candidates: &[PointerCandidate],
    input: &InputState,
) -> Option<PointerCandidate> {
    let mut latest: Option<(Instant, PointerCandidate)> = None;
    for c in candidates {
        if let Some(&at) = input.last_move_at.get(&c.controller) {
            if latest.map_or(true, |(best, _)| at > best) {
                latest = Some((at, *c));
            }
        }
    }
    latest
        .map(|(_, c)| c)
        .or_else(|| {
            candidates
                .iter()
                .find(|c| Some(c.controller) == input.mouse.controller)
                .copied()
        })
        .or_else(|| candidates.first().copied())
}

pub struct InputLoop {
    options: InputOptions,
    schedule: Schedule,
    frame_listener: Option<ListenerId>,
}

impl InputLoop {
    pub fn new(options: InputOptions) -> Self {
        Self {
            options,
            schedule: Schedule::Stopped,
            frame_listener: None,
        }
    }

    pub fn options(&self) -> &InputOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.schedule, Schedule::Stopped)
    }

    pub fn is_capture_synced(&self) -> bool {
        matches!(self.schedule, Schedule::CaptureSynced { .. })
    }

    /// Starts ticking, restarting cleanly if already running.
    pub fn start<S: PointerSink + ?Sized>(
        &mut self,
        state: &mut RuntimeState,
        capture: &mut CapturePipeline,
        sink: &mut S,
    ) {
        self.stop(state, capture, sink);

        if !self.options.sync_with_capture {
            let period = period_for(self.options.fps);
            tracing::info!(fps = self.options.fps, period_ms = period.as_millis() as u64, "Starting input loop");
            self.schedule = Schedule::Interval(interval(period));
            return;
        }

        let fallback_fps = self
            .options
            .fallback_fps
            .filter(|f| f.is_finite())
            .map(|f| f.max(1.0))
            .unwrap_or_else(|| self.options.fps.min(MAX_FALLBACK_FPS).max(1.0));
        let fallback_period = period_for(fallback_fps);

        let frames = Rc::new(Notify::new());
        let last_frame = Rc::new(Cell::new(Instant::now()));
        let (notify, stamp) = (frames.clone(), last_frame.clone());
        self.frame_listener = Some(capture.listeners.subscribe(Box::new(move |_| {
            stamp.set(Instant::now());
            notify.notify_one();
            Ok(())
        })));

        tracing::info!(fallback_fps, "Input loop synced to capture frames");
        self.schedule = Schedule::CaptureSynced {
            frames,
            last_frame,
            fallback: interval(fallback_period),
            fallback_period,
        };
    }

    /// Waits until the next tick is due. Pending forever while stopped.
    /// Cancel-safe.
    pub async fn next_tick(&mut self) -> TickCause {
        match &mut self.schedule {
            Schedule::Stopped => std::future::pending().await,
            Schedule::Interval(iv) => {
                iv.tick().await;
                TickCause::Timer
            }
            Schedule::CaptureSynced {
                frames,
                last_frame,
                fallback,
                fallback_period,
            } => loop {
                tokio::select! {
                    _ = frames.notified() => return TickCause::Frame,
                    _ = fallback.tick() => {
                        if last_frame.get().elapsed() >= *fallback_period * 2 {
                            return TickCause::Fallback;
                        }
                    }
                }
            },
        }
    }

    pub fn tick<B, S>(&mut self, state: &mut RuntimeState, bridge: &B, sink: &mut S)
    where
        B: OverlayBridge + ?Sized,
        S: PointerSink + ?Sized,
    {
        self.tick_at(state, bridge, sink, Instant::now());
    }

    /// One polling pass at `now`.
    pub fn tick_at<B, S>(&mut self, state: &mut RuntimeState, bridge: &B, sink: &mut S, now: Instant)
    where
        B: OverlayBridge + ?Sized,
        S: PointerSink + ?Sized,
    {
        state.metrics.input_ticks_total.inc();
        let Some(handle) = state.active_overlay() else {
            return;
        };

        let ids = match bridge.get_controller_ids() {
            Ok(ids) => ids,
            Err(e) => {
                if !e.is_lifecycle() {
                    tracing::error!(error = %e, "Input update error");
                }
                return;
            }
        };

        let mut observed = BTreeSet::new();
        let mut candidates = Vec::new();
        for id in ids.into_iter().filter(|&id| id != HMD_DEVICE_INDEX) {
            observed.insert(id);
            match self.process_controller(state, bridge, sink, handle, id, now) {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(e) if e.is_lifecycle() => return,
                Err(e) => tracing::warn!(controller = id, error = %e, "Controller update failed"),
            }
        }
        state.metrics.controllers_tracked.set(observed.len() as i64);

        self.sweep_stale(state, sink, &observed);
        self.expire_lost(state, sink, now);
        self.update_mouse(state, sink, &candidates);
    }

    fn process_controller<B, S>(
        &self,
        state: &mut RuntimeState,
        bridge: &B,
        sink: &mut S,
        handle: OverlayHandle,
        id: ControllerId,
        now: Instant,
    ) -> Result<Option<PointerCandidate>, BridgeError>
    where
        B: OverlayBridge + ?Sized,
        S: PointerSink + ?Sized,
    {
        let tracked = match bridge.get_controller_pose(id)? {
            Some(raw_pose) => bridge.get_controller_state(id)?.map(|b| (raw_pose, b)),
            None => None,
        };
        let Some((raw_pose, buttons)) = tracked else {
            if state.input.holds_state(id) {
                state.input.lost_since.entry(id).or_insert(now);
            }
            return Ok(None);
        };
        state.input.lost_since.remove(&id);
        let pose = math::from_row_major(&raw_pose);

        if state.input.trigger_pressed.get(&id) != Some(&buttons.trigger_pressed) {
            sink.send(PointerEvent::TriggerState {
                controller: id,
                pressed: buttons.trigger_pressed,
            });
            state.input.trigger_pressed.insert(id, buttons.trigger_pressed);
        }

        let hit = bridge
            .compute_overlay_intersection(
                handle,
                math::position(&pose).to_array(),
                math::forward(&pose).to_array(),
            )?
            .map(|i| Hit { u: i.u, v: i.v });

        let viewport_height = state.input.window.height;
        state.input.triggers.handle(
            &self.options.tuning,
            viewport_height,
            id,
            buttons.trigger_pressed,
            hit,
            sink,
        );
        drag::process_grip_drag(state, bridge, id, &pose, handle, buttons, hit.is_some());

        let input = &mut state.input;
        let Some(hit) = hit else {
            if input.cursor_hit.get(&id) == Some(&true) {
                sink.send(PointerEvent::CursorHide { controller: id });
                input.cursor_hit.insert(id, false);
                input.last_hit.remove(&id);
                input.last_move_at.remove(&id);
                if let Some(smoother) = input.smoothers.get_mut(&id) {
                    smoother.reset();
                }
            }
            return Ok(None);
        };

        let params = self.options.stabilizer;
        let (u, v) = input
            .smoothers
            .entry(id)
            .or_insert_with(|| PointerStabilizer::new(params))
            .update(hit.u, hit.v, now);
        sink.send(PointerEvent::Cursor { controller: id, u, v });

        let epsilon = self.options.move_epsilon;
        let moved = input.last_hit.get(&id).map_or(true, |prev| {
            (hit.u - prev.u).abs() > epsilon || (hit.v - prev.v).abs() > epsilon
        });
        if moved {
            input.last_move_at.insert(id, now);
        }
        input.last_hit.insert(id, hit);
        input.cursor_hit.insert(id, true);

        Ok(Some(PointerCandidate { controller: id, u, v }))
    }

    /// Purges controllers that were not enumerated this tick.
    fn sweep_stale<S: PointerSink + ?Sized>(
        &self,
        state: &mut RuntimeState,
        sink: &mut S,
        observed: &BTreeSet<ControllerId>,
    ) {
        for id in state.input.known_controllers() {
            if !observed.contains(&id) {
                purge(state, sink, id);
                tracing::debug!(controller = id, "Purged stale controller");
            }
        }
    }

    /// Purges controllers still enumerated but without a pose for longer
    /// than the tracking-loss timeout.
    fn expire_lost<S: PointerSink + ?Sized>(&self, state: &mut RuntimeState, sink: &mut S, now: Instant) {
        let timeout = self.options.tracking_loss_timeout;
        let expired: Vec<ControllerId> = state
            .input
            .lost_since
            .iter()
            .filter(|(_, since)| now.saturating_duration_since(**since) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            purge(state, sink, id);
            tracing::debug!(controller = id, "Purged controller after tracking loss");
        }
    }

    fn update_mouse<S: PointerSink + ?Sized>(
        &self,
        state: &mut RuntimeState,
        sink: &mut S,
        candidates: &[PointerCandidate],
    ) {
        if candidates.len() > 1 {
            let mouse = &mut state.input.mouse;
            if !mouse.suppressed {
                if mouse.inside {
                    sink.send(PointerEvent::MouseLeave(mouse.position));
                }
                mouse.inside = false;
                mouse.controller = None;
                mouse.suppressed = true;
            }
            return;
        }
        state.input.mouse.suppressed = false;

        let Some(primary) = select_primary(candidates, &state.input) else {
            let mouse = &mut state.input.mouse;
            if mouse.inside {
                sink.send(PointerEvent::MouseLeave(mouse.position));
                mouse.inside = false;
                mouse.controller = None;
            }
            return;
        };

        let Some(point) = cursor::project(state.input.window, primary.u, primary.v) else {
            return;
        };
        let mouse = &mut state.input.mouse;
        sink.send(PointerEvent::MouseMove(point));
        if !mouse.inside {
            sink.send(PointerEvent::MouseEnter(point));
        }
        mouse.position = point;
        mouse.inside = true;
        mouse.controller = Some(primary.controller);
    }

    /// Stops ticking and returns every controller to Idle. Safe to call
    /// repeatedly.
    ///
    /// Order: mouse leave, forced trigger releases (click count 0), frame
    /// listener removal, state reset.
    pub fn stop<S: PointerSink + ?Sized>(
        &mut self,
        state: &mut RuntimeState,
        capture: &mut CapturePipeline,
        sink: &mut S,
    ) {
        let was_running = self.is_running();

        if state.input.mouse.inside {
            sink.send(PointerEvent::MouseLeave(state.input.mouse.position));
        }
        state.input.triggers.release_all(0, sink);
        if let Some(id) = self.frame_listener.take() {
            capture.listeners.unsubscribe(id);
        }
        self.schedule = Schedule::Stopped;

        let window = state.input.window;
        state.input = InputState {
            window,
            ..InputState::default()
        };
        drag::end_drag(state);

        if was_running {
            tracing::info!("Input loop stopped");
        }
    }
}
