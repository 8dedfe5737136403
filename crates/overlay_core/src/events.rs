//! Pointer notifications produced toward the render surface.

use crate::bridge::ControllerId;

/// A pixel position on the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    /// Smoothed per-controller cursor, texture space.
    Cursor { controller: ControllerId, u: f64, v: f64 },
    CursorHide { controller: ControllerId },
    TriggerState { controller: ControllerId, pressed: bool },

    MouseMove(ScreenPoint),
    MouseEnter(ScreenPoint),
    MouseLeave(ScreenPoint),

    MouseDown { controller: ControllerId, u: f64, v: f64 },
    /// `click_count == 0` suppresses the click (drag or scroll gesture).
    MouseUp { controller: ControllerId, u: f64, v: f64, click_count: u32 },
    Scroll { controller: ControllerId, delta_y: f64 },
}

/// Receiver of pointer notifications.
pub trait PointerSink {
    fn send(&mut self, event: PointerEvent);
}

impl PointerSink for Vec<PointerEvent> {
    fn send(&mut self, event: PointerEvent) {
        self.push(event);
    }
}
