//! Process-wide runtime state shared by the capture and input loops.
//!
//! One [`RuntimeState`] is owned by the composition root and passed by
//! `&mut` into every tick. Everything runs on one event loop, so nothing in
//! here is locked.

use crate::bridge::{ControllerId, OverlayHandle};
use crate::metrics::OverlayMetrics;
use crate::smoothing::PointerStabilizer;
use crate::trigger::TriggerMachine;
use bytes::Bytes;
use glam::DMat4;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;

/// Frames kept alive for an asynchronous texture consumer.
pub const MAX_FRAME_RETENTION: usize = 3;

// --- Renderer metrics ---

/// Size report from the render surface, as delivered by the renderer.
/// Field names follow the renderer's own aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsReport {
    pub css_width: Option<f64>,
    pub css_height: Option<f64>,
    pub device_pixel_ratio: Option<f64>,
    pub zoom_factor: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererMetrics {
    pub css_width: f64,
    pub css_height: f64,
    pub device_pixel_ratio: f64,
    pub zoom_factor: f64,
    /// Physical size; zero means unknown.
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Milliseconds since the Unix epoch of the last ingestion.
    pub updated_at: i64,
}

impl Default for RendererMetrics {
    fn default() -> Self {
        Self {
            css_width: 0.0,
            css_height: 0.0,
            device_pixel_ratio: 1.0,
            zoom_factor: 1.0,
            pixel_width: 0,
            pixel_height: 0,
            updated_at: 0,
        }
    }
}

impl RendererMetrics {
    /// Merges a report. Non-finite or non-positive fields keep the previous
    /// value, except a missing zoom, which resets to 1. Pixel size is
    /// recomputed from the merged result.
    pub fn ingest(&mut self, report: MetricsReport) {
        fn usable(value: Option<f64>) -> Option<f64> {
            value.filter(|v| v.is_finite() && *v > 0.0)
        }

        if let Some(w) = usable(report.css_width) {
            self.css_width = w;
        }
        if let Some(h) = usable(report.css_height) {
            self.css_height = h;
        }
        if let Some(dpr) = usable(report.device_pixel_ratio) {
            self.device_pixel_ratio = dpr;
        }
        // Reports without a zoom factor mean unzoomed.
        if let Some(zoom) = usable(report.zoom_factor.or(Some(1.0))) {
            self.zoom_factor = zoom;
        }

        let scale = self.device_pixel_ratio * self.zoom_factor;
        self.pixel_width = (self.css_width * scale).round().max(0.0) as u32;
        self.pixel_height = (self.css_height * scale).round().max(0.0) as u32;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Physical size when both dimensions are known.
    pub fn pixel_size(&self) -> Option<(u32, u32)> {
        (self.pixel_width > 0 && self.pixel_height > 0).then_some((self.pixel_width, self.pixel_height))
    }
}

// --- Overlay handles ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayHandles {
    pub front: OverlayHandle,
    pub back: Option<OverlayHandle>,
}

#[derive(Debug, Default)]
pub struct OverlayState {
    pub handles: Option<OverlayHandles>,
    pub visible: bool,
    pub back_enabled: bool,
}

// --- Capture ---

/// One uploaded frame, kept until evicted from the ring.
#[derive(Debug, Clone)]
pub struct RetainedFrame {
    pub buffer: Bytes,
    pub width: u32,
    pub height: u32,
    /// Size the source image declared for itself.
    pub declared: (u32, u32),
}

/// Bounded FIFO of recently uploaded frames. Never blocks; evicts oldest.
#[derive(Debug)]
pub struct FrameRetention {
    frames: VecDeque<RetainedFrame>,
    capacity: usize,
}

impl FrameRetention {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn retain(&mut self, frame: RetainedFrame) {
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn latest(&self) -> Option<&RetainedFrame> {
        self.frames.back()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Default for FrameRetention {
    fn default() -> Self {
        Self::new(MAX_FRAME_RETENTION)
    }
}

#[derive(Debug, Default)]
pub struct CaptureState {
    pub retention: FrameRetention,
    pub force_opaque_alpha: bool,
    pub last_size_mismatch_log: Option<Instant>,
}

// --- Grip drag ---

/// The controller currently carrying the overlay and its grab reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveDrag {
    pub controller: ControllerId,
    pub start_controller_inverse: DMat4,
    pub start_overlay_transform: DMat4,
}

/// At most one controller owns the drag; `None` is Idle.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DragState {
    pub active: Option<ActiveDrag>,
}

impl DragState {
    pub fn is_dragging(&self) -> bool {
        self.active.is_some()
    }

    pub fn dragging_controller(&self) -> Option<ControllerId> {
        self.active.map(|d| d.controller)
    }
}

// --- Controller input ---

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hit {
    pub u: f64,
    pub v: f64,
}

/// Size of the render surface's viewport in pixels; zero means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

/// Where the single primary mouse pointer currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MouseState {
    pub inside: bool,
    pub controller: Option<ControllerId>,
    pub position: crate::events::ScreenPoint,
    /// Set while more than one controller hits; hover is withheld.
    pub suppressed: bool,
}

/// Per-controller bookkeeping. A missing key always means Idle.
#[derive(Debug, Default)]
pub struct InputState {
    pub cursor_hit: BTreeMap<ControllerId, bool>,
    pub last_hit: BTreeMap<ControllerId, Hit>,
    pub last_move_at: BTreeMap<ControllerId, Instant>,
    pub trigger_pressed: BTreeMap<ControllerId, bool>,
    pub triggers: TriggerMachine,
    pub smoothers: BTreeMap<ControllerId, PointerStabilizer>,
    /// When an enumerated controller first reported no pose.
    pub lost_since: BTreeMap<ControllerId, Instant>,
    pub mouse: MouseState,
    pub window: WindowSize,
}

impl InputState {
    /// Every controller id present in any per-controller map.
    pub fn known_controllers(&self) -> Vec<ControllerId> {
        let mut ids: Vec<ControllerId> = self
            .cursor_hit
            .keys()
            .chain(self.last_hit.keys())
            .chain(self.last_move_at.keys())
            .chain(self.trigger_pressed.keys())
            .chain(self.smoothers.keys())
            .chain(self.lost_since.keys())
            .copied()
            .chain(self.triggers.controllers())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Drops a controller from every map except the trigger machine, which
    /// needs a release decision first.
    pub fn forget(&mut self, controller: ControllerId) {
        self.cursor_hit.remove(&controller);
        self.last_hit.remove(&controller);
        self.last_move_at.remove(&controller);
        self.trigger_pressed.remove(&controller);
        self.smoothers.remove(&controller);
        self.lost_since.remove(&controller);
    }

    /// True when `controller` has anything a purge would need to undo.
    pub fn holds_state(&self, controller: ControllerId) -> bool {
        self.cursor_hit.contains_key(&controller)
            || self.last_hit.contains_key(&controller)
            || self.trigger_pressed.contains_key(&controller)
            || self.smoothers.contains_key(&controller)
            || self.triggers.get(controller).is_some()
    }

    /// True when no per-controller entry survives.
    pub fn is_clear(&self) -> bool {
        self.known_controllers().is_empty()
    }
}

// --- Root ---

pub struct RuntimeState {
    pub overlay: OverlayState,
    pub renderer_metrics: RendererMetrics,
    pub capture: CaptureState,
    pub drag: DragState,
    pub input: InputState,
    pub metrics: Arc<OverlayMetrics>,
}

impl RuntimeState {
    pub fn new(metrics: Arc<OverlayMetrics>) -> Self {
        Self {
            overlay: OverlayState::default(),
            renderer_metrics: RendererMetrics::default(),
            capture: CaptureState::default(),
            drag: DragState::default(),
            input: InputState::default(),
            metrics,
        }
    }

    /// Handle controller rays are cast against; currently the front panel.
    pub fn active_overlay(&self) -> Option<OverlayHandle> {
        self.overlay.handles.map(|h| h.front)
    }

    pub fn update_renderer_metrics(&mut self, report: MetricsReport) {
        self.renderer_metrics.ingest(report);
        tracing::debug!(
            pixel_width = self.renderer_metrics.pixel_width,
            pixel_height = self.renderer_metrics.pixel_height,
            "Renderer metrics updated"
        );
    }

    pub fn update_window_size(&mut self, width: u32, height: u32) {
        self.input.window = WindowSize { width, height };
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(Arc::new(OverlayMetrics::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_pixel_size_from_css_dpr_zoom() {
        let mut m = RendererMetrics::default();
        m.ingest(MetricsReport {
            css_width: Some(800.0),
            css_height: Some(450.0),
            device_pixel_ratio: Some(1.25),
            zoom_factor: None,
        });
        assert_eq!(m.pixel_size(), Some((1000, 563)));
        assert!(m.updated_at > 0);
    }

    #[test]
    fn test_metrics_ignore_invalid_fields() {
        let mut m = RendererMetrics::default();
        m.ingest(MetricsReport {
            css_width: Some(640.0),
            css_height: Some(480.0),
            device_pixel_ratio: Some(2.0),
            zoom_factor: Some(1.0),
        });
        m.ingest(MetricsReport {
            css_width: Some(f64::NAN),
            css_height: Some(-3.0),
            device_pixel_ratio: Some(0.0),
            zoom_factor: Some(0.5),
        });
        assert_eq!(m.css_width, 640.0);
        assert_eq!(m.device_pixel_ratio, 2.0);
        assert_eq!(m.pixel_size(), Some((640, 480)));
    }

    #[test]
    fn test_metrics_missing_zoom_resets_to_one() {
        let zoomed = MetricsReport {
            css_width: Some(100.0),
            css_height: Some(100.0),
            device_pixel_ratio: Some(1.0),
            zoom_factor: Some(2.0),
        };
        let mut m = RendererMetrics::default();
        m.ingest(zoomed);
        assert_eq!(m.pixel_size(), Some((200, 200)));

        m.ingest(MetricsReport {
            zoom_factor: None,
            ..zoomed
        });
        assert_eq!(m.zoom_factor, 1.0);
        assert_eq!(m.pixel_size(), Some((100, 100)));
    }

    #[test]
    fn test_unknown_metrics_have_no_pixel_size() {
        assert_eq!(RendererMetrics::default().pixel_size(), None);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let mut ring = FrameRetention::default();
        for i in 0..5u32 {
            ring.retain(RetainedFrame {
                buffer: Bytes::from(vec![i as u8; 4]),
                width: 1,
                height: 1,
                declared: (1, 1),
            });
        }
        assert_eq!(ring.len(), MAX_FRAME_RETENTION);
        assert_eq!(ring.latest().unwrap().buffer[0], 4);
        ring.clear();
        assert!(ring.is_empty());
    }
}
