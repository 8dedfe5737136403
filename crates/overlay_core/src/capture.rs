//! Frame capture from the render surface into the overlay texture.
//!
//! Two delivery modes:
//! - **Push**: the surface offers a paint stream. Paints that pile up while
//!   one frame is being processed are drained and counted, never queued.
//! - **Poll**: an explicit Idle/InFlight state machine. One `capture_page`
//!   future is in flight at a time and lives inside the pipeline, so
//!   [`CapturePipeline::next_event`] is cancel-safe inside `tokio::select!`.
//!
//! Each frame is reconciled against the renderer metrics, optionally forced
//! opaque, retained in the ring, uploaded to the front and back overlays and
//! announced to frame listeners.

use crate::bridge::OverlayBridge;
use crate::error::{CaptureError, SurfaceError};
use crate::state::{RetainedFrame, RuntimeState};
use bytes::Bytes;
use futures::future::LocalBoxFuture;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const DEFAULT_CAPTURE_FPS: f64 = 60.0;
pub const MIN_CAPTURE_FPS: f64 = 1.0;
pub const MAX_CAPTURE_FPS: f64 = 120.0;
/// Size-mismatch warnings are emitted at most this often.
pub const SIZE_MISMATCH_LOG_INTERVAL: Duration = Duration::from_millis(5000);

/// One rendered frame as produced by the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    /// Size the surface reports for the image; may disagree with `bgra`.
    pub width: u32,
    pub height: u32,
    pub bgra: Vec<u8>,
}

/// Announced to frame listeners after a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// The 2D surface being mirrored into VR.
pub trait RenderSurface {
    fn is_destroyed(&self) -> bool;

    /// Hands out the paint stream when the surface renders offscreen.
    /// `None` selects poll mode.
    fn take_paint_stream(&self) -> Option<mpsc::Receiver<CapturedImage>> {
        None
    }

    /// Takes back a stream handed out by [`RenderSurface::take_paint_stream`]
    /// when capture stops, so the next start can push again.
    fn return_paint_stream(&self, _paints: mpsc::Receiver<CapturedImage>) {}

    fn set_frame_rate(&self, _fps: u32) {}
    fn set_background_throttling(&self, _enabled: bool) {}
    fn start_painting(&self) {}
    fn stop_painting(&self) {}

    /// Renders the current page once.
    fn capture_page(&self) -> LocalBoxFuture<'static, Result<CapturedImage, SurfaceError>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    pub fps: f64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            fps: DEFAULT_CAPTURE_FPS,
        }
    }
}

/// Clamps to the supported range; non-finite input selects the default.
pub fn normalize_fps(fps: f64) -> f64 {
    if !fps.is_finite() {
        return DEFAULT_CAPTURE_FPS;
    }
    fps.clamp(MIN_CAPTURE_FPS, MAX_CAPTURE_FPS)
}

/// `max(1, floor(1000 / fps))` milliseconds.
pub fn capture_interval(fps: f64) -> Duration {
    let ms = (1000.0 / normalize_fps(fps)).floor().max(1.0);
    Duration::from_millis(ms as u64)
}

// --- Frame listeners ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

pub type FrameListener = Box<dyn FnMut(&FrameInfo) -> anyhow::Result<()>>;

/// Fan-out of [`FrameInfo`] to subscribers. A failing or panicking listener
/// is logged and skipped; the rest still run.
#[derive(Default)]
pub struct FrameNotifier {
    listeners: BTreeMap<ListenerId, FrameListener>,
    next_id: u64,
}

impl FrameNotifier {
    pub fn subscribe(&mut self, listener: FrameListener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.insert(id, listener);
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify(&mut self, info: &FrameInfo) {
        for (id, listener) in self.listeners.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| listener(info))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(listener = id.0, error = %e, "Capture frame listener failed")
                }
                Err(_) => tracing::warn!(listener = id.0, "Capture frame listener panicked"),
            }
        }
    }
}

// --- Pipeline ---

/// Output of one [`CapturePipeline::next_event`] wait.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A frame is ready. `skipped` paints were discarded in favour of it.
    Frame { image: CapturedImage, skipped: u64 },
    Failed(SurfaceError),
    /// The surface went away; capture must stop.
    Closed,
}

enum CapturePhase {
    Idle {
        due: Instant,
    },
    InFlight {
        started_at: Instant,
        pending: LocalBoxFuture<'static, Result<CapturedImage, SurfaceError>>,
    },
}

enum Delivery {
    Push(mpsc::Receiver<CapturedImage>),
    Poll(CapturePhase),
}

struct ActiveCapture {
    surface: Rc<dyn RenderSurface>,
    interval: Duration,
    delivery: Delivery,
}

#[derive(Default)]
pub struct CapturePipeline {
    active: Option<ActiveCapture>,
    pub listeners: FrameNotifier,
}

impl CapturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.interval)
    }

    pub fn is_push_mode(&self) -> bool {
        matches!(
            self.active.as_ref().map(|a| &a.delivery),
            Some(Delivery::Push(_))
        )
    }

    /// Starts capturing `surface`, stopping any previous capture first.
    pub fn start(
        &mut self,
        state: &mut RuntimeState,
        surface: Rc<dyn RenderSurface>,
        options: &CaptureOptions,
    ) -> Result<(), CaptureError> {
        if state.overlay.handles.is_none() {
            tracing::warn!("Overlay not initialized, skipping capture");
            return Err(CaptureError::OverlayNotInitialized);
        }
        if surface.is_destroyed() {
            tracing::warn!("Render surface already destroyed, skipping capture");
            return Err(CaptureError::SurfaceDestroyed);
        }

        self.stop(state);

        let fps = normalize_fps(options.fps);
        let interval = capture_interval(fps);
        surface.set_background_throttling(false);

        let delivery = match surface.take_paint_stream() {
            Some(paints) => {
                surface.set_frame_rate(fps.round() as u32);
                surface.start_painting();
                Delivery::Push(paints)
            }
            None => Delivery::Poll(CapturePhase::Idle { due: Instant::now() }),
        };

        let mode = match delivery {
            Delivery::Push(_) => "paint",
            Delivery::Poll(_) => "polling",
        };
        tracing::info!(
            fps,
            interval_ms = interval.as_millis() as u64,
            mode,
            "Starting capture"
        );

        self.active = Some(ActiveCapture {
            surface,
            interval,
            delivery,
        });
        Ok(())
    }

    /// Stops capture and drops every held frame. Safe to call repeatedly.
    pub fn stop(&mut self, state: &mut RuntimeState) {
        if let Some(ActiveCapture {
            surface, delivery, ..
        }) = self.active.take()
        {
            if !surface.is_destroyed() {
                surface.stop_painting();
                if let Delivery::Push(mut paints) = delivery {
                    // Paints from this run must not leak into the next one.
                    while paints.try_recv().is_ok() {}
                    if !paints.is_closed() {
                        surface.return_paint_stream(paints);
                    }
                }
            }
            tracing::info!("Capture stopped");
        }
        state.capture.retention.clear();
    }

    /// Waits for the next capture event. Pending forever while stopped.
    ///
    /// Cancel-safe: an in-flight `capture_page` future and the poll deadline
    /// survive the returned future being dropped.
    pub async fn next_event(&mut self) -> CaptureEvent {
        let Some(ActiveCapture {
            surface,
            interval,
            delivery,
        }) = self.active.as_mut()
        else {
            return std::future::pending().await;
        };

        match delivery {
            Delivery::Push(paints) => {
                let Some(mut image) = paints.recv().await else {
                    return CaptureEvent::Closed;
                };
                let mut skipped = 0;
                while let Ok(newer) = paints.try_recv() {
                    image = newer;
                    skipped += 1;
                }
                if surface.is_destroyed() {
                    return CaptureEvent::Closed;
                }
                CaptureEvent::Frame { image, skipped }
            }
            Delivery::Poll(phase) => loop {
                match phase {
                    CapturePhase::Idle { due } => {
                        tokio::time::sleep_until(*due).await;
                        if surface.is_destroyed() {
                            return CaptureEvent::Closed;
                        }
                        let pending = surface.capture_page();
                        *phase = CapturePhase::InFlight {
                            started_at: Instant::now(),
                            pending,
                        };
                    }
                    CapturePhase::InFlight { started_at, pending } => {
                        let result = pending.await;
                        let elapsed = started_at.elapsed();
                        *phase = CapturePhase::Idle {
                            due: Instant::now() + interval.saturating_sub(elapsed),
                        };
                        if surface.is_destroyed() {
                            return CaptureEvent::Closed;
                        }
                        return match result {
                            Ok(image) => CaptureEvent::Frame { image, skipped: 0 },
                            Err(e) => CaptureEvent::Failed(e),
                        };
                    }
                }
            },
        }
    }

    /// Applies one event. Returns the frame info when a frame was uploaded.
    pub fn handle_event<B: OverlayBridge + ?Sized>(
        &mut self,
        state: &mut RuntimeState,
        bridge: &B,
        event: CaptureEvent,
    ) -> Option<FrameInfo> {
        match event {
            CaptureEvent::Frame { image, skipped } => {
                if skipped > 0 {
                    state.metrics.paints_skipped_total.inc_by(skipped);
                }
                match process_frame(state, bridge, image) {
                    Ok(Some(info)) => {
                        self.listeners.notify(&info);
                        Some(info)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        self.on_error(state, e);
                        None
                    }
                }
            }
            CaptureEvent::Failed(e) => {
                self.on_error(state, e.into());
                None
            }
            CaptureEvent::Closed => {
                tracing::debug!("Render surface closed");
                self.stop(state);
                None
            }
        }
    }

    fn on_error(&mut self, state: &mut RuntimeState, e: CaptureError) {
        if e.is_lifecycle() {
            tracing::debug!(error = %e, "Render surface gone, stopping capture");
            self.stop(state);
        } else {
            state.metrics.capture_errors_total.inc();
            tracing::error!(error = %e, "Capture error");
        }
    }
}

// --- Per-frame processing ---

/// Reconciles, uploads and retains one frame.
///
/// `Ok(None)` means the frame was skipped (no overlay, empty image, or a
/// byte length that matches no usable size).
pub fn process_frame<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    image: CapturedImage,
) -> Result<Option<FrameInfo>, CaptureError> {
    let Some(handles) = state.overlay.handles else {
        return Ok(None);
    };
    let CapturedImage {
        width: declared_width,
        height: declared_height,
        mut bgra,
    } = image;
    if declared_width == 0 || declared_height == 0 || bgra.is_empty() {
        return Ok(None);
    }

    let (mut width, mut height) = (declared_width, declared_height);
    if let Some((pw, ph)) = state.renderer_metrics.pixel_size() {
        if byte_len(pw, ph) == Some(bgra.len()) {
            (width, height) = (pw, ph);
        }
    }

    let expected = byte_len(width, height);
    if expected != Some(bgra.len()) {
        let derived = derive_size_from_buffer(declared_width, declared_height, bgra.len());
        let now = Instant::now();
        let may_log = state
            .capture
            .last_size_mismatch_log
            .map_or(true, |last| now.duration_since(last) > SIZE_MISMATCH_LOG_INTERVAL);

        let Some((dw, dh)) = derived else {
            state.metrics.frames_dropped_total.inc();
            if may_log {
                tracing::warn!(
                    declared_width,
                    declared_height,
                    buffer_len = bgra.len(),
                    "Size mismatch, skipping frame"
                );
                state.capture.last_size_mismatch_log = Some(now);
            }
            return Ok(None);
        };
        if may_log {
            tracing::warn!(
                declared_width,
                declared_height,
                buffer_len = bgra.len(),
                width = dw,
                height = dh,
                "Size mismatch, using calculated size"
            );
            state.capture.last_size_mismatch_log = Some(now);
        }
        (width, height) = (dw, dh);
    }

    if state.capture.force_opaque_alpha {
        apply_opaque_alpha(&mut bgra);
    }

    let buffer = Bytes::from(bgra);
    state.capture.retention.retain(RetainedFrame {
        buffer: buffer.clone(),
        width,
        height,
        declared: (declared_width, declared_height),
    });

    bridge.set_overlay_texture(handles.front, buffer.clone(), width, height)?;
    if let Some(back) = handles.back {
        bridge.set_overlay_texture(back, buffer, width, height)?;
    }
    state.metrics.frames_uploaded_total.inc();

    Ok(Some(FrameInfo {
        width,
        height,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }))
}

fn byte_len(width: u32, height: u32) -> Option<usize> {
    (width as usize).checked_mul(height as usize)?.checked_mul(4)
}

/// Recovers frame dimensions from a BGRA byte length and the declared
/// aspect ratio. Only exact factorisations are accepted.
pub fn derive_size_from_buffer(
    declared_width: u32,
    declared_height: u32,
    buffer_len: usize,
) -> Option<(u32, u32)> {
    if buffer_len == 0 || buffer_len % 4 != 0 || declared_height == 0 {
        return None;
    }
    let pixels = (buffer_len / 4) as f64;
    let aspect = f64::from(declared_width) / f64::from(declared_height);
    if !aspect.is_finite() || aspect <= 0.0 {
        return None;
    }

    let fits = |w: f64, h: f64| (w * h * 4.0) as usize == buffer_len;

    let width = (pixels * aspect).sqrt().round().max(1.0);
    let height = (pixels / width).round().max(1.0);
    if fits(width, height) {
        return Some((width as u32, height as u32));
    }

    let height_floor = (pixels / width).floor().max(1.0);
    if fits(width, height_floor) {
        return Some((width as u32, height_floor as u32));
    }

    let width_floor = (pixels * aspect).sqrt().floor().max(1.0);
    let height_alt = (pixels / width_floor).floor().max(1.0);
    if fits(width_floor, height_alt) {
        return Some((width_floor as u32, height_alt as u32));
    }
    None
}

/// Sets every pixel's alpha byte to 0xFF in place.
pub fn apply_opaque_alpha(bgra: &mut [u8]) {
    if bgra.len() < 4 || bgra.len() % 4 != 0 {
        return;
    }
    let mask = u32::from_ne_bytes([0, 0, 0, 0xFF]);
    match bytemuck::try_cast_slice_mut::<u8, u32>(bgra) {
        Ok(pixels) => pixels.iter_mut().for_each(|p| *p |= mask),
        Err(_) => bgra.chunks_exact_mut(4).for_each(|p| p[3] = 0xFF),
    }
}
