//! Software stand-ins for the native overlay runtime and the render surface.
//!
//! [`SimulatedCompositor`] keeps overlays, tracked devices and uploaded
//! textures in memory and answers ray queries against each overlay's plane.
//! [`PatternSurface`] renders a moving test pattern, either pushed as paints
//! or captured on demand. The host runs headless on these, and the tests
//! drive them directly.

use crate::bridge::{
    ControllerButtons, ControllerId, Intersection, OverlayBridge, OverlayHandle,
    RelativeTransform, TransformType, HMD_DEVICE_INDEX,
};
use crate::capture::{CapturedImage, RenderSurface};
use crate::error::{BridgeError, SurfaceError};
use crate::math::{self, Mat16};
use bytes::Bytes;
use futures::future::LocalBoxFuture;
use glam::{DMat4, DVec3, DVec4};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Device indices past this are rejected, like the native runtime does.
pub const MAX_TRACKED_DEVICES: u32 = 64;

// --- Compositor ---

#[derive(Debug, Clone, Copy, PartialEq)]
enum Placement {
    Absolute(DMat4),
    Relative { device: ControllerId, offset: DMat4 },
    Hmd { distance: f64 },
}

#[derive(Debug, Clone)]
struct SimOverlay {
    key: String,
    visible: bool,
    width: f64,
    placement: Placement,
    bounds: [f64; 4],
    texture: Option<(Bytes, u32, u32)>,
    uploads: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct SimDevice {
    pose: Option<DMat4>,
    buttons: Option<ControllerButtons>,
}

#[derive(Debug, Default)]
struct CompositorState {
    overlays: BTreeMap<OverlayHandle, SimOverlay>,
    devices: BTreeMap<ControllerId, SimDevice>,
    next_handle: u64,
    fail_absolute_reads: bool,
    fail_create_keys: Vec<String>,
}

impl CompositorState {
    fn overlay(&self, handle: OverlayHandle) -> Result<&SimOverlay, BridgeError> {
        self.overlays
            .get(&handle)
            .ok_or(BridgeError::UnknownHandle(handle.0))
    }

    fn overlay_mut(&mut self, handle: OverlayHandle) -> Result<&mut SimOverlay, BridgeError> {
        self.overlays
            .get_mut(&handle)
            .ok_or(BridgeError::UnknownHandle(handle.0))
    }

    fn device_pose(&self, index: ControllerId) -> Option<DMat4> {
        self.devices.get(&index).and_then(|d| d.pose)
    }

    fn world_transform(&self, overlay: &SimOverlay) -> Option<DMat4> {
        match overlay.placement {
            Placement::Absolute(m) => Some(m),
            Placement::Relative { device, offset } => {
                self.device_pose(device).map(|pose| pose * offset)
            }
            Placement::Hmd { distance } => self
                .device_pose(HMD_DEVICE_INDEX)
                .map(|pose| pose * DMat4::from_translation(DVec3::new(0.0, 0.0, -distance))),
        }
    }
}

/// A full-software overlay runtime.
#[derive(Debug, Default)]
pub struct SimulatedCompositor {
    state: RefCell<CompositorState>,
}

/// Read-only view of one simulated overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySnapshot {
    pub visible: bool,
    pub width: f64,
    pub world_transform: Option<DMat4>,
    pub transform_type: TransformType,
    pub bounds: [f64; 4],
}

impl SimulatedCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Scripting ---

    /// Places a tracked device. Index 0 is the headset.
    pub fn set_device_pose(&self, index: ControllerId, pose: DMat4) {
        self.state.borrow_mut().devices.entry(index).or_default().pose = Some(pose);
    }

    /// Keeps the device enumerated but without a pose this frame.
    pub fn set_device_untracked(&self, index: ControllerId) {
        self.state.borrow_mut().devices.entry(index).or_default().pose = None;
    }

    pub fn set_buttons(&self, index: ControllerId, trigger: bool, grip: bool) {
        self.state.borrow_mut().devices.entry(index).or_default().buttons =
            Some(ControllerButtons {
                trigger_pressed: trigger,
                grip_pressed: grip,
            });
    }

    pub fn remove_device(&self, index: ControllerId) {
        self.state.borrow_mut().devices.remove(&index);
    }

    /// Makes `get_overlay_transform_absolute` fail like the native runtime
    /// occasionally does.
    pub fn fail_absolute_reads(&self, fail: bool) {
        self.state.borrow_mut().fail_absolute_reads = fail;
    }

    /// Makes `create_overlay` fail for `key`.
    pub fn fail_create_for(&self, key: &str) {
        self.state.borrow_mut().fail_create_keys.push(key.to_owned());
    }

    /// Attaches an overlay to a tracked device with a local offset.
    pub fn place_relative(
        &self,
        handle: OverlayHandle,
        device: ControllerId,
        offset: DMat4,
    ) -> Result<(), BridgeError> {
        self.state.borrow_mut().overlay_mut(handle)?.placement =
            Placement::Relative { device, offset };
        Ok(())
    }

    // --- Inspection ---

    pub fn overlay_count(&self) -> usize {
        self.state.borrow().overlays.len()
    }

    pub fn snapshot(&self, handle: OverlayHandle) -> Option<OverlaySnapshot> {
        let state = self.state.borrow();
        let overlay = state.overlays.get(&handle)?;
        Some(OverlaySnapshot {
            visible: overlay.visible,
            width: overlay.width,
            world_transform: state.world_transform(overlay),
            transform_type: placement_type(&overlay.placement),
            bounds: overlay.bounds,
        })
    }

    pub fn upload_count(&self, handle: OverlayHandle) -> usize {
        self.state
            .borrow()
            .overlays
            .get(&handle)
            .map_or(0, |o| o.uploads)
    }

    pub fn last_texture_size(&self, handle: OverlayHandle) -> Option<(u32, u32)> {
        let state = self.state.borrow();
        let (_, w, h) = state.overlays.get(&handle)?.texture.as_ref()?;
        Some((*w, *h))
    }

    pub fn last_texture(&self, handle: OverlayHandle) -> Option<Bytes> {
        let state = self.state.borrow();
        Some(state.overlays.get(&handle)?.texture.as_ref()?.0.clone())
    }
}

fn placement_type(placement: &Placement) -> TransformType {
    match placement {
        Placement::Absolute(_) => TransformType::Absolute,
        Placement::Relative { .. } | Placement::Hmd { .. } => TransformType::TrackedDeviceRelative,
    }
}

fn check_device(index: ControllerId) -> Result<(), BridgeError> {
    if index >= MAX_TRACKED_DEVICES {
        return Err(BridgeError::InvalidDeviceIndex(index));
    }
    Ok(())
}

impl OverlayBridge for SimulatedCompositor {
    fn create_overlay(&self, key: &str, name: &str) -> Result<OverlayHandle, BridgeError> {
        let mut state = self.state.borrow_mut();
        if state.fail_create_keys.iter().any(|k| k == key)
            || state.overlays.values().any(|o| o.key == key)
        {
            return Err(BridgeError::Overlay {
                action: "CreateOverlay",
                reason: format!("key {key} rejected"),
            });
        }
        state.next_handle += 1;
        let handle = OverlayHandle(state.next_handle);
        state.overlays.insert(
            handle,
            SimOverlay {
                key: key.to_owned(),
                visible: false,
                width: 1.0,
                placement: Placement::Absolute(DMat4::IDENTITY),
                bounds: [0.0, 0.0, 1.0, 1.0],
                texture: None,
                uploads: 0,
            },
        );
        tracing::debug!(%handle, key, name, "Simulated overlay created");
        Ok(handle)
    }

    fn destroy_overlay(&self, handle: OverlayHandle) -> Result<(), BridgeError> {
        self.state
            .borrow_mut()
            .overlays
            .remove(&handle)
            .map(|_| ())
            .ok_or(BridgeError::UnknownHandle(handle.0))
    }

    fn show_overlay(&self, handle: OverlayHandle) -> Result<(), BridgeError> {
        self.state.borrow_mut().overlay_mut(handle)?.visible = true;
        Ok(())
    }

    fn hide_overlay(&self, handle: OverlayHandle) -> Result<(), BridgeError> {
        self.state.borrow_mut().overlay_mut(handle)?.visible = false;
        Ok(())
    }

    fn set_overlay_width(&self, handle: OverlayHandle, meters: f64) -> Result<(), BridgeError> {
        if !meters.is_finite() || meters <= 0.0 {
            return Err(BridgeError::Overlay {
                action: "SetOverlayWidthInMeters",
                reason: format!("invalid width {meters}"),
            });
        }
        self.state.borrow_mut().overlay_mut(handle)?.width = meters;
        Ok(())
    }

    fn set_overlay_transform_absolute(
        &self,
        handle: OverlayHandle,
        transform: &Mat16,
    ) -> Result<(), BridgeError> {
        self.state.borrow_mut().overlay_mut(handle)?.placement =
            Placement::Absolute(math::from_row_major(transform));
        Ok(())
    }

    fn get_overlay_transform_absolute(&self, handle: OverlayHandle) -> Result<Mat16, BridgeError> {
        let state = self.state.borrow();
        let overlay = state.overlay(handle)?;
        match overlay.placement {
            Placement::Absolute(m) if !state.fail_absolute_reads => Ok(math::to_row_major(&m)),
            _ => Err(BridgeError::Overlay {
                action: "GetOverlayTransformAbsolute",
                reason: "InvalidParameter".into(),
            }),
        }
    }

    fn get_overlay_transform_type(&self, handle: OverlayHandle) -> Result<TransformType, BridgeError> {
        Ok(placement_type(&self.state.borrow().overlay(handle)?.placement))
    }

    fn get_overlay_transform_relative(
        &self,
        handle: OverlayHandle,
    ) -> Result<RelativeTransform, BridgeError> {
        let state = self.state.borrow();
        let (device, offset) = match state.overlay(handle)?.placement {
            Placement::Relative { device, offset } => (device, offset),
            Placement::Hmd { distance } => (
                HMD_DEVICE_INDEX,
                DMat4::from_translation(DVec3::new(0.0, 0.0, -distance)),
            ),
            // Expressed against the headset while it is tracked.
            Placement::Absolute(m) => {
                let hmd = state
                    .device_pose(HMD_DEVICE_INDEX)
                    .and_then(|pose| math::checked_inverse(&pose).ok())
                    .ok_or(BridgeError::PoseUnavailable(HMD_DEVICE_INDEX))?;
                (HMD_DEVICE_INDEX, hmd * m)
            }
        };
        Ok(RelativeTransform {
            tracked_device_index: device,
            transform: math::to_row_major(&offset),
        })
    }

    fn set_overlay_transform_hmd(&self, handle: OverlayHandle, distance: f64) -> Result<(), BridgeError> {
        self.state.borrow_mut().overlay_mut(handle)?.placement = Placement::Hmd { distance };
        Ok(())
    }

    fn get_controller_pose(&self, index: ControllerId) -> Result<Option<Mat16>, BridgeError> {
        check_device(index)?;
        Ok(self
            .state
            .borrow()
            .device_pose(index)
            .map(|pose| math::to_row_major(&pose)))
    }

    fn get_controller_ids(&self) -> Result<Vec<ControllerId>, BridgeError> {
        Ok(self.state.borrow().devices.keys().copied().collect())
    }

    fn get_controller_state(&self, index: ControllerId) -> Result<Option<ControllerButtons>, BridgeError> {
        check_device(index)?;
        Ok(self.state.borrow().devices.get(&index).and_then(|d| d.buttons))
    }

    fn compute_overlay_intersection(
        &self,
        handle: OverlayHandle,
        origin: [f64; 3],
        direction: [f64; 3],
    ) -> Result<Option<Intersection>, BridgeError> {
        let state = self.state.borrow();
        let overlay = state.overlay(handle)?;
        if !overlay.visible {
            return Ok(None);
        }
        let Some(world) = state.world_transform(overlay) else {
            return Ok(None);
        };
        let Ok(to_local) = math::checked_inverse(&world) else {
            return Ok(None);
        };

        let origin = DVec3::from_array(origin);
        let direction = DVec3::from_array(direction);
        let local_origin = to_local.transform_point3(origin);
        let local_dir = to_local.transform_vector3(direction);
        if local_dir.z.abs() < 1e-12 {
            return Ok(None);
        }
        let t = -local_origin.z / local_dir.z;
        if t <= 0.0 {
            return Ok(None);
        }

        let local_hit = local_origin + local_dir * t;
        let aspect = overlay
            .texture
            .as_ref()
            .map_or(1.0, |(_, w, h)| f64::from(*h) / f64::from(*w));
        let width = overlay.width;
        let height = width * aspect;
        let panel_u = local_hit.x / width + 0.5;
        let panel_v = local_hit.y / height + 0.5;
        if !(0.0..=1.0).contains(&panel_u) || !(0.0..=1.0).contains(&panel_v) {
            return Ok(None);
        }

        let [u_min, v_min, u_max, v_max] = overlay.bounds;
        let world_hit = (world * DVec4::new(local_hit.x, local_hit.y, 0.0, 1.0)).truncate();
        Ok(Some(Intersection {
            u: u_min + panel_u * (u_max - u_min),
            v: v_min + panel_v * (v_max - v_min),
            x: world_hit.x,
            y: world_hit.y,
            z: world_hit.z,
            distance: (world_hit - origin).length(),
        }))
    }

    fn set_overlay_texture(
        &self,
        handle: OverlayHandle,
        bgra: Bytes,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        let expected = width as usize * height as usize * 4;
        if expected == 0 || bgra.len() != expected {
            return Err(BridgeError::BufferSize {
                expected,
                actual: bgra.len(),
                width,
                height,
            });
        }
        let mut state = self.state.borrow_mut();
        let overlay = state.overlay_mut(handle)?;
        overlay.texture = Some((bgra, width, height));
        overlay.uploads += 1;
        Ok(())
    }

    fn set_overlay_texture_bounds(
        &self,
        handle: OverlayHandle,
        u_min: f64,
        v_min: f64,
        u_max: f64,
        v_max: f64,
    ) -> Result<(), BridgeError> {
        self.state.borrow_mut().overlay_mut(handle)?.bounds = [u_min, v_min, u_max, v_max];
        Ok(())
    }
}

// --- Render surface ---

#[derive(Debug)]
struct PatternShared {
    destroyed: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
    frame: AtomicU64,
}

impl PatternShared {
    fn render(&self, declared_scale: f64) -> CapturedImage {
        let width = self.width.load(Ordering::Relaxed);
        let height = self.height.load(Ordering::Relaxed);
        let frame = self.frame.fetch_add(1, Ordering::Relaxed);
        CapturedImage {
            width: ((f64::from(width) / declared_scale).round() as u32).max(1),
            height: ((f64::from(height) / declared_scale).round() as u32).max(1),
            bgra: render_pattern(width, height, frame),
        }
    }
}

/// BGRA gradient with a vertical bar sweeping across each frame.
/// Alpha is half-transparent so alpha forcing is visible.
pub fn render_pattern(width: u32, height: u32, frame: u64) -> Vec<u8> {
    let w = width.max(1);
    let h = height.max(1);
    let bar = ((frame * 4) % u64::from(w)) as u32;
    let mut px = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let b = (x * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            let r = if x.abs_diff(bar) < 4 { 0xFF } else { (frame % 256) as u8 };
            px.extend_from_slice(&[b, g, r, 0x80]);
        }
    }
    px
}

/// A synthetic render surface producing [`render_pattern`] frames.
pub struct PatternSurface {
    shared: Arc<PatternShared>,
    paint_tx: RefCell<Option<mpsc::Sender<CapturedImage>>>,
    paint_rx: RefCell<Option<mpsc::Receiver<CapturedImage>>>,
    painter: RefCell<Option<JoinHandle<()>>>,
    fps: Cell<u32>,
    /// Physical-to-declared size ratio; above 1 mimics a HiDPI surface that
    /// reports CSS pixels.
    declared_scale: f64,
    capture_latency: Duration,
}

impl PatternSurface {
    /// A surface that must be captured explicitly.
    pub fn polling(width: u32, height: u32) -> Self {
        Self::build(width, height, false)
    }

    /// A surface that pushes paints at its frame rate once painting starts.
    pub fn painting(width: u32, height: u32) -> Self {
        Self::build(width, height, true)
    }

    fn build(width: u32, height: u32, push: bool) -> Self {
        let (tx, rx) = if push {
            let (tx, rx) = mpsc::channel(4);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        Self {
            shared: Arc::new(PatternShared {
                destroyed: AtomicBool::new(false),
                width: AtomicU32::new(width),
                height: AtomicU32::new(height),
                frame: AtomicU64::new(0),
            }),
            paint_tx: RefCell::new(tx),
            paint_rx: RefCell::new(rx),
            painter: RefCell::new(None),
            fps: Cell::new(60),
            declared_scale: 1.0,
            capture_latency: Duration::ZERO,
        }
    }

    pub fn with_declared_scale(mut self, scale: f64) -> Self {
        if scale.is_finite() && scale > 0.0 {
            self.declared_scale = scale;
        }
        self
    }

    pub fn with_capture_latency(mut self, latency: Duration) -> Self {
        self.capture_latency = latency;
        self
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.shared.width.store(width, Ordering::Relaxed);
        self.shared.height.store(height, Ordering::Relaxed);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.frame.load(Ordering::Relaxed)
    }

    /// Tears the surface down; the paint stream closes.
    pub fn destroy(&self) {
        self.shared.destroyed.store(true, Ordering::Relaxed);
        self.stop_painting();
        self.paint_tx.borrow_mut().take();
    }
}

impl RenderSurface for PatternSurface {
    fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Relaxed)
    }

    fn take_paint_stream(&self) -> Option<mpsc::Receiver<CapturedImage>> {
        self.paint_rx.borrow_mut().take()
    }

    fn return_paint_stream(&self, paints: mpsc::Receiver<CapturedImage>) {
        *self.paint_rx.borrow_mut() = Some(paints);
    }

    fn set_frame_rate(&self, fps: u32) {
        self.fps.set(fps.max(1));
    }

    fn start_painting(&self) {
        let Some(tx) = self.paint_tx.borrow().clone() else {
            return;
        };
        self.stop_painting();

        let shared = self.shared.clone();
        let scale = self.declared_scale;
        let period = Duration::from_millis(u64::from((1000 / self.fps.get()).max(1)));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if shared.destroyed.load(Ordering::Relaxed) {
                    break;
                }
                match tx.try_send(shared.render(scale)) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });
        *self.painter.borrow_mut() = Some(handle);
    }

    fn stop_painting(&self) {
        if let Some(handle) = self.painter.borrow_mut().take() {
            handle.abort();
        }
    }

    fn capture_page(&self) -> LocalBoxFuture<'static, Result<CapturedImage, SurfaceError>> {
        if self.is_destroyed() {
            return Box::pin(async { Err(SurfaceError::Destroyed) });
        }
        let image = self.shared.render(self.declared_scale);
        let latency = self.capture_latency;
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok(image)
        })
    }
}

impl Drop for PatternSurface {
    fn drop(&mut self) {
        self.stop_painting();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureOptions, CapturePipeline};
    use crate::state::{OverlayHandles, RuntimeState};
    use std::f64::consts::PI;
    use std::rc::Rc;

    fn visible_overlay(sim: &SimulatedCompositor, at: DMat4) -> OverlayHandle {
        let h = sim.create_overlay("sim.test", "Sim").unwrap();
        sim.set_overlay_width(h, 1.0).unwrap();
        sim.set_overlay_transform_absolute(h, &math::to_row_major(&at)).unwrap();
        sim.show_overlay(h).unwrap();
        h
    }

    #[test]
    fn test_ray_hits_panel_center_and_corner() {
        let sim = SimulatedCompositor::new();
        let h = visible_overlay(&sim, DMat4::from_translation(DVec3::new(0.0, 1.0, -1.0)));

        let hit = sim
            .compute_overlay_intersection(h, [0.0, 1.0, 0.0], [0.0, 0.0, -1.0])
            .unwrap()
            .unwrap();
        assert!((hit.u - 0.5).abs() < 1e-9 && (hit.v - 0.5).abs() < 1e-9);
        assert!((hit.distance - 1.0).abs() < 1e-9);

        let corner = sim
            .compute_overlay_intersection(h, [0.25, 1.25, 0.0], [0.0, 0.0, -1.0])
            .unwrap()
            .unwrap();
        assert!((corner.u - 0.75).abs() < 1e-9 && (corner.v - 0.75).abs() < 1e-9);

        let miss = sim
            .compute_overlay_intersection(h, [0.0, 1.0, 0.0], [0.0, 0.0, 1.0])
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_mirrored_bounds_flip_u() {
        let sim = SimulatedCompositor::new();
        let h = visible_overlay(&sim, DMat4::from_translation(DVec3::new(0.0, 0.0, -1.0)));
        sim.set_overlay_texture_bounds(h, 1.0, 0.0, 0.0, 1.0).unwrap();
        let hit = sim
            .compute_overlay_intersection(h, [0.25, 0.0, 0.0], [0.0, 0.0, -1.0])
            .unwrap()
            .unwrap();
        assert!((hit.u - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_texture_aspect_sets_panel_height() {
        let sim = SimulatedCompositor::new();
        let h = visible_overlay(&sim, DMat4::from_translation(DVec3::new(0.0, 0.0, -1.0)));
        sim.set_overlay_texture(h, Bytes::from(vec![0u8; 4 * 2 * 1]), 2, 1).unwrap();
        // Panel is 1.0 m wide and 0.5 m tall now.
        let outside = sim
            .compute_overlay_intersection(h, [0.0, 0.3, 0.0], [0.0, 0.0, -1.0])
            .unwrap();
        assert!(outside.is_none());
    }

    #[test]
    fn test_upload_rejects_wrong_length() {
        let sim = SimulatedCompositor::new();
        let h = sim.create_overlay("k", "n").unwrap();
        let err = sim.set_overlay_texture(h, Bytes::from(vec![0u8; 5]), 1, 1).unwrap_err();
        assert!(matches!(err, BridgeError::BufferSize { expected: 4, actual: 5, .. }));
    }

    #[test]
    fn test_hmd_placement_is_device_relative() {
        let sim = SimulatedCompositor::new();
        sim.set_device_pose(HMD_DEVICE_INDEX, DMat4::from_rotation_y(PI));
        let h = sim.create_overlay("k", "n").unwrap();
        sim.set_overlay_transform_hmd(h, 0.5).unwrap();

        assert_eq!(sim.get_overlay_transform_type(h).unwrap(), TransformType::TrackedDeviceRelative);
        assert!(sim.get_overlay_transform_absolute(h).is_err());
        let rel = sim.get_overlay_transform_relative(h).unwrap();
        assert_eq!(rel.tracked_device_index, HMD_DEVICE_INDEX);

        let world = sim.snapshot(h).unwrap().world_transform.unwrap();
        assert!((math::position(&world) - DVec3::new(0.0, 0.0, 0.5)).length() < 1e-9);
    }

    #[test]
    fn test_device_index_is_bounded() {
        let sim = SimulatedCompositor::new();
        assert!(matches!(
            sim.get_controller_pose(MAX_TRACKED_DEVICES),
            Err(BridgeError::InvalidDeviceIndex(_))
        ));
        assert_eq!(sim.get_controller_pose(3).unwrap(), None);
    }

    #[tokio::test]
    async fn test_pattern_surface_poll_and_destroy() {
        let surface = PatternSurface::polling(4, 2).with_declared_scale(2.0);
        let image = surface.capture_page().await.unwrap();
        assert_eq!((image.width, image.height), (2, 1));
        assert_eq!(image.bgra.len(), 4 * 2 * 4);
        assert!(surface.take_paint_stream().is_none());

        surface.destroy();
        assert!(matches!(surface.capture_page().await, Err(SurfaceError::Destroyed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_surface_pushes_paints() {
        let surface = PatternSurface::painting(2, 2);
        let mut paints = surface.take_paint_stream().unwrap();
        surface.set_frame_rate(50);
        surface.start_painting();

        let first = paints.recv().await.unwrap();
        assert_eq!(first.bgra.len(), 16);

        surface.destroy();
        while paints.recv().await.is_some() {}
        assert!(surface.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_painting_surface_restarts_and_resizes() {
        let sim = SimulatedCompositor::new();
        let front = sim.create_overlay("sim.capture", "Capture").unwrap();
        let mut state = RuntimeState::default();
        state.overlay.handles = Some(OverlayHandles { front, back: None });

        let surface = Rc::new(PatternSurface::painting(4, 2));
        let mut pipeline = CapturePipeline::new();
        pipeline
            .start(&mut state, surface.clone(), &CaptureOptions::default())
            .unwrap();
        pipeline
            .start(&mut state, surface.clone(), &CaptureOptions { fps: 30.0 })
            .unwrap();
        assert!(pipeline.is_push_mode());

        let event = pipeline.next_event().await;
        let info = pipeline.handle_event(&mut state, &sim, event).unwrap();
        assert_eq!((info.width, info.height), (4, 2));

        surface.resize(8, 4);
        let event = pipeline.next_event().await;
        let info = pipeline.handle_event(&mut state, &sim, event).unwrap();
        assert_eq!((info.width, info.height), (8, 4));
        assert_eq!(sim.last_texture_size(front), Some((8, 4)));
        assert!(surface.frames_rendered() >= 2);
    }
}
