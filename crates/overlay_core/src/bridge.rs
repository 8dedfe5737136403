//! Capability contract of the native VR overlay runtime.
//!
//! The runtime (pose tracking, compositing, GPU texture sharing) lives on the
//! other side of an FFI boundary. This crate only calls the operations below
//! and exchanges the data shapes declared here. Matrices cross this boundary
//! in row-major [`Mat16`] form; see [`crate::math`].

use crate::error::BridgeError;
use crate::math::Mat16;
use bytes::Bytes;

/// Tracked device index as reported by the runtime.
pub type ControllerId = u32;

/// The headset is always tracked device 0.
pub const HMD_DEVICE_INDEX: ControllerId = 0;

/// Opaque compositor panel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayHandle(pub u64);

impl std::fmt::Display for OverlayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an overlay's placement is currently stored by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformType {
    Absolute,
    TrackedDeviceRelative,
    Other(u32),
}

/// Placement relative to a tracked device.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeTransform {
    pub tracked_device_index: ControllerId,
    pub transform: Mat16,
}

/// Result of a ray/overlay intersection query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Texture-space coordinates, origin bottom-left.
    pub u: f64,
    pub v: f64,
    /// World-space hit point.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub distance: f64,
}

/// Digital button state of one controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerButtons {
    pub trigger_pressed: bool,
    pub grip_pressed: bool,
}

/// Operations the core consumes from the native overlay runtime.
///
/// Implementations are single-threaded; every method takes `&self` and keeps
/// whatever interior state it needs.
pub trait OverlayBridge {
    fn create_overlay(&self, key: &str, name: &str) -> Result<OverlayHandle, BridgeError>;
    fn destroy_overlay(&self, handle: OverlayHandle) -> Result<(), BridgeError>;
    fn show_overlay(&self, handle: OverlayHandle) -> Result<(), BridgeError>;
    fn hide_overlay(&self, handle: OverlayHandle) -> Result<(), BridgeError>;
    fn set_overlay_width(&self, handle: OverlayHandle, meters: f64) -> Result<(), BridgeError>;

    fn set_overlay_transform_absolute(
        &self,
        handle: OverlayHandle,
        transform: &Mat16,
    ) -> Result<(), BridgeError>;
    fn get_overlay_transform_absolute(&self, handle: OverlayHandle) -> Result<Mat16, BridgeError>;
    fn get_overlay_transform_type(&self, handle: OverlayHandle) -> Result<TransformType, BridgeError>;
    fn get_overlay_transform_relative(
        &self,
        handle: OverlayHandle,
    ) -> Result<RelativeTransform, BridgeError>;
    /// Attaches the overlay `distance` meters in front of the headset.
    fn set_overlay_transform_hmd(&self, handle: OverlayHandle, distance: f64) -> Result<(), BridgeError>;

    /// `Ok(None)` when the device exists but is not tracking this frame.
    fn get_controller_pose(&self, index: ControllerId) -> Result<Option<Mat16>, BridgeError>;
    fn get_controller_ids(&self) -> Result<Vec<ControllerId>, BridgeError>;
    /// `Ok(None)` when the device has no readable button state.
    fn get_controller_state(&self, index: ControllerId) -> Result<Option<ControllerButtons>, BridgeError>;

    fn compute_overlay_intersection(
        &self,
        handle: OverlayHandle,
        origin: [f64; 3],
        direction: [f64; 3],
    ) -> Result<Option<Intersection>, BridgeError>;

    /// Uploads a BGRA frame. The runtime may keep reading `bgra` after this
    /// returns; callers keep their own clone alive as well.
    fn set_overlay_texture(
        &self,
        handle: OverlayHandle,
        bgra: Bytes,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError>;
    fn set_overlay_texture_bounds(
        &self,
        handle: OverlayHandle,
        u_min: f64,
        v_min: f64,
        u_max: f64,
        v_max: f64,
    ) -> Result<(), BridgeError>;
}
