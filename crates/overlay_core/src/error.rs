//! Error types shared by the capture, input and overlay modules.
//!
//! Nothing in this crate is fatal to the process: every error is either
//! recovered locally (fallback path), or logged and the current tick or
//! gesture is abandoned.

use thiserror::Error;

/// Marker substring the render surface uses for "surface torn down" failures.
const DESTROYED_MARKER: &str = "destroyed";

/// Failures reported by the native overlay bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{action} failed: {reason}")]
    Overlay { action: &'static str, reason: String },

    #[error("unknown overlay handle {0}")]
    UnknownHandle(u64),

    #[error("invalid tracked device index {0}")]
    InvalidDeviceIndex(u32),

    #[error("pose for tracked device {0} is not available")]
    PoseUnavailable(u32),

    #[error("unsupported overlay transform type {0}")]
    UnsupportedTransformType(u32),

    #[error("buffer size mismatch: expected {expected} bytes ({width}x{height}x4), got {actual} bytes")]
    BufferSize {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
}

impl BridgeError {
    /// True when the failure means the native side is gone rather than broken.
    pub fn is_lifecycle(&self) -> bool {
        self.to_string().contains(DESTROYED_MARKER)
    }
}

/// Failures reported by the render surface being captured.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("render surface destroyed")]
    Destroyed,

    #[error("render process gone: {0}")]
    ProcessGone(String),

    #[error("capture failed: {0}")]
    Capture(String),
}

impl SurfaceError {
    /// Lifecycle races are a silent stop, not a logged failure.
    pub fn is_lifecycle(&self) -> bool {
        match self {
            SurfaceError::Destroyed | SurfaceError::ProcessGone(_) => true,
            SurfaceError::Capture(message) => message.contains(DESTROYED_MARKER),
        }
    }
}

/// Degenerate geometry; aborts only the operation that hit it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("pose matrix is not invertible")]
    NotInvertible,

    #[error("billboard basis is degenerate (forward parallel to up)")]
    DegenerateBasis,

    #[error("target is too close to orient toward")]
    ZeroLength,
}

/// Errors surfaced by the capture pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("overlay is not initialized")]
    OverlayNotInitialized,

    #[error("render surface already destroyed")]
    SurfaceDestroyed,

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl CaptureError {
    pub fn is_lifecycle(&self) -> bool {
        match self {
            CaptureError::SurfaceDestroyed => true,
            CaptureError::Surface(e) => e.is_lifecycle(),
            CaptureError::Bridge(e) => e.is_lifecycle(),
            CaptureError::OverlayNotInitialized => false,
        }
    }
}

/// Errors surfaced while starting a grip drag.
#[derive(Debug, Error)]
pub enum DragError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_lifecycle_classification() {
        assert!(SurfaceError::Destroyed.is_lifecycle());
        assert!(SurfaceError::ProcessGone("crashed".into()).is_lifecycle());
        assert!(SurfaceError::Capture("Object has been destroyed".into()).is_lifecycle());
        assert!(!SurfaceError::Capture("timeout".into()).is_lifecycle());
    }

    #[test]
    fn test_bridge_lifecycle_sniffs_message() {
        let gone = BridgeError::Overlay {
            action: "SetOverlayTexture",
            reason: "context destroyed".into(),
        };
        assert!(gone.is_lifecycle());
        assert!(!BridgeError::UnknownHandle(7).is_lifecycle());
    }
}
