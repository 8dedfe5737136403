//! Mirrors a 2D render surface onto a VR overlay panel and turns VR
//! controller rays into pointer input for that surface.
//!
//! - [`capture`]: frame acquisition, size reconciliation, texture upload.
//! - [`input`]: per-tick controller polling, hit testing, cursor and mouse.
//! - [`trigger`]: click / drag / scroll recognition on the trigger.
//! - [`drag`]: grip-driven panel placement.
//! - [`overlay`]: front/back overlay lifecycle.
//!
//! Everything runs on one single-threaded event loop and shares a
//! [`state::RuntimeState`] passed by `&mut`. The native runtime is reached
//! only through [`bridge::OverlayBridge`].

pub mod bridge;
pub mod capture;
pub mod cursor;
pub mod drag;
pub mod error;
pub mod events;
pub mod input;
pub mod math;
pub mod metrics;
pub mod overlay;
pub mod sim;
pub mod smoothing;
pub mod state;
pub mod trigger;

pub use bridge::{ControllerId, OverlayBridge, OverlayHandle};
pub use capture::{CaptureOptions, CapturePipeline, RenderSurface};
pub use events::{PointerEvent, PointerSink};
pub use input::{InputLoop, InputOptions};
pub use state::RuntimeState;
pub use trigger::TriggerTuning;
