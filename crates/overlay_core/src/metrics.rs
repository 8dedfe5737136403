use prometheus::{IntCounter, IntGauge, Registry};

/// Prometheus collectors for the capture and input pipelines.
///
/// Shared through an `Arc` held by [`crate::state::RuntimeState`]; the host
/// serves `registry` over HTTP.
pub struct OverlayMetrics {
    pub registry: Registry,
    /// Frames handed to the compositor.
    pub frames_uploaded_total: IntCounter,
    /// Frames dropped because their byte length matched no usable size.
    pub frames_dropped_total: IntCounter,
    /// Paint callbacks discarded because a newer paint was already waiting.
    pub paints_skipped_total: IntCounter,
    /// Non-lifecycle capture or upload failures.
    pub capture_errors_total: IntCounter,
    pub input_ticks_total: IntCounter,
    pub pointer_events_total: IntCounter,
    pub drags_started_total: IntCounter,
    /// Controllers enumerated on the last input tick.
    pub controllers_tracked: IntGauge,
}

impl OverlayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("vr_overlay".into()), None)
            .expect("Failed to create custom metrics registry");

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry
                    .register(Box::new(collector.clone()))
                    .expect("Failed to register metric");
                collector
            }};
        }

        Self {
            frames_uploaded_total: reg!(IntCounter::new(
                "frames_uploaded_total",
                "Total frames uploaded to the overlay texture"
            )
            .unwrap()),
            frames_dropped_total: reg!(IntCounter::new(
                "frames_dropped_total",
                "Total frames dropped due to an unresolvable size mismatch"
            )
            .unwrap()),
            paints_skipped_total: reg!(IntCounter::new(
                "paints_skipped_total",
                "Total paint callbacks skipped while another paint was pending"
            )
            .unwrap()),
            capture_errors_total: reg!(IntCounter::new(
                "capture_errors_total",
                "Total capture or texture upload failures"
            )
            .unwrap()),
            input_ticks_total: reg!(IntCounter::new(
                "input_ticks_total",
                "Total controller polling ticks"
            )
            .unwrap()),
            pointer_events_total: reg!(IntCounter::new(
                "pointer_events_total",
                "Total pointer events delivered to the render surface"
            )
            .unwrap()),
            drags_started_total: reg!(IntCounter::new(
                "drags_started_total",
                "Total grip drags started"
            )
            .unwrap()),
            controllers_tracked: reg!(IntGauge::new(
                "controllers_tracked",
                "Controllers enumerated on the last input tick"
            )
            .unwrap()),
            registry,
        }
    }
}

impl Default for OverlayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
