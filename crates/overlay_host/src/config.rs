use clap::Parser;
use overlay_core::smoothing::StabilizerParams;
use overlay_core::{CaptureOptions, InputOptions, TriggerTuning};

/// `overlay_host` - Mirrors a render surface onto a VR overlay panel and
/// drives it with VR controllers.
///
/// This build runs headless against a simulated compositor and a synthetic
/// test-pattern surface, with scripted controllers pointing at the panel.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Frame capture rate. Clamped to 1..=120.
    #[arg(long, env = "OVERLAY_CAPTURE_FPS", default_value_t = 60.0)]
    pub capture_fps: f64,

    /// Controller polling rate for the fixed-rate input loop.
    #[arg(long, env = "OVERLAY_INPUT_FPS", default_value_t = 60.0)]
    pub input_fps: f64,

    /// Poll controllers on every delivered frame instead of a fixed timer.
    ///
    /// A slow fallback timer keeps input alive when frames stop arriving.
    #[arg(long, env = "OVERLAY_SYNC_INPUT_WITH_CAPTURE")]
    pub sync_input_with_capture: bool,

    /// Fallback timer rate in capture-synced mode (default: min(30, input fps)).
    #[arg(long, env = "OVERLAY_INPUT_FALLBACK_FPS")]
    pub input_fallback_fps: Option<f64>,

    /// Force every uploaded pixel fully opaque.
    #[arg(long, env = "OVERLAY_FORCE_OPAQUE_ALPHA")]
    pub force_opaque_alpha: bool,

    /// UV distance after which a trigger release no longer clicks.
    #[arg(long, env = "OVERLAY_CLICK_CANCEL_THRESHOLD", default_value_t = 0.02)]
    pub click_cancel_threshold: f64,

    /// Vertical UV distance after which a trigger press becomes a scroll.
    #[arg(long, env = "OVERLAY_DRAG_THRESHOLD", default_value_t = 0.03)]
    pub drag_threshold: f64,

    #[arg(long, env = "OVERLAY_SCROLL_MULTIPLIER", default_value_t = 1.0)]
    pub scroll_multiplier: f64,

    /// Largest scroll delta (pixels) sent per tick.
    #[arg(long, env = "OVERLAY_SCROLL_MAX", default_value_t = 120.0)]
    pub scroll_max: f64,

    /// Overlay panel width in meters.
    #[arg(long, env = "OVERLAY_WIDTH_M", default_value_t = 0.5)]
    pub overlay_width: f64,

    /// The listen address for the Prometheus metrics server.
    #[arg(long, env = "OVERLAY_METRICS_LISTEN_ADDR", default_value = "127.0.0.1:9464")]
    pub metrics_listen_addr: String,

    /// Physical width of the synthetic render surface.
    #[arg(long, env = "OVERLAY_SURFACE_WIDTH", default_value_t = 1280)]
    pub surface_width: u32,

    /// Physical height of the synthetic render surface.
    #[arg(long, env = "OVERLAY_SURFACE_HEIGHT", default_value_t = 480)]
    pub surface_height: u32,

    /// Device pixel ratio the surface reports its size with.
    #[arg(long, env = "OVERLAY_SURFACE_SCALE", default_value_t = 1.0)]
    pub surface_scale: f64,

    /// Let the surface push paints instead of being captured on demand.
    #[arg(long, env = "OVERLAY_PUSH_PAINT")]
    pub push_paint: bool,

    /// Number of scripted controllers.
    #[arg(long, env = "OVERLAY_SIM_CONTROLLERS", default_value_t = 2)]
    pub controllers: u32,

    /// Exit after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, env = "OVERLAY_RUN_FOR_SECS")]
    pub run_for_secs: Option<u64>,
}

impl Config {
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            fps: self.capture_fps,
        }
    }

    pub fn tuning(&self) -> TriggerTuning {
        TriggerTuning {
            click_cancel_threshold: self.click_cancel_threshold,
            drag_threshold: self.drag_threshold,
            scroll_multiplier: self.scroll_multiplier,
            scroll_max: self.scroll_max,
        }
    }

    pub fn input_options(&self) -> InputOptions {
        InputOptions {
            fps: self.input_fps,
            sync_with_capture: self.sync_input_with_capture,
            fallback_fps: self.input_fallback_fps,
            tuning: self.tuning(),
            stabilizer: StabilizerParams::default(),
            ..InputOptions::default()
        }
    }

    /// Surface size in CSS pixels, as the page would report it.
    pub fn css_size(&self) -> (f64, f64) {
        let scale = if self.surface_scale.is_finite() && self.surface_scale > 0.0 {
            self.surface_scale
        } else {
            1.0
        };
        (
            f64::from(self.surface_width) / scale,
            f64::from(self.surface_height) / scale,
        )
    }
}
