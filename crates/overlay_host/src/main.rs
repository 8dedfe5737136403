mod config;
mod metrics;
mod script;
mod sink;

use crate::config::Config;
use crate::script::ControllerScript;
use crate::sink::HostSink;
use anyhow::Context;
use clap::Parser;
use glam::{DMat4, DVec3};
use overlay_core::bridge::HMD_DEVICE_INDEX;
use overlay_core::metrics::OverlayMetrics;
use overlay_core::overlay::{self, OverlayPreferences};
use overlay_core::sim::{PatternSurface, SimulatedCompositor};
use overlay_core::state::{MetricsReport, WindowSize};
use overlay_core::{CapturePipeline, InputLoop, RenderSurface, RuntimeState};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

const HMD_EYE_HEIGHT_M: f64 = 1.6;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    let config = Config::parse();
    tracing::info!(config = ?config, "Overlay host starting with configuration");

    let core_metrics = Arc::new(OverlayMetrics::new());
    let mut state = RuntimeState::new(core_metrics.clone());

    let compositor = SimulatedCompositor::new();
    compositor.set_device_pose(
        HMD_DEVICE_INDEX,
        DMat4::from_translation(DVec3::new(0.0, HMD_EYE_HEIGHT_M, 0.0)),
    );

    overlay::set_preferences(
        &mut state,
        OverlayPreferences {
            force_opaque_alpha: Some(config.force_opaque_alpha),
        },
    );
    let handles = overlay::init_overlay(&mut state, &compositor, config.overlay_width)
        .context("Failed to initialize overlay")?;
    overlay::show_all(&mut state, &compositor).context("Failed to show overlay")?;

    // The surface reports CSS pixels; the compositor receives physical ones.
    let (css_width, css_height) = config.css_size();
    let pattern = if config.push_paint {
        PatternSurface::painting(config.surface_width, config.surface_height)
    } else {
        PatternSurface::polling(config.surface_width, config.surface_height)
    };
    let surface = Rc::new(pattern.with_declared_scale(config.surface_scale));
    state.update_renderer_metrics(MetricsReport {
        css_width: Some(css_width),
        css_height: Some(css_height),
        device_pixel_ratio: Some(config.surface_scale),
        zoom_factor: Some(1.0),
    });
    let window = WindowSize {
        width: css_width.round() as u32,
        height: css_height.round() as u32,
    };
    state.update_window_size(window.width, window.height);

    // --- 2. Start Metrics Server ---
    let metrics_router = metrics::router(core_metrics.registry.clone());
    let metrics_addr: std::net::SocketAddr = config
        .metrics_listen_addr
        .parse()
        .context("Invalid metrics listen address")?;
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(metrics_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(addr = %metrics_addr, error = %e, "Failed to bind metrics server");
                return;
            }
        };
        tracing::info!(addr = %metrics_addr, "Metrics server started");
        if let Err(e) = axum::serve(listener, metrics_router.into_make_service()).await {
            tracing::error!(error = %e, "Metrics server exited with an error");
        }
    });

    // --- 3. Start Capture and Input ---
    let mut capture = CapturePipeline::new();
    let render_surface: Rc<dyn RenderSurface> = surface.clone();
    capture
        .start(&mut state, render_surface, &config.capture_options())
        .context("Failed to start capture")?;

    let mut sink = HostSink::new(
        core_metrics.clone(),
        sink::keyboard_layout(css_width, css_height),
        window,
    );
    let mut input = InputLoop::new(config.input_options());
    input.start(&mut state, &mut capture, &mut sink);

    let started = Instant::now();
    let mut script = ControllerScript::new(config.controllers, started);

    let run_limit = async {
        match config.run_for_secs {
            Some(secs) => tokio::time::sleep_until(started + Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(run_limit);

    // --- 4. Main Loop ---
    tracing::info!("Starting main loop...");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down.");
                break;
            }
            _ = &mut run_limit => {
                tracing::info!("Run time elapsed, shutting down.");
                break;
            }
            event = capture.next_event() => {
                if let Some(frame) = capture.handle_event(&mut state, &compositor, event) {
                    tracing::trace!(width = frame.width, height = frame.height, "Frame uploaded");
                }
                if !capture.is_running() {
                    tracing::warn!("Capture ended; input continues on its timer");
                }
            }
            cause = input.next_tick() => {
                script.advance_at(&compositor, handles.front, Instant::now());
                input.tick(&mut state, &compositor, &mut sink);
                tracing::trace!(?cause, "Input tick");
            }
        }
    }

    // --- 5. Shutdown ---
    input.stop(&mut state, &mut capture, &mut sink);
    capture.stop(&mut state);
    surface.destroy();
    overlay::shutdown(&mut state, &compositor);
    tracing::info!(
        frames_uploaded = core_metrics.frames_uploaded_total.get(),
        pointer_events = core_metrics.pointer_events_total.get(),
        "Overlay host stopped"
    );
    Ok(())
}
