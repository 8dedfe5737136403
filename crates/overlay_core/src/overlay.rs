//! Lifecycle and placement of the front/back overlay pair.
//!
//! The back panel shows the same texture, sampled with `u` mirrored, and is
//! kept half a turn from the front so the surface reads correctly from behind.

use crate::bridge::{OverlayBridge, OverlayHandle, HMD_DEVICE_INDEX};
use crate::error::BridgeError;
use crate::math;
use crate::state::{OverlayHandles, RuntimeState};
use glam::DMat4;

pub const OVERLAY_KEY: &str = "vr-surface-overlay";
pub const OVERLAY_NAME: &str = "VR Surface";
pub const BACK_OVERLAY_KEY: &str = "vr-surface-overlay-back";
pub const BACK_OVERLAY_NAME: &str = "VR Surface (Back)";

pub const DEFAULT_OVERLAY_WIDTH_M: f64 = 0.5;
/// Distance used when no headset pose is available at startup.
pub const HMD_FALLBACK_DISTANCE_M: f64 = 0.5;
pub const SPAWN_DISTANCE_M: f64 = 1.0;
pub const SPAWN_DROP_M: f64 = 0.2;

/// Runtime-adjustable overlay options. `None` leaves a setting unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayPreferences {
    pub force_opaque_alpha: Option<bool>,
}

/// Creates the front and back overlays and places them.
///
/// Existing handles are returned as-is. On failure every handle created so
/// far is destroyed and the state is left without overlays.
pub fn init_overlay<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    width: f64,
) -> Result<OverlayHandles, BridgeError> {
    if let Some(handles) = state.overlay.handles {
        return Ok(handles);
    }
    tracing::info!("Initializing VR overlay");

    let hmd_pose = match bridge.get_controller_pose(HMD_DEVICE_INDEX) {
        Ok(pose) => pose.map(|m| math::from_row_major(&m)),
        Err(e) => {
            tracing::warn!(error = %e, "Could not get HMD pose for initial spawn");
            None
        }
    };

    let front = bridge.create_overlay(OVERLAY_KEY, OVERLAY_NAME)?;
    let back = match bridge.create_overlay(BACK_OVERLAY_KEY, BACK_OVERLAY_NAME) {
        Ok(back) => back,
        Err(e) => {
            rollback(bridge, &[front]);
            return Err(e);
        }
    };
    tracing::info!(%front, %back, "Overlays created");

    state.overlay.handles = Some(OverlayHandles {
        front,
        back: Some(back),
    });
    state.overlay.back_enabled = true;

    if let Err(e) = configure(state, bridge, width, hmd_pose) {
        tracing::error!(error = %e, "Failed to init VR overlay");
        rollback(bridge, &[back, front]);
        state.overlay.handles = None;
        state.overlay.back_enabled = false;
        return Err(e);
    }

    Ok(OverlayHandles {
        front,
        back: Some(back),
    })
}

fn configure<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    width: f64,
    hmd_pose: Option<DMat4>,
) -> Result<(), BridgeError> {
    let Some(OverlayHandles { front, back }) = state.overlay.handles else {
        return Ok(());
    };
    if let Some(back) = back {
        bridge.set_overlay_texture_bounds(back, 1.0, 0.0, 0.0, 1.0)?;
    }
    set_width(state, bridge, width)?;

    match hmd_pose {
        Some(hmd) => {
            let spawn = math::spawn_transform(&hmd, SPAWN_DISTANCE_M, SPAWN_DROP_M);
            if let Err(e) = set_transform_absolute_all(state, bridge, &spawn) {
                tracing::error!(error = %e, "Failed to spawn overlay");
            }
        }
        None => {
            tracing::info!("HMD pose missing, falling back to relative attachment");
            bridge.set_overlay_transform_hmd(front, HMD_FALLBACK_DISTANCE_M)?;
            if let Some(back) = back {
                bridge.hide_overlay(back)?;
                state.overlay.back_enabled = false;
            }
        }
    }
    Ok(())
}

fn rollback<B: OverlayBridge + ?Sized>(bridge: &B, created: &[OverlayHandle]) {
    for &handle in created {
        if let Err(e) = bridge.destroy_overlay(handle) {
            tracing::warn!(%handle, error = %e, "Failed to roll back overlay");
        }
    }
}

/// Destroys both overlays. Safe to call when none exist.
pub fn shutdown<B: OverlayBridge + ?Sized>(state: &mut RuntimeState, bridge: &B) {
    if let Some(OverlayHandles { front, back }) = state.overlay.handles.take() {
        if let Some(back) = back {
            if let Err(e) = bridge.destroy_overlay(back) {
                tracing::error!(handle = %back, error = %e, "Failed to destroy back overlay");
            }
        }
        if let Err(e) = bridge.destroy_overlay(front) {
            tracing::error!(handle = %front, error = %e, "Failed to destroy overlay");
        }
    }
    state.overlay.visible = false;
    state.overlay.back_enabled = false;
}

pub fn show_all<B: OverlayBridge + ?Sized>(state: &mut RuntimeState, bridge: &B) -> Result<(), BridgeError> {
    let Some(OverlayHandles { front, back }) = state.overlay.handles else {
        return Ok(());
    };
    bridge.show_overlay(front)?;
    if let Some(back) = back {
        bridge.show_overlay(back)?;
        state.overlay.back_enabled = true;
    }
    state.overlay.visible = true;
    Ok(())
}

pub fn hide_all<B: OverlayBridge + ?Sized>(state: &mut RuntimeState, bridge: &B) -> Result<(), BridgeError> {
    let Some(OverlayHandles { front, back }) = state.overlay.handles else {
        return Ok(());
    };
    bridge.hide_overlay(front)?;
    if let Some(back) = back {
        bridge.hide_overlay(back)?;
    }
    state.overlay.visible = false;
    Ok(())
}

pub fn toggle_all<B: OverlayBridge + ?Sized>(state: &mut RuntimeState, bridge: &B) -> Result<(), BridgeError> {
    if state.overlay.visible {
        hide_all(state, bridge)
    } else {
        show_all(state, bridge)
    }
}

pub fn set_width<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    meters: f64,
) -> Result<(), BridgeError> {
    let Some(OverlayHandles { front, back }) = state.overlay.handles else {
        return Ok(());
    };
    bridge.set_overlay_width(front, meters)?;
    if let Some(back) = back {
        bridge.set_overlay_width(back, meters)?;
    }
    Ok(())
}

/// Attaches the front panel to the headset. The back panel is hidden and
/// stays disabled while head-locked.
pub fn set_transform_hmd<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    distance: f64,
) -> Result<(), BridgeError> {
    let Some(OverlayHandles { front, back }) = state.overlay.handles else {
        return Ok(());
    };
    bridge.set_overlay_transform_hmd(front, distance)?;
    if let Some(back) = back {
        bridge.hide_overlay(back)?;
        state.overlay.back_enabled = false;
    }
    Ok(())
}

/// Places the front panel at `front` and the back panel behind it.
pub fn set_transform_absolute_all<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    front_transform: &DMat4,
) -> Result<(), BridgeError> {
    let Some(OverlayHandles { front, back }) = state.overlay.handles else {
        return Ok(());
    };
    bridge.set_overlay_transform_absolute(front, &math::to_row_major(front_transform))?;
    if let Some(back) = back {
        let back_transform = math::back_transform(front_transform);
        bridge.set_overlay_transform_absolute(back, &math::to_row_major(&back_transform))?;
        if state.overlay.visible {
            bridge.show_overlay(back)?;
            state.overlay.back_enabled = true;
        }
    }
    Ok(())
}

/// Respawns the panel in front of the headset. Returns false when there is
/// no overlay or no headset pose.
pub fn reset_position<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
) -> Result<bool, BridgeError> {
    if state.overlay.handles.is_none() {
        tracing::warn!("Cannot reset overlay position: overlay not initialized");
        return Ok(false);
    }
    let Some(hmd) = bridge.get_controller_pose(HMD_DEVICE_INDEX)? else {
        tracing::warn!("HMD pose not found, cannot reset position");
        return Ok(false);
    };
    let spawn = math::spawn_transform(&math::from_row_major(&hmd), SPAWN_DISTANCE_M, SPAWN_DROP_M);
    set_transform_absolute_all(state, bridge, &spawn)?;
    tracing::info!("Overlay position reset");
    Ok(true)
}

pub fn set_preferences(state: &mut RuntimeState, preferences: OverlayPreferences) {
    if let Some(force) = preferences.force_opaque_alpha {
        state.capture.force_opaque_alpha = force;
    }
}

/// Handle controller rays are tested against.
pub fn active_handle(state: &RuntimeState) -> Option<OverlayHandle> {
    state.active_overlay()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::TransformType;
    use crate::sim::SimulatedCompositor;
    use glam::DVec3;

    fn hmd_at_origin(sim: &SimulatedCompositor) {
        sim.set_device_pose(HMD_DEVICE_INDEX, DMat4::from_translation(DVec3::new(0.0, 1.6, 0.0)));
    }

    #[test]
    fn test_init_spawns_pair_in_front_of_hmd() {
        let sim = SimulatedCompositor::new();
        hmd_at_origin(&sim);
        let mut state = RuntimeState::default();

        let handles = init_overlay(&mut state, &sim, DEFAULT_OVERLAY_WIDTH_M).unwrap();
        let back = handles.back.unwrap();
        let front = sim.snapshot(handles.front).unwrap();
        let rear = sim.snapshot(back).unwrap();

        assert_eq!(front.width, 0.5);
        assert_eq!(rear.bounds, [1.0, 0.0, 0.0, 1.0]);
        let pos = math::position(&front.world_transform.unwrap());
        assert!((pos - DVec3::new(0.0, 1.4, -1.0)).length() < 1e-9);
        let back_z = rear.world_transform.unwrap().z_axis.truncate();
        assert!((back_z + DVec3::Z).length() < 1e-9);
        assert!(state.overlay.back_enabled);

        // A second init reuses the same pair.
        assert_eq!(init_overlay(&mut state, &sim, 0.5).unwrap(), handles);
        assert_eq!(sim.overlay_count(), 2);
    }

    #[test]
    fn test_init_without_hmd_attaches_to_head() {
        let sim = SimulatedCompositor::new();
        let mut state = RuntimeState::default();
        let handles = init_overlay(&mut state, &sim, 0.5).unwrap();

        assert_eq!(
            sim.get_overlay_transform_type(handles.front).unwrap(),
            TransformType::TrackedDeviceRelative
        );
        assert!(!state.overlay.back_enabled);
        assert!(!sim.snapshot(handles.back.unwrap()).unwrap().visible);
    }

    #[test]
    fn test_init_rolls_back_on_failure() {
        let sim = SimulatedCompositor::new();
        sim.fail_create_for(BACK_OVERLAY_KEY);
        let mut state = RuntimeState::default();

        assert!(init_overlay(&mut state, &sim, 0.5).is_err());
        assert_eq!(sim.overlay_count(), 0);
        assert!(state.overlay.handles.is_none());

        let sim = SimulatedCompositor::new();
        assert!(init_overlay(&mut state, &sim, -1.0).is_err());
        assert_eq!(sim.overlay_count(), 0);
        assert!(state.overlay.handles.is_none());
    }

    #[test]
    fn test_visibility_toggles_both_panels() {
        let sim = SimulatedCompositor::new();
        hmd_at_origin(&sim);
        let mut state = RuntimeState::default();
        let handles = init_overlay(&mut state, &sim, 0.5).unwrap();

        toggle_all(&mut state, &sim).unwrap();
        assert!(state.overlay.visible);
        assert!(sim.snapshot(handles.front).unwrap().visible);
        assert!(sim.snapshot(handles.back.unwrap()).unwrap().visible);

        toggle_all(&mut state, &sim).unwrap();
        assert!(!state.overlay.visible);
        assert!(!sim.snapshot(handles.back.unwrap()).unwrap().visible);
    }

    #[test]
    fn test_head_lock_hides_back_and_absolute_restores_it() {
        let sim = SimulatedCompositor::new();
        hmd_at_origin(&sim);
        let mut state = RuntimeState::default();
        let handles = init_overlay(&mut state, &sim, 0.5).unwrap();
        show_all(&mut state, &sim).unwrap();

        set_transform_hmd(&mut state, &sim, 0.7).unwrap();
        assert!(!state.overlay.back_enabled);
        assert!(!sim.snapshot(handles.back.unwrap()).unwrap().visible);

        assert!(reset_position(&mut state, &sim).unwrap());
        assert!(state.overlay.back_enabled);
        assert!(sim.snapshot(handles.back.unwrap()).unwrap().visible);
    }

    #[test]
    fn test_reset_without_hmd_or_overlay_is_noop() {
        let sim = SimulatedCompositor::new();
        let mut state = RuntimeState::default();
        assert!(!reset_position(&mut state, &sim).unwrap());

        init_overlay(&mut state, &sim, 0.5).unwrap();
        assert!(!reset_position(&mut state, &sim).unwrap());
    }

    #[test]
    fn test_shutdown_destroys_everything_once() {
        let sim = SimulatedCompositor::new();
        let mut state = RuntimeState::default();
        init_overlay(&mut state, &sim, 0.5).unwrap();

        shutdown(&mut state, &sim);
        shutdown(&mut state, &sim);
        assert_eq!(sim.overlay_count(), 0);
        assert!(active_handle(&state).is_none());
    }

    #[test]
    fn test_preferences_only_touch_given_fields() {
        let mut state = RuntimeState::default();
        set_preferences(&mut state, OverlayPreferences { force_opaque_alpha: Some(true) });
        set_preferences(&mut state, OverlayPreferences::default());
        assert!(state.capture.force_opaque_alpha);
    }
}
