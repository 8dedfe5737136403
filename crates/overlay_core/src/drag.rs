//! Grip-driven repositioning of the overlay panel.
//!
//! While one controller holds grip the panel rigidly follows it and turns to
//! face the headset. Only one controller may own the drag at a time.

use crate::bridge::{ControllerButtons, ControllerId, OverlayBridge, OverlayHandle, TransformType, HMD_DEVICE_INDEX};
use crate::error::{BridgeError, DragError};
use crate::math;
use crate::overlay;
use crate::state::{ActiveDrag, RuntimeState};
use glam::DMat4;

/// Resolves the overlay's placement in world space.
///
/// Device-relative overlays are composed with the device pose. An absolute
/// read that fails falls back to the relative computation.
pub fn overlay_world_transform<B: OverlayBridge + ?Sized>(
    bridge: &B,
    handle: OverlayHandle,
) -> Result<DMat4, BridgeError> {
    match bridge.get_overlay_transform_type(handle)? {
        TransformType::Absolute => match bridge.get_overlay_transform_absolute(handle) {
            Ok(m) => Ok(math::from_row_major(&m)),
            Err(e) => {
                tracing::warn!(%handle, error = %e, "Absolute transform read failed, trying relative fallback");
                relative_as_world(bridge, handle)
            }
        },
        TransformType::TrackedDeviceRelative => relative_as_world(bridge, handle),
        TransformType::Other(kind) => Err(BridgeError::UnsupportedTransformType(kind)),
    }
}

fn relative_as_world<B: OverlayBridge + ?Sized>(
    bridge: &B,
    handle: OverlayHandle,
) -> Result<DMat4, BridgeError> {
    let relative = bridge.get_overlay_transform_relative(handle)?;
    let device = relative.tracked_device_index;
    let pose = bridge
        .get_controller_pose(device)?
        .ok_or(BridgeError::PoseUnavailable(device))?;
    Ok(math::from_row_major(&pose) * math::from_row_major(&relative.transform))
}

/// Takes ownership of the drag for `controller`.
///
/// On error nothing is stored and the drag stays idle.
pub fn start_drag<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    controller: ControllerId,
    pose: &DMat4,
    handle: OverlayHandle,
) -> Result<(), DragError> {
    let start_controller_inverse = math::checked_inverse(pose)?;
    let start_overlay_transform = overlay_world_transform(bridge, handle)?;

    state.drag.active = Some(ActiveDrag {
        controller,
        start_controller_inverse,
        start_overlay_transform,
    });
    state.metrics.drags_started_total.inc();
    tracing::info!(controller, "Starting drag");
    Ok(())
}

/// Moves the panel with the owning controller's current pose.
pub fn update_drag<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    pose: &DMat4,
) -> Result<(), BridgeError> {
    let Some(active) = state.drag.active else {
        return Ok(());
    };
    let moved = math::follow_controller(
        pose,
        &active.start_controller_inverse,
        &active.start_overlay_transform,
    );
    let oriented = face_hmd(bridge, &moved);
    overlay::set_transform_absolute_all(state, bridge, &oriented)
}

/// Billboards toward the headset. Without a usable headset position the
/// unoriented transform is kept.
fn face_hmd<B: OverlayBridge + ?Sized>(bridge: &B, transform: &DMat4) -> DMat4 {
    let hmd = match bridge.get_controller_pose(HMD_DEVICE_INDEX) {
        Ok(Some(m)) => math::from_row_major(&m),
        Ok(None) => return *transform,
        Err(e) => {
            tracing::debug!(error = %e, "HMD pose unavailable while dragging");
            return *transform;
        }
    };
    match math::face_toward(transform, math::position(&hmd)) {
        Ok(faced) => faced,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping billboard");
            *transform
        }
    }
}

pub fn end_drag(state: &mut RuntimeState) {
    if let Some(active) = state.drag.active.take() {
        tracing::info!(controller = active.controller, "Ending drag");
    }
}

/// One tick of grip handling for `controller`.
pub fn process_grip_drag<B: OverlayBridge + ?Sized>(
    state: &mut RuntimeState,
    bridge: &B,
    controller: ControllerId,
    pose: &DMat4,
    handle: OverlayHandle,
    buttons: ControllerButtons,
    has_hit: bool,
) {
    match state.drag.dragging_controller() {
        None => {
            if buttons.grip_pressed && has_hit {
                if let Err(e) = start_drag(state, bridge, controller, pose, handle) {
                    tracing::error!(controller, error = %e, "Failed to start drag");
                }
            }
        }
        Some(owner) if owner == controller => {
            if buttons.grip_pressed && has_hit {
                if let Err(e) = update_drag(state, bridge, pose) {
                    tracing::error!(controller, error = %e, "Error updating drag");
                }
            } else {
                end_drag(state);
            }
        }
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedCompositor;
    use crate::state::OverlayHandles;
    use glam::DVec3;

    const GRIP: ControllerButtons = ControllerButtons {
        trigger_pressed: false,
        grip_pressed: true,
    };
    const RELEASED: ControllerButtons = ControllerButtons {
        trigger_pressed: false,
        grip_pressed: false,
    };

    fn setup() -> (RuntimeState, SimulatedCompositor, OverlayHandles) {
        let sim = SimulatedCompositor::new();
        sim.set_device_pose(HMD_DEVICE_INDEX, DMat4::from_translation(DVec3::new(0.0, 1.0, 0.0)));
        let front = sim.create_overlay("front", "Front").unwrap();
        let back = sim.create_overlay("back", "Back").unwrap();
        let placed = DMat4::from_translation(DVec3::new(0.0, 1.0, -1.0));
        sim.set_overlay_transform_absolute(front, &math::to_row_major(&placed)).unwrap();

        let mut state = RuntimeState::default();
        let handles = OverlayHandles { front, back: Some(back) };
        state.overlay.handles = Some(handles);
        (state, sim, handles)
    }

    #[test]
    fn test_singular_pose_leaves_drag_idle() {
        let (mut state, sim, handles) = setup();
        process_grip_drag(&mut state, &sim, 1, &DMat4::ZERO, handles.front, GRIP, true);
        assert!(!state.drag.is_dragging());
        assert_eq!(state.metrics.drags_started_total.get(), 0);
    }

    #[test]
    fn test_grip_without_hit_does_not_start() {
        let (mut state, sim, handles) = setup();
        process_grip_drag(&mut state, &sim, 1, &DMat4::IDENTITY, handles.front, GRIP, false);
        assert!(!state.drag.is_dragging());
    }

    #[test]
    fn test_panel_follows_and_faces_hmd() {
        let (mut state, sim, handles) = setup();
        let start = DMat4::from_translation(DVec3::new(0.0, 1.0, -0.2));
        process_grip_drag(&mut state, &sim, 1, &start, handles.front, GRIP, true);
        assert_eq!(state.drag.dragging_controller(), Some(1));

        // Another controller cannot steal the drag.
        process_grip_drag(&mut state, &sim, 2, &start, handles.front, GRIP, true);
        assert_eq!(state.drag.dragging_controller(), Some(1));

        let moved = DMat4::from_translation(DVec3::new(0.5, 1.0, -0.2));
        process_grip_drag(&mut state, &sim, 1, &moved, handles.front, GRIP, true);

        let front = sim.snapshot(handles.front).unwrap().world_transform.unwrap();
        assert!((math::position(&front) - DVec3::new(0.5, 1.0, -1.0)).length() < 1e-9);
        let expected_forward = (DVec3::new(0.0, 1.0, 0.0) - DVec3::new(0.5, 1.0, -1.0)).normalize();
        assert!((front.z_axis.truncate() - expected_forward).length() < 1e-9);

        let back = sim.snapshot(handles.back.unwrap()).unwrap().world_transform.unwrap();
        assert!((back.z_axis.truncate() + expected_forward).length() < 1e-9);

        process_grip_drag(&mut state, &sim, 1, &moved, handles.front, RELEASED, true);
        assert!(!state.drag.is_dragging());
    }

    #[test]
    fn test_owner_hit_loss_ends_drag() {
        let (mut state, sim, handles) = setup();
        process_grip_drag(&mut state, &sim, 3, &DMat4::IDENTITY, handles.front, GRIP, true);
        assert!(state.drag.is_dragging());
        process_grip_drag(&mut state, &sim, 3, &DMat4::IDENTITY, handles.front, GRIP, false);
        assert!(!state.drag.is_dragging());
    }

    #[test]
    fn test_failed_absolute_read_falls_back_to_relative() {
        let (_, sim, handles) = setup();
        sim.fail_absolute_reads(true);
        let world = overlay_world_transform(&sim, handles.front).unwrap();
        assert!((math::position(&world) - DVec3::new(0.0, 1.0, -1.0)).length() < 1e-9);
    }

    #[test]
    fn test_device_relative_overlay_resolves_through_device_pose() {
        let (_, sim, handles) = setup();
        sim.set_device_pose(2, DMat4::from_translation(DVec3::new(1.0, 0.0, 0.0)));
        sim.place_relative(handles.front, 2, DMat4::from_translation(DVec3::new(0.0, 0.5, 0.0)))
            .unwrap();
        let world = overlay_world_transform(&sim, handles.front).unwrap();
        assert!((math::position(&world) - DVec3::new(1.0, 0.5, 0.0)).length() < 1e-9);

        sim.set_device_untracked(2);
        assert!(matches!(
            overlay_world_transform(&sim, handles.front),
            Err(BridgeError::PoseUnavailable(2))
        ));
    }
}
