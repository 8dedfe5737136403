//! Pose and overlay transform math.
//!
//! Matrix convention, in one place: the native bridge exchanges 4x4
//! transforms as 16 `f64` in **row-major** order (`m[row * 4 + col]`, the
//! translation lives in elements 3, 7 and 11). Everything inside this crate
//! uses `glam::DMat4`, which is column-major and composes as
//! `world = M * local`. [`from_row_major`] and [`to_row_major`] are the only
//! places that convert between the two.

use crate::error::GeometryError;
use glam::{DMat4, DVec3};
use std::f64::consts::PI;

/// A 4x4 transform as it crosses the bridge boundary (row-major).
pub type Mat16 = [f64; 16];

/// Below this determinant a pose is treated as singular.
const INVERT_EPSILON: f64 = 1e-12;
/// Minimum overlay-to-headset distance that still defines a facing direction.
const MIN_FACING_DISTANCE: f64 = 1e-5;
/// When forward is this close to world up, the billboard uses world Z instead.
const UP_PARALLEL_LIMIT: f64 = 0.95;

/// Converts a row-major wire matrix into the internal representation.
#[inline]
pub fn from_row_major(m: &Mat16) -> DMat4 {
    DMat4::from_cols_array(m).transpose()
}

/// Converts an internal matrix back into the row-major wire format.
#[inline]
pub fn to_row_major(m: &DMat4) -> Mat16 {
    m.transpose().to_cols_array()
}

/// World position of a pose (its translation column).
#[inline]
pub fn position(pose: &DMat4) -> DVec3 {
    pose.w_axis.truncate()
}

/// Pointing direction of a tracked device. Devices look down their local -Z.
#[inline]
pub fn forward(pose: &DMat4) -> DVec3 {
    -pose.z_axis.truncate()
}

/// Inverts a pose, refusing singular or non-finite matrices.
pub fn checked_inverse(pose: &DMat4) -> Result<DMat4, GeometryError> {
    let det = pose.determinant();
    if !det.is_finite() || det.abs() < INVERT_EPSILON {
        return Err(GeometryError::NotInvertible);
    }
    Ok(pose.inverse())
}

/// Rigid "object follows controller" composition.
///
/// The overlay keeps the offset it had relative to the controller when the
/// grab began: `new = current * start_controller_inverse * start_overlay`.
pub fn follow_controller(
    current_controller: &DMat4,
    start_controller_inverse: &DMat4,
    start_overlay: &DMat4,
) -> DMat4 {
    *current_controller * *start_controller_inverse * *start_overlay
}

/// Rebuilds the rotation of `transform` so its +Z axis points at `target`,
/// keeping its translation. Yaw and pitch follow the target; roll is pinned
/// to world up.
pub fn face_toward(transform: &DMat4, target: DVec3) -> Result<DMat4, GeometryError> {
    let origin = position(transform);
    let to_target = target - origin;
    let distance = to_target.length();
    if !distance.is_finite() || distance < MIN_FACING_DISTANCE {
        return Err(GeometryError::ZeroLength);
    }
    let forward = to_target / distance;

    let up = if forward.dot(DVec3::Y).abs() > UP_PARALLEL_LIMIT {
        DVec3::Z
    } else {
        DVec3::Y
    };

    let right = up.cross(forward);
    if right.length() < MIN_FACING_DISTANCE {
        return Err(GeometryError::DegenerateBasis);
    }
    let right = right.normalize();
    let true_up = forward.cross(right).normalize();

    Ok(DMat4::from_cols(
        right.extend(0.0),
        true_up.extend(0.0),
        forward.extend(0.0),
        transform.w_axis,
    ))
}

/// Transform for the mirrored backside panel: the front panel turned half a
/// revolution about its own vertical axis.
pub fn back_transform(front: &DMat4) -> DMat4 {
    *front * DMat4::from_rotation_y(PI)
}

/// Placement used when (re)spawning the panel in front of the headset.
///
/// The panel sits `distance` meters ahead of the HMD along its horizontal
/// heading, `drop` meters below eye level, turned (yaw only) to face the HMD.
pub fn spawn_transform(hmd: &DMat4, distance: f64, drop: f64) -> DMat4 {
    let eye = position(hmd);
    let mut heading = forward(hmd);
    heading.y = 0.0;
    let heading = heading.try_normalize().unwrap_or(DVec3::NEG_Z);

    let spot = eye + heading * distance - DVec3::Y * drop;
    let placed = DMat4::from_translation(spot);
    let level_eye = DVec3::new(eye.x, spot.y, eye.z);
    face_toward(&placed, level_eye).unwrap_or(placed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: DVec3, b: DVec3) -> bool {
        (a - b).length() < 1e-9
    }

    #[rustfmt::skip]
    const TRANSLATED: Mat16 = [
        1.0, 0.0, 0.0, 0.5,
        0.0, 1.0, 0.0, 1.5,
        0.0, 0.0, 1.0, -2.0,
        0.0, 0.0, 0.0, 1.0,
    ];

    #[test]
    fn test_row_major_translation_lands_in_w_axis() {
        let m = from_row_major(&TRANSLATED);
        assert!(approx(position(&m), DVec3::new(0.5, 1.5, -2.0)));
        assert_eq!(to_row_major(&m), TRANSLATED);
    }

    #[test]
    fn test_forward_is_negated_third_column() {
        let yawed = DMat4::from_rotation_y(PI / 2.0);
        // Rotating -Z by +90 degrees about Y points along -X.
        assert!(approx(forward(&yawed), DVec3::NEG_X));
        assert!(approx(forward(&DMat4::IDENTITY), DVec3::NEG_Z));
    }

    #[test]
    fn test_checked_inverse_rejects_singular() {
        assert_eq!(
            checked_inverse(&DMat4::ZERO),
            Err(GeometryError::NotInvertible)
        );
        let m = from_row_major(&TRANSLATED);
        let inv = checked_inverse(&m).unwrap();
        assert!((m * inv).abs_diff_eq(DMat4::IDENTITY, 1e-12));
    }

    #[test]
    fn test_follow_controller_keeps_grab_offset() {
        let start_controller = DMat4::from_translation(DVec3::new(0.0, 1.0, 0.0));
        let start_overlay = DMat4::from_translation(DVec3::new(0.0, 1.2, -1.0));
        let inverse = checked_inverse(&start_controller).unwrap();

        let moved = DMat4::from_translation(DVec3::new(0.3, 1.0, 0.0));
        let result = follow_controller(&moved, &inverse, &start_overlay);
        assert!(approx(position(&result), DVec3::new(0.3, 1.2, -1.0)));

        let turned = DMat4::from_rotation_y(PI / 2.0) * start_controller;
        let swung = follow_controller(&turned, &inverse, &start_overlay);
        // The overlay one meter ahead of the controller swings to its left.
        assert!(approx(position(&swung), DVec3::new(-1.0, 1.2, 0.0)));
    }

    #[test]
    fn test_face_toward_points_z_at_target() {
        let overlay = DMat4::from_translation(DVec3::new(0.0, 1.0, -1.0));
        let faced = face_toward(&overlay, DVec3::new(0.0, 1.0, 0.0)).unwrap();
        assert!(approx(faced.z_axis.truncate(), DVec3::Z));
        assert!(approx(faced.y_axis.truncate(), DVec3::Y));
        assert!(approx(faced.x_axis.truncate(), DVec3::X));
        assert!(approx(position(&faced), DVec3::new(0.0, 1.0, -1.0)));
    }

    #[test]
    fn test_face_toward_straight_up_switches_reference_axis() {
        let overlay = DMat4::from_translation(DVec3::ZERO);
        let faced = face_toward(&overlay, DVec3::new(0.0, 2.0, 0.0)).unwrap();
        assert!(approx(faced.z_axis.truncate(), DVec3::Y));
        assert!(faced.x_axis.truncate().is_normalized());
    }

    #[test]
    fn test_face_toward_rejects_coincident_target() {
        let overlay = DMat4::from_translation(DVec3::ONE);
        assert_eq!(
            face_toward(&overlay, DVec3::ONE),
            Err(GeometryError::ZeroLength)
        );
    }

    #[test]
    fn test_back_transform_faces_opposite() {
        let front = DMat4::from_translation(DVec3::new(0.0, 1.0, -1.0));
        let back = back_transform(&front);
        assert!(approx(back.z_axis.truncate(), DVec3::NEG_Z));
        assert!(approx(position(&back), position(&front)));
    }

    #[test]
    fn test_spawn_transform_is_level_and_faces_hmd() {
        let hmd = DMat4::from_translation(DVec3::new(0.0, 1.6, 0.0))
            * DMat4::from_rotation_x(-0.4);
        let spawn = spawn_transform(&hmd, 1.0, 0.2);
        assert!(approx(position(&spawn), DVec3::new(0.0, 1.4, -1.0)));
        assert!(approx(spawn.z_axis.truncate(), DVec3::Z));
    }
}
