//! Quaternion utilities shared by the pose controller and reload animator.
//!
//! All rotations are `nalgebra::UnitQuaternion<f64>`. Every helper here
//! returns a unit quaternion and degrades to a neutral value instead of
//! producing NaN when an input is degenerate.
//!
//! Axis conventions (right-handed, OpenGL style):
//! - `UP` = +Y
//! - `FORWARD` = -Z (the weapon model's barrel direction at rest)

use nalgebra::{Matrix4, Quaternion, Unit, UnitQuaternion, Vector3};

/// Threshold below which a vector is treated as zero length.
pub const EPSILON: f64 = 1e-6;

/// Dot product above which slerp falls back to normalized lerp.
pub const SLERP_LERP_THRESHOLD: f64 = 0.9995;

/// World up axis.
pub const UP: Vector3<f64> = Vector3::new(0.0, 1.0, 0.0);

/// Weapon forward axis at rest.
pub const FORWARD: Vector3<f64> = Vector3::new(0.0, 0.0, -1.0);

/// Builds a rotation of `angle` radians about `axis`.
///
/// A near-zero axis yields the identity.
pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> UnitQuaternion<f64> {
    match Unit::try_new(*axis, EPSILON) {
        Some(axis) if angle.is_finite() => UnitQuaternion::from_axis_angle(&axis, angle),
        _ => UnitQuaternion::identity(),
    }
}

/// Composes two rotations, `first` applied before `second` in the
/// rotated frame (intrinsic order), and renormalizes.
///
/// `compose(yaw, roll)` yaws the body, then rolls it about its new forward
/// axis.
pub fn compose(first: &UnitQuaternion<f64>, second: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    normalize_or_identity(first.quaternion() * second.quaternion())
}

/// Normalizes a raw quaternion, falling back to identity when it has no
/// usable length or contains non-finite components.
pub fn normalize_or_identity(q: Quaternion<f64>) -> UnitQuaternion<f64> {
    let norm = q.norm();
    if !norm.is_finite() || norm < EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::new_unchecked(q / norm)
}

/// Spherical linear interpolation along the shorter arc.
///
/// - `t` is clamped to [0, 1]
/// - A negative dot product flips `to` so the short way round is taken
/// - Nearly parallel inputs (dot > 0.9995) use normalized lerp
pub fn slerp(from: &UnitQuaternion<f64>, to: &UnitQuaternion<f64>, t: f64) -> UnitQuaternion<f64> {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let q1 = *from.quaternion();
    let mut q2 = *to.quaternion();

    let mut dot = q1.dot(&q2);
    if dot < 0.0 {
        q2 = -q2;
        dot = -dot;
    }

    if dot > SLERP_LERP_THRESHOLD {
        return normalize_or_identity(q1 + (q2 - q1) * t);
    }

    let theta_0 = dot.clamp(-1.0, 1.0).acos();
    let theta = theta_0 * t;

    let orthogonal = q2 - q1 * dot;
    let orthogonal_norm = orthogonal.norm();
    if orthogonal_norm < EPSILON {
        return *from;
    }
    let orthogonal = orthogonal / orthogonal_norm;

    normalize_or_identity(q1 * theta.cos() + orthogonal * theta.sin())
}

/// Shortest rotation taking direction `from` onto direction `to`.
///
/// Parallel directions give the identity; anti-parallel ones give a 180°
/// turn about `UP`. Zero-length inputs give the identity.
pub fn rotation_between(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    let (Some(from), Some(to)) = (from.try_normalize(EPSILON), to.try_normalize(EPSILON)) else {
        return UnitQuaternion::identity();
    };

    let cross = from.cross(&to);
    let dot = from.dot(&to);

    if cross.norm() < EPSILON {
        return if dot > 0.0 {
            UnitQuaternion::identity()
        } else {
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::PI)
        };
    }

    from_axis_angle(&cross, dot.clamp(-1.0, 1.0).acos())
}

/// Rotates a vector.
#[inline]
pub fn rotate(q: &UnitQuaternion<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    q.transform_vector(v)
}

/// Renderer layout: `[w, x, y, z]`.
pub fn to_wxyz(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.w, q.i, q.j, q.k]
}

/// Builds a rotation from `[w, x, y, z]`, renormalizing.
pub fn from_wxyz(wxyz: [f64; 4]) -> UnitQuaternion<f64> {
    normalize_or_identity(Quaternion::new(wxyz[0], wxyz[1], wxyz[2], wxyz[3]))
}

/// 4×4 homogeneous rotation matrix for the renderer.
pub fn rotation_matrix(q: &UnitQuaternion<f64>) -> Matrix4<f64> {
    q.to_homogeneous()
}

/// Angular distance between two rotations, ignoring quaternion sign.
///
/// Uses the chord/sum form rather than `acos(dot)`, which loses precision
/// for nearly equal rotations.
pub fn angular_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    let qa = *a.quaternion();
    let mut qb = *b.quaternion();
    if qa.dot(&qb) < 0.0 {
        qb = -qb;
    }
    4.0 * (qa - qb).norm().atan2((qa + qb).norm())
}
