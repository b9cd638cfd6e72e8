use nalgebra::{Matrix3, UnitQuaternion, Vector3};

const SMALL_ANGLE: f64 = 1e-8;

/// Cross product matrix, `skew(a) * b == a.cross(&b)`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    v.cross_matrix()
}

/// Exponential map from the rotation vector to a unit quaternion.
pub fn exp(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*v)
}

/// Logarithm map, angle in [0, pi].
pub fn log(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    q.scaled_axis()
}

pub fn rotation_matrix(q: &UnitQuaternion<f64>) -> Matrix3<f64> {
    q.to_rotation_matrix().into_inner()
}

/// Source : Barfoot, State Estimation for Robotics.
///
/// Equation : left Jacobian of SO(3).
pub fn left_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let phi_x = skew(phi);
    if theta < SMALL_ANGLE {
        return Matrix3::identity() + 0.5 * phi_x;
    }
    let theta2 = theta * theta;
    Matrix3::identity()
        + (1.0 - theta.cos()) / theta2 * phi_x
        + (theta - theta.sin()) / (theta2 * theta) * phi_x * phi_x
}

/// Inverse of [`left_jacobian`], maps a left perturbation of the rotation onto its log.
pub fn left_jacobian_inverse(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let phi_x = skew(phi);
    if theta < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * phi_x + phi_x * phi_x / 12.0;
    }
    // (1 + cos) / sin rewritten as cot(theta / 2), finite up to theta = pi
    let half = 0.5 * theta;
    let factor = (1.0 - half / half.tan()) / (theta * theta);
    Matrix3::identity() - 0.5 * phi_x + factor * phi_x * phi_x
}
