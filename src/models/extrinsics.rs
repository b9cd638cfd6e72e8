use std::sync::Arc;

use nalgebra::{DMatrix, Matrix3, UnitQuaternion, Vector3};

use crate::error::Result;
use crate::manifold::{so3, ElementType, Layout, State};
use crate::transformation::{BlockJacobian, Transformation};

/// Moves a body pose {pos, att} to a rigidly attached sensor frame:
///
/// pos_s = pos + R(att) * t_bs
/// att_s = att * q_bs
pub struct ExtrinsicTransformation {
    input: Arc<Layout>,
    output: Arc<Layout>,
    t_bs: Vector3<f64>,
    q_bs: UnitQuaternion<f64>,
}

impl ExtrinsicTransformation {
    pub fn new(t_bs: Vector3<f64>, q_bs: UnitQuaternion<f64>) -> Result<ExtrinsicTransformation> {
        let layout = Layout::shared([
            ("pos", ElementType::Vector(3)),
            ("att", ElementType::Rotation),
        ])?;
        Ok(ExtrinsicTransformation {
            input: Arc::clone(&layout),
            output: layout,
            t_bs,
            q_bs,
        })
    }

    pub fn set_extrinsics(&mut self, t_bs: Vector3<f64>, q_bs: UnitQuaternion<f64>) {
        self.t_bs = t_bs;
        self.q_bs = q_bs;
    }
}

impl Transformation for ExtrinsicTransformation {
    fn input_layout(&self) -> &Arc<Layout> {
        &self.input
    }

    fn output_layout(&self) -> &Arc<Layout> {
        &self.output
    }

    fn eval(&self, input: &State) -> Result<State> {
        let pos: Vector3<f64> = input.get("pos")?;
        let att: UnitQuaternion<f64> = input.get("att")?;
        self.output
            .new_state()
            .with("pos", pos + att.transform_vector(&self.t_bs))?
            .with("att", att * self.q_bs)
    }

    fn jacobian(&self, input: &State) -> Result<DMatrix<f64>> {
        let att: UnitQuaternion<f64> = input.get("att")?;
        let mut j = BlockJacobian::new(&self.output, &self.input);
        j.set_block(0, 0, &Matrix3::<f64>::identity())?;
        j.set_block(0, 1, &(-so3::skew(&att.transform_vector(&self.t_bs))))?;
        j.set_block(1, 1, &Matrix3::<f64>::identity())?;
        Ok(j.into_matrix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformation::{FD_DELTA, JACOBIAN_TOLERANCE};
    use nalgebra::DVector;

    fn transformation() -> ExtrinsicTransformation {
        ExtrinsicTransformation::new(
            Vector3::new(0.1, -0.05, 0.2),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        )
        .unwrap()
    }

    #[test]
    fn sensor_pose() {
        let t = transformation();
        let input = t
            .input_layout()
            .new_state()
            .with("pos", Vector3::new(1.0, 2.0, 3.0))
            .unwrap();
        let output = t.transform_state(&input).unwrap();
        approx::assert_abs_diff_eq!(
            output.get::<Vector3<f64>>("pos").unwrap(),
            Vector3::new(1.1, 1.95, 3.2),
            epsilon = 1e-12
        );
        let att: UnitQuaternion<f64> = output.get("att").unwrap();
        approx::assert_abs_diff_eq!(att.angle(), std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let t = transformation();
        for k in 1..4 {
            let v = DVector::from_fn(6, |i, _| 0.2 * k as f64 * (i as f64 - 2.5));
            let input = t.input_layout().new_state().boxplus(&v).unwrap();
            t.test_jacobian(&input, FD_DELTA, JACOBIAN_TOLERANCE).unwrap();
        }
    }

    #[test]
    fn covariance_of_rotated_offset() {
        let t = transformation();
        let input = t.input_layout().new_state();
        let mut cov = DMatrix::zeros(6, 6);
        cov[(5, 5)] = 1.0;
        let out = t.transform_cov_mat(&input, &cov).unwrap();
        // yaw uncertainty moves the sensor along (-t_y, t_x)
        approx::assert_abs_diff_eq!(out[(0, 0)], 0.05 * 0.05, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(out[(1, 1)], 0.1 * 0.1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(out[(5, 5)], 1.0, epsilon = 1e-12);
    }
}
