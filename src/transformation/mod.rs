//! Pure state-to-state maps with analytic tangent-space jacobians.

mod jacobian;

use std::sync::Arc;

use nalgebra::DMatrix;

use crate::error::{check_shape, Result};
use crate::manifold::{Layout, State};

pub use jacobian::{compare, finite_difference, BlockJacobian, FD_DELTA, JACOBIAN_TOLERANCE};

pub trait Transformation {
    fn input_layout(&self) -> &Arc<Layout>;
    fn output_layout(&self) -> &Arc<Layout>;

    /// Output state for the given input. Must be deterministic.
    fn eval(&self, input: &State) -> Result<State>;

    /// Analytic jacobian, `output dim x input dim`.
    fn jacobian(&self, input: &State) -> Result<DMatrix<f64>>;

    /// Checked entry point: verifies the input layout and the shape of the result.
    fn transform_state(&self, input: &State) -> Result<State> {
        input.check_layout(self.input_layout())?;
        let output = self.eval(input)?;
        output.check_layout(self.output_layout())?;
        Ok(output)
    }

    /// Propagates a covariance through the linearized map: `J P J^T`.
    fn transform_cov_mat(&self, input: &State, cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        input.check_layout(self.input_layout())?;
        check_shape((input.dim(), input.dim()), cov.shape())?;
        let j = self.jacobian(input)?;
        Ok(&j * cov * j.transpose())
    }

    fn jacobian_fd(&self, input: &State, delta: f64) -> Result<DMatrix<f64>> {
        input.check_layout(self.input_layout())?;
        finite_difference(input, delta, |x| self.eval(x))
    }

    /// Compares the analytic jacobian with finite differences at `input`.
    fn test_jacobian(&self, input: &State, delta: f64, tolerance: f64) -> Result<f64> {
        let analytic = self.jacobian(input)?;
        let numerical = self.jacobian_fd(input, delta)?;
        compare(&analytic, &numerical, tolerance)
    }
}
