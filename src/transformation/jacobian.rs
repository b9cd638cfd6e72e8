use std::sync::Arc;

use nalgebra::{DMatrix, DMatrixViewMut, Dim, Matrix, RawStorage};

use crate::error::{check_shape, EstimationError, Result};
use crate::manifold::{Layout, State};

/// Default finite difference step per tangent coordinate.
pub const FD_DELTA: f64 = 1e-6;
/// Default tolerance used when comparing analytic and numerical jacobians.
pub const JACOBIAN_TOLERANCE: f64 = 1e-4;

/// Dense jacobian addressed by (row block, column block) of two layouts. Entries that are
/// never written stay zero.
#[derive(Debug, Clone)]
pub struct BlockJacobian {
    rows: Arc<Layout>,
    cols: Arc<Layout>,
    matrix: DMatrix<f64>,
}

impl BlockJacobian {
    pub fn new(rows: &Arc<Layout>, cols: &Arc<Layout>) -> BlockJacobian {
        BlockJacobian {
            rows: Arc::clone(rows),
            cols: Arc::clone(cols),
            matrix: DMatrix::zeros(rows.dim(), cols.dim()),
        }
    }

    pub fn set_zero(&mut self) {
        self.matrix.fill(0.0);
    }

    /// Writes the dense block of (output block `row`, input block `col`).
    pub fn set_block<R, C, S>(&mut self, row: usize, col: usize, block: &Matrix<f64, R, C, S>) -> Result<()>
    where
        R: Dim,
        C: Dim,
        S: RawStorage<f64, R, C>,
    {
        let mut view = self.block_mut(row, col)?;
        check_shape(view.shape(), block.shape())?;
        for j in 0..block.ncols() {
            for i in 0..block.nrows() {
                view[(i, j)] = block[(i, j)];
            }
        }
        Ok(())
    }

    /// Mutable view of one block, for partial writes inside array elements.
    pub fn block_mut(&mut self, row: usize, col: usize) -> Result<DMatrixViewMut<'_, f64>> {
        let row = self.rows.entry(row)?;
        let col = self.cols.entry(col)?;
        Ok(self
            .matrix
            .view_mut((row.offset, col.offset), (row.dim(), col.dim())))
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn into_matrix(self) -> DMatrix<f64> {
        self.matrix
    }
}

/// Central finite difference jacobian of `f` at `input`, perturbing with `boxplus` and
/// reading the output displacement with `boxminus`.
pub fn finite_difference<F>(input: &State, delta: f64, f: F) -> Result<DMatrix<f64>>
where
    F: Fn(&State) -> Result<State>,
{
    let reference = f(input)?;
    let mut jacobian = DMatrix::zeros(reference.dim(), input.dim());
    let mut dx = nalgebra::DVector::zeros(input.dim());
    for i in 0..input.dim() {
        dx[i] = delta;
        let plus = f(&input.boxplus(&dx)?)?;
        dx[i] = -delta;
        let minus = f(&input.boxplus(&dx)?)?;
        dx[i] = 0.0;
        let column = plus.boxminus(&minus)? / (2.0 * delta);
        jacobian.set_column(i, &column);
    }
    Ok(jacobian)
}

/// Compares an analytic jacobian against a numerical one, returns the largest absolute
/// deviation on success.
pub fn compare(analytic: &DMatrix<f64>, numerical: &DMatrix<f64>, tolerance: f64) -> Result<f64> {
    check_shape(numerical.shape(), analytic.shape())?;
    let max_error = (analytic - numerical).amax();
    let scale = numerical.amax().max(1.0);
    if max_error.is_finite() && max_error <= tolerance * scale {
        Ok(max_error)
    } else {
        Err(EstimationError::JacobianMismatch {
            max_error,
            tolerance: tolerance * scale,
        })
    }
}
