use std::ops::Range;

use nalgebra::{DMatrix, DVector};

use crate::error::{EstimationError, Result};
use crate::filter::ResidualId;

/// Stacked innovations and jacobians of one `Filter::eval_res` call.
///
/// Rows are grouped per evaluated residual in registration order. `jac_pre` and `jac_pos`
/// have one column per tangent coordinate of the filter state, `jac_noi` is block diagonal
/// with one column block per evaluated residual.
#[derive(Debug, Clone)]
pub struct Linearization {
    pub innovation: DVector<f64>,
    pub jac_pre: DMatrix<f64>,
    pub jac_pos: DMatrix<f64>,
    pub jac_noi: DMatrix<f64>,
    /// Block diagonal noise covariance matching the columns of `jac_noi`.
    pub noise_cov: DMatrix<f64>,
    /// Row range of each residual that contributed.
    pub rows: Vec<(ResidualId, Range<usize>)>,
    /// Residuals left out because of a numeric failure.
    pub skipped: Vec<ResidualId>,
}

/// Normal equations over the stacked (pre, pos) tangent vector.
#[derive(Debug, Clone)]
pub struct InformationSystem {
    pub h: DMatrix<f64>,
    pub b: DVector<f64>,
}

/// One residual's innovation and jacobians, already scattered onto the filter state
/// columns.
#[derive(Debug, Clone)]
pub(crate) struct Contribution {
    pub id: ResidualId,
    pub innovation: DVector<f64>,
    pub jac_pre: DMatrix<f64>,
    pub jac_pos: DMatrix<f64>,
    pub jac_noi: DMatrix<f64>,
    pub noise_cov: DMatrix<f64>,
}

impl Linearization {
    pub(crate) fn assemble(
        state_dim: usize,
        contributions: &[Contribution],
        skipped: Vec<ResidualId>,
    ) -> Linearization {
        let n_rows: usize = contributions.iter().map(|c| c.innovation.len()).sum();
        let n_noi: usize = contributions.iter().map(|c| c.jac_noi.ncols()).sum();

        let mut lin = Linearization {
            innovation: DVector::zeros(n_rows),
            jac_pre: DMatrix::zeros(n_rows, state_dim),
            jac_pos: DMatrix::zeros(n_rows, state_dim),
            jac_noi: DMatrix::zeros(n_rows, n_noi),
            noise_cov: DMatrix::zeros(n_noi, n_noi),
            rows: Vec::with_capacity(contributions.len()),
            skipped,
        };

        let mut row = 0;
        let mut col = 0;
        for c in contributions {
            let rows = c.innovation.len();
            let noi = c.jac_noi.ncols();
            lin.innovation.rows_mut(row, rows).copy_from(&c.innovation);
            lin.jac_pre.rows_mut(row, rows).copy_from(&c.jac_pre);
            lin.jac_pos.rows_mut(row, rows).copy_from(&c.jac_pos);
            lin.jac_noi
                .view_mut((row, col), (rows, noi))
                .copy_from(&c.jac_noi);
            lin.noise_cov
                .view_mut((col, col), (noi, noi))
                .copy_from(&c.noise_cov);
            lin.rows.push((c.id, row..row + rows));
            row += rows;
            col += noi;
        }
        lin
    }

    pub fn is_empty(&self) -> bool {
        self.innovation.is_empty()
    }

    /// Row range of residual `id`, `None` if it was skipped or never evaluated.
    pub fn rows_of(&self, id: ResidualId) -> Option<Range<usize>> {
        self.rows
            .iter()
            .find(|(other, _)| *other == id)
            .map(|(_, range)| range.clone())
    }

    /// H = A^T W A and b = A^T W e with A = [J_pre J_pos] and W = (J_noi S J_noi^T)^-1.
    pub fn information_system(&self) -> Result<InformationSystem> {
        let n = self.jac_pre.ncols();
        let rows = self.innovation.len();
        let mut a = DMatrix::zeros(rows, 2 * n);
        a.columns_mut(0, n).copy_from(&self.jac_pre);
        a.columns_mut(n, n).copy_from(&self.jac_pos);

        let weight = (&self.jac_noi * &self.noise_cov * self.jac_noi.transpose())
            .try_inverse()
            .ok_or_else(|| EstimationError::Numeric("singular innovation covariance".to_string()))?;

        let at_w = a.transpose() * weight;
        let h = &at_w * &a;
        let b = at_w * &self.innovation;
        Ok(InformationSystem { h, b })
    }
}
