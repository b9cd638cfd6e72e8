//! Measurement residuals.
//!
//! A [`Residual`] computes an innovation from a predecessor state, a successor state and a
//! noise state, together with the analytic jacobians with respect to each of them. Process
//! models (e.g. integrated velocity) implement [`Residual`] directly. Residuals that only
//! constrain the current state implement [`UnaryResidual`], every unary residual is a
//! residual with an empty predecessor layout.

use std::any::Any;
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::error::Result;
use crate::manifold::{ElementType, Layout, State};
use crate::transformation::{compare, finite_difference, BlockJacobian};

/// Layouts a residual is defined on.
#[derive(Debug, Clone)]
pub struct ResidualDefinition {
    pub inn: Arc<Layout>,
    pub pre: Arc<Layout>,
    pub pos: Arc<Layout>,
    pub noi: Arc<Layout>,
}

impl ResidualDefinition {
    pub fn new(
        inn: Vec<(&str, ElementType)>,
        pre: Vec<(&str, ElementType)>,
        pos: Vec<(&str, ElementType)>,
        noi: Vec<(&str, ElementType)>,
    ) -> Result<ResidualDefinition> {
        Ok(ResidualDefinition {
            inn: Layout::shared(inn)?,
            pre: Layout::shared(pre)?,
            pos: Layout::shared(pos)?,
            noi: Layout::shared(noi)?,
        })
    }

    /// Definition of a residual without predecessor blocks.
    pub fn unary(
        inn: Vec<(&str, ElementType)>,
        cur: Vec<(&str, ElementType)>,
        noi: Vec<(&str, ElementType)>,
    ) -> Result<ResidualDefinition> {
        ResidualDefinition::new(inn, Vec::new(), cur, noi)
    }

    pub fn jac_pre(&self) -> BlockJacobian {
        BlockJacobian::new(&self.inn, &self.pre)
    }

    pub fn jac_pos(&self) -> BlockJacobian {
        BlockJacobian::new(&self.inn, &self.pos)
    }

    pub fn jac_noi(&self) -> BlockJacobian {
        BlockJacobian::new(&self.inn, &self.noi)
    }
}

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub trait Residual: AsAny {
    fn definition(&self) -> &ResidualDefinition;

    /// Innovation for the given states. Pure and deterministic.
    fn eval(&self, pre: &State, pos: &State, noi: &State) -> Result<State>;

    fn jac_pre(&self, pre: &State, pos: &State, noi: &State) -> Result<DMatrix<f64>>;
    fn jac_pos(&self, pre: &State, pos: &State, noi: &State) -> Result<DMatrix<f64>>;
    fn jac_noi(&self, pre: &State, pos: &State, noi: &State) -> Result<DMatrix<f64>>;

    fn is_unary(&self) -> bool {
        self.definition().pre.is_empty()
    }

    fn jac_pre_fd(&self, pre: &State, pos: &State, noi: &State, delta: f64) -> Result<DMatrix<f64>> {
        finite_difference(pre, delta, |x| self.eval(x, pos, noi))
    }

    fn jac_pos_fd(&self, pre: &State, pos: &State, noi: &State, delta: f64) -> Result<DMatrix<f64>> {
        finite_difference(pos, delta, |x| self.eval(pre, x, noi))
    }

    fn jac_noi_fd(&self, pre: &State, pos: &State, noi: &State, delta: f64) -> Result<DMatrix<f64>> {
        finite_difference(noi, delta, |x| self.eval(pre, pos, x))
    }

    /// Checks all three analytic jacobians against finite differences, returns the largest
    /// deviation.
    fn test_jacobians(
        &self,
        pre: &State,
        pos: &State,
        noi: &State,
        delta: f64,
        tolerance: f64,
    ) -> Result<f64> {
        let def = self.definition();
        pre.check_layout(&def.pre)?;
        pos.check_layout(&def.pos)?;
        noi.check_layout(&def.noi)?;
        let e_pre = compare(
            &self.jac_pre(pre, pos, noi)?,
            &self.jac_pre_fd(pre, pos, noi, delta)?,
            tolerance,
        )?;
        let e_pos = compare(
            &self.jac_pos(pre, pos, noi)?,
            &self.jac_pos_fd(pre, pos, noi, delta)?,
            tolerance,
        )?;
        let e_noi = compare(
            &self.jac_noi(pre, pos, noi)?,
            &self.jac_noi_fd(pre, pos, noi, delta)?,
            tolerance,
        )?;
        Ok(e_pre.max(e_pos).max(e_noi))
    }
}

/// Residual on the current state only: innovation = f(cur, noi; measurement).
pub trait UnaryResidual: AsAny {
    /// `pre` must be empty, `pos` holds the current-state blocks.
    fn definition(&self) -> &ResidualDefinition;

    fn eval(&self, cur: &State, noi: &State) -> Result<State>;
    fn jac_cur(&self, cur: &State, noi: &State) -> Result<DMatrix<f64>>;
    fn jac_noi(&self, cur: &State, noi: &State) -> Result<DMatrix<f64>>;
}

impl<R: UnaryResidual> Residual for R {
    fn definition(&self) -> &ResidualDefinition {
        UnaryResidual::definition(self)
    }

    fn eval(&self, _pre: &State, pos: &State, noi: &State) -> Result<State> {
        UnaryResidual::eval(self, pos, noi)
    }

    fn jac_pre(&self, _pre: &State, _pos: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let def = UnaryResidual::definition(self);
        Ok(DMatrix::zeros(def.inn.dim(), def.pre.dim()))
    }

    fn jac_pos(&self, _pre: &State, pos: &State, noi: &State) -> Result<DMatrix<f64>> {
        UnaryResidual::jac_cur(self, pos, noi)
    }

    fn jac_noi(&self, _pre: &State, pos: &State, noi: &State) -> Result<DMatrix<f64>> {
        UnaryResidual::jac_noi(self, pos, noi)
    }
}
