//! Assembly facade over a fixed set of residuals sharing one state layout.
//!
//! The filter owns its residuals, derives the state layout as the merge of every residual's
//! predecessor and successor blocks and stacks their innovations and jacobians for an
//! outer solver. It performs no optimization itself.

mod linearization;

use std::sync::Arc;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::error::{check_shape, EstimationError, Result};
use crate::manifold::{Layout, State};
use crate::residual::Residual;

use linearization::Contribution;
pub use linearization::{InformationSystem, Linearization};

/// Handle of a residual registered with [`Filter::add_res`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResidualId(usize);

impl ResidualId {
    pub fn index(&self) -> usize {
        self.0
    }
}

struct Registered {
    residual: Box<dyn Residual>,
    noise_cov: DMatrix<f64>,
}

pub struct Filter {
    layout: Arc<Layout>,
    residuals: Vec<Registered>,
}

impl Default for Filter {
    fn default() -> Self {
        Filter::new()
    }
}

impl Filter {
    pub fn new() -> Filter {
        Filter {
            layout: Layout::empty(),
            residuals: Vec::new(),
        }
    }

    /// Registers a residual and extends the state layout with its blocks. Nothing changes
    /// if one of its blocks conflicts with an already registered one.
    pub fn add_res<R: Residual>(&mut self, residual: R) -> Result<ResidualId> {
        self.add_boxed(Box::new(residual))
    }

    pub fn add_boxed(&mut self, residual: Box<dyn Residual>) -> Result<ResidualId> {
        let def = residual.definition();
        let merged = self.layout.merge(&def.pre)?.merge(&def.pos)?;
        let noi_dim = def.noi.dim();
        let id = ResidualId(self.residuals.len());
        debug!(
            "residual {} added, state dimension {} -> {}",
            id.0,
            self.layout.dim(),
            merged.dim()
        );
        self.layout = Arc::new(merged);
        self.residuals.push(Registered {
            residual,
            noise_cov: DMatrix::identity(noi_dim, noi_dim),
        });
        Ok(id)
    }

    /// Merged layout of all registered residuals, used for both the predecessor and the
    /// successor state.
    pub fn state_definition(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn new_state(&self) -> State {
        self.layout.new_state()
    }

    pub fn len(&self) -> usize {
        self.residuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residuals.is_empty()
    }

    fn registered(&self, id: ResidualId) -> Result<&Registered> {
        self.residuals
            .get(id.0)
            .ok_or(EstimationError::BlockIndexOutOfRange {
                index: id.0,
                len: self.residuals.len(),
            })
    }

    fn registered_mut(&mut self, id: ResidualId) -> Result<&mut Registered> {
        let len = self.residuals.len();
        self.residuals
            .get_mut(id.0)
            .ok_or(EstimationError::BlockIndexOutOfRange { index: id.0, len })
    }

    pub fn residual_dyn(&self, id: ResidualId) -> Result<&dyn Residual> {
        Ok(self.registered(id)?.residual.as_ref())
    }

    /// Concrete residual behind `id`, `None` if it has another type.
    pub fn residual<R: Residual>(&self, id: ResidualId) -> Option<&R> {
        self.residuals
            .get(id.0)?
            .residual
            .as_ref()
            .as_any()
            .downcast_ref::<R>()
    }

    /// Mutable access, e.g. to set the next measurement.
    pub fn residual_mut<R: Residual>(&mut self, id: ResidualId) -> Option<&mut R> {
        self.residuals
            .get_mut(id.0)?
            .residual
            .as_mut()
            .as_any_mut()
            .downcast_mut::<R>()
    }

    /// Covariance of the noise blocks of residual `id`, identity until set.
    pub fn set_noise_covariance(&mut self, id: ResidualId, cov: DMatrix<f64>) -> Result<()> {
        let registered = self.registered_mut(id)?;
        let dim = registered.residual.definition().noi.dim();
        check_shape((dim, dim), cov.shape())?;
        registered.noise_cov = cov;
        Ok(())
    }

    pub fn noise_covariance(&self, id: ResidualId) -> Result<&DMatrix<f64>> {
        Ok(&self.registered(id)?.noise_cov)
    }

    /// Evaluates every residual at (`pre`, `post`) with zero noise and stacks the result.
    ///
    /// A residual failing with a numeric error (or producing non-finite values) is left
    /// out and listed in [`Linearization::skipped`]. Any other error aborts.
    pub fn eval_res(&self, pre: &State, post: &State) -> Result<Linearization> {
        pre.check_layout(&self.layout)?;
        post.check_layout(&self.layout)?;

        let mut contributions = Vec::with_capacity(self.residuals.len());
        let mut skipped = Vec::new();
        for (index, registered) in self.residuals.iter().enumerate() {
            let id = ResidualId(index);
            match self.linearize(id, registered, pre, post) {
                Ok(contribution) => contributions.push(contribution),
                Err(e) if e.is_numeric() => {
                    warn!("residual {index} skipped: {e}");
                    skipped.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Linearization::assemble(
            self.layout.dim(),
            &contributions,
            skipped,
        ))
    }

    fn linearize(
        &self,
        id: ResidualId,
        registered: &Registered,
        pre: &State,
        post: &State,
    ) -> Result<Contribution> {
        let residual = registered.residual.as_ref();
        let def = residual.definition();
        let pre = pre.project(&def.pre)?;
        let pos = post.project(&def.pos)?;
        let noi = def.noi.new_state();

        let inn = residual.eval(&pre, &pos, &noi)?;
        inn.check_layout(&def.inn)?;
        if !inn.is_finite() {
            return Err(EstimationError::Numeric(format!("non-finite innovation\n{inn}")));
        }
        let innovation = inn.boxminus(&def.inn.new_state())?;

        let jac_pre = residual.jac_pre(&pre, &pos, &noi)?;
        let jac_pos = residual.jac_pos(&pre, &pos, &noi)?;
        let jac_noi = residual.jac_noi(&pre, &pos, &noi)?;
        check_shape((def.inn.dim(), def.pre.dim()), jac_pre.shape())?;
        check_shape((def.inn.dim(), def.pos.dim()), jac_pos.shape())?;
        check_shape((def.inn.dim(), def.noi.dim()), jac_noi.shape())?;
        if !(is_finite(&jac_pre) && is_finite(&jac_pos) && is_finite(&jac_noi)) {
            return Err(EstimationError::Numeric("non-finite jacobian entry".to_string()));
        }

        Ok(Contribution {
            id,
            innovation,
            jac_pre: self.scatter(&jac_pre, &def.pre)?,
            jac_pos: self.scatter(&jac_pos, &def.pos)?,
            jac_noi,
            noise_cov: registered.noise_cov.clone(),
        })
    }

    /// Moves the columns of a residual-local jacobian to the offsets of the same blocks in
    /// the filter state.
    fn scatter(&self, local: &DMatrix<f64>, layout: &Layout) -> Result<DMatrix<f64>> {
        let mut global = DMatrix::zeros(local.nrows(), self.layout.dim());
        for entry in layout.entries() {
            let target = self.layout.entry_by_name(&entry.name)?;
            global
                .columns_mut(target.offset, entry.dim())
                .copy_from(&local.columns(entry.offset, entry.dim()));
        }
        Ok(global)
    }

    /// Innovation vector only, skipping the jacobians.
    pub fn innovation(&self, pre: &State, post: &State) -> Result<DVector<f64>> {
        Ok(self.eval_res(pre, post)?.innovation)
    }
}

fn is_finite(j: &DMatrix<f64>) -> bool {
    j.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::ElementType;
    use crate::models::{AttitudeResidual, Camera, PixelUpdate, VelocityResidual};
    use crate::residual::{ResidualDefinition, UnaryResidual};
    use nalgebra::{Vector2, Vector3};

    /// Direct observation of the velocity: inn = vel - z + noi
    struct VelocityUpdate {
        definition: ResidualDefinition,
        z: Vector3<f64>,
    }

    impl VelocityUpdate {
        fn new(z: Vector3<f64>) -> VelocityUpdate {
            VelocityUpdate {
                definition: ResidualDefinition::unary(
                    vec![("vel", ElementType::Vector(3))],
                    vec![("vel", ElementType::Vector(3))],
                    vec![("vel", ElementType::Vector(3))],
                )
                .unwrap(),
                z,
            }
        }
    }

    impl UnaryResidual for VelocityUpdate {
        fn definition(&self) -> &ResidualDefinition {
            &self.definition
        }

        fn eval(&self, cur: &State, noi: &State) -> Result<State> {
            let vel: Vector3<f64> = cur.get("vel")?;
            let n: Vector3<f64> = noi.get("vel")?;
            self.definition.inn.new_state().with("vel", vel - self.z + n)
        }

        fn jac_cur(&self, _cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
            Ok(DMatrix::identity(3, 3))
        }

        fn jac_noi(&self, _cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
            Ok(DMatrix::identity(3, 3))
        }
    }

    fn filter() -> (Filter, ResidualId, ResidualId) {
        let mut filter = Filter::new();
        let velocity = filter.add_res(VelocityResidual::new(0.1).unwrap()).unwrap();
        let update = filter
            .add_res(VelocityUpdate::new(Vector3::new(1.0, 0.0, 0.0)))
            .unwrap();
        (filter, velocity, update)
    }

    #[test]
    fn layout_is_merged_from_residuals() {
        let (mut filter, _, _) = filter();
        assert_eq!(filter.len(), 2);
        let layout = filter.state_definition();
        assert_eq!(layout.dim(), 6);
        assert_eq!(layout.entry_by_name("pos").unwrap().offset, 0);
        assert_eq!(layout.entry_by_name("vel").unwrap().offset, 3);

        filter.add_res(AttitudeResidual::new(0.1).unwrap()).unwrap();
        assert_eq!(filter.state_definition().dim(), 9);
    }

    #[test]
    fn conflicting_blocks_are_rejected() {
        let (mut filter, _, _) = filter();
        let before = Arc::clone(filter.state_definition());

        struct RotatedVel(ResidualDefinition);
        impl UnaryResidual for RotatedVel {
            fn definition(&self) -> &ResidualDefinition {
                &self.0
            }
            fn eval(&self, _cur: &State, _noi: &State) -> Result<State> {
                Ok(self.0.inn.new_state())
            }
            fn jac_cur(&self, _cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
                Ok(self.0.jac_pos().into_matrix())
            }
            fn jac_noi(&self, _cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
                Ok(self.0.jac_noi().into_matrix())
            }
        }
        let conflicting = RotatedVel(
            ResidualDefinition::unary(
                vec![("vel", ElementType::Vector(3))],
                vec![("vel", ElementType::Rotation)],
                vec![("vel", ElementType::Vector(3))],
            )
            .unwrap(),
        );
        assert!(matches!(
            filter.add_res(conflicting),
            Err(EstimationError::IncompatibleBlock { .. })
        ));
        assert_eq!(filter.len(), 2);
        assert_eq!(**filter.state_definition(), *before);
    }

    #[test]
    fn eval_res_stacks_innovations_and_jacobians() {
        let (filter, velocity, update) = filter();
        let pre = filter
            .new_state()
            .with("vel", Vector3::new(1.0, 0.0, 0.0))
            .unwrap();
        let post = filter.new_state();

        let lin = filter.eval_res(&pre, &post).unwrap();
        assert!(lin.skipped.is_empty());
        assert_eq!(lin.innovation.len(), 6);
        assert_eq!(lin.jac_pre.shape(), (6, 6));
        assert_eq!(lin.jac_pos.shape(), (6, 6));
        assert_eq!(lin.jac_noi, DMatrix::identity(6, 6));

        let rows = lin.rows_of(velocity).unwrap();
        approx::assert_abs_diff_eq!(
            lin.innovation.fixed_rows::<3>(rows.start).into_owned(),
            Vector3::new(0.1, 0.0, 0.0),
            epsilon = 1e-15
        );
        // d(inn)/d(vel_pre) = dt * I
        assert_eq!(lin.jac_pre[(rows.start, 3)], 0.1);
        assert_eq!(lin.jac_pos[(rows.start, 0)], -1.0);

        // unary update reads the post state only
        let rows = lin.rows_of(update).unwrap();
        approx::assert_abs_diff_eq!(
            lin.innovation.fixed_rows::<3>(rows.start).into_owned(),
            Vector3::new(-1.0, 0.0, 0.0),
            epsilon = 1e-15
        );
        assert_eq!(lin.jac_pre.rows(rows.start, 3).amax(), 0.0);
        assert_eq!(lin.jac_pos[(rows.start + 2, 5)], 1.0);
    }

    #[test]
    fn residual_access_and_noise() {
        let (mut filter, velocity, update) = filter();
        assert!(filter.residual::<VelocityResidual>(update).is_none());
        filter
            .residual_mut::<VelocityResidual>(velocity)
            .unwrap()
            .set_dt(0.5);
        assert_eq!(filter.residual::<VelocityResidual>(velocity).unwrap().dt(), 0.5);
        assert!(filter.residual_dyn(ResidualId(7)).is_err());

        assert!(filter
            .set_noise_covariance(velocity, DMatrix::identity(2, 2))
            .is_err());
        assert_eq!(
            filter.set_noise_covariance(velocity, DMatrix::zeros(3, 2)),
            Err(EstimationError::DimensionMismatch {
                expected: 3,
                found: 2
            })
        );
        filter
            .set_noise_covariance(velocity, DMatrix::identity(3, 3) * 0.01)
            .unwrap();
        filter
            .set_noise_covariance(update, DMatrix::identity(3, 3) * 0.04)
            .unwrap();

        let state = filter.new_state();
        let lin = filter.eval_res(&state, &state).unwrap();
        assert_eq!(lin.noise_cov[(0, 0)], 0.01);
        assert_eq!(lin.noise_cov[(5, 5)], 0.04);

        let system = lin.information_system().unwrap();
        assert_eq!(system.h.shape(), (12, 12));
        approx::assert_abs_diff_eq!(system.h, system.h.transpose(), epsilon = 1e-9);
        // pos_post only appears in the velocity residual: H = 1 / 0.01
        approx::assert_abs_diff_eq!(system.h[(6, 6)], 100.0, epsilon = 1e-9);
        // vel_post is observed with b = inn / 0.04
        approx::assert_abs_diff_eq!(system.b[9], -25.0, epsilon = 1e-9);
    }

    #[test]
    fn numeric_failures_are_skipped() {
        let mut filter = Filter::new();
        let pixel = filter
            .add_res(PixelUpdate::new(Camera::default(), "landmark").unwrap())
            .unwrap();
        let velocity = filter.add_res(VelocityResidual::new(0.1).unwrap()).unwrap();
        filter
            .residual_mut::<PixelUpdate>(pixel)
            .unwrap()
            .set_measurement(Vector2::new(0.1, 0.1));

        let pre = filter.new_state();
        let behind = filter
            .new_state()
            .with("landmark", Vector3::new(0.0, 0.0, -1.0))
            .unwrap();
        let lin = filter.eval_res(&pre, &behind).unwrap();
        assert_eq!(lin.skipped, vec![pixel]);
        assert!(lin.rows_of(pixel).is_none());
        assert_eq!(lin.rows_of(velocity), Some(0..3));
        assert_eq!(lin.jac_noi.shape(), (3, 3));

        let in_front = filter
            .new_state()
            .with("landmark", Vector3::new(0.0, 0.0, 2.0))
            .unwrap();
        let lin = filter.eval_res(&pre, &in_front).unwrap();
        assert!(lin.skipped.is_empty());
        assert_eq!(lin.innovation.len(), 5);
        approx::assert_abs_diff_eq!(lin.innovation[0], -0.1, epsilon = 1e-12);
    }

    #[test]
    fn states_of_another_layout_are_rejected() {
        let (filter, _, _) = filter();
        let other = Layout::shared([("att", ElementType::Rotation)])
            .unwrap()
            .new_state();
        assert_eq!(
            filter.eval_res(&other, &filter.new_state()).unwrap_err(),
            EstimationError::LayoutMismatch
        );
    }
}
