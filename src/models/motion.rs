use nalgebra::{DMatrix, Matrix3, UnitQuaternion, Vector3};

use crate::error::Result;
use crate::manifold::{so3, ElementType, State};
use crate::residual::{Residual, ResidualDefinition};

/// Constant velocity position propagation.
///
/// inn = pos_pre + dt * vel_pre - pos_pos + noi
pub struct VelocityResidual {
    definition: ResidualDefinition,
    dt: f64,
}

impl VelocityResidual {
    pub fn new(dt: f64) -> Result<VelocityResidual> {
        let definition = ResidualDefinition::new(
            vec![("pos", ElementType::Vector(3))],
            vec![("pos", ElementType::Vector(3)), ("vel", ElementType::Vector(3))],
            vec![("pos", ElementType::Vector(3))],
            vec![("pos", ElementType::Vector(3))],
        )?;
        Ok(VelocityResidual { definition, dt })
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}

impl Residual for VelocityResidual {
    fn definition(&self) -> &ResidualDefinition {
        &self.definition
    }

    fn eval(&self, pre: &State, pos: &State, noi: &State) -> Result<State> {
        let pos_pre: Vector3<f64> = pre.get("pos")?;
        let vel_pre: Vector3<f64> = pre.get("vel")?;
        let pos_pos: Vector3<f64> = pos.get("pos")?;
        let pos_noi: Vector3<f64> = noi.get("pos")?;
        self.definition
            .inn
            .new_state()
            .with("pos", pos_pre + self.dt * vel_pre - pos_pos + pos_noi)
    }

    fn jac_pre(&self, _pre: &State, _pos: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let mut j = self.definition.jac_pre();
        j.set_block(0, 0, &Matrix3::<f64>::identity())?;
        j.set_block(0, 1, &(self.dt * Matrix3::<f64>::identity()))?;
        Ok(j.into_matrix())
    }

    fn jac_pos(&self, _pre: &State, _pos: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let mut j = self.definition.jac_pos();
        j.set_block(0, 0, &(-Matrix3::<f64>::identity()))?;
        Ok(j.into_matrix())
    }

    fn jac_noi(&self, _pre: &State, _pos: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let mut j = self.definition.jac_noi();
        j.set_block(0, 0, &Matrix3::<f64>::identity())?;
        Ok(j.into_matrix())
    }
}

/// Attitude propagation with a body-frame angular rate measurement.
///
/// inn = Log(att_pos * (att_pre * Exp(dt * rate))^-1) + noi
pub struct AttitudeResidual {
    definition: ResidualDefinition,
    dt: f64,
    rate: Vector3<f64>,
}

impl AttitudeResidual {
    pub fn new(dt: f64) -> Result<AttitudeResidual> {
        let definition = ResidualDefinition::new(
            vec![("att", ElementType::Vector(3))],
            vec![("att", ElementType::Rotation)],
            vec![("att", ElementType::Rotation)],
            vec![("att", ElementType::Vector(3))],
        )?;
        Ok(AttitudeResidual {
            definition,
            dt,
            rate: Vector3::zeros(),
        })
    }

    pub fn set_measurement(&mut self, rate: Vector3<f64>) {
        self.rate = rate;
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    /// att_pos * att_predicted^-1, with att_predicted = att_pre * Exp(dt * rate)
    fn error_rotation(&self, pre: &State, pos: &State) -> Result<UnitQuaternion<f64>> {
        let att_pre: UnitQuaternion<f64> = pre.get("att")?;
        let att_pos: UnitQuaternion<f64> = pos.get("att")?;
        let predicted = att_pre * so3::exp(&(self.dt * self.rate));
        Ok(att_pos * predicted.inverse())
    }
}

impl Residual for AttitudeResidual {
    fn definition(&self) -> &ResidualDefinition {
        &self.definition
    }

    fn eval(&self, pre: &State, pos: &State, noi: &State) -> Result<State> {
        let error = so3::log(&self.error_rotation(pre, pos)?);
        let att_noi: Vector3<f64> = noi.get("att")?;
        self.definition.inn.new_state().with("att", error + att_noi)
    }

    fn jac_pre(&self, pre: &State, pos: &State, _noi: &State) -> Result<DMatrix<f64>> {
        // perturbing att_pre on the left gives E * Exp(-d) = Exp(-R(E) d) * E
        let error_rotation = self.error_rotation(pre, pos)?;
        let error = so3::log(&error_rotation);
        let mut j = self.definition.jac_pre();
        j.set_block(
            0,
            0,
            &(-so3::left_jacobian_inverse(&error) * so3::rotation_matrix(&error_rotation)),
        )?;
        Ok(j.into_matrix())
    }

    fn jac_pos(&self, pre: &State, pos: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let error = so3::log(&self.error_rotation(pre, pos)?);
        let mut j = self.definition.jac_pos();
        j.set_block(0, 0, &so3::left_jacobian_inverse(&error))?;
        Ok(j.into_matrix())
    }

    fn jac_noi(&self, _pre: &State, _pos: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let mut j = self.definition.jac_noi();
        j.set_block(0, 0, &Matrix3::<f64>::identity())?;
        Ok(j.into_matrix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformation::{FD_DELTA, JACOBIAN_TOLERANCE};
    use nalgebra::DVector;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn random_state(state: &State, rng: &mut StdRng) -> State {
        let normal = Normal::new(0.0, 0.5).unwrap();
        let v = DVector::from_fn(state.dim(), |_, _| normal.sample(rng));
        state.boxplus(&v).unwrap()
    }

    #[test]
    fn velocity_innovation() {
        let r = VelocityResidual::new(0.1).unwrap();
        let def = r.definition();
        let pre = def
            .pre
            .new_state()
            .with("vel", Vector3::new(1.0, 0.0, 0.0))
            .unwrap();
        let noi = def.noi.new_state();

        let pos = def
            .pos
            .new_state()
            .with("pos", Vector3::new(0.1, 0.0, 0.0))
            .unwrap();
        let inn = r.eval(&pre, &pos, &noi).unwrap();
        approx::assert_abs_diff_eq!(
            inn.get::<Vector3<f64>>("pos").unwrap(),
            Vector3::zeros(),
            epsilon = 1e-15
        );

        let pos = def.pos.new_state();
        let inn = r.eval(&pre, &pos, &noi).unwrap();
        approx::assert_abs_diff_eq!(
            inn.get::<Vector3<f64>>("pos").unwrap(),
            Vector3::new(0.1, 0.0, 0.0),
            epsilon = 1e-15
        );
    }

    #[test]
    fn velocity_jacobians() {
        let r = VelocityResidual::new(0.1).unwrap();
        let def = r.definition();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..5 {
            let pre = random_state(&def.pre.new_state(), &mut rng);
            let pos = random_state(&def.pos.new_state(), &mut rng);
            let noi = random_state(&def.noi.new_state(), &mut rng);
            r.test_jacobians(&pre, &pos, &noi, FD_DELTA, JACOBIAN_TOLERANCE)
                .unwrap();
        }
        let pre = def.pre.new_state();
        let j = r.jac_pre(&pre, &def.pos.new_state(), &def.noi.new_state()).unwrap();
        assert_eq!(j.shape(), (3, 6));
        assert_eq!(j[(0, 3)], 0.1);
    }

    #[test]
    fn attitude_innovation_vanishes_on_prediction() {
        let mut r = AttitudeResidual::new(0.05).unwrap();
        let rate = Vector3::new(0.4, -0.1, 1.2);
        r.set_measurement(rate);
        let def = r.definition();
        let att_pre = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let pre = def.pre.new_state().with("att", att_pre).unwrap();
        let pos = def
            .pos
            .new_state()
            .with("att", att_pre * so3::exp(&(0.05 * rate)))
            .unwrap();
        let inn = r.eval(&pre, &pos, &def.noi.new_state()).unwrap();
        approx::assert_abs_diff_eq!(
            inn.get::<Vector3<f64>>("att").unwrap(),
            Vector3::zeros(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn attitude_jacobians() {
        let mut r = AttitudeResidual::new(0.05).unwrap();
        r.set_measurement(Vector3::new(0.4, -0.1, 1.2));
        let mut rng = StdRng::seed_from_u64(2);
        let def = r.definition().clone();
        for _ in 0..5 {
            let pre = random_state(&def.pre.new_state(), &mut rng);
            let pos = random_state(&def.pos.new_state(), &mut rng);
            let noi = random_state(&def.noi.new_state(), &mut rng);
            r.test_jacobians(&pre, &pos, &noi, FD_DELTA, JACOBIAN_TOLERANCE)
                .unwrap();
        }
    }
}
