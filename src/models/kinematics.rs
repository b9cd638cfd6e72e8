use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3, UnitQuaternion, Vector3};

use crate::error::{EstimationError, Result};
use crate::manifold::{so3, ElementType, State};
use crate::residual::{ResidualDefinition, UnaryResidual};

/// Forward kinematics of a legged robot.
pub trait KinematicModel {
    fn num_legs(&self) -> usize;
    fn num_dof(&self) -> usize;

    /// Foot position of `leg` relative to the base, expressed in the base frame B.
    fn forward_kinematics_base_to_foot_in_base_frame(
        &self,
        joints: &DVector<f64>,
        leg: usize,
    ) -> Vector3<f64>;
}

/// Joint encoder readings of all legs together with their contact flags.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicMeasurement {
    pub kin: Vec<DVector<f64>>,
    pub contact: Vec<bool>,
}

impl KinematicMeasurement {
    /// All legs in contact.
    pub fn new(kin: Vec<DVector<f64>>) -> KinematicMeasurement {
        let contact = vec![true; kin.len()];
        KinematicMeasurement { kin, contact }
    }

    pub fn zeros(num_legs: usize, num_dof: usize) -> KinematicMeasurement {
        KinematicMeasurement::new(vec![DVector::zeros(num_dof); num_legs])
    }
}

/// Relative foothold measurement from leg kinematics.
///
/// The footholds are stored in robocentric coordinates (frame M of the IMU) so the
/// innovation condenses to prediction minus forward kinematics:
///
/// BrBL_inn = BrBM + qMB^-1 * MrML_cur - fk(kin) + BrBL_noi
///
/// Legs out of contact pass the noise through and carry no information on the state.
pub struct LegKinematicUpdate<M: KinematicModel> {
    definition: ResidualDefinition,
    num_legs: usize,
    model: Option<Arc<M>>,
    meas: KinematicMeasurement,
    br_bm: Vector3<f64>,
    q_mb: UnitQuaternion<f64>,
}

impl<M: KinematicModel> LegKinematicUpdate<M> {
    pub fn new(
        num_legs: usize,
        error_name: &str,
        state_name: &str,
        noise_name: &str,
    ) -> Result<LegKinematicUpdate<M>> {
        let legs = ElementType::array(ElementType::Vector(3), num_legs);
        let definition = ResidualDefinition::unary(
            vec![(error_name, legs.clone())],
            vec![(state_name, legs.clone())],
            vec![(noise_name, legs)],
        )?;
        Ok(LegKinematicUpdate {
            definition,
            num_legs,
            model: None,
            meas: KinematicMeasurement::zeros(num_legs, 0),
            br_bm: Vector3::zeros(),
            q_mb: UnitQuaternion::identity(),
        })
    }

    /// Block names `BrBL` (innovation), `MrML` (state) and `BrBL` (noise).
    pub fn with_default_names(num_legs: usize) -> Result<LegKinematicUpdate<M>> {
        LegKinematicUpdate::new(num_legs, "BrBL", "MrML", "BrBL")
    }

    /// Binds the forward kinematics. The model must describe `num_legs` legs; joint
    /// vectors of the current measurement that do not fit its `num_dof` are reset to zero.
    pub fn set_model(&mut self, model: Arc<M>) -> Result<()> {
        if model.num_legs() != self.num_legs {
            return Err(EstimationError::DimensionMismatch {
                expected: self.num_legs,
                found: model.num_legs(),
            });
        }
        let num_dof = model.num_dof();
        for kin in self.meas.kin.iter_mut().filter(|kin| kin.len() != num_dof) {
            *kin = DVector::zeros(num_dof);
        }
        self.model = Some(model);
        Ok(())
    }

    pub fn set_extrinsics(&mut self, br_bm: Vector3<f64>, q_mb: UnitQuaternion<f64>) {
        self.br_bm = br_bm;
        self.q_mb = q_mb;
    }

    /// Joint readings of every leg. With a model bound each joint vector must hold
    /// `num_dof` values.
    pub fn set_measurement(&mut self, meas: KinematicMeasurement) -> Result<()> {
        for found in [meas.kin.len(), meas.contact.len()] {
            if found != self.num_legs {
                return Err(EstimationError::DimensionMismatch {
                    expected: self.num_legs,
                    found,
                });
            }
        }
        if let Some(model) = &self.model {
            let num_dof = model.num_dof();
            if let Some(kin) = meas.kin.iter().find(|kin| kin.len() != num_dof) {
                return Err(EstimationError::DimensionMismatch {
                    expected: num_dof,
                    found: kin.len(),
                });
            }
        }
        self.meas = meas;
        Ok(())
    }

    pub fn measurement(&self) -> &KinematicMeasurement {
        &self.meas
    }

    pub fn contact_flag(&self, leg: usize) -> bool {
        self.meas.contact.get(leg).copied().unwrap_or(false)
    }

    fn model(&self) -> Result<&M> {
        self.model.as_deref().ok_or(EstimationError::MissingModel)
    }

    /// Foothold in frame M as seen by the current measurement: qMB * (fk - BrBM).
    pub fn foothold_from_measurement(&self, leg: usize) -> Result<Vector3<f64>> {
        let kin = self
            .meas
            .kin
            .get(leg)
            .ok_or(EstimationError::BlockIndexOutOfRange {
                index: leg,
                len: self.num_legs,
            })?;
        let fk = self
            .model()?
            .forward_kinematics_base_to_foot_in_base_frame(kin, leg);
        Ok(self.q_mb.transform_vector(&(fk - self.br_bm)))
    }

    fn state_name(&self) -> &str {
        &self.definition.pos.entries()[0].name
    }

    fn noise_name(&self) -> &str {
        &self.definition.noi.entries()[0].name
    }
}

impl<M: KinematicModel + 'static> UnaryResidual for LegKinematicUpdate<M> {
    fn definition(&self) -> &ResidualDefinition {
        &self.definition
    }

    fn eval(&self, cur: &State, noi: &State) -> Result<State> {
        let mr_ml: Vec<Vector3<f64>> = cur.get_array(self.state_name())?;
        let br_bl_noi: Vec<Vector3<f64>> = noi.get_array(self.noise_name())?;
        let mut inn = Vec::with_capacity(self.num_legs);
        for leg in 0..self.num_legs {
            if self.contact_flag(leg) {
                let br_bl = self.br_bm + self.q_mb.inverse_transform_vector(&mr_ml[leg]);
                let fk = self
                    .model()?
                    .forward_kinematics_base_to_foot_in_base_frame(&self.meas.kin[leg], leg);
                inn.push(br_bl - fk + br_bl_noi[leg]);
            } else {
                inn.push(br_bl_noi[leg]);
            }
        }
        let mut out = self.definition.inn.new_state();
        out.set_array(&self.definition.inn.entries()[0].name, inn)?;
        Ok(out)
    }

    fn jac_cur(&self, _cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let mut j = self.definition.jac_pos();
        let r_bm = so3::rotation_matrix(&self.q_mb.inverse());
        let mut block = j.block_mut(0, 0)?;
        for leg in 0..self.num_legs {
            if self.contact_flag(leg) {
                block
                    .fixed_view_mut::<3, 3>(3 * leg, 3 * leg)
                    .copy_from(&r_bm);
            }
        }
        Ok(j.into_matrix())
    }

    fn jac_noi(&self, _cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let mut j = self.definition.jac_noi();
        let mut block = j.block_mut(0, 0)?;
        for leg in 0..self.num_legs {
            block
                .fixed_view_mut::<3, 3>(3 * leg, 3 * leg)
                .copy_from(&Matrix3::identity());
        }
        Ok(j.into_matrix())
    }
}
