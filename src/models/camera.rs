use nalgebra::{DMatrix, Matrix2, Matrix2x3, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{EstimationError, Result};
use crate::manifold::{ElementType, State};
use crate::residual::{ResidualDefinition, UnaryResidual};

const MIN_DEPTH: f64 = 1e-8;
const UNDISTORT_MAX_ITER: usize = 100;
const UNDISTORT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistortionModel {
    #[default]
    None,
    /// Radial-tangential (plumb bob).
    Radtan,
    /// Equidistant fisheye.
    Equidist,
}

/// Pinhole camera with lens distortion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    /// Intrinsics, only fx, fy, cx, cy are used.
    pub k: Matrix3<f64>,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub p1: f64,
    pub p2: f64,
    pub distortion: DistortionModel,
}

impl Default for Camera {
    fn default() -> Self {
        Camera {
            k: Matrix3::identity(),
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            k4: 0.0,
            p1: 0.0,
            p2: 0.0,
            distortion: DistortionModel::None,
        }
    }
}

impl Camera {
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Camera {
        #[rustfmt::skip]
        let k = Matrix3::new(
            fx, 0.0, cx,
            0.0, fy, cy,
            0.0, 0.0, 1.0
        );
        Camera {
            k,
            ..Default::default()
        }
    }

    pub fn radtan(mut self, k1: f64, k2: f64, k3: f64, p1: f64, p2: f64) -> Camera {
        self.distortion = DistortionModel::Radtan;
        (self.k1, self.k2, self.k3, self.p1, self.p2) = (k1, k2, k3, p1, p2);
        self
    }

    pub fn equidist(mut self, k1: f64, k2: f64, k3: f64, k4: f64) -> Camera {
        self.distortion = DistortionModel::Equidist;
        (self.k1, self.k2, self.k3, self.k4) = (k1, k2, k3, k4);
        self
    }

    fn distort_radtan(&self, p: &Vector2<f64>) -> (Vector2<f64>, Matrix2<f64>) {
        let (x, y) = (p.x, p.y);
        let x2 = x * x;
        let y2 = y * y;
        let xy = x * y;
        let r2 = x2 + y2;
        let kr = 1.0 + ((self.k3 * r2 + self.k2) * r2 + self.k1) * r2;
        let out = Vector2::new(
            x * kr + self.p1 * 2.0 * xy + self.p2 * (r2 + 2.0 * x2),
            y * kr + self.p1 * (r2 + 2.0 * y2) + self.p2 * 2.0 * xy,
        );
        let radial = 2.0 * self.k1 + 4.0 * self.k2 * r2 + 6.0 * self.k3 * r2 * r2;
        let off = radial * xy + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        #[rustfmt::skip]
        let j = Matrix2::new(
            kr + radial * x2 + 2.0 * self.p1 * y + 6.0 * self.p2 * x, off,
            off, kr + radial * y2 + 6.0 * self.p1 * y + 2.0 * self.p2 * x
        );
        (out, j)
    }

    fn distort_equidist(&self, p: &Vector2<f64>) -> (Vector2<f64>, Matrix2<f64>) {
        let r = p.norm();
        if r < MIN_DEPTH {
            return (*p, Matrix2::identity());
        }
        let r_x = p.x / r;
        let r_y = p.y / r;

        let th = r.atan();
        let th_r = 1.0 / (r * r + 1.0);
        let th2 = th * th;
        let th4 = th2 * th2;
        let th6 = th2 * th4;
        let th8 = th2 * th6;
        let thd = th * (1.0 + self.k1 * th2 + self.k2 * th4 + self.k3 * th6 + self.k4 * th8);
        let thd_th = 1.0
            + 3.0 * self.k1 * th2
            + 5.0 * self.k2 * th4
            + 7.0 * self.k3 * th6
            + 9.0 * self.k4 * th8;
        let s = thd / r;
        let s_r = thd_th * th_r / r - thd / (r * r);

        #[rustfmt::skip]
        let j = Matrix2::new(
            s + p.x * s_r * r_x, p.x * s_r * r_y,
            p.y * s_r * r_x, s + p.y * s_r * r_y
        );
        (p * s, j)
    }

    /// Distorted normalized coordinates and their 2x2 jacobian.
    pub fn distort(&self, p: &Vector2<f64>) -> (Vector2<f64>, Matrix2<f64>) {
        match self.distortion {
            DistortionModel::None => (*p, Matrix2::identity()),
            DistortionModel::Radtan => self.distort_radtan(p),
            DistortionModel::Equidist => self.distort_equidist(p),
        }
    }

    /// Projects a bearing (or point) in camera coordinates to a pixel. `None` if the point
    /// is not in front of the camera.
    pub fn bearing_to_pixel(&self, vec: &Vector3<f64>) -> Option<Vector2<f64>> {
        self.bearing_to_pixel_with_jacobian(vec).map(|(c, _)| c)
    }

    pub fn bearing_to_pixel_with_jacobian(
        &self,
        vec: &Vector3<f64>,
    ) -> Option<(Vector2<f64>, Matrix2x3<f64>)> {
        if vec.z <= MIN_DEPTH {
            return None;
        }
        let undistorted = Vector2::new(vec.x / vec.z, vec.y / vec.z);
        #[rustfmt::skip]
        let j_project = Matrix2x3::new(
            1.0 / vec.z, 0.0, -vec.x / (vec.z * vec.z),
            0.0, 1.0 / vec.z, -vec.y / (vec.z * vec.z)
        );

        let (distorted, j_distort) = self.distort(&undistorted);

        let c = Vector2::new(
            self.k[(0, 0)] * distorted.x + self.k[(0, 2)],
            self.k[(1, 1)] * distorted.y + self.k[(1, 2)],
        );
        let j_scale = Matrix2::new(self.k[(0, 0)], 0.0, 0.0, self.k[(1, 1)]);
        Some((c, j_scale * j_distort * j_project))
    }

    /// Unit bearing of a pixel. The distortion is inverted with Gauss-Newton, `None` when it
    /// does not converge.
    pub fn pixel_to_bearing(&self, c: &Vector2<f64>) -> Option<Vector3<f64>> {
        let y = Vector2::new(
            (c.x - self.k[(0, 2)]) / self.k[(0, 0)],
            (c.y - self.k[(1, 2)]) / self.k[(1, 1)],
        );

        let mut ybar = y;
        for _ in 0..UNDISTORT_MAX_ITER {
            let (y_tmp, j) = self.distort(&ybar);
            let e = y - y_tmp;
            if e.dot(&e) <= UNDISTORT_TOLERANCE * UNDISTORT_TOLERANCE {
                return Some(Vector3::new(ybar.x, ybar.y, 1.0).normalize());
            }
            let du = (j.transpose() * j).try_inverse()? * j.transpose() * e;
            ybar += du;
        }
        None
    }
}

/// Reprojection of a landmark given in camera coordinates.
///
/// pix_inn = pi(landmark) - pix_meas + pix_noi
pub struct PixelUpdate {
    definition: ResidualDefinition,
    camera: Camera,
    pixel: Vector2<f64>,
}

impl PixelUpdate {
    pub fn new(camera: Camera, landmark_name: &str) -> Result<PixelUpdate> {
        let definition = ResidualDefinition::unary(
            vec![("pix", ElementType::Vector(2))],
            vec![(landmark_name, ElementType::Vector(3))],
            vec![("pix", ElementType::Vector(2))],
        )?;
        Ok(PixelUpdate {
            definition,
            camera,
            pixel: Vector2::zeros(),
        })
    }

    pub fn set_measurement(&mut self, pixel: Vector2<f64>) {
        self.pixel = pixel;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    fn landmark(&self, cur: &State) -> Result<Vector3<f64>> {
        cur.get(&self.definition.pos.entries()[0].name)
    }

    fn project(&self, landmark: &Vector3<f64>) -> Result<(Vector2<f64>, Matrix2x3<f64>)> {
        self.camera
            .bearing_to_pixel_with_jacobian(landmark)
            .ok_or_else(|| EstimationError::Numeric(format!("landmark behind camera: {landmark:?}")))
    }
}

impl UnaryResidual for PixelUpdate {
    fn definition(&self) -> &ResidualDefinition {
        &self.definition
    }

    fn eval(&self, cur: &State, noi: &State) -> Result<State> {
        let (pixel, _) = self.project(&self.landmark(cur)?)?;
        let pix_noi: Vector2<f64> = noi.get("pix")?;
        self.definition
            .inn
            .new_state()
            .with("pix", pixel - self.pixel + pix_noi)
    }

    fn jac_cur(&self, cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let (_, j_project) = self.project(&self.landmark(cur)?)?;
        let mut j = self.definition.jac_pos();
        j.set_block(0, 0, &j_project)?;
        Ok(j.into_matrix())
    }

    fn jac_noi(&self, _cur: &State, _noi: &State) -> Result<DMatrix<f64>> {
        let mut j = self.definition.jac_noi();
        j.set_block(0, 0, &Matrix2::<f64>::identity())?;
        Ok(j.into_matrix())
    }
}
