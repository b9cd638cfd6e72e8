mod camera;
mod extrinsics;
mod kinematics;
mod motion;

pub use camera::{Camera, DistortionModel, PixelUpdate};
pub use extrinsics::ExtrinsicTransformation;
pub use kinematics::{KinematicMeasurement, KinematicModel, LegKinematicUpdate};
pub use motion::{AttitudeResidual, VelocityResidual};
