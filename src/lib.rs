//! Estimation substrate on manifolds: typed state layouts, residuals with checked jacobians,
//! filter assembly and a bounded history window for sliding-window estimation.

pub mod error;
pub mod filter;
pub mod manifold;
pub mod models;
pub mod residual;
pub mod transformation;
pub mod utils;
pub mod window;

pub use error::{EstimationError, Result};
pub use filter::{Filter, InformationSystem, Linearization, ResidualId};
pub use manifold::{Element, ElementType, ElementValue, Layout, State};
pub use residual::{Residual, ResidualDefinition, UnaryResidual};
pub use transformation::{BlockJacobian, Transformation};
pub use utils::time::{Duration, TimePoint};
pub use window::{Moment, Window, WindowConfig};
