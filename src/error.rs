use thiserror::Error;

use crate::manifold::ElementType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    #[error("block name registered twice: {0}")]
    DuplicateName(String),

    #[error("block name not found: {0}")]
    NameNotFound(String),

    #[error("type mismatch for block {name}: expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: ElementType,
        found: ElementType,
    },

    #[error("block {name} declared as {existing} and as {requested}")]
    IncompatibleBlock {
        name: String,
        existing: ElementType,
        requested: ElementType,
    },

    #[error("state does not conform to the expected layout")]
    LayoutMismatch,

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("block index {index} out of range ({len} blocks)")]
    BlockIndexOutOfRange { index: usize, len: usize },

    #[error("no kinematic model bound")]
    MissingModel,

    #[error("numeric failure: {0}")]
    Numeric(String),

    #[error("analytic jacobian differs from finite differences by {max_error} (tolerance {tolerance})")]
    JacobianMismatch { max_error: f64, tolerance: f64 },
}

impl EstimationError {
    /// Evaluation-time failures mean "no contribution" for one measurement, everything
    /// else is a setup error.
    pub fn is_numeric(&self) -> bool {
        matches!(self, EstimationError::Numeric(_))
    }
}

pub type Result<T> = std::result::Result<T, EstimationError>;

/// Checks a `(rows, cols)` shape, reporting the first dimension that differs.
pub(crate) fn check_shape(expected: (usize, usize), found: (usize, usize)) -> Result<()> {
    let (expected, found) = if expected.0 != found.0 {
        (expected.0, found.0)
    } else if expected.1 != found.1 {
        (expected.1, found.1)
    } else {
        return Ok(());
    };
    Err(EstimationError::DimensionMismatch { expected, found })
}
