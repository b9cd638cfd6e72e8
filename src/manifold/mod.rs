//! Manifold-valued state blocks.
//!
//! An [`Element`] is one value living on a manifold (scalar, vector, rotation or a fixed
//! size array of those). A [`Layout`] is the ordered, name-keyed schema of elements and a
//! [`State`] is one instance of a layout. Every element exposes a retraction (`boxplus`) and
//! its inverse (`boxminus`); states compose them block-wise in layout order.

mod layout;
pub mod so3;
mod state;

use std::fmt;

use nalgebra::{DVector, SVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{EstimationError, Result};

pub use layout::{Layout, LayoutEntry};
pub use state::State;

/// Type tag of a manifold element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Scalar,
    Vector(usize),
    Rotation,
    Array(Box<ElementType>, usize),
}

impl ElementType {
    pub fn array(element: ElementType, len: usize) -> ElementType {
        ElementType::Array(Box::new(element), len)
    }

    /// Tangent space dimension.
    pub fn dim(&self) -> usize {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vector(n) => *n,
            ElementType::Rotation => 3,
            ElementType::Array(element, len) => element.dim() * len,
        }
    }

    pub fn identity(&self) -> Element {
        match self {
            ElementType::Scalar => Element::Scalar(0.0),
            ElementType::Vector(n) => Element::Vector(DVector::zeros(*n)),
            ElementType::Rotation => Element::Rotation(UnitQuaternion::identity()),
            ElementType::Array(element, len) => {
                Element::Array((0..*len).map(|_| element.identity()).collect())
            }
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Scalar => write!(f, "scalar"),
            ElementType::Vector(n) => write!(f, "vec{n}"),
            ElementType::Rotation => write!(f, "rotation"),
            ElementType::Array(element, len) => write!(f, "[{element}; {len}]"),
        }
    }
}

/// Live value of a manifold element.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Scalar(f64),
    Vector(DVector<f64>),
    Rotation(UnitQuaternion<f64>),
    Array(Vec<Element>),
}

impl Element {
    pub fn conforms_to(&self, ty: &ElementType) -> bool {
        match (self, ty) {
            (Element::Scalar(_), ElementType::Scalar) => true,
            (Element::Vector(v), ElementType::Vector(n)) => v.len() == *n,
            (Element::Rotation(_), ElementType::Rotation) => true,
            (Element::Array(values), ElementType::Array(element, len)) => {
                values.len() == *len && values.iter().all(|v| v.conforms_to(element))
            }
            _ => false,
        }
    }

    /// Best effort type of the value. An empty array reports a scalar sub-type.
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::Scalar(_) => ElementType::Scalar,
            Element::Vector(v) => ElementType::Vector(v.len()),
            Element::Rotation(_) => ElementType::Rotation,
            Element::Array(values) => {
                let sub = values
                    .first()
                    .map(Element::element_type)
                    .unwrap_or(ElementType::Scalar);
                ElementType::array(sub, values.len())
            }
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Element::Scalar(_) => 1,
            Element::Vector(v) => v.len(),
            Element::Rotation(_) => 3,
            Element::Array(values) => values.iter().map(Element::dim).sum(),
        }
    }

    /// Retraction: displaces `self` by the tangent vector `v` (length `dim()`).
    pub fn boxplus(&self, v: &[f64]) -> Result<Element> {
        if v.len() != self.dim() {
            return Err(EstimationError::DimensionMismatch {
                expected: self.dim(),
                found: v.len(),
            });
        }
        let out = match self {
            Element::Scalar(x) => Element::Scalar(x + v[0]),
            Element::Vector(x) => Element::Vector(x + DVector::from_column_slice(v)),
            Element::Rotation(q) => {
                Element::Rotation(so3::exp(&Vector3::from_column_slice(v)) * q)
            }
            Element::Array(values) => {
                let mut offset = 0;
                let values = values
                    .iter()
                    .map(|value| {
                        let d = value.dim();
                        let out = value.boxplus(&v[offset..offset + d]);
                        offset += d;
                        out
                    })
                    .collect::<Result<Vec<_>>>()?;
                Element::Array(values)
            }
        };
        Ok(out)
    }

    /// Tangent vector from `x` to `self`, written into `out` (length `dim()`).
    pub fn boxminus_into(&self, x: &Element, out: &mut [f64]) -> Result<()> {
        if out.len() != self.dim() {
            return Err(EstimationError::DimensionMismatch {
                expected: self.dim(),
                found: out.len(),
            });
        }
        match (self, x) {
            (Element::Scalar(y), Element::Scalar(x)) => out[0] = y - x,
            (Element::Vector(y), Element::Vector(x)) if y.len() == x.len() => {
                out.copy_from_slice((y - x).as_slice())
            }
            (Element::Rotation(y), Element::Rotation(x)) => {
                out.copy_from_slice(so3::log(&(y * x.inverse())).as_slice())
            }
            (Element::Array(y), Element::Array(x)) if y.len() == x.len() => {
                let mut offset = 0;
                for (y, x) in y.iter().zip(x) {
                    let d = y.dim();
                    y.boxminus_into(x, &mut out[offset..offset + d])?;
                    offset += d;
                }
            }
            _ => {
                return Err(EstimationError::TypeMismatch {
                    name: String::new(),
                    expected: self.element_type(),
                    found: x.element_type(),
                })
            }
        }
        Ok(())
    }

    pub fn boxminus(&self, x: &Element) -> Result<DVector<f64>> {
        let mut out = DVector::zeros(self.dim());
        self.boxminus_into(x, out.as_mut_slice())?;
        Ok(out)
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Element::Scalar(x) => x.is_finite(),
            Element::Vector(v) => v.iter().all(|x| x.is_finite()),
            Element::Rotation(q) => q.coords.iter().all(|x| x.is_finite()),
            Element::Array(values) => values.iter().all(Element::is_finite),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Scalar(x) => write!(f, "{x}"),
            Element::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Element::Rotation(q) => write!(
                f,
                "q(w: {}, x: {}, y: {}, z: {})",
                q.w, q.i, q.j, q.k
            ),
            Element::Array(values) => {
                let parts: Vec<String> = values.iter().map(|x| x.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Rust types that can be stored in and read back from a state block.
pub trait ElementValue: Sized {
    fn element_type() -> ElementType;
    fn from_element(element: &Element) -> Option<Self>;
    fn into_element(self) -> Element;
}

impl ElementValue for f64 {
    fn element_type() -> ElementType {
        ElementType::Scalar
    }

    fn from_element(element: &Element) -> Option<Self> {
        match element {
            Element::Scalar(x) => Some(*x),
            _ => None,
        }
    }

    fn into_element(self) -> Element {
        Element::Scalar(self)
    }
}

impl<const N: usize> ElementValue for SVector<f64, N> {
    fn element_type() -> ElementType {
        ElementType::Vector(N)
    }

    fn from_element(element: &Element) -> Option<Self> {
        match element {
            Element::Vector(v) if v.len() == N => Some(SVector::from_column_slice(v.as_slice())),
            _ => None,
        }
    }

    fn into_element(self) -> Element {
        Element::Vector(DVector::from_column_slice(self.as_slice()))
    }
}

impl ElementValue for UnitQuaternion<f64> {
    fn element_type() -> ElementType {
        ElementType::Rotation
    }

    fn from_element(element: &Element) -> Option<Self> {
        match element {
            Element::Rotation(q) => Some(*q),
            _ => None,
        }
    }

    fn into_element(self) -> Element {
        Element::Rotation(self)
    }
}

impl<T: ElementValue, const N: usize> ElementValue for [T; N] {
    fn element_type() -> ElementType {
        ElementType::array(T::element_type(), N)
    }

    fn from_element(element: &Element) -> Option<Self> {
        match element {
            Element::Array(values) if values.len() == N => {
                let values: Option<Vec<T>> = values.iter().map(T::from_element).collect();
                values?.try_into().ok()
            }
            _ => None,
        }
    }

    fn into_element(self) -> Element {
        Element::Array(self.into_iter().map(T::into_element).collect())
    }
}
