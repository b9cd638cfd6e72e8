use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;

use crate::error::{EstimationError, Result};
use crate::manifold::{Element, ElementType, ElementValue, Layout};

/// Instance of a [`Layout`]: one live value per block, in layout order.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    layout: Arc<Layout>,
    values: Vec<Element>,
}

impl State {
    /// Every block set to the identity of its element type.
    pub fn new(layout: Arc<Layout>) -> State {
        let values = layout.entries().iter().map(|e| e.ty.identity()).collect();
        State { layout, values }
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn dim(&self) -> usize {
        self.layout.dim()
    }

    pub fn set_identity(&mut self) {
        for (value, entry) in self.values.iter_mut().zip(self.layout.entries()) {
            *value = entry.ty.identity();
        }
    }

    pub fn element(&self, name: &str) -> Result<&Element> {
        let index = self.layout.index_of(name)?;
        Ok(&self.values[index])
    }

    pub fn element_at(&self, index: usize) -> Result<&Element> {
        self.layout.entry(index)?;
        Ok(&self.values[index])
    }

    /// Replaces a block, the value must conform to the block's element type.
    pub fn set_element(&mut self, name: &str, element: Element) -> Result<()> {
        let index = self.layout.index_of(name)?;
        let ty = &self.layout.entries()[index].ty;
        if !element.conforms_to(ty) {
            return Err(EstimationError::TypeMismatch {
                name: name.to_string(),
                expected: ty.clone(),
                found: element.element_type(),
            });
        }
        self.values[index] = element;
        Ok(())
    }

    /// Typed copy of a block.
    pub fn get<T: ElementValue>(&self, name: &str) -> Result<T> {
        let index = self.layout.index_of(name)?;
        T::from_element(&self.values[index]).ok_or_else(|| EstimationError::TypeMismatch {
            name: name.to_string(),
            expected: T::element_type(),
            found: self.layout.entries()[index].ty.clone(),
        })
    }

    pub fn set<T: ElementValue>(&mut self, name: &str, value: T) -> Result<()> {
        self.set_element(name, value.into_element())
    }

    /// Typed copy of an array block whose length is only known at runtime.
    pub fn get_array<T: ElementValue>(&self, name: &str) -> Result<Vec<T>> {
        let index = self.layout.index_of(name)?;
        let mismatch = || EstimationError::TypeMismatch {
            name: name.to_string(),
            expected: ElementType::array(T::element_type(), 0),
            found: self.layout.entries()[index].ty.clone(),
        };
        match &self.values[index] {
            Element::Array(values) => values
                .iter()
                .map(|v| T::from_element(v).ok_or_else(mismatch))
                .collect(),
            _ => Err(mismatch()),
        }
    }

    pub fn set_array<T: ElementValue>(&mut self, name: &str, values: Vec<T>) -> Result<()> {
        let values = values.into_iter().map(T::into_element).collect();
        self.set_element(name, Element::Array(values))
    }

    /// Builder flavour of [`State::set`].
    pub fn with<T: ElementValue>(mut self, name: &str, value: T) -> Result<State> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn check_layout(&self, layout: &Layout) -> Result<()> {
        if *self.layout == *layout {
            Ok(())
        } else {
            Err(EstimationError::LayoutMismatch)
        }
    }

    /// Block-wise retraction, `v` is sliced at the layout offsets.
    pub fn boxplus(&self, v: &DVector<f64>) -> Result<State> {
        if v.len() != self.dim() {
            return Err(EstimationError::DimensionMismatch {
                expected: self.dim(),
                found: v.len(),
            });
        }
        let values = self
            .values
            .iter()
            .zip(self.layout.entries())
            .map(|(value, entry)| value.boxplus(&v.as_slice()[entry.offset..entry.offset + entry.dim()]))
            .collect::<Result<Vec<_>>>()?;
        Ok(State {
            layout: Arc::clone(&self.layout),
            values,
        })
    }

    /// Tangent vector from `other` to `self`.
    pub fn boxminus(&self, other: &State) -> Result<DVector<f64>> {
        other.check_layout(&self.layout)?;
        let mut out = DVector::zeros(self.dim());
        for ((y, x), entry) in self.values.iter().zip(&other.values).zip(self.layout.entries()) {
            y.boxminus_into(x, &mut out.as_mut_slice()[entry.offset..entry.offset + entry.dim()])?;
        }
        Ok(out)
    }

    /// Copies the blocks of `layout` out of this state, by name. Every target block must
    /// exist here with the same element type.
    pub fn project(&self, layout: &Arc<Layout>) -> Result<State> {
        let mut out = layout.new_state();
        for (index, entry) in layout.entries().iter().enumerate() {
            let source = self.layout.entry_by_name(&entry.name)?;
            if source.ty != entry.ty {
                return Err(EstimationError::TypeMismatch {
                    name: entry.name.clone(),
                    expected: entry.ty.clone(),
                    found: source.ty.clone(),
                });
            }
            out.values[index] = self.values[self.layout.index_of(&entry.name)?].clone();
        }
        Ok(out)
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(Element::is_finite)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (value, entry) in self.values.iter().zip(self.layout.entries()) {
            writeln!(f, "{}: {}", entry.name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    fn layout() -> Arc<Layout> {
        Layout::shared([
            ("tim", ElementType::Scalar),
            ("pos", ElementType::Vector(3)),
            ("att", ElementType::Rotation),
            ("sta", ElementType::array(ElementType::Vector(3), 4)),
        ])
        .unwrap()
    }

    #[test]
    fn new_state_is_identity() {
        let layout = layout();
        let state = layout.new_state();
        assert_eq!(state.dim(), 19);
        assert_eq!(state.get::<f64>("tim").unwrap(), 0.0);
        assert_eq!(state.get::<Vector3<f64>>("pos").unwrap(), Vector3::zeros());
        assert_eq!(
            state.get::<UnitQuaternion<f64>>("att").unwrap(),
            UnitQuaternion::identity()
        );
    }

    #[test]
    fn typed_access_checks_types() {
        let mut state = layout().new_state();
        assert!(matches!(
            state.get::<f64>("pos"),
            Err(EstimationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            state.set("att", Vector3::new(1.0, 2.0, 3.0)),
            Err(EstimationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            state.get::<f64>("vel"),
            Err(EstimationError::NameNotFound(_))
        ));
        state.set("sta", [Vector3::new(1.0, 0.0, 0.0); 4]).unwrap();
        assert_eq!(state.get::<[Vector3<f64>; 4]>("sta").unwrap()[3].x, 1.0);
    }

    #[test]
    fn runtime_sized_arrays() {
        let mut state = layout().new_state();
        let legs = vec![Vector3::new(0.5, 0.0, 0.0); 4];
        state.set_array("sta", legs.clone()).unwrap();
        assert_eq!(state.get_array::<Vector3<f64>>("sta").unwrap(), legs);
        assert!(state.set_array("sta", vec![Vector3::<f64>::zeros(); 3]).is_err());
        assert!(state.get_array::<f64>("sta").is_err());
        assert!(state.get_array::<f64>("tim").is_err());
    }

    #[test]
    fn boxplus_is_block_wise() {
        let state = layout().new_state();
        let v = DVector::from_fn(19, |i, _| i as f64 * 0.01);
        let moved = state.boxplus(&v).unwrap();
        assert_eq!(moved.get::<f64>("tim").unwrap(), 0.0);
        approx::assert_abs_diff_eq!(
            moved.get::<Vector3<f64>>("pos").unwrap(),
            Vector3::new(0.01, 0.02, 0.03),
            epsilon = 1e-15
        );
        let sta = moved.get::<[Vector3<f64>; 4]>("sta").unwrap();
        approx::assert_abs_diff_eq!(sta[2], Vector3::new(0.13, 0.14, 0.15), epsilon = 1e-15);
        approx::assert_abs_diff_eq!(moved.boxminus(&state).unwrap(), v, epsilon = 1e-12);
    }

    #[test]
    fn dimension_and_layout_checks() {
        let state = layout().new_state();
        assert!(state.boxplus(&DVector::zeros(3)).is_err());
        let other = Layout::shared([("pos", ElementType::Vector(3))]).unwrap().new_state();
        assert_eq!(state.boxminus(&other), Err(EstimationError::LayoutMismatch));
    }

    #[test]
    fn projection_copies_by_name() {
        let state = layout()
            .new_state()
            .with("pos", Vector3::new(1.0, 2.0, 3.0))
            .unwrap();
        let target = Layout::shared([("pos", ElementType::Vector(3))]).unwrap();
        let projected = state.project(&target).unwrap();
        assert_eq!(projected.get::<Vector3<f64>>("pos").unwrap(), Vector3::new(1.0, 2.0, 3.0));

        let wrong = Layout::shared([("pos", ElementType::Rotation)]).unwrap();
        assert!(state.project(&wrong).is_err());
    }

    #[test]
    fn print() {
        let text = format!("{}", layout().new_state());
        assert!(text.contains("pos: [0, 0, 0]"));
        assert!(text.contains("att: q(w: 1"));
    }
}
