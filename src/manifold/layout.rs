use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{EstimationError, Result};
use crate::manifold::{ElementType, State};

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutEntry {
    pub name: String,
    pub ty: ElementType,
    /// Offset of the block in the tangent vector.
    pub offset: usize,
}

impl LayoutEntry {
    pub fn dim(&self) -> usize {
        self.ty.dim()
    }
}

/// Ordered, name-keyed schema of manifold elements. Immutable once built and shared
/// between states through an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    entries: Vec<LayoutEntry>,
    lut: FxHashMap<String, usize>,
    dim: usize,
}

impl Layout {
    pub fn new<I, S>(blocks: I) -> Result<Layout>
    where
        I: IntoIterator<Item = (S, ElementType)>,
        S: Into<String>,
    {
        let mut layout = Layout::default();
        for (name, ty) in blocks {
            layout.push(name.into(), ty)?;
        }
        Ok(layout)
    }

    /// Same as [`Layout::new`], wrapped for sharing.
    pub fn shared<I, S>(blocks: I) -> Result<Arc<Layout>>
    where
        I: IntoIterator<Item = (S, ElementType)>,
        S: Into<String>,
    {
        Layout::new(blocks).map(Arc::new)
    }

    pub fn empty() -> Arc<Layout> {
        Arc::new(Layout::default())
    }

    fn push(&mut self, name: String, ty: ElementType) -> Result<()> {
        if self.lut.contains_key(&name) {
            return Err(EstimationError::DuplicateName(name));
        }
        let offset = self.dim;
        self.dim += ty.dim();
        self.lut.insert(name.clone(), self.entries.len());
        self.entries.push(LayoutEntry { name, ty, offset });
        Ok(())
    }

    /// Union of both layouts, `self` first. A name present in both must carry the same
    /// element type.
    pub fn merge(&self, other: &Layout) -> Result<Layout> {
        let mut merged = self.clone();
        for entry in &other.entries {
            match merged.lut.get(&entry.name) {
                Some(&index) => {
                    let existing = &merged.entries[index].ty;
                    if *existing != entry.ty {
                        return Err(EstimationError::IncompatibleBlock {
                            name: entry.name.clone(),
                            existing: existing.clone(),
                            requested: entry.ty.clone(),
                        });
                    }
                }
                None => merged.push(entry.name.clone(), entry.ty.clone())?,
            }
        }
        Ok(merged)
    }

    /// Total tangent dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Result<&LayoutEntry> {
        self.entries
            .get(index)
            .ok_or(EstimationError::BlockIndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.lut
            .get(name)
            .copied()
            .ok_or_else(|| EstimationError::NameNotFound(name.to_string()))
    }

    pub fn entry_by_name(&self, name: &str) -> Result<&LayoutEntry> {
        let index = self.index_of(name)?;
        Ok(&self.entries[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lut.contains_key(name)
    }

    pub fn new_state(self: &Arc<Self>) -> State {
        State::new(Arc::clone(self))
    }
}

impl PartialEq for Layout {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{:>4} {}: {}", entry.offset, entry.name, entry.ty)?;
        }
        write!(f, "dim: {}", self.dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> Layout {
        Layout::new([
            ("tim", ElementType::Scalar),
            ("pos", ElementType::Vector(3)),
            ("att", ElementType::Rotation),
            ("sta", ElementType::array(ElementType::Vector(3), 4)),
        ])
        .unwrap()
    }

    #[test]
    fn offsets_and_dimension() {
        let layout = example();
        assert_eq!(layout.dim(), 1 + 3 + 3 + 12);
        assert_eq!(layout.len(), 4);
        let offsets: Vec<usize> = layout.entries().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 1, 4, 7]);
        assert_eq!(layout.index_of("att").unwrap(), 2);
        assert_eq!(layout.entry_by_name("sta").unwrap().dim(), 12);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = Layout::new([("pos", ElementType::Vector(3)), ("pos", ElementType::Scalar)]);
        assert_eq!(result.unwrap_err(), EstimationError::DuplicateName("pos".into()));
    }

    #[test]
    fn unknown_name() {
        let layout = example();
        assert!(matches!(
            layout.index_of("vel"),
            Err(EstimationError::NameNotFound(_))
        ));
        assert!(layout.entry(4).is_err());
    }

    #[test]
    fn merge_keeps_order_and_checks_types() {
        let a = Layout::new([("pos", ElementType::Vector(3)), ("vel", ElementType::Vector(3))]).unwrap();
        let b = Layout::new([("vel", ElementType::Vector(3)), ("att", ElementType::Rotation)]).unwrap();
        let merged = a.merge(&b).unwrap();
        let names: Vec<&str> = merged.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["pos", "vel", "att"]);
        assert_eq!(merged.dim(), 9);

        let c = Layout::new([("vel", ElementType::Rotation)]).unwrap();
        assert!(matches!(
            a.merge(&c),
            Err(EstimationError::IncompatibleBlock { .. })
        ));
    }

    #[test]
    fn equality_ignores_identity() {
        assert_eq!(example(), example());
        assert_ne!(example(), Layout::default());
    }
}
