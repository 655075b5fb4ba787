use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    sync::Arc,
};

use log::debug;
use ndarray::Array2;

use crate::{
    components::{band::BandSource, vrt::Vrt},
    errors::{Result, RustervrtError},
};

/// Stable index of a tree inside a [VrtStore].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VrtHandle(pub usize);

/// Stable index of an array inside a [VrtStore].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayHandle(pub usize);

impl Display for VrtHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vrt#{}", self.0)
    }
}

impl Display for ArrayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "array#{}", self.0)
    }
}

/// Arena keeping alive every tree and array that a band of its owner reads
/// from. Handles are never reused; a tree is only released by
/// [VrtStore::retain_reachable] once no root refers to it.
#[derive(Clone, Debug, Default)]
pub struct VrtStore {
    trees: Vec<Option<Arc<Vrt>>>,
    arrays: Vec<Arc<Array2<f64>>>,
}

impl VrtStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tree(&mut self, vrt: Vrt) -> VrtHandle {
        self.trees.push(Some(Arc::new(vrt)));
        VrtHandle(self.trees.len() - 1)
    }

    pub fn insert_array(&mut self, array: Array2<f64>) -> ArrayHandle {
        self.arrays.push(Arc::new(array));
        ArrayHandle(self.arrays.len() - 1)
    }

    pub fn tree(&self, handle: VrtHandle) -> Result<&Vrt> {
        self.trees
            .get(handle.0)
            .and_then(Option::as_deref)
            .ok_or_else(|| RustervrtError::DanglingHandle(handle.to_string()))
    }

    pub fn array(&self, handle: ArrayHandle) -> Result<&Array2<f64>> {
        self.arrays
            .get(handle.0)
            .map(Arc::as_ref)
            .ok_or_else(|| RustervrtError::DanglingHandle(handle.to_string()))
    }

    /// Number of trees kept alive.
    pub fn tree_count(&self) -> usize {
        self.trees.iter().flatten().count()
    }

    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    /// Releases every tree that no band of `roots` reads from, directly or
    /// through other trees. Returns the number of trees released.
    pub fn retain_reachable(&mut self, roots: &[&Vrt]) -> usize {
        let mut reachable = HashSet::new();
        let mut pending: Vec<&Vrt> = roots.to_vec();
        while let Some(vrt) = pending.pop() {
            for band in vrt.bands() {
                let (BandSource::Tree { handle, .. } | BandSource::Warped { handle, .. }) = band.source
                else {
                    continue;
                };
                if reachable.insert(handle) {
                    if let Some(Some(tree)) = self.trees.get(handle.0) {
                        pending.push(tree);
                    }
                }
            }
        }
        let mut released = 0;
        for (idx, slot) in self.trees.iter_mut().enumerate() {
            if slot.is_some() && !reachable.contains(&VrtHandle(idx)) {
                *slot = None;
                released += 1;
            }
        }
        if released > 0 {
            debug!("released {released} unreachable trees");
        }
        released
    }

    /// Copy of `vrt`, whose handles point into `source`, with every tree and
    /// array it depends on imported into `self`.
    pub fn adopt(&mut self, source: &VrtStore, vrt: &Vrt) -> Result<Vrt> {
        let mut adoption = Adoption {
            source,
            trees: HashMap::new(),
            arrays: HashMap::new(),
        };
        adoption.remap(self, vrt)
    }
}

struct Adoption<'a> {
    source: &'a VrtStore,
    trees: HashMap<VrtHandle, VrtHandle>,
    arrays: HashMap<ArrayHandle, ArrayHandle>,
}

impl Adoption<'_> {
    fn remap(&mut self, target: &mut VrtStore, vrt: &Vrt) -> Result<Vrt> {
        let mut adopted = vrt.clone();
        for ordinal in 1..=vrt.band_count() {
            let source = match &vrt.band(ordinal)?.source {
                BandSource::File { .. } => continue,
                BandSource::Tree { handle, band } => BandSource::Tree {
                    handle: self.tree(target, *handle)?,
                    band: *band,
                },
                BandSource::Warped { handle, band } => BandSource::Warped {
                    handle: self.tree(target, *handle)?,
                    band: *band,
                },
                BandSource::Array(handle) => BandSource::Array(self.array(target, *handle)?),
            };
            adopted.band_mut(ordinal)?.source = source;
        }
        Ok(adopted)
    }

    fn tree(&mut self, target: &mut VrtStore, handle: VrtHandle) -> Result<VrtHandle> {
        if let Some(adopted) = self.trees.get(&handle) {
            return Ok(*adopted);
        }
        let source = self.source;
        let remapped = self.remap(target, source.tree(handle)?)?;
        let adopted = target.insert_tree(remapped);
        self.trees.insert(handle, adopted);
        Ok(adopted)
    }

    fn array(&mut self, target: &mut VrtStore, handle: ArrayHandle) -> Result<ArrayHandle> {
        if let Some(adopted) = self.arrays.get(&handle) {
            return Ok(*adopted);
        }
        let array = Arc::clone(
            self.source
                .arrays
                .get(handle.0)
                .ok_or_else(|| RustervrtError::DanglingHandle(handle.to_string()))?,
        );
        target.arrays.push(array);
        let adopted = ArrayHandle(target.arrays.len() - 1);
        self.arrays.insert(handle, adopted);
        Ok(adopted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{band::DataType, georef::Grid, metadata::Metadata};

    #[test]
    fn handles_outside_the_store_dangle() {
        let store = VrtStore::new();
        assert!(matches!(
            store.tree(VrtHandle(0)),
            Err(RustervrtError::DanglingHandle(_))
        ));
        assert!(store.array(ArrayHandle(3)).is_err());
    }

    #[test]
    fn trees_nothing_reads_from_are_released() {
        let mut store = VrtStore::new();
        let array = store.insert_array(Array2::zeros((2, 2)));
        let inner = store.insert_tree(Vrt::from_array(array, (2, 2), DataType::Float64));
        let mut middle = Vrt::new(Grid::default_for_size((2, 2)));
        middle.create_band(
            BandSource::Tree {
                handle: inner,
                band: 1,
            },
            DataType::Float64,
            Metadata::new(),
        );
        let middle = store.insert_tree(middle);
        let orphan = store.insert_tree(Vrt::new(Grid::default_for_size((2, 2))));
        let mut root = Vrt::new(Grid::default_for_size((1, 1)));
        root.create_band(
            BandSource::Warped {
                handle: middle,
                band: 1,
            },
            DataType::Float64,
            Metadata::new(),
        );

        assert_eq!(store.retain_reachable(&[&root]), 1);
        assert_eq!(store.tree_count(), 2);
        assert!(store.tree(inner).is_ok());
        assert!(matches!(
            store.tree(orphan),
            Err(RustervrtError::DanglingHandle(_))
        ));
        // released handles are not handed out again
        assert_eq!(store.insert_tree(Vrt::new(Grid::default_for_size((1, 1)))), VrtHandle(3));

        assert_eq!(store.retain_reachable(&[]), 3);
        assert_eq!(store.tree_count(), 0);
        assert_eq!(store.array_count(), 1);
    }

    #[test]
    fn adopt_imports_the_whole_source_chain() {
        let mut source = VrtStore::new();
        // unrelated entries so that handles differ between the stores
        source.insert_tree(Vrt::new(Grid::default_for_size((1, 1))));
        let array = source.insert_array(Array2::from_elem((2, 2), 7.));
        let wrapped = source.insert_tree(Vrt::from_array(array, (2, 2), DataType::Float64));
        let mut top = Vrt::new(Grid::default_for_size((2, 2)));
        top.create_band(
            BandSource::Tree {
                handle: wrapped,
                band: 1,
            },
            DataType::Float64,
            Metadata::from_iter([("BandName", "seven")]),
        );

        let mut target = VrtStore::new();
        let adopted = target.adopt(&source, &top).unwrap();

        assert_eq!(target.tree_count(), 1);
        assert_eq!(target.array_count(), 1);
        let BandSource::Tree { handle, band: 1 } = adopted.band(1).unwrap().source else {
            panic!("expected a tree source");
        };
        let inner = target.tree(handle).unwrap();
        assert_eq!(
            inner.band(1).unwrap().source,
            BandSource::Array(ArrayHandle(0))
        );
        assert_eq!(target.array(ArrayHandle(0)).unwrap()[[1, 1]], 7.);
    }
}
