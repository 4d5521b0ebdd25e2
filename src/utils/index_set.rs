use std::{fmt::Debug, marker::PhantomData};

use super::bitvector::BitVector;

pub trait KeyIndex: Copy {
    fn index(&self) -> usize;
    fn from_index(index: usize) -> Self;
}

impl KeyIndex for usize {
    fn index(&self) -> usize {
        *self
    }

    fn from_index(index: usize) -> Self {
        index
    }
}

/// A fixed-width set of dense keys backed by a [`BitVector`].
///
/// This is a value type: every per-block table holds its own sets and analyses
/// hand out clones or shared references, never aliases.
pub struct IndexSet<T: KeyIndex> {
    set: BitVector,
    marker: PhantomData<T>,
}

impl<T: KeyIndex> IndexSet<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            set: BitVector::new(capacity),
            marker: PhantomData,
        }
    }

    pub fn full(capacity: usize) -> Self {
        Self {
            set: BitVector::full(capacity),
            marker: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.set.len()
    }

    pub fn ensure_capacity(&mut self, capacity: usize) {
        self.set.ensure_size(capacity);
    }

    /// Grows the set when `value` lies past its capacity.
    pub fn insert(&mut self, value: T) -> bool {
        let index = value.index();

        if index >= self.set.len() {
            self.set.ensure_size(index + 1);
        }

        !self.set.set(index, true)
    }

    pub fn remove(&mut self, value: T) -> bool {
        let index = value.index();

        if index >= self.set.len() {
            return false;
        }

        self.set.clear(index)
    }

    pub fn contains(&self, value: T) -> bool {
        self.set.get(value.index())
    }

    pub fn set_all(&mut self) {
        self.set.set_all();
    }

    pub fn clear(&mut self) {
        self.set.clear_all();
    }

    pub fn union_with(&mut self, other: &Self) {
        self.set.merge(&other.set);
    }

    pub fn intersect_with(&mut self, other: &Self) {
        self.set.filter(&other.set);
    }

    pub fn subtract(&mut self, other: &Self) {
        self.set.exclude(&other.set);
    }

    pub fn complement(&mut self) {
        self.set.complement();
    }

    pub fn complemented(&self) -> Self {
        let mut result = self.clone();
        result.complement();
        result
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.union_with(other);
        result
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.intersect_with(other);
        result
    }

    pub fn difference(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.subtract(other);
        result
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.bit_count()
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.set.is_subset_of(&other.set)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.set.intersects(&other.set)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.set.iter().map(T::from_index)
    }

    pub fn bits(&self) -> &BitVector {
        &self.set
    }
}

impl<T: KeyIndex> Clone for IndexSet<T> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
            marker: PhantomData,
        }
    }
}

impl<T: KeyIndex> PartialEq for IndexSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.set == other.set
    }
}

impl<T: KeyIndex> Eq for IndexSet<T> {}

impl<T: KeyIndex> Default for IndexSet<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: KeyIndex + Debug> Debug for IndexSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: KeyIndex> FromIterator<T> for IndexSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut result = Self::new(0);
        for value in iter {
            result.ensure_capacity(value.index() + 1);
            result.insert(value);
        }
        result
    }
}
