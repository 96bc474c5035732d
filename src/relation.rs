//! Dense binary relations over automaton states.
//!
//! Simulations, abstraction relations and collapse maps all work over a
//! compact numbering of the states of one automaton. [`StateIndex`] provides
//! that numbering, and [`Relation`] stores a relation over it as a bit matrix.

use std::collections::BTreeMap;

use crate::types::State;

/// Dense numbering of a set of states, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct StateIndex {
    index: BTreeMap<State, usize>,
    states: Vec<State>,
}

impl StateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of the state, assigning the next free one if it is new.
    pub fn add(&mut self, state: State) -> usize {
        if let Some(&i) = self.index.get(&state) {
            return i;
        }
        let i = self.states.len();
        self.index.insert(state, i);
        self.states.push(state);
        i
    }

    pub fn get(&self, state: State) -> Option<usize> {
        self.index.get(&state).copied()
    }

    /// Returns the index of a state that must be present.
    ///
    /// # Panics
    ///
    /// Panics if the state was never added.
    pub fn at(&self, state: State) -> usize {
        match self.index.get(&state) {
            Some(&i) => i,
            None => panic!("State {} is not indexed", state),
        }
    }

    pub fn state(&self, i: usize) -> State {
        self.states[i]
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl FromIterator<State> for StateIndex {
    fn from_iter<I: IntoIterator<Item = State>>(iter: I) -> Self {
        let mut index = StateIndex::new();
        for s in iter {
            index.add(s);
        }
        index
    }
}

/// Square boolean matrix, one row per indexed element.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Relation {
    size: usize,
    words_per_row: usize,
    words: Vec<u64>,
}

impl Relation {
    const BITS: usize = 64;

    /// Creates a relation of the given size with every pair set to `value`.
    pub fn new(size: usize, value: bool) -> Self {
        let words_per_row = size.div_ceil(Self::BITS);
        let fill = if value { u64::MAX } else { 0 };
        let mut rel = Self {
            size,
            words_per_row,
            words: vec![fill; size * words_per_row],
        };
        if value {
            rel.clear_padding();
        }
        rel
    }

    /// The identity relation.
    pub fn identity(size: usize) -> Self {
        let mut rel = Self::new(size, false);
        for i in 0..size {
            rel.set(i, i, true);
        }
        rel
    }

    fn clear_padding(&mut self) {
        let tail = self.size % Self::BITS;
        if tail == 0 {
            return;
        }
        let mask = (1u64 << tail) - 1;
        for row in 0..self.size {
            let w = row * self.words_per_row + self.words_per_row - 1;
            self.words[w] &= mask;
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn locate(&self, i: usize, j: usize) -> (usize, u64) {
        assert!(i < self.size && j < self.size, "Pair ({}, {}) out of bounds", i, j);
        (i * self.words_per_row + j / Self::BITS, 1u64 << (j % Self::BITS))
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> bool {
        let (w, mask) = self.locate(i, j);
        self.words[w] & mask != 0
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: bool) {
        let (w, mask) = self.locate(i, j);
        if value {
            self.words[w] |= mask;
        } else {
            self.words[w] &= !mask;
        }
    }

    /// Keeps only the pairs related in both directions.
    pub fn symmetrize(&mut self) {
        for i in 0..self.size {
            for j in (i + 1)..self.size {
                let both = self.get(i, j) && self.get(j, i);
                self.set(i, j, both);
                self.set(j, i, both);
            }
        }
    }

    /// Pointwise conjunction with another relation of the same size.
    pub fn intersect(&mut self, other: &Relation) {
        assert_eq!(self.size, other.size, "Relation sizes differ");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
    }

    /// Number of related pairs.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates over the columns set in row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(move |&j| self.get(i, j))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_state_index() {
        let mut index = StateIndex::new();
        assert_eq!(index.add(State::new(5)), 0);
        assert_eq!(index.add(State::leaf(1)), 1);
        assert_eq!(index.add(State::new(5)), 0);
        assert_eq!(index.len(), 2);
        assert_eq!(index.state(1), State::leaf(1));
        assert_eq!(index.get(State::new(6)), None);
    }

    #[test]
    fn test_full_relation_has_no_padding_bits() {
        let rel = Relation::new(70, true);
        assert_eq!(rel.count(), 70 * 70);
    }

    #[test]
    fn test_symmetrize() {
        let mut rel = Relation::identity(3);
        rel.set(0, 1, true);
        rel.set(1, 2, true);
        rel.set(2, 1, true);
        rel.symmetrize();
        assert!(!rel.get(0, 1));
        assert!(rel.get(1, 2));
        assert!(rel.get(2, 1));
        assert_eq!(rel.count(), 5);
    }

    #[test]
    fn test_intersect_and_row() {
        let mut a = Relation::new(4, true);
        let b = Relation::identity(4);
        a.intersect(&b);
        assert_eq!(a, b);
        assert_eq!(a.row(2).collect::<Vec<_>>(), vec![2]);
    }
}
