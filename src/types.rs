//! Type-safe handles shared by the automaton layers.
//!
//! This module provides newtype wrappers that keep automaton states and
//! transition labels apart from plain integers (root indices, selector offsets).
use std::fmt;

const LEAF_BIT: usize = !(usize::MAX >> 1);

/// An automaton state.
///
/// States come in two flavours, told apart by the most significant bit:
///
/// - *internal* states, local to one automaton and freely renamed;
/// - *leaf* states, which stand for one interned data value (a constant,
///   the undefined value, or a reference to a root). A leaf state is the
///   same in every automaton that mentions the value.
///
/// # Invariants
///
/// - The leaf/internal tag of a state never changes.
/// - Renaming operations only ever touch internal states.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct State(usize);

impl State {
    /// Creates an internal state.
    ///
    /// # Panics
    ///
    /// Panics if `id` collides with the leaf tag.
    pub const fn new(id: usize) -> Self {
        assert!(id & LEAF_BIT == 0, "State id overflows into the leaf tag");
        State(id)
    }

    /// Creates the leaf state of the interned data value with the given index.
    pub const fn leaf(data_index: usize) -> Self {
        assert!(data_index & LEAF_BIT == 0, "Data index overflows into the leaf tag");
        State(data_index | LEAF_BIT)
    }

    /// Checks if this is a data leaf.
    pub const fn is_leaf(self) -> bool {
        self.0 & LEAF_BIT != 0
    }

    /// Returns the id without the leaf tag.
    ///
    /// For leaf states this is the index of the interned data value.
    pub const fn id(self) -> usize {
        self.0 & !LEAF_BIT
    }

    /// Returns the raw representation, tag included.
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Shifts an internal state by `offset`; leaves are returned unchanged.
    pub fn shifted(self, offset: usize) -> Self {
        if self.is_leaf() {
            self
        } else {
            State::new(self.0 + offset)
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf() {
            write!(f, "r{}", self.id())
        } else {
            write!(f, "q{}", self.0)
        }
    }
}

impl From<State> for usize {
    fn from(state: State) -> Self {
        state.0
    }
}

/// A transition label.
///
/// Labels are opaque to the tree-automaton core, which only compares them
/// for equality. Their meaning (node label, data leaf, variable tuple) is
/// kept by the interning registry in [`crate::boxman`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Label(u32);

impl Label {
    /// Creates a label from its raw index.
    pub const fn new(index: u32) -> Self {
        Label(index)
    }

    /// Returns the raw label index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}
