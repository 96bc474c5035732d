//! Encoding of snapshots as single tree automata.
//!
//! A snapshot becomes one automaton whose accepted trees have a top node
//! labelled by the variable values, with one child per root. Encodings of
//! different snapshots use disjoint internal states, so their union is the
//! accumulated set of snapshots seen at a program point.

use std::rc::Rc;

use log::debug;

use crate::boxman::BoxMan;
use crate::forest::Fae;
use crate::relation::StateIndex;
use crate::treeaut::TreeAut;
use crate::types::State;
use crate::utils::for_each_product;

/// Union of encoded snapshots.
#[derive(Debug, Clone)]
pub struct Ufae {
    boxman: Rc<BoxMan>,
    ta: TreeAut,
    state_offset: usize,
}

impl Ufae {
    pub fn new(boxman: Rc<BoxMan>) -> Self {
        let ta = boxman.new_ta();
        Self {
            boxman,
            ta,
            state_offset: 1,
        }
    }

    /// The accumulated automaton.
    pub fn ta(&self) -> &TreeAut {
        &self.ta
    }

    pub fn state_offset(&self) -> usize {
        self.state_offset
    }

    /// Encodes `fae` with states past the current offset.
    ///
    /// Returns the encoding and the index used to rename the root states.
    ///
    /// # Panics
    ///
    /// Panics if some root was deleted without normalizing afterwards.
    pub fn fae_to_ta(&self, fae: &Fae) -> (TreeAut, StateIndex) {
        let accepting = State::new(self.state_offset);
        let offset = self.state_offset + 1;
        let mut index = StateIndex::new();
        let mut dst = self.boxman.new_ta();
        dst.add_final_state(accepting);

        let mut finals: Vec<Vec<State>> = Vec::with_capacity(fae.root_count());
        for (i, root) in fae.roots().iter().enumerate() {
            let Some(root) = root else {
                panic!("Root {} is missing in an encoded snapshot", i);
            };
            let renamed = root.rename(|s| State::new(index.add(s) + offset), false);
            dst.union_with(&renamed);
            finals.push(
                root.final_states()
                    .iter()
                    .map(|&f| State::new(index.add(f) + offset))
                    .collect(),
            );
        }

        let label = self.boxman.vars_label(finals.len(), fae.variables());
        let lens: Vec<usize> = finals.iter().map(|f| f.len()).collect();
        for_each_product(&lens, |tuple| {
            let lhs: Vec<State> = tuple.iter().enumerate().map(|(i, &k)| finals[i][k]).collect();
            dst.add_transition(&lhs, label, accepting);
        });
        (dst, index)
    }

    /// Adds an encoding produced by [`Ufae::fae_to_ta`].
    pub fn join(&mut self, src: &TreeAut, index: &StateIndex) {
        self.ta.union_with(src);
        self.state_offset = (self.state_offset + index.len() + 1).max(self.ta.next_state());
        debug!("join: {} transitions, offset {}", self.ta.len(), self.state_offset);
    }

    /// Minimizes the accumulated automaton.
    pub fn minimize(&mut self) {
        self.ta = self.ta.minimized();
        self.state_offset = self.state_offset.max(self.ta.next_state());
    }
}
