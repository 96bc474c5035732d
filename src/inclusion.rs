//! Language inclusion between tree automata.
//!
//! The check explores, bottom-up, pairs `(p, S)` where `p` is a state of the
//! smaller automaton and `S` is the set of states of the bigger automaton
//! that accept the same tree as `p`. Only the subset-minimal sets are kept
//! for every `p`: a counterexample found from a bigger set is also found
//! from a smaller one.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::treeaut::{Transition, TreeAut};
use crate::types::{Label, State};
use crate::utils::for_each_product;

type Antichain = BTreeMap<State, Vec<BTreeSet<State>>>;

/// Inserts `set` unless an existing subset is already present, evicting supersets.
fn insert_minimal(sets: &mut Vec<BTreeSet<State>>, set: BTreeSet<State>) -> bool {
    if sets.iter().any(|s| s.is_subset(&set)) {
        return false;
    }
    sets.retain(|s| !set.is_subset(s));
    sets.push(set);
    true
}

impl TreeAut {
    /// Checks whether every tree accepted by `self` is accepted by `other`.
    pub fn subseteq(&self, other: &TreeAut) -> bool {
        let small: Vec<Transition> = self.transitions().collect();
        let mut big: BTreeMap<(Label, usize), Vec<Transition>> = BTreeMap::new();
        for t in other.transitions() {
            big.entry((t.label(), t.arity())).or_default().push(t);
        }

        let mut antichain: Antichain = BTreeMap::new();
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;
            for t in &small {
                let choices: Vec<Vec<BTreeSet<State>>> = t
                    .lhs()
                    .iter()
                    .map(|s| antichain.get(s).cloned().unwrap_or_default())
                    .collect();
                let lens: Vec<usize> = choices.iter().map(Vec::len).collect();
                let candidates = big.get(&(t.label(), t.arity()));

                let mut posts = Vec::new();
                for_each_product(&lens, |tuple| {
                    let post: BTreeSet<State> = candidates
                        .into_iter()
                        .flatten()
                        .filter(|u| {
                            u.lhs()
                                .iter()
                                .zip(tuple)
                                .enumerate()
                                .all(|(i, (q, &k))| choices[i][k].contains(q))
                        })
                        .map(Transition::rhs)
                        .collect();
                    posts.push(post);
                });

                for post in posts {
                    if self.is_final(t.rhs()) && post.iter().all(|q| !other.is_final(*q)) {
                        debug!("subseteq: counterexample at {} after {} rounds", t.rhs(), rounds);
                        return false;
                    }
                    changed |= insert_minimal(antichain.entry(t.rhs()).or_default(), post);
                }
            }
            if !changed {
                break;
            }
        }
        debug!("subseteq: included after {} rounds", rounds);
        true
    }

    /// Checks whether both automata accept the same trees.
    pub fn language_eq(&self, other: &TreeAut) -> bool {
        self.subseteq(other) && other.subseteq(self)
    }
}
