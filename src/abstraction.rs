//! Finite height abstraction.
//!
//! Two states of a root are merged when the trees below them cannot be told
//! apart up to a given height, as judged by a transition match predicate.

use std::collections::BTreeSet;

use log::debug;

use crate::boxman::BoxMan;
use crate::config::{AnalysisConfig, MatchMode};
use crate::connection::{compute_signatures, CutpointInfo, Signature};
use crate::forest::Fae;
use crate::relation::{Relation, StateIndex};
use crate::treeaut::{Transition, TreeAut};

impl MatchMode {
    /// Checks whether two transitions may be merged by the abstraction.
    ///
    /// Children are not inspected beyond their leaf values.
    pub fn matches(self, boxman: &BoxMan, t1: &Transition, t2: &Transition) -> bool {
        if self == MatchMode::Exact {
            return t1.label() == t2.label();
        }
        let (l1, l2) = (boxman.label(t1.label()), boxman.label(t2.label()));
        let same = match (l1.node(), l2.node()) {
            (Some(n1), Some(n2)) => n1.tag() == n2.tag(),
            _ => t1.label() == t2.label(),
        };
        if !same || self == MatchMode::Smart {
            return same;
        }
        t1.lhs()
            .iter()
            .zip(t2.lhs())
            .all(|(&s1, &s2)| !(s1.is_leaf() || s2.is_leaf()) || s1 == s2)
    }
}

fn cutpoints_similar(a: &CutpointInfo, b: &CutpointInfo) -> bool {
    a.root == b.root
        && a.ref_count == b.ref_count
        && a.fwd_selectors == b.fwd_selectors
        && a.bwd_selector == b.bwd_selector
        && a.defines == b.defines
}

/// Signatures describing the same cutpoints reached the same way.
pub fn signatures_similar(a: &Signature, b: &Signature) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| cutpoints_similar(x, y))
}

impl TreeAut {
    /// Refines `rel` `height` times: two states stay related while every
    /// pair of their transitions matches and has pairwise related children.
    ///
    /// The result is symmetric.
    pub fn height_abstraction<F>(&self, rel: &mut Relation, height: usize, index: &StateIndex, matches: F)
    where
        F: Fn(&Transition, &Transition) -> bool,
    {
        let mut by_rhs = vec![Vec::new(); index.len()];
        for t in self.transitions() {
            by_rhs[index.at(t.rhs())].push(t);
        }

        for _ in 0..height {
            let prev = rel.clone();
            for s1 in 0..index.len() {
                for s2 in 0..index.len() {
                    if s1 == s2 || !prev.get(s1, s2) {
                        continue;
                    }
                    let ok = by_rhs[s1].iter().all(|t1| {
                        by_rhs[s2].iter().all(|t2| {
                            matches(t1, t2)
                                && t1.arity() == t2.arity()
                                && t1
                                    .lhs()
                                    .iter()
                                    .zip(t2.lhs())
                                    .all(|(&c1, &c2)| prev.get(index.at(c1), index.at(c2)))
                        })
                    });
                    if !ok {
                        rel.set(s1, s2, false);
                    }
                }
            }
        }
        rel.symmetrize();
    }
}

impl Fae {
    /// Collapses the states of `root` that agree up to `height`.
    pub fn height_abstraction(&mut self, root: usize, height: usize, mode: MatchMode, restrict_to_signatures: bool) {
        let boxman = self.boxman.clone();
        let ta = self.root_ta(root).clone();
        let index = ta.state_index();
        let mut rel = Relation::new(index.len(), true);
        ta.height_abstraction(&mut rel, height, &index, |t1, t2| mode.matches(&boxman, t1, t2));

        if restrict_to_signatures {
            let signatures = compute_signatures(&boxman, &ta);
            let empty = Signature::new();
            for j in 0..index.len() {
                let sj = signatures.get(&index.state(j)).unwrap_or(&empty);
                for k in 0..index.len() {
                    if j == k {
                        continue;
                    }
                    let sk = signatures.get(&index.state(k)).unwrap_or(&empty);
                    if !signatures_similar(sj, sk) {
                        rel.set(j, k, false);
                    }
                }
            }
        }

        let res = ta.collapsed(&rel, &index).useless_and_unreachable_free();
        debug!(
            "height_abstraction: root {} from {} to {} transitions",
            root,
            ta.len(),
            res.len()
        );
        self.set_root(root, Some(res));
        self.connection_graph.invalidate(root);
    }

    /// Abstracts every root except the `forbidden` ones.
    pub fn abstract_roots(&mut self, config: &AnalysisConfig, forbidden: &BTreeSet<usize>) {
        for root in 0..self.root_count() {
            if forbidden.contains(&root) || self.root(root).is_none() {
                continue;
            }
            self.height_abstraction(
                root,
                config.abstraction_height,
                config.match_mode,
                config.restrict_to_signatures,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::data::{Data, SelData};
    use crate::label::AbstractBox;
    use crate::types::State;

    /// Root accepting `n(n(n(null)))` over a single `next` selector.
    fn chain(fae: &mut Fae, length: usize) -> usize {
        let boxman = fae.boxman().clone();
        let next = [boxman.selector(&SelData::new(0, 8, 0, "next"))];
        let mut ta = fae.alloc_ta();
        let mut child = fae.add_data(&mut ta, &Data::null());
        for _ in 0..length {
            let s = fae.fresh_state();
            let (label, lhs) = boxman.reorder(&next, &[child]);
            ta.add_transition(&lhs, label, s);
            child = s;
        }
        ta.add_final_state(child);
        fae.append_root(ta)
    }

    fn states(ta: &TreeAut) -> usize {
        ta.states().iter().filter(|s| !s.is_leaf()).count()
    }

    #[test]
    fn test_height_one_collapses_chain() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let r = chain(&mut fae, 3);
        let original = fae.root_ta(r).clone();
        fae.height_abstraction(r, 1, MatchMode::Smart, false);
        let abstracted = fae.root_ta(r);
        assert_eq!(states(abstracted), 1);
        assert!(original.subseteq(abstracted));
        assert!(!abstracted.subseteq(&original));
    }

    #[test]
    fn test_smarter_keeps_leaf_distinction() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let r = chain(&mut fae, 3);
        fae.height_abstraction(r, 1, MatchMode::Smarter, false);
        // The bottom node points to null, the others do not.
        assert_eq!(states(fae.root_ta(r)), 2);
    }

    #[test]
    fn test_exact_vs_smart_on_boxes() {
        let boxman = BoxMan::default();
        let sel = |o| boxman.selector(&SelData::new(o, 8, 0, "f"));
        let ty = AbstractBox::TypeInfo(boxman.create_type_info("t", vec![0]).unwrap());
        let (l1, lhs1) = boxman.reorder(&[sel(0)], &[State::new(1)]);
        let (l2, lhs2) = boxman.reorder(&[ty, sel(0)], &[State::new(1)]);
        let t1 = Transition::new(&lhs1, l1, State::new(2));
        let t2 = Transition::new(&lhs2, l2, State::new(3));
        assert!(!MatchMode::Exact.matches(&boxman, &t1, &t2));
        assert!(MatchMode::Smart.matches(&boxman, &t1, &t2));
    }

    #[test]
    fn test_forbidden_roots_untouched() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let first = chain(&mut fae, 3);
        let pinned = chain(&mut fae, 3);
        let free = chain(&mut fae, 3);
        fae.abstract_roots(&AnalysisConfig::default(), &BTreeSet::from([pinned]));
        assert_eq!(states(fae.root_ta(first)), 1);
        assert_eq!(states(fae.root_ta(pinned)), 3);
        assert_eq!(states(fae.root_ta(free)), 1);
    }
}
