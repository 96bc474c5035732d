//! Simulation preorders and simulation-based reduction.
//!
//! Both simulations start from a partition of the states by the labels of
//! their transitions: a state can only be simulated by a state offering a
//! superset of its labels. The remaining pairs are refined with a worklist.
//! When a pair is dropped, only the pairs depending on it are checked again.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::debug;

use crate::relation::{Relation, StateIndex};
use crate::treeaut::{TransId, Transition, TreeAut};
use crate::types::{Label, State};

/// Greatest fixpoint below `rel` of the pairs satisfying `simulated`.
///
/// `dependents[p]` lists the states whose pairs must be checked again
/// once a pair with `p` on the same side is dropped.
fn refine<F>(mut rel: Relation, dependents: &[BTreeSet<usize>], simulated: F) -> Relation
where
    F: Fn(&Relation, usize, usize) -> bool,
{
    let size = rel.size();
    let mut queued = Relation::new(size, false);
    let mut queue = VecDeque::new();
    for p in 0..size {
        for q in rel.row(p).filter(|&q| q != p) {
            queued.set(p, q, true);
            queue.push_back((p, q));
        }
    }

    let mut checks = 0usize;
    while let Some((p, q)) = queue.pop_front() {
        queued.set(p, q, false);
        checks += 1;
        if !rel.get(p, q) || simulated(&rel, p, q) {
            continue;
        }
        rel.set(p, q, false);
        for &pp in &dependents[p] {
            for &qq in &dependents[q] {
                if pp != qq && rel.get(pp, qq) && !queued.get(pp, qq) {
                    queued.set(pp, qq, true);
                    queue.push_back((pp, qq));
                }
            }
        }
    }
    debug!("refine: {} states, {} checks", size, checks);
    rel
}

/// Relates `p` to `q` whenever the key set of `p` is included in that of `q`.
fn initial_partition<K: Ord>(keys: &[BTreeSet<K>]) -> Relation {
    let mut rel = Relation::new(keys.len(), false);
    for (p, kp) in keys.iter().enumerate() {
        for (q, kq) in keys.iter().enumerate() {
            if kp.is_subset(kq) {
                rel.set(p, q, true);
            }
        }
    }
    rel
}

impl TreeAut {
    /// Index of all states, ordered by their numbering.
    pub fn state_index(&self) -> StateIndex {
        self.states().into_iter().collect()
    }

    fn transitions_by_rhs(&self, index: &StateIndex) -> Vec<Vec<Transition>> {
        let mut by_rhs = vec![Vec::new(); index.len()];
        for t in self.transitions() {
            by_rhs[index.at(t.rhs())].push(t);
        }
        by_rhs
    }

    /// Maximal downward simulation.
    ///
    /// `p` is simulated by `q` when every transition into `p` is matched by a
    /// transition into `q` with the same label and pointwise simulating children.
    pub fn downward_simulation(&self, index: &StateIndex) -> Relation {
        let by_rhs = self.transitions_by_rhs(index);

        let labels: Vec<BTreeSet<(Label, usize)>> = by_rhs
            .iter()
            .map(|ts| ts.iter().map(|t| (t.label(), t.arity())).collect())
            .collect();
        // A dropped child pair invalidates the pairs of their parents.
        let mut parents = vec![BTreeSet::new(); index.len()];
        for (p, ts) in by_rhs.iter().enumerate() {
            for t in ts {
                for &s in t.lhs() {
                    parents[index.at(s)].insert(p);
                }
            }
        }

        let rel = refine(initial_partition(&labels), &parents, |rel, p, q| {
            by_rhs[p].iter().all(|t| {
                by_rhs[q].iter().any(|u| {
                    t.label() == u.label()
                        && t.arity() == u.arity()
                        && t
                            .lhs()
                            .iter()
                            .zip(u.lhs())
                            .all(|(&a, &b)| rel.get(index.at(a), index.at(b)))
                })
            })
        });
        debug!("downward_simulation: {} states, {} pairs", index.len(), rel.count());
        rel
    }

    /// Maximal upward simulation, parameterised by a downward relation.
    ///
    /// `p` is simulated by `q` when `q` is accepting whenever `p` is, and every
    /// use of `p` as the `i`-th child is matched by a use of `q` as the `i`-th
    /// child of a transition with the same label, an upward-simulating parent
    /// and siblings related by `param`.
    pub fn upward_simulation(&self, index: &StateIndex, param: &Relation) -> Relation {
        let transitions: Vec<Transition> = self.transitions().collect();

        // Uses of each state: (transition, position).
        let mut uses: Vec<Vec<(usize, usize)>> = vec![Vec::new(); index.len()];
        // Contexts offered by each state; `None` stands for being accepting.
        let mut contexts: Vec<BTreeSet<Option<(Label, usize, usize)>>> = vec![BTreeSet::new(); index.len()];
        // A dropped parent pair invalidates the pairs of their children.
        let mut children = vec![BTreeSet::new(); index.len()];
        for (k, t) in transitions.iter().enumerate() {
            let rhs = index.at(t.rhs());
            for (i, &s) in t.lhs().iter().enumerate() {
                let c = index.at(s);
                uses[c].push((k, i));
                contexts[c].insert(Some((t.label(), t.arity(), i)));
                children[rhs].insert(c);
            }
        }
        for (p, ctx) in contexts.iter_mut().enumerate() {
            if self.is_final(index.state(p)) {
                ctx.insert(None);
            }
        }

        let rel = refine(initial_partition(&contexts), &children, |rel, p, q| {
            uses[p].iter().all(|&(k, i)| {
                let t = &transitions[k];
                uses[q].iter().any(|&(l, j)| {
                    let u = &transitions[l];
                    i == j
                        && t.label() == u.label()
                        && t.arity() == u.arity()
                        && rel.get(index.at(t.rhs()), index.at(u.rhs()))
                        && t
                            .lhs()
                            .iter()
                            .zip(u.lhs())
                            .enumerate()
                            .all(|(m, (&a, &b))| m == i || param.get(index.at(a), index.at(b)))
                })
            })
        });
        debug!("upward_simulation: {} states, {} pairs", index.len(), rel.count());
        rel
    }

    /// Combination of a downward and an upward simulation whose symmetric
    /// part may be collapsed without changing the language.
    pub fn combined_simulation(dwn: &Relation, up: &Relation) -> Relation {
        let size = dwn.size();
        assert_eq!(size, up.size(), "Relation sizes differ");

        let mut dut = Relation::new(size, false);
        for i in 0..size {
            for j in 0..size {
                if (0..size).any(|k| dwn.get(i, k) && up.get(j, k)) {
                    dut.set(i, j, true);
                }
            }
        }

        let mut res = dut.clone();
        for i in 0..size {
            for j in 0..size {
                if res.get(i, j) && (0..size).any(|k| dwn.get(j, k) && !dut.get(i, k)) {
                    res.set(i, j, false);
                }
            }
        }
        res
    }

    /// Drops every transition whose children are pointwise dominated under
    /// `rel` by another transition with the same label and target.
    ///
    /// Of two mutually dominating transitions the first one is kept.
    pub fn prune_dominated(&self, rel: &Relation, index: &StateIndex) -> TreeAut {
        let dominated = |t: &Transition, u: &Transition| {
            t.label() == u.label()
                && t.arity() == u.arity()
                && t
                    .lhs()
                    .iter()
                    .zip(u.lhs())
                    .all(|(&a, &b)| rel.get(index.at(a), index.at(b)))
        };

        let mut groups: BTreeMap<State, Vec<(TransId, Transition)>> = BTreeMap::new();
        for (id, t) in self.transitions_with_ids() {
            groups.entry(t.rhs()).or_default().push((id, t));
        }

        let mut res = self.empty_like();
        for &s in self.final_states() {
            res.add_final_state(s);
        }
        for group in groups.into_values() {
            let mut kept: Vec<(TransId, Transition)> = Vec::new();
            for (id, t) in group {
                if kept.iter().any(|(_, k)| dominated(&t, k)) {
                    continue;
                }
                kept.retain(|(_, k)| !dominated(k, &t));
                kept.push((id, t));
            }
            for (id, _) in kept {
                res.add_transition_id(id);
            }
        }
        res
    }

    /// Reduces the automaton by downward simulation equivalence.
    ///
    /// Collapses, removes useless transitions, prunes dominated transitions
    /// and removes unreachable ones. `cons` restricts which states may be related.
    pub fn minimized_with(&self, cons: Option<&Relation>) -> TreeAut {
        let index = self.state_index();
        let mut dwn = self.downward_simulation(&index);
        if let Some(cons) = cons {
            dwn.intersect(cons);
        }
        let collapsed = self.collapsed(&dwn, &index).useless_free();
        let index = collapsed.state_index();
        let dwn = collapsed.downward_simulation(&index);
        collapsed.prune_dominated(&dwn, &index).unreachable_free()
    }

    /// Language-preserving reduction: collapse by the combined simulation,
    /// then reduce by downward simulation.
    pub fn minimized(&self) -> TreeAut {
        let index = self.state_index();
        let dwn = self.downward_simulation(&index);
        let up = self.upward_simulation(&index, &dwn);
        let rel = TreeAut::combined_simulation(&dwn, &up);
        let res = self.collapsed(&rel, &index).minimized_with(None);
        debug!("minimized: {} -> {} transitions", self.len(), res.len());
        res
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::term::Term;
    use crate::treeaut::Backend;
    use crate::types::Label;

    const A: Label = Label::new(1);
    const NIL: Label = Label::new(2);
    const END: Label = Label::new(3);

    fn q(i: usize) -> State {
        State::new(i)
    }

    /// Two copies of the same list language glued under one final state.
    fn redundant_lists() -> TreeAut {
        let mut ta = TreeAut::new(Backend::new());
        ta.add_transition(&[], NIL, q(0));
        ta.add_transition(&[q(0)], A, q(0));
        ta.add_transition(&[], NIL, q(1));
        ta.add_transition(&[q(1)], A, q(1));
        ta.add_transition(&[q(0)], A, q(2));
        ta.add_transition(&[q(1)], A, q(2));
        ta.add_final_state(q(2));
        ta
    }

    #[test]
    fn test_downward_simulation() {
        let ta = redundant_lists();
        let index = ta.state_index();
        let dwn = ta.downward_simulation(&index);
        let (i0, i1, i2) = (index.at(q(0)), index.at(q(1)), index.at(q(2)));
        assert!(dwn.get(i0, i1) && dwn.get(i1, i0));
        // q2 has no NIL transition.
        assert!(dwn.get(i2, i0));
        assert!(!dwn.get(i0, i2));
    }

    #[test]
    fn test_upward_simulation_respects_finals() {
        let ta = redundant_lists();
        let index = ta.state_index();
        let dwn = ta.downward_simulation(&index);
        let up = ta.upward_simulation(&index, &dwn);
        let (i0, i2) = (index.at(q(0)), index.at(q(2)));
        assert!(!up.get(i2, i0));
        assert!(up.get(i0, i0));
    }

    #[test]
    fn test_minimized_preserves_language() {
        let ta = redundant_lists();
        let min = ta.minimized();
        assert!(min.len() < ta.len());
        assert!(min.subseteq(&ta));
        assert!(ta.subseteq(&min));
        for term in Term::enumerate(&ta, 4) {
            assert!(term.accepted_by(&min), "{} lost by minimization", term);
        }
    }

    #[test]
    fn test_prune_dominated() {
        let mut ta = TreeAut::new(Backend::new());
        ta.add_transition(&[], NIL, q(0));
        ta.add_transition(&[], NIL, q(1));
        ta.add_transition(&[q(0)], A, q(1));
        ta.add_transition(&[q(1)], A, q(2));
        ta.add_transition(&[q(0)], A, q(2));
        ta.add_final_state(q(2));
        let index = ta.state_index();
        let dwn = ta.downward_simulation(&index);
        let pruned = ta.prune_dominated(&dwn, &index);
        // A(q0) -> q2 is dominated by A(q1) -> q2.
        assert_eq!(pruned.len(), 4);
        assert!(pruned.subseteq(&ta) && ta.subseteq(&pruned));
    }

    /// Pairs are dropped until nothing changes, checking every pair each round.
    fn downward_by_rounds(ta: &TreeAut, index: &StateIndex) -> Relation {
        let by_rhs = ta.transitions_by_rhs(index);
        let mut rel = Relation::new(index.len(), true);
        let mut changed = true;
        while changed {
            changed = false;
            for p in 0..index.len() {
                for q in 0..index.len() {
                    if !rel.get(p, q) {
                        continue;
                    }
                    let simulated = by_rhs[p].iter().all(|t| {
                        by_rhs[q].iter().any(|u| {
                            t.label() == u.label()
                                && t.arity() == u.arity()
                                && t
                                    .lhs()
                                    .iter()
                                    .zip(u.lhs())
                                    .all(|(&a, &b)| rel.get(index.at(a), index.at(b)))
                        })
                    });
                    if !simulated {
                        rel.set(p, q, false);
                        changed = true;
                    }
                }
            }
        }
        rel
    }

    #[test]
    fn test_drop_propagates_along_chains() {
        // x_i = A^i(NIL) and y_i = A^i(END) differ only at the bottom.
        let length = 8;
        let mut ta = TreeAut::new(Backend::new());
        ta.add_transition(&[], NIL, q(0));
        ta.add_transition(&[], END, q(1));
        for i in 1..length {
            ta.add_transition(&[q(2 * i - 2)], A, q(2 * i));
            ta.add_transition(&[q(2 * i - 1)], A, q(2 * i + 1));
        }
        ta.add_final_state(q(2 * length - 2));
        ta.add_final_state(q(2 * length - 1));

        let index = ta.state_index();
        let dwn = ta.downward_simulation(&index);
        for i in 0..length {
            let (x, y) = (index.at(q(2 * i)), index.at(q(2 * i + 1)));
            assert!(!dwn.get(x, y), "x{} must not be simulated by y{}", i, i);
            assert!(!dwn.get(y, x), "y{} must not be simulated by x{}", i, i);
            assert!(dwn.get(x, x) && dwn.get(y, y));
        }
        assert_eq!(dwn, downward_by_rounds(&ta, &index));

        let up = ta.upward_simulation(&index, &dwn);
        let (top_x, top_y) = (index.at(q(2 * length - 2)), index.at(q(2 * length - 1)));
        assert!(up.get(top_x, top_y) && up.get(top_y, top_x));
    }

    #[test]
    fn test_downward_simulation_matches_rounds() {
        let ta = redundant_lists();
        let index = ta.state_index();
        assert_eq!(ta.downward_simulation(&index), downward_by_rounds(&ta, &index));
    }
}
