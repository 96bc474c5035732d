//! Bottom-up tree automata over interned transitions.
//!
//! A [`TreeAut`] is a set of transition handles plus a set of accepting
//! states. Transitions themselves live in a shared [`Backend`], so copying,
//! restricting and merging automata only shuffles integer handles around,
//! and equal transitions are the same handle in every automaton of one backend.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::relation::{Relation, StateIndex};
use crate::table::Table;
use crate::types::{Label, State};
use crate::utils::{hash_sequence, pairing3, MyHash};

#[derive(Debug, Clone, Default, Eq, PartialEq)]
struct Lhs(Rc<[State]>);

impl MyHash for Lhs {
    fn hash(&self) -> u64 {
        hash_sequence(self.0.iter().map(|s| s.raw() as u64))
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
struct TransKey {
    lhs: usize,
    label: Label,
    rhs: State,
}

impl MyHash for TransKey {
    fn hash(&self) -> u64 {
        pairing3(self.lhs as u64, self.label.index() as u64, self.rhs.raw() as u64)
    }
}

#[derive(Debug)]
struct Interner {
    lhs: Table<Lhs>,
    transitions: Table<TransKey>,
}

/// Handle of an interned transition.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TransId(usize);

/// A transition `label(lhs...) -> rhs`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Transition {
    lhs: Rc<[State]>,
    label: Label,
    rhs: State,
}

impl Transition {
    pub fn new(lhs: &[State], label: Label, rhs: State) -> Self {
        Self {
            lhs: lhs.into(),
            label,
            rhs,
        }
    }

    pub fn lhs(&self) -> &[State] {
        &self.lhs
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn rhs(&self) -> State {
        self.rhs
    }

    pub fn arity(&self) -> usize {
        self.lhs.len()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.label)?;
        for (i, s) in self.lhs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", s)?;
        }
        write!(f, ") -> {}", self.rhs)
    }
}

/// Shared transition store.
///
/// All automata created from the same backend share interned left-hand
/// sides and transitions. The backend only grows.
#[derive(Debug)]
pub struct Backend {
    interner: RefCell<Interner>,
}

impl Backend {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            interner: RefCell::new(Interner {
                lhs: Table::new(12),
                transitions: Table::new(12),
            }),
        })
    }

    fn intern(&self, lhs: &[State], label: Label, rhs: State) -> TransId {
        let mut interner = self.interner.borrow_mut();
        let lhs = interner.lhs.put(Lhs(lhs.into()));
        let id = interner.transitions.put(TransKey { lhs, label, rhs });
        TransId(id)
    }

    /// Looks up the transition behind a handle.
    pub fn transition(&self, id: TransId) -> Transition {
        let interner = self.interner.borrow();
        let key = interner.transitions.value(id.0);
        Transition {
            lhs: interner.lhs.value(key.lhs).0.clone(),
            label: key.label,
            rhs: key.rhs,
        }
    }

    /// Number of distinct transitions interned so far.
    pub fn len(&self) -> usize {
        self.interner.borrow().transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bottom-up tree automaton.
#[derive(Debug, Clone)]
pub struct TreeAut {
    backend: Rc<Backend>,
    transitions: BTreeSet<TransId>,
    finals: BTreeSet<State>,
}

impl TreeAut {
    /// Creates an empty automaton over the given backend.
    pub fn new(backend: Rc<Backend>) -> Self {
        Self {
            backend,
            transitions: BTreeSet::new(),
            finals: BTreeSet::new(),
        }
    }

    /// Creates an empty automaton sharing this automaton's backend.
    pub fn empty_like(&self) -> Self {
        Self::new(self.backend.clone())
    }

    pub fn backend(&self) -> &Rc<Backend> {
        &self.backend
    }

    pub fn add_transition(&mut self, lhs: &[State], label: Label, rhs: State) -> TransId {
        let id = self.backend.intern(lhs, label, rhs);
        self.transitions.insert(id);
        id
    }

    /// Adds a transition already interned in the same backend.
    pub fn add_transition_id(&mut self, id: TransId) {
        self.transitions.insert(id);
    }

    pub fn remove_transition(&mut self, id: TransId) -> bool {
        self.transitions.remove(&id)
    }

    pub fn add_final_state(&mut self, state: State) {
        self.finals.insert(state);
    }

    pub fn clear_final_states(&mut self) {
        self.finals.clear();
    }

    pub fn is_final(&self, state: State) -> bool {
        self.finals.contains(&state)
    }

    pub fn final_states(&self) -> &BTreeSet<State> {
        &self.finals
    }

    /// Returns the only accepting state.
    ///
    /// # Panics
    ///
    /// Panics if the automaton does not have exactly one accepting state.
    pub fn final_state(&self) -> State {
        assert_eq!(self.finals.len(), 1, "Expected exactly one final state");
        match self.finals.first() {
            Some(&s) => s,
            None => unreachable!(),
        }
    }

    pub fn transition_ids(&self) -> impl Iterator<Item = TransId> + '_ {
        self.transitions.iter().copied()
    }

    pub fn transition(&self, id: TransId) -> Transition {
        self.backend.transition(id)
    }

    pub fn transitions(&self) -> impl Iterator<Item = Transition> + '_ {
        self.transitions.iter().map(|&id| self.backend.transition(id))
    }

    pub fn transitions_with_ids(&self) -> impl Iterator<Item = (TransId, Transition)> + '_ {
        self.transitions.iter().map(|&id| (id, self.backend.transition(id)))
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Transitions with the given right-hand side.
    pub fn transitions_to(&self, state: State) -> Vec<Transition> {
        self.transitions().filter(|t| t.rhs() == state).collect()
    }

    /// Transitions leading to an accepting state.
    pub fn accepting_transitions(&self) -> Vec<Transition> {
        self.transitions().filter(|t| self.is_final(t.rhs())).collect()
    }

    /// Returns the only accepting transition.
    ///
    /// # Panics
    ///
    /// Panics if there is not exactly one accepting transition.
    pub fn accepting_transition(&self) -> Transition {
        let mut accepting = self.accepting_transitions();
        assert_eq!(accepting.len(), 1, "Expected exactly one accepting transition");
        accepting.remove(0)
    }

    /// All states mentioned by the automaton, leaves included.
    pub fn states(&self) -> BTreeSet<State> {
        let mut states = self.finals.clone();
        for t in self.transitions() {
            states.extend(t.lhs().iter().copied());
            states.insert(t.rhs());
        }
        states
    }

    /// First internal state id not used by the automaton.
    pub fn next_state(&self) -> usize {
        self.states()
            .into_iter()
            .filter(|s| !s.is_leaf())
            .map(|s| s.id() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Adds all transitions and accepting states of `other`.
    pub fn union_with(&mut self, other: &TreeAut) {
        assert!(Rc::ptr_eq(&self.backend, &other.backend), "Backends differ");
        self.transitions.extend(other.transitions.iter().copied());
        self.finals.extend(other.finals.iter().copied());
    }

    pub fn union(&self, other: &TreeAut) -> TreeAut {
        let mut res = self.clone();
        res.union_with(other);
        res
    }

    /// Union after shifting the internal states of `other` past those of `self`.
    pub fn disjoint_union(&self, other: &TreeAut) -> TreeAut {
        let offset = self.next_state();
        let shifted = other.rename(|s| s.shifted(offset), true);
        self.union(&shifted)
    }

    /// Copies the automaton with internal states renamed by `f`.
    ///
    /// Leaf states are never passed to `f`.
    pub fn rename<F>(&self, mut f: F, add_finals: bool) -> TreeAut
    where
        F: FnMut(State) -> State,
    {
        let mut g = |s: State| if s.is_leaf() { s } else { f(s) };
        let mut res = self.empty_like();
        for t in self.transitions() {
            let lhs: Vec<State> = t.lhs().iter().map(|&s| g(s)).collect();
            res.add_transition(&lhs, t.label(), g(t.rhs()));
        }
        if add_finals {
            for &s in &self.finals {
                res.add_final_state(g(s));
            }
        }
        res
    }

    /// Renames internal states to `offset + i`, with `i` assigned through `index`.
    pub fn rename_nonleaf(&self, index: &mut StateIndex, offset: usize) -> TreeAut {
        self.rename(|s| State::new(index.add(s) + offset), true)
    }

    /// Copies the automaton with its internal states renumbered from 0.
    pub fn reduced(&self) -> TreeAut {
        let mut index = StateIndex::new();
        self.useless_and_unreachable_free().rename_nonleaf(&mut index, 0)
    }

    /// The automaton accepting the language of `state`.
    pub fn sub_automaton(&self, state: State) -> TreeAut {
        let mut res = self.clone();
        res.finals = BTreeSet::from([state]);
        res.unreachable_free()
    }

    /// Copies every transition, plus a copy targeting `map[rhs]` for each
    /// transition whose right-hand side is mapped.
    ///
    /// The copied accepting states are the images of the original ones if
    /// `add_finals` holds.
    pub fn unfold_at_root_into(&self, dst: &mut TreeAut, map: &BTreeMap<State, State>, add_finals: bool) {
        for t in self.transitions() {
            dst.add_transition(t.lhs(), t.label(), t.rhs());
            if let Some(&s) = map.get(&t.rhs()) {
                dst.add_transition(t.lhs(), t.label(), s);
            }
        }
        if add_finals {
            for s in &self.finals {
                if let Some(&m) = map.get(s) {
                    dst.add_final_state(m);
                }
            }
        }
    }

    /// The same language, with a fresh accepting state that never occurs
    /// in a left-hand side.
    pub fn unfold_at_root(&self, fresh: State) -> TreeAut {
        let map: BTreeMap<State, State> = self.finals.iter().map(|&s| (s, fresh)).collect();
        let mut res = self.empty_like();
        self.unfold_at_root_into(&mut res, &map, true);
        res
    }

    /// States from which at least one tree is accepted.
    fn productive_states(&self) -> BTreeSet<State> {
        let transitions: Vec<Transition> = self.transitions().collect();
        let mut productive = BTreeSet::new();
        let mut changed = true;
        while changed {
            changed = false;
            for t in &transitions {
                if !productive.contains(&t.rhs()) && t.lhs().iter().all(|s| productive.contains(s)) {
                    productive.insert(t.rhs());
                    changed = true;
                }
            }
        }
        productive
    }

    /// Removes transitions that can never be part of an accepted tree
    /// because some child state recognises nothing.
    pub fn useless_free(&self) -> TreeAut {
        let productive = self.productive_states();
        let mut res = self.empty_like();
        for (id, t) in self.transitions_with_ids() {
            if t.lhs().iter().all(|s| productive.contains(s)) {
                res.transitions.insert(id);
            }
        }
        res.finals = self.finals.intersection(&productive).copied().collect();
        res
    }

    /// Removes transitions whose right-hand side is not reachable from an
    /// accepting state.
    pub fn unreachable_free(&self) -> TreeAut {
        let transitions: Vec<(TransId, Transition)> = self.transitions_with_ids().collect();
        let mut reachable: BTreeSet<State> = self.finals.clone();
        let mut queue: VecDeque<State> = self.finals.iter().copied().collect();
        while let Some(s) = queue.pop_front() {
            for (_, t) in transitions.iter().filter(|(_, t)| t.rhs() == s) {
                for &c in t.lhs() {
                    if reachable.insert(c) {
                        queue.push_back(c);
                    }
                }
            }
        }
        let mut res = self.empty_like();
        res.finals = self.finals.clone();
        for (id, t) in transitions {
            if reachable.contains(&t.rhs()) {
                res.transitions.insert(id);
            }
        }
        res
    }

    pub fn useless_and_unreachable_free(&self) -> TreeAut {
        self.useless_free().unreachable_free()
    }

    /// Checks whether the automaton accepts no tree at all.
    pub fn is_language_empty(&self) -> bool {
        let productive = self.productive_states();
        self.finals.iter().all(|s| !productive.contains(s))
    }

    /// Merges the states related in both directions by `rel`.
    ///
    /// Each class is represented by its member with the smallest index.
    /// Leaf states are never merged.
    pub fn collapsed(&self, rel: &Relation, index: &StateIndex) -> TreeAut {
        assert_eq!(rel.size(), index.len(), "Relation does not match the state index");
        let mut head: Vec<usize> = (0..index.len()).collect();
        for i in 0..index.len() {
            if index.state(i).is_leaf() {
                continue;
            }
            for j in 0..i {
                if !index.state(j).is_leaf() && rel.get(i, j) && rel.get(j, i) {
                    head[i] = head[j];
                    break;
                }
            }
        }
        let res = self.rename(
            |s| match index.get(s) {
                Some(i) => index.state(head[i]),
                None => s,
            },
            true,
        );
        debug!(
            "collapsed: {} -> {} transitions",
            self.transitions.len(),
            res.transitions.len()
        );
        res
    }

    /// Product automaton of `self` and `other`, keeping pairs of transitions
    /// with equal labels.
    pub fn intersection(&self, other: &TreeAut) -> (TreeAut, BTreeMap<(State, State), State>) {
        self.intersection_with(other, |a, b| a.label() == b.label())
    }

    /// Product automaton of `self` and `other`, keeping pairs of
    /// transitions accepted by `matches` and with equal arity.
    ///
    /// Returns the product and the map from state pairs to product states.
    /// A pair of equal leaves keeps the leaf.
    pub fn intersection_with<F>(&self, other: &TreeAut, matches: F) -> (TreeAut, BTreeMap<(State, State), State>)
    where
        F: Fn(&Transition, &Transition) -> bool,
    {
        let ts1: Vec<Transition> = self.transitions().collect();
        let ts2: Vec<Transition> = other.transitions().collect();
        let mut product: BTreeMap<(State, State), State> = BTreeMap::new();
        let mut next = 0usize;
        let mut res = self.empty_like();

        let mut changed = true;
        while changed {
            changed = false;
            for t1 in &ts1 {
                for t2 in &ts2 {
                    if t1.arity() != t2.arity() || !matches(t1, t2) {
                        continue;
                    }
                    let lhs: Option<Vec<State>> = t1
                        .lhs()
                        .iter()
                        .zip(t2.lhs())
                        .map(|(&a, &b)| product.get(&(a, b)).copied())
                        .collect();
                    let Some(lhs) = lhs else {
                        continue;
                    };
                    let key = (t1.rhs(), t2.rhs());
                    let rhs = match product.get(&key) {
                        Some(&s) => s,
                        None => {
                            let s = if key.0.is_leaf() && key.0 == key.1 {
                                key.0
                            } else {
                                next += 1;
                                State::new(next - 1)
                            };
                            product.insert(key, s);
                            changed = true;
                            s
                        }
                    };
                    let id = res.backend.intern(&lhs, t1.label(), rhs);
                    changed |= res.transitions.insert(id);
                }
            }
        }

        for &f1 in &self.finals {
            for &f2 in &other.finals {
                if let Some(&s) = product.get(&(f1, f2)) {
                    res.add_final_state(s);
                }
            }
        }
        (res, product)
    }
}

impl fmt::Display for TreeAut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, s) in self.finals.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", s)?;
        }
        writeln!(f, "]")?;
        for t in self.transitions() {
            writeln!(f, "  {}", t)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    const A: Label = Label::new(1);
    const B: Label = Label::new(2);
    const NIL: Label = Label::new(3);

    fn q(i: usize) -> State {
        State::new(i)
    }

    /// Lists of `A` nodes ending with `NIL`: q0 <- A(q0) | NIL.
    fn list(backend: &Rc<Backend>) -> TreeAut {
        let mut ta = TreeAut::new(backend.clone());
        ta.add_transition(&[], NIL, q(0));
        ta.add_transition(&[q(0)], A, q(0));
        ta.add_final_state(q(0));
        ta
    }

    #[test]
    fn test_interning_shares_transitions() {
        let backend = Backend::new();
        let a = list(&backend);
        let b = list(&backend);
        assert_eq!(backend.len(), 2);
        assert_eq!(
            a.transition_ids().collect::<Vec<_>>(),
            b.transition_ids().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_accepting_transition() {
        let backend = Backend::new();
        let mut ta = TreeAut::new(backend);
        ta.add_transition(&[], NIL, q(0));
        ta.add_transition(&[q(0), q(0)], B, q(1));
        ta.add_final_state(q(1));
        let t = ta.accepting_transition();
        assert_eq!(t.label(), B);
        assert_eq!(t.lhs(), &[q(0), q(0)]);
        assert_eq!(ta.final_state(), q(1));
        assert_eq!(ta.next_state(), 2);
    }

    #[test]
    fn test_useless_and_unreachable_free() {
        let backend = Backend::new();
        let mut ta = list(&backend);
        // q1 recognises nothing, q2 is never used from q0.
        ta.add_transition(&[q(1)], B, q(0));
        ta.add_transition(&[], NIL, q(2));
        let useless = ta.useless_free();
        assert_eq!(useless.len(), 3);
        let clean = useless.unreachable_free();
        assert_eq!(clean.len(), 2);
        assert!(!clean.is_language_empty());
    }

    #[test]
    fn test_language_empty() {
        let backend = Backend::new();
        let mut ta = TreeAut::new(backend);
        ta.add_transition(&[q(0)], A, q(0));
        ta.add_final_state(q(0));
        assert!(ta.is_language_empty());
        assert!(ta.useless_free().is_empty());
    }

    #[test]
    fn test_rename_keeps_leaves() {
        let backend = Backend::new();
        let mut ta = TreeAut::new(backend);
        ta.add_transition(&[], NIL, State::leaf(0));
        ta.add_transition(&[State::leaf(0)], A, q(4));
        ta.add_final_state(q(4));
        let mut index = StateIndex::new();
        let renamed = ta.rename_nonleaf(&mut index, 10);
        assert_eq!(renamed.final_state(), q(10));
        assert!(renamed.states().contains(&State::leaf(0)));
    }

    #[test]
    fn test_disjoint_union() {
        let backend = Backend::new();
        let a = list(&backend);
        let b = list(&backend);
        let u = a.disjoint_union(&b);
        assert_eq!(u.len(), 4);
        assert_eq!(u.final_states().len(), 2);
    }

    #[test]
    fn test_unfold_at_root() {
        let backend = Backend::new();
        let ta = list(&backend);
        let unfolded = ta.unfold_at_root(q(7));
        assert_eq!(unfolded.final_state(), q(7));
        // The fresh root never occurs below itself.
        assert!(unfolded.transitions().all(|t| !t.lhs().contains(&q(7))));
        assert_eq!(unfolded.len(), 4);
    }

    #[test]
    fn test_intersection() {
        let backend = Backend::new();
        let a = list(&backend);
        // Lists of length one exactly.
        let mut b = TreeAut::new(backend);
        b.add_transition(&[], NIL, q(0));
        b.add_transition(&[q(0)], A, q(1));
        b.add_final_state(q(1));
        let (product, map) = a.intersection(&b);
        assert_eq!(map.len(), 2);
        assert_eq!(product.final_states().len(), 1);
        assert!(!product.is_language_empty());
    }

    #[test]
    fn test_collapsed() {
        let backend = Backend::new();
        let mut ta = TreeAut::new(backend);
        ta.add_transition(&[], NIL, q(0));
        ta.add_transition(&[q(0)], A, q(1));
        ta.add_transition(&[q(1)], A, q(2));
        ta.add_final_state(q(2));
        let index: StateIndex = [q(0), q(1), q(2)].into_iter().collect();
        let mut rel = Relation::identity(3);
        rel.set(1, 2, true);
        rel.set(2, 1, true);
        let collapsed = ta.collapsed(&rel, &index);
        assert_eq!(collapsed.final_state(), q(1));
        assert_eq!(collapsed.len(), 3);
    }
}
