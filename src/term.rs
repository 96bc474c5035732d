//! Explicit finite trees, for spot-checking automaton languages.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::treeaut::TreeAut;
use crate::types::{Label, State};
use crate::utils::for_each_product;

/// Bound on the number of trees kept per state while enumerating.
const MAX_TERMS_PER_STATE: usize = 4096;

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Term {
    label: Label,
    children: Vec<Term>,
}

impl Term {
    pub fn new(label: Label, children: Vec<Term>) -> Self {
        Self { label, children }
    }

    pub fn leaf(label: Label) -> Self {
        Self::new(label, Vec::new())
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn children(&self) -> &[Term] {
        &self.children
    }

    pub fn height(&self) -> usize {
        1 + self.children.iter().map(Term::height).max().unwrap_or(0)
    }

    /// States of `ta` that accept this tree.
    pub fn run(&self, ta: &TreeAut) -> BTreeSet<State> {
        let children: Vec<BTreeSet<State>> = self.children.iter().map(|c| c.run(ta)).collect();
        ta.transitions()
            .filter(|t| {
                t.label() == self.label
                    && t.arity() == children.len()
                    && t.lhs().iter().zip(&children).all(|(s, cs)| cs.contains(s))
            })
            .map(|t| t.rhs())
            .collect()
    }

    pub fn accepted_by(&self, ta: &TreeAut) -> bool {
        self.run(ta).iter().any(|&s| ta.is_final(s))
    }

    /// Accepted trees of height at most `height`.
    pub fn enumerate(ta: &TreeAut, height: usize) -> Vec<Term> {
        let transitions: Vec<_> = ta.transitions().collect();
        let mut terms: BTreeMap<State, BTreeSet<Term>> = BTreeMap::new();
        for _ in 0..height {
            let mut next: BTreeMap<State, BTreeSet<Term>> = BTreeMap::new();
            for t in &transitions {
                let choices: Vec<Vec<&Term>> = t
                    .lhs()
                    .iter()
                    .map(|s| terms.get(s).map(|ts| ts.iter().collect()).unwrap_or_default())
                    .collect();
                let lens: Vec<usize> = choices.iter().map(Vec::len).collect();
                let entry = next.entry(t.rhs()).or_default();
                for_each_product(&lens, |tuple| {
                    if entry.len() < MAX_TERMS_PER_STATE {
                        let children = tuple.iter().enumerate().map(|(i, &k)| choices[i][k].clone()).collect();
                        entry.insert(Term::new(t.label(), children));
                    }
                });
            }
            terms = next;
        }
        let accepted: BTreeSet<Term> = ta
            .final_states()
            .iter()
            .filter_map(|s| terms.get(s))
            .flatten()
            .cloned()
            .collect();
        accepted.into_iter().collect()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if !self.children.is_empty() {
            write!(f, "(")?;
            for (i, c) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", c)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::treeaut::Backend;

    const A: Label = Label::new(1);
    const NIL: Label = Label::new(2);

    #[test]
    fn test_enumerate_lists() {
        let mut ta = TreeAut::new(Backend::new());
        ta.add_transition(&[], NIL, State::new(0));
        ta.add_transition(&[State::new(0)], A, State::new(0));
        ta.add_final_state(State::new(0));
        let terms = Term::enumerate(&ta, 3);
        assert_eq!(terms.len(), 3);
        assert!(terms.iter().all(|t| t.accepted_by(&ta)));
        assert_eq!(terms.iter().map(Term::height).max(), Some(3));
    }

    #[test]
    fn test_run_and_display() {
        let mut ta = TreeAut::new(Backend::new());
        ta.add_transition(&[], NIL, State::new(0));
        ta.add_transition(&[State::new(0)], A, State::new(1));
        ta.add_final_state(State::new(1));
        let term = Term::new(A, vec![Term::leaf(NIL)]);
        assert!(term.accepted_by(&ta));
        assert!(!Term::leaf(NIL).accepted_by(&ta));
        assert_eq!(term.to_string(), "l1(l2)");
    }
}
