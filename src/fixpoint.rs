//! Fixpoint computation at loop heads.
//!
//! Every snapshot reaching a loop head is folded, normalized and (for
//! [`FixpointKind::Abs`]) abstracted, then tested for inclusion in the
//! configurations accumulated so far. A hit ends the trace; a miss extends
//! the accumulator and lets the snapshot continue.

use std::collections::BTreeSet;
use std::rc::Rc;

use log::{debug, info};

use crate::boxman::BoxMan;
use crate::config::AnalysisConfig;
use crate::error::FaResult;
use crate::forest::Fae;
use crate::treeaut::TreeAut;
use crate::ufae::Ufae;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FixpointKind {
    /// Fold and normalize until nothing changes.
    Fix,
    /// Alternate abstraction with folding until folding stops changing.
    Abs,
}

/// Outcome of one fixpoint step.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// The snapshot is covered by the accumulated configurations.
    Hit,
    /// The accumulator was extended; exploration continues with this snapshot.
    Extended(Fae),
}

impl Verdict {
    pub fn is_hit(&self) -> bool {
        matches!(self, Verdict::Hit)
    }
}

/// Accumulated configurations of one program point.
#[derive(Debug)]
pub struct Fixpoint {
    kind: FixpointKind,
    config: AnalysisConfig,
    boxman: Rc<BoxMan>,
    fwd_conf: Ufae,
}

impl Fixpoint {
    pub fn new(kind: FixpointKind, boxman: Rc<BoxMan>, config: AnalysisConfig) -> Self {
        let fwd_conf = Ufae::new(boxman.clone());
        Self {
            kind,
            config,
            boxman,
            fwd_conf,
        }
    }

    pub fn kind(&self) -> FixpointKind {
        self.kind
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The accumulated configurations as one tree automaton.
    pub fn fwd_conf(&self) -> &TreeAut {
        self.fwd_conf.ta()
    }

    /// Roots targeted by the pinned variables.
    fn pinned_roots(&self, fae: &Fae) -> BTreeSet<usize> {
        self.config
            .pinned_variables
            .iter()
            .filter_map(|&v| fae.variables().get(v).and_then(|d| d.root()))
            .collect()
    }

    /// Registers boxes found in `fae` without the two-strikes rule.
    pub fn learn(&self, fae: &mut Fae) -> FaResult<()> {
        fae.unreachable_free();
        fae.update_connection_graph();
        if !self.config.learn_boxes {
            return Ok(());
        }
        let forbidden = fae.compute_forbidden_set(&self.config.pinned_variables);
        fae.fold(&forbidden, false)?;
        Ok(())
    }

    /// One round of folding and normalization; returns whether a box was used.
    pub fn fold_and_normalize(&self, fae: &mut Fae) -> FaResult<bool> {
        fae.unreachable_free();
        fae.update_connection_graph();

        if self.boxman.box_count() == 0 {
            let forbidden = fae.compute_forbidden_set(&self.config.pinned_variables);
            fae.normalize(&forbidden, true)?;
            return Ok(false);
        }

        let pinned = self.pinned_roots(fae);
        let matched = fae.fold(&pinned, self.config.conditional_folding)?;
        let forbidden = fae.compute_forbidden_set(&self.config.pinned_variables);
        fae.normalize(&forbidden, true)?;
        let pinned = self.pinned_roots(fae);
        let matched_again = fae.fold(&pinned, self.config.conditional_folding)?;
        self.boxman.clear_box_cache();
        debug!("fold_and_normalize: matched = {}", matched || matched_again);
        Ok(matched || matched_again)
    }

    fn abstract_fae(&self, fae: &mut Fae) {
        fae.unreachable_free();
        let forbidden = fae.compute_forbidden_set(&self.config.pinned_variables);
        fae.abstract_roots(&self.config, &forbidden);
    }

    /// Checks `fae` against the accumulator and extends it on a miss.
    pub fn test_inclusion(&mut self, fae: &mut Fae) -> bool {
        fae.unreachable_free();
        let (ta, index) = self.fwd_conf.fae_to_ta(fae);
        if ta.subseteq(self.fwd_conf.ta()) {
            return true;
        }
        info!("Extending fixpoint with {} roots", fae.root_count());
        self.fwd_conf.join(&ta, &index);
        self.fwd_conf.minimize();
        false
    }

    /// Processes one snapshot reaching the loop head.
    pub fn execute(&mut self, fae: &Fae) -> FaResult<Verdict> {
        let mut fae = fae.clone();
        self.learn(&mut fae)?;

        let mut rounds = 0;
        match self.kind {
            FixpointKind::Fix => {
                while self.config.round_allowed(rounds) && self.fold_and_normalize(&mut fae)? {
                    rounds += 1;
                }
            }
            FixpointKind::Abs => {
                self.fold_and_normalize(&mut fae)?;
                loop {
                    self.abstract_fae(&mut fae);
                    rounds += 1;
                    if !self.fold_and_normalize(&mut fae)? || !self.config.round_allowed(rounds) {
                        break;
                    }
                }
            }
        }

        if self.test_inclusion(&mut fae) {
            info!("Fixpoint hit after {} rounds", rounds);
            Ok(Verdict::Hit)
        } else {
            Ok(Verdict::Extended(fae))
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::data::{Data, SelData};
    use crate::error::FaError;

    fn next() -> Vec<SelData> {
        vec![SelData::new(0, 8, 0, "next")]
    }

    fn sels() -> Vec<SelData> {
        vec![SelData::new(0, 8, 0, "next"), SelData::new(8, 8, 0, "data")]
    }

    /// `tail -> null`, `head -> ... -> tail` with `length` nodes in total.
    /// Variables point to the tail and the head.
    fn list(boxman: &Rc<BoxMan>, length: usize) -> Fae {
        let mut fae = Fae::new(boxman.clone());
        let tail = fae.node_create(&next(), None);
        fae.node_modify(tail, 0, Data::null()).unwrap();
        let mut head = tail;
        for _ in 1..length {
            let n = fae.node_create(&next(), None);
            fae.node_modify(n, 0, Data::reference(head)).unwrap();
            head = n;
        }
        fae.var_push(Data::reference(tail));
        fae.var_push(Data::reference(head));
        fae
    }

    #[test]
    fn test_cyclic_pair_converges() {
        let boxman = Rc::new(BoxMan::default());
        let mut fae = Fae::new(boxman.clone());
        let a = fae.node_create(&sels(), None);
        let b = fae.node_create(&sels(), None);
        fae.node_modify(a, 0, Data::reference(b)).unwrap();
        fae.node_modify(b, 0, Data::reference(a)).unwrap();
        fae.var_push(Data::reference(a));

        let mut fixpoint = Fixpoint::new(FixpointKind::Fix, boxman.clone(), AnalysisConfig::default());
        let Verdict::Extended(folded) = fixpoint.execute(&fae).unwrap() else {
            panic!("First snapshot must extend the fixpoint");
        };
        assert_eq!(boxman.box_count(), 1);
        assert_eq!(folded.root_count(), 1);
        assert!(fixpoint.execute(&fae).unwrap().is_hit());
    }

    #[test]
    fn test_abstraction_covers_longer_lists() {
        let boxman = Rc::new(BoxMan::default());
        let mut fixpoint = Fixpoint::new(FixpointKind::Abs, boxman.clone(), AnalysisConfig::default());

        let verdict = fixpoint.execute(&list(&boxman, 3)).unwrap();
        let Verdict::Extended(summary) = verdict else {
            panic!("First snapshot must extend the fixpoint");
        };
        assert_eq!(summary.root_count(), 2);
        assert!(fixpoint.execute(&list(&boxman, 4)).unwrap().is_hit());
        assert!(fixpoint.execute(&list(&boxman, 6)).unwrap().is_hit());
    }

    #[test]
    fn test_abstraction_covers_list_from_one_variable() {
        let boxman = Rc::new(BoxMan::default());
        let mut fixpoint = Fixpoint::new(FixpointKind::Abs, boxman.clone(), AnalysisConfig::default());

        let from_head = |length| {
            let mut fae = list(&boxman, length);
            let head = fae.var_get(1).clone();
            fae.var_remove(2);
            fae.var_push(head);
            fae
        };
        let Verdict::Extended(summary) = fixpoint.execute(&from_head(3)).unwrap() else {
            panic!("First snapshot must extend the fixpoint");
        };
        assert_eq!(summary.root_count(), 1);
        assert!(fixpoint.execute(&from_head(4)).unwrap().is_hit());
        assert!(fixpoint.execute(&from_head(6)).unwrap().is_hit());
    }

    #[test]
    fn test_fix_does_not_generalize() {
        let boxman = Rc::new(BoxMan::default());
        let mut fixpoint = Fixpoint::new(FixpointKind::Fix, boxman.clone(), AnalysisConfig::default());
        assert!(!fixpoint.execute(&list(&boxman, 3)).unwrap().is_hit());
        assert!(fixpoint.execute(&list(&boxman, 3)).unwrap().is_hit());
        assert!(!fixpoint.execute(&list(&boxman, 4)).unwrap().is_hit());
    }

    #[test]
    fn test_garbage_aborts() {
        let boxman = Rc::new(BoxMan::default());
        let mut fae = list(&boxman, 2);
        let lost = fae.node_create(&next(), None);
        let mut fixpoint = Fixpoint::new(FixpointKind::Fix, boxman, AnalysisConfig::default());
        assert_eq!(
            fixpoint.execute(&fae).unwrap_err(),
            FaError::GarbageDetected {
                root: lost,
                operation: "normalize"
            }
        );
        assert!(fixpoint.fwd_conf().is_empty());
    }
}
