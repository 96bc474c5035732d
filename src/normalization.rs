//! Canonical root order and merging of uniquely referenced roots.
//!
//! Roots are ordered by a depth-first traversal of the connection graph
//! starting from the program variables. A root stays separate when it is
//! *marked*: pointed to by a variable, referenced more than once, reached
//! again during the traversal, or explicitly forbidden. Every other root is
//! merged into the root referring to it.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::data::Data;
use crate::error::{FaError, FaResult};
use crate::forest::Fae;
use crate::treeaut::TreeAut;

impl Fae {
    /// Plugs root `src` into the reference leaf of `dst` pointing to it.
    fn merge_root(&mut self, dst: usize, src: usize) -> TreeAut {
        let ref_state = self.leaf_state(&Data::reference(src));
        let dst_ta = self.root_ta(dst).clone();
        let src_ta = self.root_ta(src).clone();

        let mut ta = self.alloc_ta();
        for &f in dst_ta.final_states() {
            ta.add_final_state(f);
        }
        let mut join_states = Vec::new();
        let mut join_map = BTreeMap::new();
        for &f in src_ta.final_states() {
            let s = self.fresh_state();
            join_states.push(s);
            join_map.insert(f, s);
        }

        let mut hit = false;
        for t in dst_ta.transitions() {
            match t.lhs().iter().position(|&s| s == ref_state) {
                Some(j) => {
                    for &s in &join_states {
                        let mut lhs = t.lhs().to_vec();
                        lhs[j] = s;
                        ta.add_transition(&lhs, t.label(), t.rhs());
                    }
                    hit = true;
                }
                None => {
                    ta.add_transition(t.lhs(), t.label(), t.rhs());
                }
            }
        }
        assert!(hit, "Root {} does not refer to root {}", dst, src);
        src_ta.unfold_at_root_into(&mut ta, &join_map, false);
        // The copies of `src` into its old accepting states are dead now.
        ta.unreachable_free()
    }

    /// Depth-first traversal from the variables.
    ///
    /// Returns the visited roots, the visit order and the marked roots.
    pub fn traverse(&self) -> (Vec<bool>, Vec<usize>, Vec<bool>) {
        let n = self.root_count();
        let mut visited = vec![false; n];
        let mut marked = vec![false; n];
        let mut order = Vec::new();
        for var in &self.variables {
            let Some(root) = var.root() else {
                continue;
            };
            marked[root] = true;
            if visited[root] {
                continue;
            }
            self.connection_graph.visit(root, &mut visited, &mut order, &mut marked);
        }
        (visited, order, marked)
    }

    fn check_garbage(&self, visited: &[bool], operation: &'static str) -> FaResult<()> {
        let mut garbage = None;
        for (i, root) in self.roots.iter().enumerate() {
            if root.is_some() && !visited[i] {
                debug!(
                    "{}: root {} is not referenced anymore [{}]",
                    operation,
                    i,
                    self.connection_graph.root(i)
                );
                garbage.get_or_insert(i);
            }
        }
        match garbage {
            Some(root) => Err(FaError::GarbageDetected { root, operation }),
            None => Ok(()),
        }
    }

    /// Checks that every present root is reachable from some variable.
    pub fn check(&mut self) -> FaResult<()> {
        self.update_connection_graph();
        let mut visited = vec![false; self.root_count()];
        for var in &self.variables {
            if let Some(root) = var.root() {
                self.connection_graph.visit_reachable(root, &mut visited);
            }
        }
        self.check_garbage(&visited, "check")
    }

    fn normalize_root(&mut self, normalized: &mut [bool], root: usize, marked: &[bool]) {
        if normalized[root] {
            return;
        }
        normalized[root] = true;
        let signature = self.connection_graph.signature(root).clone();
        for cutpoint in &signature {
            self.normalize_root(normalized, cutpoint.root, marked);
            if marked[cutpoint.root] {
                continue;
            }
            assert_ne!(root, cutpoint.root, "Unmarked self reference at root {}", root);
            let ta = self.merge_root(root, cutpoint.root);
            self.set_root(root, Some(ta));
            self.set_root(cutpoint.root, None);
            self.connection_graph.merge_cutpoint(root, cutpoint.root);
            debug!("normalize: merged root {} into {}", cutpoint.root, root);
        }
    }

    /// Checks whether `target` is reachable from `root` through unmarked roots.
    fn self_reachable(&self, root: usize, target: usize, marked: &[bool]) -> bool {
        self.self_reachable_from(root, target, marked, &mut vec![false; self.root_count()])
    }

    fn self_reachable_from(&self, root: usize, target: usize, marked: &[bool], seen: &mut [bool]) -> bool {
        if seen[root] {
            return false;
        }
        seen[root] = true;
        for cutpoint in self.connection_graph.signature(root) {
            if cutpoint.root == target {
                return true;
            }
            if marked[cutpoint.root] {
                continue;
            }
            if self.self_reachable_from(cutpoint.root, target, marked, seen) {
                return true;
            }
        }
        false
    }

    /// Computes the marked roots and the canonical order.
    ///
    /// Forbidden roots are marked. In `extended` mode, the first cutpoint of
    /// a forbidden root that leads back to it is marked too.
    pub fn scan(&self, forbidden: &BTreeSet<usize>, extended: bool) -> FaResult<(Vec<bool>, Vec<usize>)> {
        assert!(self.connection_graph.is_valid(), "Connection graph is out of date");
        let (visited, order, mut marked) = self.traverse();
        self.check_garbage(&visited, "normalize")?;

        for &x in forbidden {
            marked[x] = true;
            if !extended {
                continue;
            }
            for cutpoint in self.connection_graph.signature(x) {
                if cutpoint.root != x && !self.self_reachable(cutpoint.root, x, &marked) {
                    continue;
                }
                marked[cutpoint.root] = true;
                break;
            }
        }
        Ok((marked, order))
    }

    /// Merges unmarked roots and reorders the rest by `order`.
    ///
    /// Returns whether some root was merged.
    pub fn normalize_with(&mut self, marked: &[bool], order: &[usize]) -> bool {
        let canonical = order.iter().enumerate().all(|(i, &r)| r == i && marked[i]);
        if canonical {
            self.roots.truncate(order.len());
            self.connection_graph.resize(order.len());
            return false;
        }

        let n = self.root_count();
        let mut index = vec![None; n];
        let mut normalized = vec![false; n];
        let mut new_roots = Vec::with_capacity(order.len());
        let mut merged = false;
        for &i in order {
            self.normalize_root(&mut normalized, i, marked);
            if !marked[i] {
                merged = true;
                continue;
            }
            index[i] = Some(new_roots.len());
            new_roots.push(self.roots[i].clone());
        }

        self.roots = new_roots;
        for i in 0..self.roots.len() {
            let ta = self.relabel_references(self.root_ta(i), &index);
            self.set_root(i, Some(ta));
        }
        self.connection_graph.finish_normalization(self.roots.len(), &index);
        self.update_vars_root_refs(&index);
        merged
    }

    /// Brings the snapshot to canonical form. Returns whether some root was merged.
    pub fn normalize(&mut self, forbidden: &BTreeSet<usize>, extended: bool) -> FaResult<bool> {
        self.update_connection_graph();
        let (marked, order) = self.scan(forbidden, extended)?;
        let merged = self.normalize_with(&marked, &order);
        debug!("normalize: {} roots, merged = {}", self.root_count(), merged);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::boxman::BoxMan;
    use crate::data::SelData;

    fn sels() -> Vec<SelData> {
        vec![SelData::new(0, 8, 0, "next")]
    }

    /// x -> n2 -> n1 -> null
    fn two_nodes() -> Fae {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let n1 = fae.node_create(&sels(), None);
        fae.node_modify(n1, 0, Data::null()).unwrap();
        let n2 = fae.node_create(&sels(), None);
        fae.node_modify(n2, 0, Data::reference(n1)).unwrap();
        fae.var_push(Data::reference(n2));
        fae
    }

    #[test]
    fn test_merge_chain() {
        let mut fae = two_nodes();
        assert_eq!(fae.root_count(), 2);
        assert_eq!(fae.normalize(&BTreeSet::new(), false), Ok(true));
        assert_eq!(fae.root_count(), 1);
        assert_eq!(fae.var_get(0), &Data::reference(0));
        let t = fae.root_ta(0).accepting_transition();
        assert!(!t.lhs()[0].is_leaf());
    }

    #[test]
    fn test_merge_leaves_no_dead_transitions() {
        let mut fae = two_nodes();
        let parts = fae.root_ta(0).len() + fae.root_ta(1).len();
        fae.normalize(&BTreeSet::new(), false).unwrap();
        let ta = fae.root_ta(0);
        assert_eq!(ta.unreachable_free().len(), ta.len());
        assert!(ta.len() <= parts);
    }

    #[test]
    fn test_normalize_idempotent() {
        let mut fae = two_nodes();
        fae.normalize(&BTreeSet::new(), false).unwrap();
        let before = fae.root_ta(0).clone();
        assert_eq!(fae.normalize(&BTreeSet::new(), false), Ok(false));
        assert_eq!(fae.root_count(), 1);
        assert!(before.language_eq(fae.root_ta(0)));
    }

    #[test]
    fn test_forbidden_root_stays() {
        let mut fae = two_nodes();
        let forbidden = BTreeSet::from([0]);
        assert_eq!(fae.normalize(&forbidden, false), Ok(false));
        assert_eq!(fae.root_count(), 2);
        // Roots follow the traversal order.
        assert_eq!(fae.var_get(0), &Data::reference(0));
        assert!(fae.connection_graph().has_reference(0, 1));
    }

    #[test]
    fn test_shared_root_stays() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let c = fae.node_create(&sels(), None);
        fae.node_modify(c, 0, Data::null()).unwrap();
        let a = fae.node_create(&sels(), None);
        fae.node_modify(a, 0, Data::reference(c)).unwrap();
        let b = fae.node_create(&sels(), None);
        fae.node_modify(b, 0, Data::reference(c)).unwrap();
        fae.var_push(Data::reference(a));
        fae.var_push(Data::reference(b));
        assert_eq!(fae.normalize(&BTreeSet::new(), false), Ok(false));
        assert_eq!(fae.root_count(), 3);
        assert_eq!(fae.var_get(0), &Data::reference(0));
        assert_eq!(fae.var_get(1), &Data::reference(2));
        assert!(fae.connection_graph().has_reference(2, 1));
    }

    #[test]
    fn test_garbage_detected() {
        let mut fae = two_nodes();
        let lost = fae.node_create(&sels(), None);
        assert_eq!(
            fae.normalize(&BTreeSet::new(), false),
            Err(FaError::GarbageDetected {
                root: lost,
                operation: "normalize"
            })
        );
        assert!(fae.check().is_err());
    }

    #[test]
    fn test_delete_leaves_no_garbage() {
        let mut fae = two_nodes();
        fae.node_modify(1, 0, Data::null()).unwrap();
        fae.node_delete(0);
        assert!(fae.check().is_ok());
        assert_eq!(fae.normalize(&BTreeSet::new(), false), Ok(false));
        assert_eq!(fae.live_root_count(), 1);
        assert_eq!(fae.var_get(0), &Data::reference(0));
    }
}
