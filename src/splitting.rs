//! Isolation of selectors.
//!
//! Before a selector of a root can be read or written it must appear as a
//! plain child of the root's accepting transition. Isolation splits a
//! snapshot into one snapshot per accepting transition, cuts children into
//! new roots and unfolds every box hiding one of the requested selectors,
//! either at the root itself or in the input part of a box pointing at it.

use std::collections::BTreeSet;
use std::rc::Rc;

use log::debug;

use crate::connection::{compute_signatures, contains_cutpoint, fix_signatures};
use crate::data::Data;
use crate::forest::Fae;
use crate::label::AbstractBox;
use crate::nested_box::NestedBox;
use crate::treeaut::Transition;

fn is_box(b: &AbstractBox, abox: &Rc<NestedBox>) -> bool {
    b.as_nested().is_some_and(|n| Rc::ptr_eq(n, abox))
}

impl Fae {
    /// Selector offsets covered by the accepting label of `target`.
    pub fn selectors_at_root(&self, target: usize) -> BTreeSet<usize> {
        let Some(t) = self.root_ta(target).accepting_transitions().into_iter().next() else {
            panic!("Root {} has no accepting transition", target);
        };
        let info = self.boxman.label(t.label());
        match info.node() {
            Some(node) => node.output_coverage(),
            None => BTreeSet::new(),
        }
    }

    /// Selector offsets of `target` covered by input parts of boxes in `root`
    /// whose parameter refers to `target`.
    pub fn selectors_at_leaf(&self, root: usize, target: usize) -> BTreeSet<usize> {
        let mut selectors = BTreeSet::new();
        for t in self.root_ta(root).transitions() {
            let info = self.boxman.label(t.label());
            let Some(node) = info.node() else {
                continue;
            };
            for (b, offset) in node.iter_boxes() {
                let Some(nb) = b.as_nested() else {
                    continue;
                };
                for k in 0..nb.arity() {
                    if self.get_ref(t.lhs()[offset + k]) == Some(target) {
                        selectors.extend(nb.input_coverage(k).iter().copied());
                    }
                }
            }
        }
        selectors
    }

    /// First box of `t` whose parameter refers to `target` and whose input
    /// part covers `selector`.
    fn leaf_scan(&self, t: &Transition, selector: usize, target: usize) -> Option<Rc<NestedBox>> {
        let info = self.boxman.label(t.label());
        let node = info.node()?;
        let found = node.iter_boxes().find_map(|(b, offset)| {
            let nb = b.as_nested()?;
            (0..nb.arity())
                .any(|k| self.get_ref(t.lhs()[offset + k]) == Some(target) && nb.input_coverage(k).contains(&selector))
                .then(|| nb.clone())
        });
        found
    }

    /// Makes `t` the only accepting transition of `root` and cuts every
    /// internal child of the boxes selected by `f` into a new root.
    ///
    /// Returns the nested boxes selected by `f`.
    pub(crate) fn isolate_at_root_with<F>(&mut self, root: usize, t: &Transition, f: F) -> Vec<Rc<NestedBox>>
    where
        F: Fn(&AbstractBox) -> bool,
    {
        let boxman = self.boxman.clone();
        let info = boxman.label(t.label());
        let Some(node) = info.node() else {
            panic!("Accepting label {} of root {} is not a node", info, root);
        };

        let new_state = self.fresh_state();
        let src = self.root_ta(root).clone();
        let mut ta = (*src).clone();
        ta.clear_final_states();
        ta.add_final_state(new_state);

        let mut lhs = Vec::with_capacity(t.arity());
        let mut boxes: Vec<Rc<NestedBox>> = Vec::new();
        for (b, offset) in node.iter_boxes() {
            let children = &t.lhs()[offset..offset + b.arity()];
            if !b.is_structural() || !f(b) {
                lhs.extend_from_slice(children);
                continue;
            }
            for &s in children {
                if s.is_leaf() {
                    lhs.push(s);
                    continue;
                }
                lhs.push(self.add_data(&mut ta, &Data::reference(self.root_count())));
                let mut tmp = (*src).clone();
                tmp.clear_final_states();
                tmp.add_final_state(s);
                self.append_root(tmp.unreachable_free());
            }
            if let Some(nb) = b.as_nested() {
                if !boxes.iter().any(|x| Rc::ptr_eq(x, nb)) {
                    boxes.push(nb.clone());
                }
            }
        }

        ta.add_transition(&lhs, t.label(), new_state);
        self.set_root(root, Some(ta.unreachable_free()));
        self.connection_graph.invalidate(root);
        boxes
    }

    fn isolate_at_root(&self, out: &mut Vec<Fae>, root: usize, offsets: &[usize]) {
        let wanted: BTreeSet<usize> = offsets.iter().copied().collect();
        for t in self.root_ta(root).accepting_transitions() {
            let mut fae = self.clone();
            let boxes = fae.isolate_at_root_with(root, &t, |b| !b.output_coverage().is_disjoint(&wanted));
            if boxes.is_empty() {
                out.push(fae);
            } else {
                fae.unfold_boxes(root, &boxes);
                fae.isolate_set_into(out, root, 0, offsets);
            }
        }
    }

    /// Unfolds a box of `root` whose input part hides `selector` of `target`.
    fn isolate_at_leaf(&self, out: &mut Vec<Fae>, root: usize, target: usize, selector: usize) {
        let mut base = self.clone();
        let trimmed = base.root_ta(root).unreachable_free();
        base.set_root(root, Some(trimmed));
        let src = base.root_ta(root).clone();

        let mut rest = base.alloc_ta();
        let mut matches = Vec::new();
        for t in src.transitions() {
            match base.leaf_scan(&t, selector, target) {
                Some(abox) => matches.push((t, abox)),
                None => {
                    rest.add_transition(t.lhs(), t.label(), t.rhs());
                }
            }
        }
        assert!(
            !matches.is_empty(),
            "No box of root {} covers selector {} of root {}",
            root,
            selector,
            target
        );

        for (t, abox) in matches {
            let mut fae = base.clone();

            if src.is_final(t.rhs()) {
                let mut ta = rest.clone();
                let state = fae.fresh_state();
                ta.add_final_state(state);
                ta.add_transition(t.lhs(), t.label(), state);
                fae.set_root(root, Some(ta.useless_and_unreachable_free()));
                fae.connection_graph.invalidate(root);

                let t2 = Transition::new(t.lhs(), t.label(), state);
                let boxes = fae.isolate_at_root_with(root, &t2, |b| is_box(b, &abox));
                assert!(boxes.iter().any(|b| Rc::ptr_eq(b, &abox)));
                fae.unfold_box(root, &abox);
                fae.isolate_set_into(out, target, 0, &[selector]);
                continue;
            }

            // The matching transition is internal: it becomes a root of its own,
            // referenced from wherever its state was used.
            let new_root = fae.root_count();
            let mut upper = rest.empty_like();
            for &f in src.final_states() {
                upper.add_final_state(f);
            }
            for u in rest.transitions() {
                upper.add_transition(u.lhs(), u.label(), u.rhs());
                for (j, &s) in u.lhs().iter().enumerate() {
                    if s == t.rhs() {
                        let mut lhs = u.lhs().to_vec();
                        lhs[j] = fae.add_data(&mut upper, &Data::reference(new_root));
                        upper.add_transition(&lhs, u.label(), u.rhs());
                    }
                }
            }

            let mut offset = fae.next_state();
            let upper = fix_signatures(&fae.boxman, &upper, &mut offset);
            assert!(!upper.final_states().is_empty(), "Root {} lost its accepting states", root);
            fae.set_state_offset(offset);

            let state = fae.fresh_state();
            let mut lower = rest.clone();
            lower.add_final_state(state);
            lower.add_transition(t.lhs(), t.label(), state);
            let appended = fae.append_root(lower.useless_and_unreachable_free());
            debug_assert_eq!(appended, new_root);
            fae.connection_graph.invalidate(root);
            let t2 = Transition::new(t.lhs(), t.label(), state);

            let signatures = compute_signatures(&fae.boxman, &upper);
            for &f in upper.final_states() {
                if !signatures.get(&f).is_some_and(|s| contains_cutpoint(s, new_root)) {
                    debug!("isolate_at_leaf: skipping {} of root {} without the split part", f, root);
                    continue;
                }
                let mut fae2 = fae.clone();
                let mut ta = upper.clone();
                ta.clear_final_states();
                ta.add_final_state(f);
                fae2.set_root(root, Some(ta.useless_and_unreachable_free()));
                fae2.connection_graph.invalidate(root);

                let boxes = fae2.isolate_at_root_with(new_root, &t2, |b| is_box(b, &abox));
                assert!(boxes.iter().any(|b| Rc::ptr_eq(b, &abox)));
                fae2.unfold_box(new_root, &abox);
                fae2.isolate_set_into(out, target, 0, &[selector]);
            }
        }
    }

    fn isolate_set_into(&self, out: &mut Vec<Fae>, target: usize, base: usize, offsets: &[usize]) {
        let at_root = self.selectors_at_root(target);
        let mut direct = Vec::new();
        let mut hidden = BTreeSet::new();
        for &o in offsets {
            if at_root.contains(&(base + o)) {
                direct.push(base + o);
            } else {
                hidden.insert(base + o);
            }
        }

        if hidden.is_empty() {
            self.isolate_at_root(out, target, &direct);
            return;
        }

        let mut current = Vec::new();
        if direct.is_empty() {
            current.push(self.clone());
        } else {
            self.isolate_at_root(&mut current, target, &direct);
        }

        for &selector in &hidden {
            let mut next = Vec::new();
            for mut fae in current {
                if fae.selectors_at_root(target).contains(&selector) {
                    next.push(fae);
                    continue;
                }
                fae.update_connection_graph();
                let holder = (0..fae.root_count()).find(|&k| {
                    fae.root(k).is_some()
                        && fae.connection_graph.has_reference(k, target)
                        && fae.selectors_at_leaf(k, target).contains(&selector)
                });
                let Some(k) = holder else {
                    panic!("Selector {} of root {} not found", selector, target);
                };
                fae.isolate_at_leaf(&mut next, k, target, selector);
            }
            current = next;
        }

        assert!(!current.is_empty());
        out.extend(current);
    }

    /// Splits the snapshot so that `base + offsets[i]` are plain selectors of
    /// the accepting transition of `target` in every result.
    ///
    /// # Panics
    ///
    /// Panics if some selector is covered neither at `target` nor by a box
    /// referring to it.
    pub fn isolate_set(&self, target: usize, base: usize, offsets: &[usize]) -> Vec<Fae> {
        let mut out = Vec::new();
        self.isolate_set_into(&mut out, target, base, offsets);
        debug!("isolate_set: root {} split into {} snapshots", target, out.len());
        out
    }

    pub fn isolate_one(&self, target: usize, offset: usize) -> Vec<Fae> {
        self.isolate_set(target, 0, &[offset])
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::boxman::BoxMan;
    use crate::connection::CutpointInfo;
    use crate::data::SelData;
    use crate::folding::Folding;
    use crate::types::State;

    fn sels() -> Vec<SelData> {
        vec![SelData::new(0, 8, 0, "next"), SelData::new(8, 8, 0, "data")]
    }

    fn node(fae: &mut Fae, next: Data) -> usize {
        let r = fae.node_create(&sels(), None);
        fae.node_modify(r, 8, Data::Int(1)).unwrap();
        fae.node_modify(r, 0, next).unwrap();
        r
    }

    #[test]
    fn test_plain_selector_is_kept() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let r = node(&mut fae, Data::null());
        fae.var_push(Data::reference(r));

        let split = fae.isolate_one(r, 0);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].node_lookup(r, 0), Ok(Data::null()));
        assert_eq!(split[0].node_lookup(r, 8), Ok(Data::Int(1)));
    }

    #[test]
    fn test_one_snapshot_per_accepting_transition() {
        let boxman = Rc::new(BoxMan::default());
        let mut fae = Fae::new(boxman.clone());
        let target = node(&mut fae, Data::null());

        let next = [boxman.selector(&SelData::new(0, 8, 0, "next"))];
        let mut ta = fae.alloc_ta();
        let f = fae.fresh_state();
        ta.add_final_state(f);
        for data in [Data::null(), Data::reference(target)] {
            let leaf = fae.add_data(&mut ta, &data);
            let (label, lhs) = boxman.reorder(&next, &[leaf]);
            ta.add_transition(&lhs, label, f);
        }
        let r = fae.append_root(ta);
        fae.var_push(Data::reference(r));

        let values: BTreeSet<String> = fae
            .isolate_one(r, 0)
            .iter()
            .map(|s| s.node_lookup(r, 0).unwrap().to_string())
            .collect();
        assert_eq!(
            values,
            BTreeSet::from([Data::null().to_string(), Data::reference(target).to_string()])
        );
    }

    #[test]
    fn test_box_at_root_is_unfolded() {
        let boxman = Rc::new(BoxMan::default());
        let mut output = boxman.new_ta();
        let p = boxman.add_data(&mut output, &Data::reference(1));
        let (label, lhs) = boxman.reorder(&[boxman.selector(&SelData::new(0, 8, 0, "next"))], &[p]);
        output.add_transition(&lhs, label, State::new(1));
        output.add_final_state(State::new(1));
        let mut cp = CutpointInfo::new(1);
        cp.fwd_selectors.insert(0);
        let abox = boxman.get_box(NestedBox::new(&boxman, output, vec![cp], vec![Some(0)], None, vec![(0, None)]));

        let mut fae = Fae::new(boxman.clone());
        let target = node(&mut fae, Data::null());
        let mut ta = fae.alloc_ta();
        let f = fae.fresh_state();
        ta.add_final_state(f);
        let leaf = fae.add_data(&mut ta, &Data::reference(target));
        let (label, lhs) = boxman.reorder(&[AbstractBox::Nested(abox)], &[leaf]);
        ta.add_transition(&lhs, label, f);
        let r = fae.append_root(ta);
        fae.var_push(Data::reference(r));

        let split = fae.isolate_one(r, 0);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].node_lookup(r, 0), Ok(Data::reference(target)));
    }

    #[test]
    fn test_input_part_is_unfolded() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let a = node(&mut fae, Data::Undef);
        let b = node(&mut fae, Data::reference(a));
        fae.node_modify(a, 0, Data::reference(b)).unwrap();
        fae.var_push(Data::reference(a));
        fae.update_connection_graph();

        Folding::new(&mut fae)
            .make_type2_box(a, b, &BTreeSet::new(), false)
            .unwrap();
        assert!(!fae.selectors_at_root(b).contains(&0));
        assert!(fae.selectors_at_leaf(a, b).contains(&0));

        let split = fae.isolate_one(b, 0);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].node_lookup(b, 0), Ok(Data::reference(a)));
        assert_eq!(split[0].node_lookup(a, 0), Ok(Data::reference(b)));
    }
}
