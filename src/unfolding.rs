//! Replacing a nested box by the sub-shape it stands for.

use std::rc::Rc;

use log::debug;

use crate::forest::Fae;
use crate::label::AbstractBox;
use crate::nested_box::NestedBox;
use crate::treeaut::TreeAut;

impl Fae {
    /// Splices the accepting transitions of `box_ta` into those of `src`.
    ///
    /// If `abox` is given, its single occurrence is removed from every
    /// accepting label of `src` first. References of `box_ta` are
    /// translated by `index`, so reference `i` of the box becomes root `index[i]`.
    fn box_merge(
        &mut self,
        dst: &mut TreeAut,
        src: &TreeAut,
        box_ta: &TreeAut,
        abox: Option<&Rc<NestedBox>>,
        index: &[Option<usize>],
    ) {
        let boxman = self.boxman.clone();
        let relabeled = self.relabel_references(box_ta, index);
        let part = self.unique(&relabeled, true);

        for t in src.transitions().filter(|t| !src.is_final(t.rhs())) {
            dst.add_transition(t.lhs(), t.label(), t.rhs());
        }
        for t in part.transitions().filter(|t| !part.is_final(t.rhs())) {
            dst.add_transition(t.lhs(), t.label(), t.rhs());
        }
        for &f in part.final_states() {
            dst.add_final_state(f);
        }

        let target = abox.map(|b| AbstractBox::Nested(b.clone()));
        let part_accepting = part.accepting_transitions();
        for t in src.accepting_transitions() {
            let info = boxman.label(t.label());
            let Some(node) = info.node() else {
                panic!("Accepting label {} is not a node", info);
            };
            let mut lhs = Vec::with_capacity(t.arity());
            let mut label = Vec::with_capacity(node.boxes().len());
            let mut found = false;
            for (b, offset) in node.iter_boxes() {
                if target.as_ref() == Some(b) {
                    assert!(!found, "Box {} occurs twice in one label", b);
                    found = true;
                    continue;
                }
                lhs.extend_from_slice(&t.lhs()[offset..offset + b.arity()]);
                label.push(b.clone());
            }
            assert!(target.is_none() || found, "Box not found in accepting label {}", info);

            for u in &part_accepting {
                let part_info = boxman.label(u.label());
                let Some(part_node) = part_info.node() else {
                    panic!("Box part label {} is not a node", part_info);
                };
                let mut lhs2 = lhs.clone();
                let mut label2 = label.clone();
                lhs2.extend_from_slice(u.lhs());
                label2.extend(part_node.boxes().iter().cloned());
                let (l, lhs2) = boxman.reorder(&label2, &lhs2);
                dst.add_transition(&lhs2, l, u.rhs());
            }
        }
    }

    /// Unfolds one occurrence of `abox` in the accepting transition of `root`.
    ///
    /// The output part is spliced into `root`; the input part, if any, into
    /// the root passed as the box's input parameter.
    pub fn unfold_box(&mut self, root: usize, abox: &Rc<NestedBox>) {
        let t = self.root_ta(root).accepting_transition();
        let info = self.boxman.label(t.label());
        let Some(node) = info.node() else {
            panic!("Root {} is not a node", root);
        };
        let target = AbstractBox::Nested(abox.clone());
        let Some((_, offset)) = node.iter_boxes().find(|(b, _)| **b == target) else {
            panic!("Box {} not found at root {}", abox.name(), root);
        };

        let mut index = vec![Some(root)];
        for j in 0..abox.arity() {
            let Some(data) = self.leaf_data(t.lhs()[offset + j]) else {
                panic!("Parameter {} of {} at root {} is not a leaf", j, abox.name(), root);
            };
            index.push(data.root());
        }

        let src = self.root_ta(root).clone();
        let mut ta = self.alloc_ta();
        self.box_merge(&mut ta, &src, abox.output(), Some(abox), &index);
        self.set_root(root, Some(ta));
        self.connection_graph.invalidate(root);
        debug!("unfold_box: {} at root {}", abox.name(), root);

        let Some(input) = abox.input() else {
            return;
        };
        let Some(aux) = index[input.index() + 1] else {
            panic!("Input parameter of {} at root {} is undefined", abox.name(), root);
        };
        let fresh = self.fresh_state();
        let tmp = self.root_ta(aux).unfold_at_root(fresh);
        let mut ta = self.alloc_ta();
        self.box_merge(&mut ta, &tmp, input.ta(), None, &index);
        self.set_root(aux, Some(ta));
        self.connection_graph.invalidate(aux);
    }

    pub fn unfold_boxes<'a, I>(&mut self, root: usize, boxes: I)
    where
        I: IntoIterator<Item = &'a Rc<NestedBox>>,
    {
        for b in boxes {
            self.unfold_box(root, b);
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::boxman::BoxMan;
    use crate::connection::CutpointInfo;
    use crate::data::{Data, SelData};
    use crate::types::State;

    /// A box whose output is a `next` node pointing to its single parameter.
    fn next_box(boxman: &BoxMan) -> Rc<NestedBox> {
        let mut output = boxman.new_ta();
        let p = boxman.add_data(&mut output, &Data::reference(1));
        let (label, lhs) = boxman.reorder(&[boxman.selector(&SelData::new(0, 8, 0, "next"))], &[p]);
        output.add_transition(&lhs, label, State::new(1));
        output.add_final_state(State::new(1));
        let mut cp = CutpointInfo::new(1);
        cp.fwd_selectors.insert(0);
        boxman.get_box(NestedBox::new(boxman, output, vec![cp], vec![Some(0)], None, vec![(0, None)]))
    }

    #[test]
    fn test_unfold_plain_box() {
        let boxman = Rc::new(BoxMan::default());
        let b = next_box(&boxman);
        let mut fae = Fae::new(boxman.clone());

        let target = fae.node_create(&[SelData::new(0, 8, 0, "next")], None);
        fae.node_modify(target, 0, Data::null()).unwrap();

        let mut ta = fae.alloc_ta();
        let f = fae.fresh_state();
        ta.add_final_state(f);
        let p = fae.add_data(&mut ta, &Data::reference(target));
        let (label, lhs) = boxman.reorder(&[AbstractBox::Nested(b.clone())], &[p]);
        ta.add_transition(&lhs, label, f);
        let root = fae.append_root(ta);
        fae.var_push(Data::reference(root));

        fae.unfold_box(root, &b);
        assert_eq!(fae.node_lookup(root, 0), Ok(Data::reference(target)));
        let t = fae.root_ta(root).accepting_transition();
        assert!(!boxman.label(t.label()).node().unwrap().has_nested());
    }
}
