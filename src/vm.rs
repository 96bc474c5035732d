//! Heap reads, writes, allocation and deallocation on a snapshot.
//!
//! Lookups and updates work on the single accepting transition of a root,
//! so the touched selectors must be isolated first.

use std::rc::Rc;

use log::debug;

use crate::data::{Data, SelData};
use crate::error::{FaError, FaResult};
use crate::forest::Fae;
use crate::label::{AbstractBox, TypeBox};
use crate::treeaut::{Transition, TreeAut};
use crate::types::State;

/// The displacement stored in a selector moves into a read reference.
fn displ_to_data(sel: &SelData, data: &mut Data) {
    if let Data::Ref { displ, .. } = data {
        *displ = sel.displ;
    }
}

/// The displacement of a written reference moves into the selector.
fn displ_to_sel(sel: &mut SelData, data: &mut Data) {
    if let Data::Ref { displ, .. } = data {
        sel.displ = *displ;
        *displ = 0;
    }
}

impl Fae {
    pub fn var_count(&self) -> usize {
        self.variables.len()
    }

    pub fn var_push(&mut self, data: Data) -> usize {
        self.variables.push(data);
        self.variables.len() - 1
    }

    pub fn var_pop(&mut self) -> Option<Data> {
        self.variables.pop()
    }

    /// Adds `count` undefined variables.
    pub fn var_populate(&mut self, count: usize) {
        let size = self.variables.len() + count;
        self.variables.resize(size, Data::Undef);
    }

    pub fn var_remove(&mut self, count: usize) {
        assert!(count <= self.variables.len(), "Removing more variables than present");
        let size = self.variables.len() - count;
        self.variables.truncate(size);
    }

    pub fn var_get(&self, id: usize) -> &Data {
        assert!(id < self.variables.len(), "Variable {} out of range", id);
        &self.variables[id]
    }

    pub fn var_set(&mut self, id: usize, data: Data) {
        assert!(id < self.variables.len(), "Variable {} out of range", id);
        self.variables[id] = data;
    }

    /// Allocates a node with the given selectors, all undefined.
    pub fn node_create(&mut self, selectors: &[SelData], type_info: Option<Rc<TypeBox>>) -> usize {
        let boxman = self.boxman.clone();
        let mut ta = self.alloc_ta();
        let f = self.fresh_state();
        ta.add_final_state(f);

        let mut boxes = Vec::with_capacity(selectors.len() + 1);
        if let Some(t) = type_info {
            boxes.push(AbstractBox::TypeInfo(t));
        }
        boxes.extend(selectors.iter().map(|s| boxman.selector(s)));
        let undef = self.add_data(&mut ta, &Data::Undef);
        let lhs = vec![undef; selectors.len()];
        let (label, lhs) = boxman.reorder(&boxes, &lhs);
        ta.add_transition(&lhs, label, f);

        let root = self.append_root(ta);
        debug!("node_create: root {}", root);
        root
    }

    /// Frees the node at `root`; everything pointing to it becomes undefined.
    pub fn node_delete(&mut self, root: usize) {
        assert!(self.root(root).is_some(), "Deleting a missing root {}", root);
        self.set_vars_to_undef_for_root(root);
        self.set_root(root, None);
        self.connection_graph.invalidate(root);
        for i in 0..self.roots.len() {
            let Some(ta) = self.root(i) else {
                continue;
            };
            let ta = self.invalidate_reference(ta, root);
            self.set_root(i, Some(ta));
            self.connection_graph.invalidate(i);
        }
        debug!("node_delete: root {}", root);
    }

    fn leaf_at(&self, root: usize, t: &Transition, offset: usize) -> FaResult<(SelData, usize, Data)> {
        let info = self.boxman.label(t.label());
        let Some(node) = info.node() else {
            panic!("Root {} is not a node", root);
        };
        let Some((sel, pos)) = node.selector(offset) else {
            panic!("Selector {} not found at root {}", offset, root);
        };
        let data = self
            .leaf_data(t.lhs()[pos])
            .ok_or(FaError::NotALeaf { root, offset })?;
        Ok((sel.clone(), pos, data))
    }

    /// Reads the selector at `offset`.
    pub fn node_lookup(&self, root: usize, offset: usize) -> FaResult<Data> {
        let t = self.root_ta(root).accepting_transition();
        let (sel, _, mut data) = self.leaf_at(root, &t, offset)?;
        displ_to_data(&sel, &mut data);
        Ok(data)
    }

    /// Reads the selectors at `base + offsets[i]` into a structure keyed by `offsets[i]`.
    pub fn node_lookup_multiple(&self, root: usize, base: usize, offsets: &[usize]) -> FaResult<Data> {
        let t = self.root_ta(root).accepting_transition();
        let mut items = Vec::with_capacity(offsets.len());
        for &o in offsets {
            let (sel, _, mut data) = self.leaf_at(root, &t, base + o)?;
            displ_to_data(&sel, &mut data);
            items.push((o, data));
        }
        Ok(Data::Struct(items))
    }

    fn transition_modify(&mut self, root: usize, base: usize, items: &[(usize, Data)]) -> FaResult<(TreeAut, Vec<(usize, Data)>)> {
        let boxman = self.boxman.clone();
        let t = self.root_ta(root).accepting_transition();
        let info = boxman.label(t.label());
        let Some(node) = info.node() else {
            panic!("Root {} is not a node", root);
        };
        let mut boxes = node.boxes().to_vec();
        let mut lhs = t.lhs().to_vec();
        let mut dst = self.alloc_ta();
        let mut old = Vec::with_capacity(items.len());

        for (o, value) in items {
            let offset = base + o;
            let (mut sel, pos, mut out) = self.leaf_at(root, &t, offset)?;
            displ_to_data(&sel, &mut out);
            old.push((*o, out));
            let mut value = value.clone();
            displ_to_sel(&mut sel, &mut value);
            lhs[pos] = self.add_data(&mut dst, &value);
            let Some(item) = node.item(offset) else {
                panic!("Selector {} not found at root {}", offset, root);
            };
            boxes[item.index] = boxman.selector(&sel);
        }

        let (label, lhs) = boxman.reorder(&boxes, &lhs);
        let state = self.fresh_state();
        dst.add_final_state(state);
        dst.add_transition(&lhs, label, state);
        Ok((dst, old))
    }

    fn install_modified(&mut self, root: usize, mut ta: TreeAut) {
        for t in self.root_ta(root).transitions() {
            ta.add_transition(t.lhs(), t.label(), t.rhs());
        }
        self.set_root(root, Some(ta.unreachable_free()));
        self.connection_graph.invalidate(root);
    }

    /// Writes `data` to the selector at `offset` and returns the old value.
    pub fn node_modify(&mut self, root: usize, offset: usize, data: Data) -> FaResult<Data> {
        let (ta, mut old) = self.transition_modify(root, offset, &[(0, data)])?;
        self.install_modified(root, ta);
        debug!("node_modify: root {} offset {}", root, offset);
        Ok(old.remove(0).1)
    }

    /// Writes several selectors at once; returns the old values as a structure.
    pub fn node_modify_multiple(&mut self, root: usize, base: usize, items: &[(usize, Data)]) -> FaResult<Data> {
        let (ta, old) = self.transition_modify(root, base, items)?;
        self.install_modified(root, ta);
        Ok(Data::Struct(old))
    }

    /// Leaf state holding `data` for use in a new transition.
    pub(crate) fn leaf_state(&self, data: &Data) -> State {
        self.boxman.data_state(data)
    }
}
