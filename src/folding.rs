//! Discovery of repeated sub-shapes and their replacement by nested boxes.
//!
//! Three kinds of cutpoints are folded:
//!
//! - a root referring to itself (type 1, [`Folding::discover1`]);
//! - a root referenced at least twice from one internal state of another
//!   component (type 2, [`Folding::discover2`]);
//! - two roots referring to each other (type 3, [`Folding::discover3`]),
//!   which yields a box with an input part.
//!
//! A fold cuts the part of a component leading to the cutpoint, turns it
//! into a box over the referenced roots and splices the box back in its
//! place.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use log::{debug, info};

use crate::connection::{
    compute_signatures, contains_cutpoint, get_cutpoint, min_selector, normalize_signature, process_state_signature,
    CutpointInfo, Signature, StateSignatures,
};
use crate::data::Data;
use crate::error::FaResult;
use crate::forest::Fae;
use crate::label::AbstractBox;
use crate::nested_box::NestedBox;
use crate::treeaut::{Transition, TreeAut};
use crate::types::State;

/// Selector of the node through which each cutpoint is first reached.
type SelectorMap = BTreeMap<usize, usize>;

/// Folding over one snapshot, with per-root signature caches.
pub struct Folding<'a> {
    fae: &'a mut Fae,
    signatures: Vec<Option<Rc<StateSignatures>>>,
}

/// Signatures agree on everything a box interface records.
fn signatures_compatible(s1: &Signature, s2: &Signature) -> bool {
    s1.len() == s2.len()
        && s1
            .iter()
            .zip(s2)
            .all(|(a, b)| a.root == b.root && a.bwd_selector == b.bwd_selector && a.defines == b.defines)
}

static EMPTY_SIGNATURE: Signature = Vec::new();

fn state_signature(signatures: &StateSignatures, state: State) -> &Signature {
    signatures.get(&state).unwrap_or(&EMPTY_SIGNATURE)
}

fn update_selector_map(map: &mut SelectorMap, selector: usize, signature: &[CutpointInfo]) {
    for cutpoint in signature {
        map.entry(cutpoint.root).or_insert(selector);
    }
}

/// Parameter `i` of the box is the cutpoint with box index `i + 1`.
fn extract_input_map(selector_map: &SelectorMap, root: usize, index: &[Option<usize>]) -> Vec<Option<usize>> {
    assert_eq!(index[root], Some(0), "The folded root must have box index 0");
    let mut input_map = vec![None; selector_map.len()];
    let mut count = 0;
    for (&cutpoint, &selector) in selector_map {
        if cutpoint == root {
            continue;
        }
        let Some(i) = index[cutpoint] else {
            continue;
        };
        assert!(i >= 1 && i <= input_map.len(), "Box index {} out of range", i);
        input_map[i - 1] = Some(selector);
        count += 1;
    }
    input_map.truncate(count);
    input_map
}

/// Translates a signature into box space.
///
/// Returns the translated signature, the parameter selectors (every
/// cutpoint but `root`) and the first selector reaching `aux`.
fn translate_signature(
    root: usize,
    signature: &Signature,
    aux: Option<usize>,
    index: &[Option<usize>],
) -> (Signature, Vec<(usize, Option<usize>)>, Option<usize>) {
    let mut result = Vec::with_capacity(signature.len());
    let mut selectors = Vec::new();
    let mut aux_selector = None;
    for cutpoint in signature {
        let Some(fwd) = cutpoint.first_fwd() else {
            panic!("Cutpoint {} has no forward selector", cutpoint.root);
        };
        let Some(i) = index[cutpoint.root] else {
            panic!("Cutpoint {} has no box index", cutpoint.root);
        };
        let mut info = cutpoint.clone();
        info.root = i;
        result.push(info);
        if Some(cutpoint.root) == aux {
            assert!(aux_selector.is_none(), "Second component reached twice");
            aux_selector = Some(fwd);
        }
        if cutpoint.root != root {
            selectors.push((fwd, cutpoint.bwd_selector));
        }
    }
    (result, selectors, aux_selector)
}

impl<'a> Folding<'a> {
    pub fn new(fae: &'a mut Fae) -> Self {
        let n = fae.root_count();
        Self {
            fae,
            signatures: vec![None; n],
        }
    }

    fn signatures(&mut self, root: usize) -> Rc<StateSignatures> {
        if root >= self.signatures.len() {
            self.signatures.resize(root + 1, None);
        }
        if let Some(s) = &self.signatures[root] {
            return s.clone();
        }
        let s = Rc::new(compute_signatures(&self.fae.boxman, self.fae.root_ta(root)));
        self.signatures[root] = Some(s.clone());
        s
    }

    fn invalidate_signatures(&mut self, root: usize) {
        if let Some(s) = self.signatures.get_mut(root) {
            *s = None;
        }
    }

    /// Splits the transitions into `state` into the boxes leading to
    /// `target` and the rest.
    ///
    /// Returns the remaining automaton, the cut part accepting at `state`
    /// and the signature of the cut part.
    fn component_cut(&mut self, root: usize, state: State, target: usize) -> Option<(TreeAut, TreeAut, Signature)> {
        let boxman = self.fae.boxman.clone();
        let src = self.fae.root_ta(root).clone();
        let signatures = self.signatures(root);

        let mut boxes: Vec<AbstractBox> = Vec::new();
        for t in src.transitions_to(state) {
            let info = boxman.label(t.label());
            let Some(node) = info.node() else {
                continue;
            };
            for (b, offset) in node.iter_boxes() {
                let leads = (0..b.arity())
                    .any(|j| contains_cutpoint(state_signature(&signatures, t.lhs()[offset + j]), target));
                if leads && !boxes.contains(b) {
                    boxes.push(b.clone());
                }
            }
        }

        let mut res = self.fae.alloc_ta();
        let mut complement = self.fae.alloc_ta();
        for &f in src.final_states() {
            res.add_final_state(f);
        }
        complement.add_final_state(state);
        let mut complement_signature = Signature::new();

        for t in src.transitions() {
            if t.rhs() != state {
                res.add_transition(t.lhs(), t.label(), t.rhs());
                complement.add_transition(t.lhs(), t.label(), t.rhs());
                continue;
            }
            let info = boxman.label(t.label());
            let Some(node) = info.node() else {
                panic!("Transition into {} is not a node", state);
            };
            let (mut lhs, mut label) = (Vec::new(), Vec::new());
            let (mut c_lhs, mut c_label) = (Vec::new(), Vec::new());
            let mut tmp = Signature::new();
            for (b, offset) in node.iter_boxes() {
                let children = &t.lhs()[offset..offset + b.arity()];
                if !boxes.contains(b) {
                    lhs.extend_from_slice(children);
                    label.push(b.clone());
                    continue;
                }
                for (j, &s) in children.iter().enumerate() {
                    process_state_signature(&mut tmp, b, j, s, state_signature(&signatures, s));
                }
                c_lhs.extend_from_slice(children);
                c_label.push(b.clone());
            }
            normalize_signature(&mut tmp);

            if label.is_empty() || c_label.is_empty() {
                debug!("component_cut: nothing left at root {} after cutting {}", root, target);
                return None;
            }
            if complement_signature.is_empty() {
                complement_signature = tmp.clone();
            }
            if !signatures_compatible(&complement_signature, &tmp) {
                debug!("component_cut: incompatible signatures at root {}", root);
                return None;
            }
            for (c, t) in complement_signature.iter_mut().zip(tmp) {
                c.ref_count = c.ref_count.max(t.ref_count);
                c.fwd_selectors.extend(t.fwd_selectors);
            }

            let (l, lhs) = boxman.reorder(&label, &lhs);
            res.add_transition(&lhs, l, state);
            let (l, c_lhs) = boxman.reorder(&c_label, &c_lhs);
            complement.add_transition(&c_lhs, l, state);
        }
        Some((res, complement, complement_signature))
    }

    fn separate_cutpoint(&mut self, root: usize, state: State, target: usize) -> Option<(TreeAut, TreeAut, Signature)> {
        let (res, complement, signature) = self.component_cut(root, state, target)?;
        Some((res, complement.unreachable_free(), signature))
    }

    fn transition_selector_map(&self, t: &Transition, signatures: &StateSignatures) -> SelectorMap {
        let mut map = SelectorMap::new();
        let info = self.fae.boxman.label(t.label());
        let Some(node) = info.node() else {
            return map;
        };
        for (b, offset) in node.iter_boxes() {
            match b {
                AbstractBox::Selector(s) => {
                    update_selector_map(&mut map, s.offset, state_signature(signatures, t.lhs()[offset]));
                }
                AbstractBox::Nested(nb) => {
                    for i in 0..nb.arity() {
                        update_selector_map(
                            &mut map,
                            nb.selector_to_input(i),
                            state_signature(signatures, t.lhs()[offset + i]),
                        );
                    }
                }
                AbstractBox::TypeInfo(_) => {}
            }
        }
        map
    }

    /// Selector map of `state`, if all its transitions agree on it.
    fn selector_map(&mut self, root: usize, state: State) -> Option<SelectorMap> {
        let signatures = self.signatures(root);
        let transitions = self.fae.root_ta(root).transitions_to(state);
        assert!(!transitions.is_empty(), "State {} of root {} has no transitions", state, root);
        let map = self.transition_selector_map(&transitions[0], &signatures);
        transitions[1..]
            .iter()
            .all(|t| self.transition_selector_map(t, &signatures) == map)
            .then_some(map)
    }

    fn find_box(&self, candidate: NestedBox, conditional: bool) -> Option<Rc<NestedBox>> {
        if conditional {
            self.fae.boxman.lookup_box(candidate)
        } else {
            Some(self.fae.boxman.get_box(candidate))
        }
    }

    /// Replaces the cut part by `abox`, passing the cutpoints of `signature`
    /// other than `root` as parameters.
    fn join_box(&self, src: &TreeAut, state: State, root: usize, abox: &Rc<NestedBox>, signature: &Signature) -> TreeAut {
        let boxman = &self.fae.boxman;
        let mut ta = self.fae.alloc_ta();
        for &f in src.final_states() {
            ta.add_final_state(f);
        }
        for t in src.transitions() {
            if t.rhs() != state {
                ta.add_transition(t.lhs(), t.label(), t.rhs());
                continue;
            }
            let info = boxman.label(t.label());
            let Some(node) = info.node() else {
                panic!("Transition into {} is not a node", state);
            };
            let mut label = node.boxes().to_vec();
            let mut lhs = t.lhs().to_vec();
            label.push(AbstractBox::Nested(abox.clone()));
            for cutpoint in signature.iter().filter(|c| c.root != root) {
                lhs.push(self.fae.add_data(&mut ta, &Data::reference(cutpoint.root)));
            }
            let (l, lhs) = boxman.reorder(&label, &lhs);
            ta.add_transition(&lhs, l, state);
        }
        ta
    }

    /// Folds the part of `state` at `root` leading to `aux` into a box
    /// without an input part.
    pub fn make_type1_box(
        &mut self,
        root: usize,
        state: State,
        aux: usize,
        forbidden: &BTreeSet<usize>,
        conditional: bool,
    ) -> Option<Rc<NestedBox>> {
        if forbidden.contains(&aux) {
            return None;
        }
        let (res, complement, signature) = self.separate_cutpoint(root, state, aux)?;

        let mut index = vec![None; self.fae.root_count()];
        index[root] = Some(0);
        let mut start = 1;
        for cutpoint in &signature {
            if forbidden.contains(&cutpoint.root) {
                return None;
            }
            if cutpoint.root != root {
                index[cutpoint.root] = Some(start);
                start += 1;
            }
        }

        let selector_map = self.selector_map(root, state)?;
        let input_map = extract_input_map(&selector_map, root, &index);
        let (output_signature, selectors, _) = translate_signature(root, &signature, None, &index);
        let output = self.fae.relabel_references(&complement, &index);
        let candidate = NestedBox::new(
            &self.fae.boxman,
            output,
            output_signature,
            input_map,
            None,
            selectors,
        );
        let abox = self.find_box(candidate, conditional)?;
        info!("Folded {} at root {}", abox, root);

        let ta = self.join_box(&res, state, root, &abox, &signature);
        self.fae.set_root(root, Some(ta));
        self.fae.connection_graph.invalidate(root);
        self.invalidate_signatures(root);
        Some(abox)
    }

    /// Folds the mutual references of `root` and `aux` into a box whose
    /// input part is the piece of `aux` leading back to `root`.
    pub fn make_type2_box(
        &mut self,
        root: usize,
        aux: usize,
        forbidden: &BTreeSet<usize>,
        conditional: bool,
    ) -> Option<Rc<NestedBox>> {
        if forbidden.contains(&aux) {
            return None;
        }
        let final_state = self.fae.root_ta(root).final_state();
        let (res, complement, signature) = self.separate_cutpoint(root, final_state, aux)?;

        let mut index = vec![None; self.fae.root_count()];
        index[root] = Some(0);
        let mut start = 1;
        for cutpoint in &signature {
            if cutpoint.root == root || forbidden.contains(&cutpoint.root) {
                return None;
            }
            index[cutpoint.root] = Some(start);
            start += 1;
        }

        let selector_map = self.selector_map(root, final_state)?;
        let mut input_map = extract_input_map(&selector_map, root, &index);

        let aux_final = self.fae.root_ta(aux).final_state();
        let (aux_res, aux_complement, input_signature) = self.separate_cutpoint(aux, aux_final, root)?;

        let mut index2 = index.clone();
        let mut extra = Signature::new();
        for cutpoint in &input_signature {
            if cutpoint.ref_count > 1 || forbidden.contains(&cutpoint.root) {
                return None;
            }
            if index[cutpoint.root].is_none() {
                index2[cutpoint.root] = Some(start);
                start += 1;
                extra.push(cutpoint.clone());
                input_map.push(None);
            }
        }

        let aux_map = self.selector_map(aux, aux_final)?;
        let Some(&input_selector) = aux_map.get(&root) else {
            panic!("Root {} is not reached from root {}", root, aux);
        };

        let (output_signature, mut selectors, aux_selector) =
            translate_signature(root, &signature, Some(aux), &index);
        let Some(aux_selector) = aux_selector else {
            panic!("Root {} is not reached from root {}", aux, root);
        };
        let mut box_input_signature = Signature::with_capacity(input_signature.len());
        for cutpoint in &input_signature {
            if index[cutpoint.root].is_none() {
                selectors.push((aux_selector, None));
            }
            let Some(i) = index2[cutpoint.root] else {
                panic!("Cutpoint {} has no box index", cutpoint.root);
            };
            let mut info = cutpoint.clone();
            info.root = i;
            box_input_signature.push(info);
        }
        let Some(input_index) = index[aux].map(|i| i - 1) else {
            panic!("Root {} has no box index", aux);
        };
        selectors[input_index].1 = min_selector(selectors[input_index].1, Some(input_selector));

        let output = self.fae.relabel_references(&complement, &index);
        let input = self.fae.relabel_references(&aux_complement, &index2);
        let candidate = NestedBox::new(
            &self.fae.boxman,
            output,
            output_signature,
            input_map,
            Some((input, input_index, box_input_signature)),
            selectors,
        );
        let abox = self.find_box(candidate, conditional)?;
        info!("Folded {} at roots {} and {}", abox, root, aux);

        let mut full_signature = signature;
        full_signature.extend(extra);
        let ta = self.join_box(&res, final_state, root, &abox, &full_signature);
        self.fae.set_root(root, Some(ta));
        self.fae.connection_graph.invalidate(root);
        self.invalidate_signatures(root);

        self.fae.set_root(aux, Some(aux_res));
        self.fae.connection_graph.invalidate(aux);
        self.invalidate_signatures(aux);
        Some(abox)
    }

    /// Folds self references of `root`.
    pub fn discover1(&mut self, root: usize, forbidden: &BTreeSet<usize>, conditional: bool) -> bool {
        if forbidden.contains(&root) {
            return false;
        }
        let mut found = false;
        'scan: loop {
            let offset = self.fae.next_state();
            self.fae.update_connection_graph();
            let signature = self.fae.connection_graph.signature(root).clone();
            for cutpoint in signature.iter().filter(|c| c.root == root) {
                debug!("discover1: cutpoint {} at root {}", cutpoint, root);
                let state = self.fae.root_ta(root).final_state();
                if self.make_type1_box(root, state, root, forbidden, conditional).is_some() {
                    found = true;
                    continue 'scan;
                }
                self.fae.set_state_offset(offset);
            }
            return found;
        }
    }

    /// Folds shared cutpoints reached from one internal state of `root`.
    pub fn discover2(&mut self, root: usize, forbidden: &BTreeSet<usize>, conditional: bool) -> bool {
        if forbidden.contains(&root) {
            return false;
        }
        let mut found = false;
        'scan: loop {
            let offset = self.fae.next_state();
            self.fae.update_connection_graph();
            let signature = self.fae.connection_graph.signature(root).clone();
            let live = self.fae.root_ta(root).unreachable_free().states();
            for cutpoint in signature.iter().filter(|c| c.ref_count >= 2) {
                let signatures = self.signatures(root);
                for (&state, state_sig) in signatures.iter().filter(|(s, _)| live.contains(*s)) {
                    for tmp in state_sig {
                        if tmp.ref_count < 2 || tmp.ref_inherited || tmp.root != cutpoint.root {
                            continue;
                        }
                        debug!("discover2: cutpoint {} inside root {} at {}", cutpoint.root, root, state);
                        if self
                            .make_type1_box(root, state, cutpoint.root, forbidden, conditional)
                            .is_some()
                        {
                            found = true;
                            continue 'scan;
                        }
                        self.fae.set_state_offset(offset);
                    }
                }
            }
            return found;
        }
    }

    /// Folds pairs of roots referring to each other.
    pub fn discover3(&mut self, root: usize, forbidden: &BTreeSet<usize>, conditional: bool) -> bool {
        if forbidden.contains(&root) {
            return false;
        }
        let mut found = false;
        'scan: loop {
            let offset = self.fae.next_state();
            self.fae.update_connection_graph();
            let signature = self.fae.connection_graph.signature(root).clone();
            for cutpoint in &signature {
                if cutpoint.root == root || forbidden.contains(&cutpoint.root) {
                    continue;
                }
                let back = self.fae.connection_graph.signature(cutpoint.root);
                if get_cutpoint(back, root).and_then(|c| c.first_fwd()).is_none() {
                    continue;
                }
                debug!("discover3: roots {} and {}", root, cutpoint.root);
                if self.make_type2_box(root, cutpoint.root, forbidden, conditional).is_some() {
                    found = true;
                    continue 'scan;
                }
                self.fae.set_state_offset(offset);
            }
            return found;
        }
    }

    /// Runs all three discoveries at `root`.
    pub fn discover(&mut self, root: usize, forbidden: &BTreeSet<usize>, conditional: bool) -> bool {
        let d1 = self.discover1(root, forbidden, conditional);
        let d2 = self.discover2(root, forbidden, conditional);
        let d3 = self.discover3(root, forbidden, conditional);
        d1 || d2 || d3
    }

    /// Discovers boxes at every root in traversal order, skipping `forbidden` roots.
    pub fn fold(&mut self, forbidden: &BTreeSet<usize>, conditional: bool) -> FaResult<bool> {
        self.fae.update_connection_graph();
        let (_, order) = self.fae.scan(&BTreeSet::new(), false)?;
        let mut matched = false;
        for root in order {
            if forbidden.contains(&root) {
                continue;
            }
            if self.discover(root, forbidden, conditional) {
                self.fae.update_connection_graph();
                matched = true;
            }
        }
        Ok(matched)
    }
}

impl Fae {
    /// Folds every discoverable cutpoint; returns whether some box was used.
    pub fn fold(&mut self, forbidden: &BTreeSet<usize>, conditional: bool) -> FaResult<bool> {
        let matched = Folding::new(self).fold(forbidden, conditional)?;
        debug!("fold: matched = {}", matched);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::boxman::BoxMan;
    use crate::data::SelData;

    fn sels() -> Vec<SelData> {
        vec![SelData::new(0, 8, 0, "next"), SelData::new(8, 8, 0, "data")]
    }

    fn xyz() -> Vec<SelData> {
        vec![
            SelData::new(0, 8, 0, "x"),
            SelData::new(8, 8, 0, "y"),
            SelData::new(16, 8, 0, "z"),
        ]
    }

    /// A node whose `x` and `y` both refer to `target` and whose `z` is null.
    fn fork(fae: &mut Fae, target: usize) -> usize {
        let n = fae.node_create(&xyz(), None);
        fae.node_modify(n, 0, Data::reference(target)).unwrap();
        fae.node_modify(n, 8, Data::reference(target)).unwrap();
        fae.node_modify(n, 16, Data::null()).unwrap();
        n
    }

    fn leaf(fae: &mut Fae) -> usize {
        let c = fae.node_create(&xyz(), None);
        for offset in [0, 8, 16] {
            fae.node_modify(c, offset, Data::null()).unwrap();
        }
        c
    }

    fn node(fae: &mut Fae, next: Data) -> usize {
        let r = fae.node_create(&sels(), None);
        fae.node_modify(r, 8, Data::Int(1)).unwrap();
        fae.node_modify(r, 0, next).unwrap();
        r
    }

    #[test]
    fn test_list_segment_round_trip() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let n1 = node(&mut fae, Data::null());
        let n2 = node(&mut fae, Data::reference(n1));
        fae.var_push(Data::reference(n2));
        fae.update_connection_graph();
        assert_eq!(fae.root_count(), 2);
        let original = fae.clone();

        let state = fae.root_ta(n2).final_state();
        let abox = Folding::new(&mut fae)
            .make_type1_box(n2, state, n1, &BTreeSet::new(), false)
            .unwrap();
        assert_eq!(abox.arity(), 1);
        assert!(abox.input().is_none());
        assert_eq!(abox.selectors(), &[(0, None)]);
        assert_eq!(abox.output_signature().len(), 1);
        assert_eq!(fae.boxman().box_count(), 1);

        let mut folded = fae.clone();
        assert_eq!(folded.normalize(&BTreeSet::new(), false), Ok(true));
        assert_eq!(folded.root_count(), 1);

        fae.unfold_box(n2, &abox);
        assert!(fae.root_ta(n2).language_eq(original.root_ta(n2)));
        assert!(fae.root_ta(n1).language_eq(original.root_ta(n1)));
        assert_eq!(fae.node_lookup(n2, 0), Ok(Data::reference(n1)));
    }

    #[test]
    fn test_cyclic_type3_box() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let a = node(&mut fae, Data::Undef);
        let b = node(&mut fae, Data::reference(a));
        fae.node_modify(a, 0, Data::reference(b)).unwrap();
        fae.var_push(Data::reference(a));
        fae.update_connection_graph();
        let original = fae.clone();

        let abox = Folding::new(&mut fae)
            .make_type2_box(a, b, &BTreeSet::new(), false)
            .unwrap();
        let input = abox.input().unwrap();
        assert_eq!(abox.output_signature().len(), 1);
        assert_eq!(input.signature().len(), 1);
        assert_eq!(input.index(), 0);
        assert_eq!(abox.selectors(), &[(0, Some(0))]);

        fae.unfold_box(a, &abox);
        assert!(fae.root_ta(a).language_eq(original.root_ta(a)));
        assert!(fae.root_ta(b).language_eq(original.root_ta(b)));
    }

    #[test]
    fn test_discover_self_loop() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let r = node(&mut fae, Data::Undef);
        fae.node_modify(r, 0, Data::reference(r)).unwrap();
        fae.var_push(Data::reference(r));

        assert_eq!(fae.fold(&BTreeSet::new(), false), Ok(true));
        assert_eq!(fae.boxman().box_count(), 1);
        assert!(fae.connection_graph().signature(r).is_empty());
        let t = fae.root_ta(r).accepting_transition();
        assert!(fae.boxman().label(t.label()).node().unwrap().has_nested());
    }

    #[test]
    fn test_conditional_fold_needs_two_strikes() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let r = node(&mut fae, Data::Undef);
        fae.node_modify(r, 0, Data::reference(r)).unwrap();
        fae.var_push(Data::reference(r));
        let mut second = fae.clone();

        assert_eq!(fae.fold(&BTreeSet::new(), true), Ok(false));
        assert_eq!(fae.boxman().box_count(), 0);
        assert_eq!(second.fold(&BTreeSet::new(), true), Ok(true));
        assert_eq!(second.boxman().box_count(), 1);
    }

    #[test]
    fn test_forbidden_root_not_folded() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let r = node(&mut fae, Data::Undef);
        fae.node_modify(r, 0, Data::reference(r)).unwrap();
        fae.var_push(Data::reference(r));
        assert_eq!(fae.fold(&BTreeSet::from([r]), false), Ok(false));
        assert_eq!(fae.boxman().box_count(), 0);
    }

    #[test]
    fn test_shared_cutpoint_round_trip() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let c = leaf(&mut fae);
        let n = fork(&mut fae, c);
        fae.var_push(Data::reference(n));
        fae.update_connection_graph();
        let original = fae.clone();

        assert!(Folding::new(&mut fae).discover2(n, &BTreeSet::new(), false));
        let boxes = fae.boxman().boxes();
        assert_eq!(boxes.len(), 1);
        let abox = boxes[0].clone();
        assert_eq!(abox.arity(), 1);
        assert!(abox.input().is_none());
        assert_eq!(abox.output_coverage(), &BTreeSet::from([0, 8]));
        assert_eq!(abox.output_signature().len(), 1);
        assert_eq!(fae.node_lookup(n, 16), Ok(Data::null()));

        fae.unfold_box(n, &abox);
        assert!(fae.root_ta(n).language_eq(original.root_ta(n)));
        assert!(fae.root_ta(c).language_eq(original.root_ta(c)));
        assert_eq!(fae.node_lookup(n, 0), Ok(Data::reference(c)));
        assert_eq!(fae.node_lookup(n, 8), Ok(Data::reference(c)));
    }

    #[test]
    fn test_shared_cutpoint_needs_two_strikes() {
        let mut fae = Fae::new(Rc::new(BoxMan::default()));
        let c = leaf(&mut fae);
        let n = fork(&mut fae, c);
        let r = fae.node_create(&xyz(), None);
        fae.node_modify(r, 0, Data::reference(n)).unwrap();
        fae.node_modify(r, 8, Data::null()).unwrap();
        fae.node_modify(r, 16, Data::null()).unwrap();
        fae.var_push(Data::reference(r));
        assert_eq!(fae.normalize(&BTreeSet::new(), false), Ok(true));
        assert_eq!(fae.root_count(), 2);

        let r = fae.var_get(0).root().unwrap();
        let ta = fae.root_ta(r);
        assert_eq!(ta.unreachable_free().len(), ta.len());
        let mut second = fae.clone();

        assert_eq!(fae.fold(&BTreeSet::new(), true), Ok(false));
        assert_eq!(fae.boxman().box_count(), 0);
        assert_eq!(second.fold(&BTreeSet::new(), true), Ok(true));
        assert_eq!(second.boxman().box_count(), 1);
    }
}
