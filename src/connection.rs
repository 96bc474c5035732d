//! Cutpoint signatures and the connection graph between roots.
//!
//! A *signature* summarises, for one automaton state, which other roots are
//! referenced from the trees it accepts, how many times, and through which
//! selectors. The connection graph keeps the signature of every root's
//! accepting state plus the reverse (backward) edges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::boxman::BoxMan;
use crate::label::{AbstractBox, LabelData, NodeLabel};
use crate::treeaut::TreeAut;
use crate::types::State;
use crate::utils::{for_each_product, hash_combine, hash_sequence};

/// Reference counts saturate at this value.
pub const REF_COUNT_THRESHOLD: usize = 2;

/// Lower of two optional selectors, where `None` means "no selector".
pub fn min_selector(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// How one root is reached from a state.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CutpointInfo {
    /// The referenced root.
    pub root: usize,
    /// Number of references, saturated at [`REF_COUNT_THRESHOLD`].
    pub ref_count: usize,
    /// Whether the reference count comes from a single child.
    pub ref_inherited: bool,
    /// Selectors of the node through which the root is reached.
    pub fwd_selectors: BTreeSet<usize>,
    /// Lowest selector of the root leading back to the node.
    pub bwd_selector: Option<usize>,
    /// Selectors of the root hidden inside the subtree.
    pub defines: BTreeSet<usize>,
}

impl CutpointInfo {
    pub fn new(root: usize) -> Self {
        Self {
            root,
            ref_count: 1,
            ref_inherited: false,
            fwd_selectors: BTreeSet::new(),
            bwd_selector: None,
            defines: BTreeSet::new(),
        }
    }

    /// Lowest forward selector.
    pub fn first_fwd(&self) -> Option<usize> {
        self.fwd_selectors.first().copied()
    }

    fn hash_value(&self) -> u64 {
        let mut seed = hash_combine(self.root as u64, self.ref_count as u64);
        seed = hash_combine(seed, self.ref_inherited as u64);
        seed = hash_combine(seed, hash_sequence(self.fwd_selectors.iter().map(|&s| s as u64)));
        seed = hash_combine(seed, self.bwd_selector.map_or(u64::MAX, |s| s as u64));
        hash_combine(seed, hash_sequence(self.defines.iter().map(|&s| s as u64)))
    }
}

impl fmt::Display for CutpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}({{", self.root, self.ref_count)?;
        for s in &self.fwd_selectors {
            write!(f, " {}", s)?;
        }
        write!(f, " }}, ")?;
        match self.bwd_selector {
            Some(s) => write!(f, "{}", s)?,
            None => write!(f, "-")?,
        }
        write!(f, ", {{")?;
        for s in &self.defines {
            write!(f, " +{}", s)?;
        }
        write!(f, " }})")
    }
}

/// Cutpoints reachable from a state, at most one entry per root.
pub type Signature = Vec<CutpointInfo>;

pub type StateSignatures = BTreeMap<State, Signature>;

pub fn signature_hash(signature: &Signature) -> u64 {
    hash_sequence(signature.iter().map(CutpointInfo::hash_value))
}

pub fn display_signature(signature: &Signature) -> String {
    let parts: Vec<String> = signature.iter().map(ToString::to_string).collect();
    parts.join(" ")
}

pub fn contains_cutpoint(signature: &Signature, root: usize) -> bool {
    signature.iter().any(|c| c.root == root)
}

pub fn get_cutpoint(signature: &Signature, root: usize) -> Option<&CutpointInfo> {
    signature.iter().find(|c| c.root == root)
}

/// Merges entries with the same root, keeping the first position.
pub fn normalize_signature(signature: &mut Signature) {
    let mut merged: Signature = Vec::with_capacity(signature.len());
    let mut position: BTreeMap<usize, usize> = BTreeMap::new();
    for info in signature.drain(..) {
        match position.get(&info.root) {
            None => {
                position.insert(info.root, merged.len());
                let mut info = info;
                info.ref_inherited = info.ref_count > 1;
                merged.push(info);
            }
            Some(&i) => {
                let cutpoint = &mut merged[i];
                cutpoint.ref_count = (cutpoint.ref_count + info.ref_count).min(REF_COUNT_THRESHOLD);
                cutpoint.ref_inherited = false;
                cutpoint.fwd_selectors.extend(info.fwd_selectors);
                cutpoint.bwd_selector = min_selector(cutpoint.bwd_selector, info.bwd_selector);
                cutpoint.defines.extend(info.defines);
            }
        }
    }
    *signature = merged;
}

/// Renames the roots of a signature; entries mapped to `None` are dropped.
pub fn rename_signature(signature: &mut Signature, index: &[Option<usize>]) {
    signature.retain(|c| index.get(c.root).copied().flatten().is_some());
    for c in signature.iter_mut() {
        if let Some(Some(r)) = index.get(c.root) {
            c.root = *r;
        }
    }
}

/// Signature contribution of the `input`-th child of `abox`.
pub fn process_state_signature(
    result: &mut Signature,
    abox: &AbstractBox,
    input: usize,
    state: State,
    signature: &Signature,
) {
    let selector = abox.output_reachable(input);

    if state.is_leaf() {
        let Some(first) = signature.first() else {
            return;
        };
        assert_eq!(signature.len(), 1, "Leaf signature with more than one cutpoint");
        let mut info = first.clone();
        info.fwd_selectors.insert(abox.selector_to_input(input));
        if selector.is_some() {
            info.bwd_selector = selector;
        }
        info.defines.extend(abox.input_coverage(input));
        result.push(info);
    } else {
        for cutpoint in signature {
            let mut info = cutpoint.clone();
            info.fwd_selectors = BTreeSet::from([abox.selector_to_input(input)]);
            if selector.is_none() {
                info.bwd_selector = None;
            }
            result.push(info);
        }
    }
}

/// Signature of a node transition, if all its children already have one.
pub fn process_node(lhs: &[State], node: &NodeLabel, map: &StateSignatures) -> Option<Signature> {
    let mut result = Vec::new();
    for (abox, offset) in node.iter_boxes() {
        if !abox.is_structural() {
            continue;
        }
        for j in 0..abox.arity() {
            let state = lhs[offset + j];
            let signature = map.get(&state)?;
            process_state_signature(&mut result, abox, j, state, signature);
        }
    }
    Some(result)
}

/// Records `v` as the signature of `state`, merging with an existing one.
pub fn update_state_signature(map: &mut StateSignatures, state: State, v: Signature) {
    match map.get_mut(&state) {
        None => {
            map.insert(state, v);
        }
        Some(old) if old.len() == v.len() && old.iter().zip(&v).all(|(a, b)| a.root == b.root) => {
            for (a, b) in old.iter_mut().zip(v) {
                a.ref_count = a.ref_count.max(b.ref_count);
                a.fwd_selectors.extend(b.fwd_selectors);
                a.bwd_selector = min_selector(a.bwd_selector, b.bwd_selector);
            }
        }
        Some(old) => {
            debug!(
                "update_state_signature: conflicting signatures for {}: [{}] vs [{}]",
                state,
                display_signature(old),
                display_signature(&v)
            );
            old.extend(v);
            normalize_signature(old);
        }
    }
}

fn leaf_signature(data: &crate::data::Data) -> Signature {
    match data.root() {
        Some(root) => vec![CutpointInfo::new(root)],
        None => Vec::new(),
    }
}

/// Computes the signature of every state of `ta`.
///
/// States whose transitions never get all their children signed (cycles
/// without a base case) are left out.
pub fn compute_signatures(boxman: &BoxMan, ta: &TreeAut) -> StateSignatures {
    let mut map = StateSignatures::new();
    let mut pending = Vec::new();

    for t in ta.transitions() {
        let info = boxman.label(t.label());
        match &*info {
            LabelData::Data(d) => update_state_signature(&mut map, t.rhs(), leaf_signature(d)),
            LabelData::Node(_) => pending.push((t, info)),
            LabelData::Vars(..) => {}
        }
    }

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|(t, info)| {
            let Some(node) = info.node() else {
                return false;
            };
            match process_node(t.lhs(), node, &map) {
                Some(mut v) => {
                    normalize_signature(&mut v);
                    update_state_signature(&mut map, t.rhs(), v);
                    false
                }
                None => true,
            }
        });
        if pending.len() == before {
            debug!("compute_signatures: {} transitions left unsigned", before);
            break;
        }
    }
    map
}

/// Splits states by signature so that every state of the result has exactly one.
///
/// New states are numbered from `offset`, which is advanced past them.
pub fn fix_signatures(boxman: &BoxMan, ta: &TreeAut, offset: &mut usize) -> TreeAut {
    let mut dst = ta.empty_like();
    let mut state_map = StateSignatures::new();
    let mut signature_map: BTreeMap<(State, Signature), State> = BTreeMap::new();
    let mut inv: BTreeMap<State, Vec<Signature>> = BTreeMap::new();
    let mut transitions = Vec::new();

    for t in ta.transitions() {
        let info = boxman.label(t.label());
        match &*info {
            LabelData::Data(d) => {
                let v = leaf_signature(d);
                signature_map.insert((t.rhs(), v.clone()), t.rhs());
                inv.entry(t.rhs()).or_default().push(v.clone());
                state_map.insert(t.rhs(), v);
                dst.add_transition(t.lhs(), t.label(), t.rhs());
            }
            LabelData::Node(_) => transitions.push((t, info)),
            LabelData::Vars(..) => {}
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for (t, info) in &transitions {
            let Some(node) = info.node() else {
                continue;
            };
            let mut buffer: Vec<(State, Signature)> = Vec::new();
            {
                let choices: Option<Vec<&Vec<Signature>>> = t.lhs().iter().map(|s| inv.get(s)).collect();
                let Some(choices) = choices else {
                    continue;
                };
                let lens: Vec<usize> = choices.iter().map(|c| c.len()).collect();
                for_each_product(&lens, |tuple| {
                    let lhs: Vec<State> = tuple
                        .iter()
                        .enumerate()
                        .map(|(i, &k)| signature_map[&(t.lhs()[i], choices[i][k].clone())])
                        .collect();
                    let Some(mut v) = process_node(&lhs, node, &state_map) else {
                        return;
                    };
                    normalize_signature(&mut v);
                    let key = (t.rhs(), v.clone());
                    let state = match signature_map.get(&key) {
                        Some(&s) => s,
                        None => {
                            let s = State::new(*offset);
                            *offset += 1;
                            signature_map.insert(key, s);
                            if ta.is_final(t.rhs()) {
                                dst.add_final_state(s);
                            }
                            state_map.insert(s, v.clone());
                            buffer.push((t.rhs(), v));
                            s
                        }
                    };
                    dst.add_transition(&lhs, t.label(), state);
                });
            }
            changed |= !buffer.is_empty();
            for (s, v) in buffer {
                inv.entry(s).or_default().push(v);
            }
        }
    }
    dst
}

/// Connection data of one root.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RootInfo {
    pub valid: bool,
    pub signature: Signature,
    /// Backward selector -> root reaching this one through it.
    pub bwd_map: BTreeMap<usize, usize>,
}

impl RootInfo {
    pub fn backward_lookup(&self, selector: usize) -> Option<usize> {
        self.bwd_map.get(&selector).copied()
    }
}

impl fmt::Display for RootInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return write!(f, "<invalid>");
        }
        write!(f, "{}", display_signature(&self.signature))?;
        for (s, r) in &self.bwd_map {
            write!(f, "|{}:{}", s, r)?;
        }
        Ok(())
    }
}

/// Signatures of all roots of a forest automaton.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ConnectionGraph {
    data: Vec<RootInfo>,
}

impl ConnectionGraph {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![RootInfo::default(); size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn root(&self, root: usize) -> &RootInfo {
        &self.data[root]
    }

    pub fn signature(&self, root: usize) -> &Signature {
        &self.data[root].signature
    }

    pub fn is_valid(&self) -> bool {
        self.data.iter().all(|r| r.valid)
    }

    pub fn new_root(&mut self) {
        self.data.push(RootInfo::default());
    }

    pub fn resize(&mut self, size: usize) {
        self.data.resize(size, RootInfo::default());
    }

    /// Drops the data of `root` along with the backward edges it induced.
    pub fn invalidate(&mut self, root: usize) {
        if !self.data[root].valid {
            return;
        }
        let signature = std::mem::take(&mut self.data[root].signature);
        for cutpoint in &signature {
            if let Some(bwd) = cutpoint.bwd_selector {
                let target = &mut self.data[cutpoint.root];
                if target.backward_lookup(bwd) == Some(root) {
                    target.bwd_map.remove(&bwd);
                }
            }
        }
        self.data[root].signature = signature;
        self.data[root].valid = false;
    }

    pub fn invalidate_all(&mut self) {
        for root in 0..self.data.len() {
            self.invalidate(root);
        }
    }

    pub fn update_backward_data(&mut self, root: usize) {
        assert!(!self.data[root].valid, "Root {} is already valid", root);
        let signature = self.data[root].signature.clone();
        for cutpoint in &signature {
            if let Some(bwd) = cutpoint.bwd_selector {
                self.data[cutpoint.root].bwd_map.entry(bwd).or_insert(root);
            }
        }
        self.data[root].valid = true;
    }

    pub fn update_root(&mut self, root: usize, boxman: &BoxMan, ta: &TreeAut) {
        let map = compute_signatures(boxman, ta);
        let signature = ta
            .final_states()
            .iter()
            .find_map(|s| map.get(s))
            .cloned()
            .unwrap_or_default();
        self.data[root].signature = signature;
        self.update_backward_data(root);
    }

    /// Recomputes the data of every invalid root.
    pub fn update_if_needed(&mut self, roots: &[Option<Rc<TreeAut>>], boxman: &BoxMan) {
        assert_eq!(self.data.len(), roots.len(), "Connection graph out of sync with roots");
        for (i, root) in roots.iter().enumerate() {
            if self.data[i].valid {
                continue;
            }
            match root {
                Some(ta) => self.update_root(i, boxman, ta),
                None => {
                    self.data[i].signature.clear();
                    self.data[i].valid = true;
                }
            }
        }
    }

    pub fn has_reference(&self, root: usize, target: usize) -> bool {
        contains_cutpoint(&self.data[root].signature, target)
    }

    /// Moves root `i` to `index[i]`, dropping roots mapped to `None`.
    pub fn finish_normalization(&mut self, size: usize, index: &[Option<usize>]) {
        assert_eq!(index.len(), self.data.len(), "Index does not cover all roots");
        let mut tmp = vec![RootInfo::default(); size];
        for (i, info) in self.data.drain(..).enumerate() {
            if let Some(j) = index[i] {
                tmp[j] = info;
            }
        }
        for info in &mut tmp {
            rename_signature(&mut info.signature, index);
            info.bwd_map = info
                .bwd_map
                .iter()
                .filter_map(|(&s, &r)| index[r].map(|r| (s, r)))
                .collect();
        }
        self.data = tmp;
    }

    /// Replaces the reference to `src` in the signature of `dst` by the
    /// signature of `src`, after `src` was merged into `dst`.
    pub fn merge_cutpoint(&mut self, dst: usize, src: usize) {
        let dst_signature = self.data[dst].signature.clone();
        let src_signature = self.data[src].signature.clone();
        assert!(
            contains_cutpoint(&dst_signature, src),
            "Root {} does not reference root {}",
            dst,
            src
        );

        let mut signature = Vec::new();
        for cutpoint in &dst_signature {
            if cutpoint.root != src {
                signature.push(cutpoint.clone());
                continue;
            }
            for tmp in &src_signature {
                let mut info = tmp.clone();
                info.fwd_selectors = cutpoint.fwd_selectors.clone();
                let Some(bwd) = tmp.bwd_selector else {
                    signature.push(info);
                    continue;
                };
                let bwd_map = &mut self.data[tmp.root].bwd_map;
                if cutpoint.bwd_selector.is_none() {
                    info.bwd_selector = None;
                    bwd_map.remove(&bwd);
                } else {
                    let existing = bwd_map.iter().find(|&(_, &r)| r == dst).map(|(&s, _)| s);
                    match existing {
                        None => {
                            bwd_map.insert(bwd, dst);
                        }
                        Some(s) if s < bwd => {
                            bwd_map.remove(&bwd);
                        }
                        Some(s) => {
                            bwd_map.remove(&s);
                            bwd_map.insert(bwd, dst);
                        }
                    }
                }
                signature.push(info);
            }
        }
        normalize_signature(&mut signature);
        self.data[dst].signature = signature;
    }

    /// Follows backward edges from `c` to an unvisited root as far as possible.
    pub fn climb(&self, c: usize, visited: &[bool], mask: &mut [bool]) -> usize {
        if mask[c] || self.data[c].bwd_map.is_empty() {
            return c;
        }
        mask[c] = true;
        for &r in self.data[c].bwd_map.values() {
            if !visited[r] {
                return self.climb(r, visited, mask);
            }
        }
        c
    }

    /// Depth-first traversal from `c` recording the visit order.
    ///
    /// Roots reached twice, referenced more than once, or entered through a
    /// backward edge get marked.
    pub fn visit(&self, c: usize, visited: &mut [bool], order: &mut Vec<usize>, marked: &mut [bool]) {
        if visited[c] {
            marked[c] = true;
            return;
        }
        visited[c] = true;
        order.push(c);

        for cutpoint in &self.data[c].signature {
            self.visit(cutpoint.root, visited, order, marked);
            if cutpoint.ref_count > 1 {
                marked[cutpoint.root] = true;
            }
        }

        for &r in self.data[c].bwd_map.values() {
            if visited[r] {
                continue;
            }
            let mut mask = vec![false; self.data.len()];
            mask[c] = true;
            let tmp = self.climb(r, visited, &mut mask);
            if tmp == c {
                continue;
            }
            marked[tmp] = true;
            self.visit(tmp, visited, order, marked);
        }
    }

    /// Plain reachability from `c`.
    pub fn visit_reachable(&self, c: usize, visited: &mut [bool]) {
        if visited[c] {
            return;
        }
        visited[c] = true;

        for cutpoint in &self.data[c].signature {
            self.visit_reachable(cutpoint.root, visited);
        }

        for &r in self.data[c].bwd_map.values() {
            if visited[r] {
                continue;
            }
            let mut mask = vec![false; self.data.len()];
            mask[c] = true;
            let tmp = self.climb(r, visited, &mut mask);
            if tmp == c {
                continue;
            }
            self.visit_reachable(tmp, visited);
        }
    }
}

impl fmt::Display for ConnectionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, info) in self.data.iter().enumerate() {
            writeln!(f, "{}: {}", i, info)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::data::{Data, SelData};

    fn cutpoint(root: usize, fwd: usize) -> CutpointInfo {
        let mut c = CutpointInfo::new(root);
        c.fwd_selectors.insert(fwd);
        c
    }

    #[test]
    fn test_normalize_signature_merges_roots() {
        let mut a = cutpoint(1, 8);
        a.bwd_selector = Some(16);
        let b = cutpoint(1, 0);
        let c = cutpoint(2, 0);
        let mut sig = vec![a, c, b];
        normalize_signature(&mut sig);
        assert_eq!(sig.len(), 2);
        assert_eq!(sig[0].root, 1);
        assert_eq!(sig[0].ref_count, 2);
        assert!(!sig[0].ref_inherited);
        assert_eq!(sig[0].fwd_selectors, BTreeSet::from([0, 8]));
        assert_eq!(sig[0].bwd_selector, Some(16));
        assert_eq!(sig[1].root, 2);
    }

    #[test]
    fn test_ref_count_saturates() {
        let mut sig = vec![cutpoint(0, 0), cutpoint(0, 8), cutpoint(0, 16)];
        normalize_signature(&mut sig);
        assert_eq!(sig[0].ref_count, REF_COUNT_THRESHOLD);
    }

    #[test]
    fn test_inherited_ref_count() {
        let mut shared = cutpoint(3, 0);
        shared.ref_count = 2;
        let mut sig = vec![shared];
        normalize_signature(&mut sig);
        assert!(sig[0].ref_inherited);
    }

    #[test]
    fn test_rename_signature() {
        let mut sig = vec![cutpoint(0, 0), cutpoint(1, 8)];
        rename_signature(&mut sig, &[None, Some(0)]);
        assert_eq!(sig.len(), 1);
        assert_eq!(sig[0].root, 0);
    }

    #[test]
    fn test_min_selector() {
        assert_eq!(min_selector(None, Some(3)), Some(3));
        assert_eq!(min_selector(Some(1), Some(3)), Some(1));
        assert_eq!(min_selector(None, None), None);
    }

    #[test]
    fn test_compute_signatures() {
        let boxman = BoxMan::default();
        let next = boxman.selector(&SelData::new(0, 8, 0, "next"));
        let data = boxman.selector(&SelData::new(8, 8, 0, "data"));
        let label = boxman.node_label(vec![next, data]);
        let mut ta = boxman.new_ta();
        let r = boxman.add_data(&mut ta, &Data::reference(1));
        let v = boxman.add_data(&mut ta, &Data::Int(7));
        ta.add_transition(&[r, v], label, State::new(0));
        ta.add_final_state(State::new(0));

        let map = compute_signatures(&boxman, &ta);
        let sig = &map[&State::new(0)];
        assert_eq!(sig.len(), 1);
        assert_eq!(sig[0].root, 1);
        assert_eq!(sig[0].fwd_selectors, BTreeSet::from([0]));
        assert!(map[&v].is_empty());
    }

    #[test]
    fn test_connection_graph_backward_edges() {
        let mut cg = ConnectionGraph::new(2);
        let mut c = cutpoint(1, 0);
        c.bwd_selector = Some(8);
        cg.data[0].signature = vec![c];
        cg.update_backward_data(0);
        cg.update_backward_data(1);
        assert_eq!(cg.root(1).backward_lookup(8), Some(0));
        assert!(cg.has_reference(0, 1));
        cg.invalidate(0);
        assert!(cg.root(1).bwd_map.is_empty());
        assert!(!cg.is_valid());
    }

    #[test]
    fn test_visit_marks_shared_roots() {
        let mut cg = ConnectionGraph::new(3);
        cg.data[0].signature = vec![cutpoint(1, 0), cutpoint(2, 8)];
        cg.data[1].signature = vec![cutpoint(2, 0)];
        for i in 0..3 {
            cg.update_backward_data(i);
        }
        let mut visited = vec![false; 3];
        let mut order = Vec::new();
        let mut marked = vec![false; 3];
        cg.visit(0, &mut visited, &mut order, &mut marked);
        assert_eq!(order, vec![0, 1, 2]);
        assert!(marked[2]);
        assert!(!marked[1]);
    }

    #[test]
    fn test_finish_normalization() {
        let mut cg = ConnectionGraph::new(3);
        cg.data[2].signature = vec![cutpoint(0, 0)];
        for i in 0..3 {
            cg.update_backward_data(i);
        }
        cg.finish_normalization(2, &[Some(1), None, Some(0)]);
        assert_eq!(cg.len(), 2);
        assert_eq!(cg.signature(0)[0].root, 1);
    }
}
