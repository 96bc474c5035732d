use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::rc::Rc;

use log::debug;

use crate::data::{Data, SelData};
use crate::error::{FaError, FaResult};
use crate::label::{AbstractBox, LabelData, NodeLabel, TypeBox};
use crate::nested_box::NestedBox;
use crate::table::Table;
use crate::treeaut::{Backend, TreeAut};
use crate::types::{Label, State};
use crate::utils::{hash_combine, hash_sequence, MyHash};

impl MyHash for Data {
    fn hash(&self) -> u64 {
        match self {
            Data::Undef => 1,
            Data::Unknown => 2,
            Data::NativePtr(p) => hash_combine(3, *p as u64),
            Data::VoidPtr(size) => hash_combine(4, *size as u64),
            Data::Ref { root, displ } => hash_combine(hash_combine(5, *root as u64), *displ as u64),
            Data::Int(i) => hash_combine(6, *i as u64),
            Data::Bool(b) => hash_combine(7, *b as u64),
            Data::Struct(items) => hash_combine(
                8,
                hash_sequence(items.iter().map(|(o, d)| hash_combine(*o as u64, d.hash()))),
            ),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum LabelKey {
    Data(usize),
    Node(Vec<usize>),
    Vars(usize, Vec<usize>),
}

impl Default for LabelKey {
    fn default() -> Self {
        LabelKey::Node(Vec::new())
    }
}

impl MyHash for LabelKey {
    fn hash(&self) -> u64 {
        match self {
            LabelKey::Data(d) => hash_combine(1, *d as u64),
            LabelKey::Node(boxes) => hash_combine(2, hash_sequence(boxes.iter().map(|&b| b as u64))),
            LabelKey::Vars(arity, vars) => hash_combine(
                hash_combine(3, *arity as u64),
                hash_sequence(vars.iter().map(|&v| v as u64)),
            ),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
enum BoxKey {
    Selector(SelData),
    Type(String),
    Nested(String),
}

/// Registry of everything labels refer to: data values, selectors, types,
/// nested boxes and the labels built from them.
///
/// Every registered value is interned: equal values get the same index,
/// the same leaf state and the same label, for as long as the registry lives.
pub struct BoxMan {
    backend: Rc<Backend>,
    data: RefCell<Table<Data>>,
    labels: RefCell<Table<LabelKey>>,
    label_info: RefCell<Vec<Rc<LabelData>>>,
    box_ids: RefCell<BTreeMap<BoxKey, usize>>,
    types: RefCell<BTreeMap<String, Rc<TypeBox>>>,
    boxes: RefCell<Vec<Rc<NestedBox>>>,
    candidates: RefCell<Vec<NestedBox>>,
}

impl BoxMan {
    pub fn new(bits: usize) -> Self {
        Self {
            backend: Backend::new(),
            data: RefCell::new(Table::new(bits)),
            labels: RefCell::new(Table::new(bits)),
            label_info: RefCell::new(Vec::new()),
            box_ids: RefCell::new(BTreeMap::new()),
            types: RefCell::new(BTreeMap::new()),
            boxes: RefCell::new(Vec::new()),
            candidates: RefCell::new(Vec::new()),
        }
    }
}

impl Default for BoxMan {
    fn default() -> Self {
        BoxMan::new(10)
    }
}

impl Debug for BoxMan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxMan")
            .field("data", &self.data.borrow().len())
            .field("labels", &self.labels.borrow().len())
            .field("boxes", &self.boxes.borrow().len())
            .field("candidates", &self.candidates.borrow().len())
            .field("transitions", &self.backend.len())
            .finish()
    }
}

impl BoxMan {
    pub fn backend(&self) -> &Rc<Backend> {
        &self.backend
    }

    /// Creates an empty automaton over the shared backend.
    pub fn new_ta(&self) -> TreeAut {
        TreeAut::new(self.backend.clone())
    }

    fn intern_label<F>(&self, key: LabelKey, make: F) -> Label
    where
        F: FnOnce() -> LabelData,
    {
        let index = self.labels.borrow_mut().put(key);
        let mut info = self.label_info.borrow_mut();
        if index > info.len() {
            assert_eq!(index, info.len() + 1, "Label table out of sync");
            info.push(Rc::new(make()));
        }
        Label::new(index as u32)
    }

    /// Meaning of a label.
    pub fn label(&self, label: Label) -> Rc<LabelData> {
        let index = label.index();
        assert_ne!(index, 0, "Label 0 is a sentinel");
        self.label_info.borrow()[index - 1].clone()
    }

    pub fn data_index(&self, data: &Data) -> usize {
        self.data.borrow_mut().put(data.clone())
    }

    /// The leaf state standing for `data`.
    pub fn data_state(&self, data: &Data) -> State {
        State::leaf(self.data_index(data))
    }

    /// The nullary label producing the leaf of `data`.
    pub fn data_label(&self, data: &Data) -> Label {
        let index = self.data_index(data);
        self.intern_label(LabelKey::Data(index), || LabelData::Data(data.clone()))
    }

    /// Adds the leaf transition of `data` to `ta` and returns the leaf state.
    pub fn add_data(&self, ta: &mut TreeAut, data: &Data) -> State {
        let state = self.data_state(data);
        ta.add_transition(&[], self.data_label(data), state);
        state
    }

    /// The value behind a leaf state.
    pub fn leaf_data(&self, state: State) -> Option<Data> {
        if !state.is_leaf() {
            return None;
        }
        let data = self.data.borrow();
        (state.id() <= data.len()).then(|| data.value(state.id()).clone())
    }

    fn box_id(&self, abox: &AbstractBox) -> usize {
        let key = match abox {
            AbstractBox::Selector(s) => BoxKey::Selector((**s).clone()),
            AbstractBox::TypeInfo(t) => BoxKey::Type(t.name().to_string()),
            AbstractBox::Nested(b) => BoxKey::Nested(b.name().to_string()),
        };
        let mut ids = self.box_ids.borrow_mut();
        let next = ids.len();
        *ids.entry(key).or_insert(next)
    }

    /// Label of a node made of `boxes`, in the given order.
    pub fn node_label(&self, boxes: Vec<AbstractBox>) -> Label {
        let key = LabelKey::Node(boxes.iter().map(|b| self.box_id(b)).collect());
        self.intern_label(key, || LabelData::Node(NodeLabel::new(boxes)))
    }

    /// Top label of an encoded forest with `arity` roots.
    pub fn vars_label(&self, arity: usize, vars: &[Data]) -> Label {
        let key = LabelKey::Vars(arity, vars.iter().map(|v| self.data_index(v)).collect());
        self.intern_label(key, || LabelData::Vars(arity, vars.to_vec()))
    }

    /// Sorts the boxes of a node into canonical order, permuting the
    /// children along, and returns the resulting label and left-hand side.
    pub fn reorder(&self, boxes: &[AbstractBox], lhs: &[State]) -> (Label, Vec<State>) {
        let mut parts: Vec<(&AbstractBox, &[State])> = Vec::with_capacity(boxes.len());
        let mut offset = 0;
        for b in boxes {
            parts.push((b, &lhs[offset..offset + b.arity()]));
            offset += b.arity();
        }
        assert_eq!(offset, lhs.len(), "Left-hand side does not match the boxes");
        parts.sort_by_key(|(b, _)| b.order());
        let sorted: Vec<AbstractBox> = parts.iter().map(|(b, _)| (*b).clone()).collect();
        let lhs: Vec<State> = parts.iter().flat_map(|(_, s)| s.iter().copied()).collect();
        (self.node_label(sorted), lhs)
    }

    pub fn selector(&self, sel: &SelData) -> AbstractBox {
        AbstractBox::Selector(Rc::new(sel.clone()))
    }

    /// Registers a type with the given selector offsets.
    pub fn create_type_info(&self, name: &str, selectors: Vec<usize>) -> FaResult<Rc<TypeBox>> {
        let mut types = self.types.borrow_mut();
        if types.contains_key(name) {
            return Err(FaError::DuplicateType(name.to_string()));
        }
        let t = Rc::new(TypeBox::new(name, selectors));
        types.insert(name.to_string(), t.clone());
        Ok(t)
    }

    pub fn lookup_type_info(&self, name: &str) -> FaResult<Rc<TypeBox>> {
        self.types
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| FaError::TypeNotFound(name.to_string()))
    }

    /// The registered box equal to `candidate`, if any.
    pub fn find_box(&self, candidate: &NestedBox) -> Option<Rc<NestedBox>> {
        self.boxes.borrow().iter().find(|b| b.same_as(candidate)).cloned()
    }

    /// Registers `candidate` unless an equal box exists, and returns the
    /// registered box.
    pub fn get_box(&self, candidate: NestedBox) -> Rc<NestedBox> {
        if let Some(b) = self.find_box(&candidate) {
            return b;
        }
        let mut boxes = self.boxes.borrow_mut();
        let name = format!("box{}", boxes.len());
        let b = Rc::new(candidate.with_name(name));
        debug!("get_box: learned {}", b);
        boxes.push(b.clone());
        b
    }

    /// Two-strikes lookup: a box not yet registered is only remembered the
    /// first time it is seen, and registered the second time.
    pub fn lookup_box(&self, candidate: NestedBox) -> Option<Rc<NestedBox>> {
        if let Some(b) = self.find_box(&candidate) {
            return Some(b);
        }
        let seen = {
            let mut candidates = self.candidates.borrow_mut();
            match candidates.iter().position(|c| c.same_as(&candidate)) {
                Some(i) => {
                    candidates.remove(i);
                    true
                }
                None => {
                    candidates.push(candidate.clone());
                    false
                }
            }
        };
        seen.then(|| self.get_box(candidate))
    }

    /// Forgets the boxes seen only once.
    pub fn clear_box_cache(&self) {
        self.candidates.borrow_mut().clear();
    }

    pub fn boxes(&self) -> Vec<Rc<NestedBox>> {
        self.boxes.borrow().clone()
    }

    pub fn box_count(&self) -> usize {
        self.boxes.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn next_sel() -> SelData {
        SelData::new(0, 8, 0, "next")
    }

    #[test]
    fn test_data_interning() {
        let boxman = BoxMan::default();
        let a = boxman.data_state(&Data::reference(1));
        let b = boxman.data_state(&Data::reference(1));
        let c = boxman.data_state(&Data::null());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_leaf());
        assert_eq!(boxman.leaf_data(a), Some(Data::reference(1)));
        assert_eq!(boxman.leaf_data(State::new(0)), None);
        let l = boxman.data_label(&Data::null());
        assert_eq!(boxman.label(l).data(), Some(&Data::null()));
        assert_eq!(boxman.data_label(&Data::null()), l);
    }

    #[test]
    fn test_node_labels() {
        let boxman = BoxMan::default();
        let next = boxman.selector(&next_sel());
        let l1 = boxman.node_label(vec![next.clone()]);
        let l2 = boxman.node_label(vec![next]);
        assert_eq!(l1, l2);
        assert!(boxman.label(l1).is_node());
        let v = boxman.vars_label(2, &[Data::reference(0)]);
        assert!(!boxman.label(v).is_node());
        assert_ne!(v, l1);
    }

    #[test]
    fn test_reorder() {
        let boxman = BoxMan::default();
        let data = boxman.selector(&SelData::new(8, 8, 0, "data"));
        let next = boxman.selector(&next_sel());
        let (label, lhs) = boxman.reorder(&[data, next], &[State::new(1), State::new(2)]);
        assert_eq!(lhs, vec![State::new(2), State::new(1)]);
        let info = boxman.label(label);
        assert_eq!(info.node().map(|n| n.tag().to_vec()), Some(vec![0, 8]));
    }

    #[test]
    fn test_type_registry() {
        let boxman = BoxMan::default();
        boxman.create_type_info("node", vec![0, 8]).unwrap();
        assert_eq!(
            boxman.create_type_info("node", vec![0]),
            Err(FaError::DuplicateType("node".to_string()))
        );
        assert_eq!(boxman.lookup_type_info("node").unwrap().selectors(), &[0, 8]);
        assert_eq!(
            boxman.lookup_type_info("tree"),
            Err(FaError::TypeNotFound("tree".to_string()))
        );
    }

    fn leaf_box(boxman: &BoxMan) -> NestedBox {
        let next = boxman.selector(&next_sel());
        let label = boxman.node_label(vec![next]);
        let mut output = boxman.new_ta();
        let null = boxman.add_data(&mut output, &Data::null());
        output.add_transition(&[null], label, State::new(0));
        output.add_final_state(State::new(0));
        NestedBox::new(boxman, output, Vec::new(), Vec::new(), None, Vec::new())
    }

    #[test]
    fn test_two_strikes() {
        let boxman = BoxMan::default();
        assert!(boxman.lookup_box(leaf_box(&boxman)).is_none());
        assert_eq!(boxman.box_count(), 0);
        let b = boxman.lookup_box(leaf_box(&boxman)).unwrap();
        assert_eq!(b.name(), "box0");
        assert_eq!(boxman.box_count(), 1);
        // Registered boxes are found right away.
        assert!(Rc::ptr_eq(&boxman.lookup_box(leaf_box(&boxman)).unwrap(), &b));
    }

    #[test]
    fn test_box_cache_reset() {
        let boxman = BoxMan::default();
        assert!(boxman.lookup_box(leaf_box(&boxman)).is_none());
        boxman.clear_box_cache();
        assert!(boxman.lookup_box(leaf_box(&boxman)).is_none());
        assert_eq!(boxman.box_count(), 0);
        let b = boxman.get_box(leaf_box(&boxman));
        assert_eq!(b.output_coverage().len(), 1);
        assert_eq!(b.arity(), 0);
    }
}
