//! Label payloads: what a [`Label`](crate::types::Label) stands for.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::data::{Data, SelData};
use crate::nested_box::NestedBox;

/// Type descriptor attached to a node: the type name and its selector offsets.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeBox {
    name: String,
    selectors: Vec<usize>,
}

impl TypeBox {
    pub fn new(name: impl Into<String>, selectors: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            selectors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selectors(&self) -> &[usize] {
        &self.selectors
    }
}

impl fmt::Display for TypeBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type({})", self.name)
    }
}

/// One component of a node label.
#[derive(Debug, Clone)]
pub enum AbstractBox {
    /// A single pointer field; one child.
    Selector(Rc<SelData>),
    /// The type of the node; no children.
    TypeInfo(Rc<TypeBox>),
    /// A folded sub-shape; one child per parameter.
    Nested(Rc<NestedBox>),
}

impl PartialEq for AbstractBox {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AbstractBox::Selector(a), AbstractBox::Selector(b)) => a == b,
            (AbstractBox::TypeInfo(a), AbstractBox::TypeInfo(b)) => a.name() == b.name(),
            (AbstractBox::Nested(a), AbstractBox::Nested(b)) => Rc::ptr_eq(a, b) || a.name() == b.name(),
            _ => false,
        }
    }
}

impl Eq for AbstractBox {}

impl AbstractBox {
    /// Number of children in a transition.
    pub fn arity(&self) -> usize {
        match self {
            AbstractBox::Selector(_) => 1,
            AbstractBox::TypeInfo(_) => 0,
            AbstractBox::Nested(b) => b.arity(),
        }
    }

    /// Structural boxes connect a node to other nodes.
    pub fn is_structural(&self) -> bool {
        !matches!(self, AbstractBox::TypeInfo(_))
    }

    pub fn as_nested(&self) -> Option<&Rc<NestedBox>> {
        match self {
            AbstractBox::Nested(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_selector(&self) -> Option<&SelData> {
        match self {
            AbstractBox::Selector(s) => Some(s),
            _ => None,
        }
    }

    /// Sort key inside a node label: type info first, then by the lowest
    /// covered selector offset.
    pub fn order(&self) -> (u8, usize) {
        match self {
            AbstractBox::TypeInfo(_) => (0, 0),
            AbstractBox::Selector(s) => (1, s.offset),
            AbstractBox::Nested(b) => (1, b.output_coverage().first().copied().unwrap_or(usize::MAX)),
        }
    }

    /// Selector offsets of the node covered by this box.
    pub fn output_coverage(&self) -> BTreeSet<usize> {
        match self {
            AbstractBox::Selector(s) => BTreeSet::from([s.offset]),
            AbstractBox::TypeInfo(_) => BTreeSet::new(),
            AbstractBox::Nested(b) => b.output_coverage().clone(),
        }
    }

    /// Selector offsets of the `input`-th child node covered by this box.
    pub fn input_coverage(&self, input: usize) -> BTreeSet<usize> {
        match self {
            AbstractBox::Selector(_) => {
                assert_eq!(input, 0, "Selector has a single input");
                BTreeSet::new()
            }
            AbstractBox::TypeInfo(_) => panic!("Type info has no inputs"),
            AbstractBox::Nested(b) => b.input_coverage(input).clone(),
        }
    }

    /// Lowest selector of the node through which the `input`-th child is reached.
    pub fn selector_to_input(&self, input: usize) -> usize {
        match self {
            AbstractBox::Selector(s) => {
                assert_eq!(input, 0, "Selector has a single input");
                s.offset
            }
            AbstractBox::TypeInfo(_) => panic!("Type info has no inputs"),
            AbstractBox::Nested(b) => b.selector_to_input(input),
        }
    }

    /// Selector of the `input`-th child leading back to the node, if any.
    pub fn output_reachable(&self, input: usize) -> Option<usize> {
        match self {
            AbstractBox::Selector(_) => None,
            AbstractBox::TypeInfo(_) => panic!("Type info has no inputs"),
            AbstractBox::Nested(b) => b.output_reachable(input),
        }
    }
}

impl fmt::Display for AbstractBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractBox::Selector(s) => write!(f, "{}", s),
            AbstractBox::TypeInfo(t) => write!(f, "{}", t),
            AbstractBox::Nested(b) => write!(f, "{}({})", b.name(), b.arity()),
        }
    }
}

/// Where a selector offset lives inside a node label.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NodeItem {
    /// Position of the covering box in the label.
    pub index: usize,
    /// Position of the box's first child in the left-hand side.
    pub offset: usize,
}

/// A heap node: a sequence of boxes, each consuming `arity` children.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NodeLabel {
    boxes: Vec<AbstractBox>,
    items: BTreeMap<usize, NodeItem>,
    tag: Vec<usize>,
    type_info: Option<Rc<TypeBox>>,
    arity: usize,
}

impl NodeLabel {
    pub fn new(boxes: Vec<AbstractBox>) -> Self {
        let mut items = BTreeMap::new();
        let mut type_info = None;
        let mut offset = 0;
        for (index, b) in boxes.iter().enumerate() {
            match b {
                AbstractBox::TypeInfo(t) => type_info = Some(t.clone()),
                _ => {
                    for s in b.output_coverage() {
                        items.insert(s, NodeItem { index, offset });
                    }
                }
            }
            offset += b.arity();
        }
        let tag = items.keys().copied().collect();
        Self {
            boxes,
            items,
            tag,
            type_info,
            arity: offset,
        }
    }

    pub fn boxes(&self) -> &[AbstractBox] {
        &self.boxes
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Sorted selector offsets covered by the node.
    pub fn tag(&self) -> &[usize] {
        &self.tag
    }

    pub fn type_info(&self) -> Option<&Rc<TypeBox>> {
        self.type_info.as_ref()
    }

    pub fn item(&self, selector: usize) -> Option<&NodeItem> {
        self.items.get(&selector)
    }

    /// Boxes paired with the left-hand-side position of their first child.
    pub fn iter_boxes(&self) -> impl Iterator<Item = (&AbstractBox, usize)> + '_ {
        self.boxes.iter().scan(0, |offset, b| {
            let start = *offset;
            *offset += b.arity();
            Some((b, start))
        })
    }

    /// The plain selector at `offset` and its child position.
    pub fn selector(&self, offset: usize) -> Option<(&SelData, usize)> {
        let item = self.items.get(&offset)?;
        let sel = self.boxes[item.index].as_selector()?;
        Some((sel, item.offset))
    }

    /// Selector offsets covered by the structural boxes of the node.
    pub fn output_coverage(&self) -> BTreeSet<usize> {
        self.items.keys().copied().collect()
    }

    /// Checks whether some structural box is a nested box.
    pub fn has_nested(&self) -> bool {
        self.boxes.iter().any(|b| b.as_nested().is_some())
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, b) in self.boxes.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", b)?;
        }
        write!(f, ">")
    }
}

/// The meaning of an interned label.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LabelData {
    /// Nullary label of a data leaf.
    Data(Data),
    Node(NodeLabel),
    /// Top label of an encoded forest: the variable values, one child per root.
    Vars(usize, Vec<Data>),
}

impl LabelData {
    pub fn is_data(&self) -> bool {
        matches!(self, LabelData::Data(_))
    }

    pub fn is_node(&self) -> bool {
        matches!(self, LabelData::Node(_))
    }

    pub fn data(&self) -> Option<&Data> {
        match self {
            LabelData::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn node(&self) -> Option<&NodeLabel> {
        match self {
            LabelData::Node(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for LabelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelData::Data(d) => write!(f, "{}", d),
            LabelData::Node(n) => write!(f, "{}", n),
            LabelData::Vars(arity, vars) => {
                write!(f, "[{}:", arity)?;
                for v in vars {
                    write!(f, " {}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}
