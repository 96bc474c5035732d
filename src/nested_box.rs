//! Folded sub-shapes.
//!
//! A [`NestedBox`] stands for a whole sub-forest: an *output* automaton
//! rooted at the node carrying the box, and optionally an *input* automaton
//! rooted at one of the box parameters. Parameters are the other roots the
//! sub-forest refers to; in the box automata root `0` is the node carrying
//! the box and roots `1..=arity` are the parameters.

use std::collections::BTreeSet;
use std::fmt;

use crate::boxman::BoxMan;
use crate::connection::{contains_cutpoint, display_signature, signature_hash, Signature};
use crate::label::LabelData;
use crate::treeaut::TreeAut;
use crate::types::Label;
use crate::utils::{hash_combine, hash_sequence};

/// The input part of a box.
#[derive(Debug, Clone)]
pub struct BoxInput {
    ta: TreeAut,
    /// Parameter the input automaton is rooted at.
    index: usize,
    signature: Signature,
    labels: Vec<Label>,
}

impl BoxInput {
    pub fn ta(&self) -> &TreeAut {
        &self.ta
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

#[derive(Debug, Clone)]
pub struct NestedBox {
    name: String,
    output: TreeAut,
    output_signature: Signature,
    output_labels: Vec<Label>,
    /// Selector of the carrying node leading to each parameter.
    input_map: Vec<Option<usize>>,
    input: Option<BoxInput>,
    /// Per parameter: forward selector and backward selector.
    selectors: Vec<(usize, Option<usize>)>,
    /// Index 0: selectors of the carrying node covered by the box;
    /// index `i + 1`: selectors of parameter `i` covered by the box.
    sel_coverage: Vec<BTreeSet<usize>>,
    self_reference: bool,
    hint: u64,
}

fn accepting_labels(ta: &TreeAut) -> Vec<Label> {
    let mut labels: Vec<Label> = ta.accepting_transitions().iter().map(|t| t.label()).collect();
    labels.sort();
    labels.dedup();
    labels
}

fn downward_coverage(boxman: &BoxMan, ta: &TreeAut) -> BTreeSet<usize> {
    let mut coverage = BTreeSet::new();
    for t in ta.accepting_transitions() {
        if let LabelData::Node(node) = &*boxman.label(t.label()) {
            coverage.extend(node.output_coverage());
        }
    }
    coverage
}

/// Adds the input coverage of nested boxes to the root their parameter refers to.
fn enumerate_selectors_at_leaves(boxman: &BoxMan, ta: &TreeAut, coverage: &mut [BTreeSet<usize>]) {
    for t in ta.transitions() {
        let info = boxman.label(t.label());
        let Some(node) = info.node() else {
            continue;
        };
        for (abox, offset) in node.iter_boxes() {
            if abox.as_nested().is_none() {
                continue;
            }
            for k in 0..abox.arity() {
                let root = boxman.leaf_data(t.lhs()[offset + k]).and_then(|d| d.root());
                if let Some(root) = root.filter(|&r| r < coverage.len()) {
                    coverage[root].extend(abox.input_coverage(k));
                }
            }
        }
    }
}

impl NestedBox {
    /// Builds an unnamed box; [`BoxMan::get_box`] names it on registration.
    pub fn new(
        boxman: &BoxMan,
        output: TreeAut,
        output_signature: Signature,
        input_map: Vec<Option<usize>>,
        input: Option<(TreeAut, usize, Signature)>,
        selectors: Vec<(usize, Option<usize>)>,
    ) -> Self {
        let arity = selectors.len();
        let output_labels = accepting_labels(&output);

        let mut hint = hash_sequence(
            selectors
                .iter()
                .map(|&(f, b)| hash_combine(f as u64, b.map_or(u64::MAX, |b| b as u64))),
        );
        hint = hash_combine(hint, hash_sequence(output_labels.iter().map(|l| l.index() as u64)));
        hint = hash_combine(hint, signature_hash(&output_signature));

        let mut sel_coverage = vec![BTreeSet::new(); arity + 1];
        sel_coverage[0] = downward_coverage(boxman, &output);
        enumerate_selectors_at_leaves(boxman, &output, &mut sel_coverage);

        let input = input.map(|(ta, index, signature)| {
            let labels = accepting_labels(&ta);
            hint = hash_combine(hint, hash_sequence(labels.iter().map(|l| l.index() as u64)));
            hint = hash_combine(hint, signature_hash(&signature));
            assert!(index < arity, "Input index {} out of range", index);
            sel_coverage[index + 1].extend(downward_coverage(boxman, &ta));
            enumerate_selectors_at_leaves(boxman, &ta, &mut sel_coverage);
            BoxInput {
                ta,
                index,
                signature,
                labels,
            }
        });

        let self_reference = contains_cutpoint(&output_signature, 0);

        Self {
            name: String::new(),
            output,
            output_signature,
            output_labels,
            input_map,
            input,
            selectors,
            sel_coverage,
            self_reference,
            hint,
        }
    }

    pub(crate) fn with_name(mut self, name: String) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.selectors.len()
    }

    pub fn output(&self) -> &TreeAut {
        &self.output
    }

    pub fn output_signature(&self) -> &Signature {
        &self.output_signature
    }

    pub fn input(&self) -> Option<&BoxInput> {
        self.input.as_ref()
    }

    pub fn input_map(&self) -> &[Option<usize>] {
        &self.input_map
    }

    /// Selector of the carrying node that originally led to parameter `input`.
    pub fn selector(&self, input: usize) -> Option<usize> {
        self.input_map.get(input).copied().flatten()
    }

    pub fn selectors(&self) -> &[(usize, Option<usize>)] {
        &self.selectors
    }

    pub fn output_coverage(&self) -> &BTreeSet<usize> {
        &self.sel_coverage[0]
    }

    pub fn input_coverage(&self, input: usize) -> &BTreeSet<usize> {
        &self.sel_coverage[input + 1]
    }

    pub fn selector_to_input(&self, input: usize) -> usize {
        self.selectors[input].0
    }

    pub fn output_reachable(&self, input: usize) -> Option<usize> {
        self.selectors[input].1
    }

    pub fn has_self_reference(&self) -> bool {
        self.self_reference
    }

    pub fn hint(&self) -> u64 {
        self.hint
    }

    /// Equal up to the name: same interface, same languages.
    pub fn same_as(&self, other: &NestedBox) -> bool {
        if self.hint != other.hint
            || self.selectors != other.selectors
            || self.output_signature != other.output_signature
            || self.output_labels != other.output_labels
        {
            return false;
        }
        match (&self.input, &other.input) {
            (None, None) => {}
            (Some(a), Some(b)) => {
                if a.index != b.index || a.signature != b.signature || a.labels != b.labels {
                    return false;
                }
            }
            _ => return false,
        }
        if !self.output.language_eq(&other.output) {
            return false;
        }
        match (&self.input, &other.input) {
            (Some(a), Some(b)) => a.ta.language_eq(&b.ta),
            _ => true,
        }
    }
}

impl fmt::Display for NestedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for s in self.output_coverage() {
            write!(f, " +{}", s)?;
        }
        write!(f, " ) [{}]", display_signature(&self.output_signature))?;
        if let Some(input) = &self.input {
            write!(f, " <{}>(", input.index)?;
            for s in self.input_coverage(input.index) {
                write!(f, " +{}", s)?;
            }
            write!(f, " ) [{}]", display_signature(&input.signature))?;
        }
        Ok(())
    }
}
