//! Forest automata: one heap snapshot.
//!
//! A [`Fae`] is a tuple of tree automata ("roots"), each describing the
//! heap region reachable from one cutpoint, plus the values of the program
//! variables. Roots refer to each other through reference leaves.
//!
//! Snapshots are cheap to clone: roots are shared behind [`Rc`] and never
//! mutated in place; every edit installs a new automaton.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::boxman::BoxMan;
use crate::connection::ConnectionGraph;
use crate::data::Data;
use crate::debug::write_ta;
use crate::label::TypeBox;
use crate::relation::StateIndex;
use crate::treeaut::TreeAut;
use crate::types::State;

#[derive(Debug, Clone)]
pub struct Fae {
    pub(crate) boxman: Rc<BoxMan>,
    pub(crate) roots: Vec<Option<Rc<TreeAut>>>,
    pub(crate) variables: Vec<Data>,
    pub(crate) connection_graph: ConnectionGraph,
    pub(crate) state_offset: usize,
}

impl Fae {
    pub fn new(boxman: Rc<BoxMan>) -> Self {
        Self {
            boxman,
            roots: Vec::new(),
            variables: Vec::new(),
            connection_graph: ConnectionGraph::default(),
            state_offset: 1,
        }
    }

    pub fn boxman(&self) -> &Rc<BoxMan> {
        &self.boxman
    }

    pub fn roots(&self) -> &[Option<Rc<TreeAut>>] {
        &self.roots
    }

    pub fn root(&self, i: usize) -> Option<&Rc<TreeAut>> {
        self.roots.get(i).and_then(|r| r.as_ref())
    }

    /// The automaton of a live root.
    ///
    /// # Panics
    ///
    /// Panics if the root does not exist or was deleted.
    pub fn root_ta(&self, i: usize) -> &Rc<TreeAut> {
        match self.root(i) {
            Some(ta) => ta,
            None => panic!("Root {} is not present", i),
        }
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Number of roots actually present.
    pub fn live_root_count(&self) -> usize {
        self.roots.iter().filter(|r| r.is_some()).count()
    }

    pub fn variables(&self) -> &[Data] {
        &self.variables
    }

    pub fn connection_graph(&self) -> &ConnectionGraph {
        &self.connection_graph
    }

    pub fn alloc_ta(&self) -> TreeAut {
        self.boxman.new_ta()
    }

    pub fn next_state(&self) -> usize {
        self.state_offset
    }

    pub fn fresh_state(&mut self) -> State {
        let s = State::new(self.state_offset);
        self.state_offset += 1;
        s
    }

    pub fn set_state_offset(&mut self, offset: usize) {
        self.state_offset = offset;
    }

    /// Appends a root and returns its index.
    pub fn append_root(&mut self, ta: TreeAut) -> usize {
        self.roots.push(Some(Rc::new(ta)));
        self.connection_graph.new_root();
        self.roots.len() - 1
    }

    /// Replaces a root. The connection graph is left for the caller to invalidate.
    pub fn set_root(&mut self, i: usize, ta: Option<TreeAut>) {
        self.roots[i] = ta.map(Rc::new);
    }

    pub fn add_data(&self, ta: &mut TreeAut, data: &Data) -> State {
        self.boxman.add_data(ta, data)
    }

    /// The value behind a leaf state.
    pub fn leaf_data(&self, state: State) -> Option<Data> {
        self.boxman.leaf_data(state)
    }

    /// The root a leaf state refers to.
    pub fn get_ref(&self, state: State) -> Option<usize> {
        self.leaf_data(state).and_then(|d| d.root())
    }

    /// Copy of `src` whose internal states are all fresh.
    pub fn unique(&mut self, src: &TreeAut, add_finals: bool) -> TreeAut {
        let mut index = StateIndex::new();
        let offset = self.state_offset;
        let res = src.rename(|s| State::new(index.add(s) + offset), add_finals);
        self.state_offset += index.len();
        res
    }

    /// Renames the internal states of a root so that it shares none with other roots.
    pub fn make_disjoint(&mut self, root: usize) {
        let ta = self.root_ta(root).clone();
        let res = self.unique(&ta, true);
        self.set_root(root, Some(res));
    }

    /// Redirects references by `index`; references to roots mapped to
    /// `None` become undefined.
    pub fn relabel_references(&self, ta: &TreeAut, index: &[Option<usize>]) -> TreeAut {
        let mut dst = ta.empty_like();
        for &f in ta.final_states() {
            dst.add_final_state(f);
        }
        for t in ta.transitions() {
            if self.boxman.label(t.label()).is_data() {
                continue;
            }
            let lhs: Vec<State> = t
                .lhs()
                .iter()
                .map(|&s| match self.leaf_data(s) {
                    Some(d) => {
                        let d = d.map_root(|r| index.get(r).copied().flatten());
                        self.add_data(&mut dst, &d)
                    }
                    None => s,
                })
                .collect();
            dst.add_transition(&lhs, t.label(), t.rhs());
        }
        dst
    }

    /// Replaces every reference to `root` by an undefined value.
    pub fn invalidate_reference(&self, ta: &TreeAut, root: usize) -> TreeAut {
        let mut dst = ta.empty_like();
        for &f in ta.final_states() {
            dst.add_final_state(f);
        }
        for t in ta.transitions() {
            let info = self.boxman.label(t.label());
            if info.data().and_then(|d| d.root()) == Some(root) {
                continue;
            }
            let lhs: Vec<State> = t
                .lhs()
                .iter()
                .map(|&s| {
                    if self.get_ref(s) == Some(root) {
                        self.add_data(&mut dst, &Data::Undef)
                    } else {
                        s
                    }
                })
                .collect();
            dst.add_transition(&lhs, t.label(), t.rhs());
        }
        dst
    }

    pub fn unreachable_free(&mut self) {
        for root in self.roots.iter_mut().flatten() {
            *root = Rc::new(root.unreachable_free());
        }
    }

    pub fn minimize_roots(&mut self) {
        for root in self.roots.iter_mut().flatten() {
            *root = Rc::new(root.minimized());
        }
    }

    pub fn update_connection_graph(&mut self) {
        self.connection_graph.resize(self.roots.len());
        self.connection_graph.update_if_needed(&self.roots, &self.boxman);
    }

    /// Redirects variables after roots moved to `index`.
    pub fn update_vars_root_refs(&mut self, index: &[Option<usize>]) {
        for var in &mut self.variables {
            *var = var.map_root(|r| index.get(r).copied().flatten());
        }
    }

    pub fn set_vars_to_undef_for_root(&mut self, root: usize) {
        for var in &mut self.variables {
            if var.root() == Some(root) {
                *var = Data::Undef;
            }
        }
    }

    /// Roots referenced directly from the accepting transition of `root`.
    pub fn nearby_references(&self, root: usize) -> BTreeSet<usize> {
        let t = self.root_ta(root).accepting_transition();
        t.lhs().iter().filter_map(|&s| self.get_ref(s)).collect()
    }

    /// Roots that must not be folded away or abstracted: targets of the
    /// pinned variables and their immediate neighbours.
    pub fn compute_forbidden_set(&self, pinned: &[usize]) -> BTreeSet<usize> {
        let mut forbidden = BTreeSet::new();
        let targets: Vec<usize> = pinned
            .iter()
            .filter_map(|&v| self.variables.get(v).and_then(|d| d.root()))
            .filter(|&r| self.root(r).is_some())
            .collect();
        forbidden.extend(targets.iter().copied());
        for &r in &targets {
            forbidden.extend(self.nearby_references(r));
        }
        forbidden
    }

    /// Type of the node at `root`, if its label carries one.
    pub fn type_info(&self, root: usize) -> Option<Rc<TypeBox>> {
        let t = self.root(root)?.accepting_transitions().into_iter().next()?;
        let info = self.boxman.label(t.label());
        info.node().and_then(|n| n.type_info().cloned())
    }

    /// Root-wise language inclusion between snapshots with the same shape.
    pub fn subseteq(&self, other: &Fae) -> bool {
        if self.roots.len() != other.roots.len() {
            return false;
        }
        for i in 0..self.roots.len() {
            match (&self.roots[i], &other.roots[i]) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    if i < self.connection_graph.len()
                        && i < other.connection_graph.len()
                        && self.connection_graph.signature(i) != other.connection_graph.signature(i)
                    {
                        return false;
                    }
                    if !a.subseteq(b) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        debug!("subseteq: snapshot included");
        true
    }
}

impl fmt::Display for Fae {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for v in &self.variables {
            write!(f, " {}", v)?;
        }
        writeln!(f, " ]")?;
        for (i, root) in self.roots.iter().enumerate() {
            let Some(ta) = root else {
                continue;
            };
            write!(f, "===\nroot {}", i)?;
            if i < self.connection_graph.len() {
                write!(f, " [{}]", self.connection_graph.root(i))?;
            }
            writeln!(f)?;
            write_ta(f, &self.boxman, ta)?;
        }
        Ok(())
    }
}
