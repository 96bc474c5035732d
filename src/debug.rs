//! Debug utilities for inspecting automata and snapshots.
//!
//! Transitions are printed with their symbolic labels instead of raw label
//! ids. These are primarily useful in tests, logs and during development.

use std::fmt::{self, Write};

use crate::boxman::BoxMan;
use crate::forest::Fae;
use crate::treeaut::TreeAut;

/// Writes `ta` with every label resolved through `boxman`.
///
/// Format: `[finals]` on the first line, then one `label(lhs) -> rhs` per line.
/// Accepting transitions are marked with `*`.
pub fn write_ta<W: Write>(out: &mut W, boxman: &BoxMan, ta: &TreeAut) -> fmt::Result {
    write!(out, "[")?;
    for (i, s) in ta.final_states().iter().enumerate() {
        if i > 0 {
            write!(out, " ")?;
        }
        write!(out, "{}", s)?;
    }
    writeln!(out, "]")?;
    for t in ta.transitions() {
        let mark = if ta.is_final(t.rhs()) { "*" } else { " " };
        write!(out, " {} {}(", mark, boxman.label(t.label()))?;
        for (i, s) in t.lhs().iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "{}", s)?;
        }
        writeln!(out, ") -> {}", t.rhs())?;
    }
    Ok(())
}

/// Writes every registered box with its output and input parts.
pub fn write_boxes<W: Write>(out: &mut W, boxman: &BoxMan) -> fmt::Result {
    let boxes = boxman.boxes();
    writeln!(out, "=== Boxes: count={} ===", boxes.len())?;
    for b in &boxes {
        writeln!(out, "{} arity={}", b, b.arity())?;
        writeln!(out, "output:")?;
        write_ta(out, boxman, b.output())?;
        if let Some(input) = b.input() {
            writeln!(out, "input {}:", input.index())?;
            write_ta(out, boxman, input.ta())?;
        }
    }
    Ok(())
}

/// Writes the whole snapshot: variables, roots and connection graph.
pub fn write_state<W: Write>(out: &mut W, fae: &Fae) -> fmt::Result {
    writeln!(out, "=== Snapshot ===")?;
    write!(out, "variables:")?;
    for v in fae.variables() {
        write!(out, " {}", v)?;
    }
    writeln!(out)?;
    writeln!(out, "roots: count={} live={}", fae.root_count(), fae.live_root_count())?;
    write!(out, "{}", fae)
}

impl TreeAut {
    /// Symbolic rendering of this automaton.
    pub fn debug_string(&self, boxman: &BoxMan) -> Result<String, fmt::Error> {
        let mut result = String::new();
        write_ta(&mut result, boxman, self)?;
        Ok(result)
    }
}

impl BoxMan {
    /// Dump every registered box with its output and input parts.
    pub fn dump_boxes(&self) -> Result<String, fmt::Error> {
        let mut result = String::new();
        write_boxes(&mut result, self)?;
        Ok(result)
    }
}

impl Fae {
    /// Dump the whole snapshot: variables, roots and connection graph.
    pub fn dump_state(&self) -> Result<String, fmt::Error> {
        let mut result = String::new();
        write_state(&mut result, self)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::data::{Data, SelData};

    #[test]
    fn test_symbolic_labels() {
        let boxman = Rc::new(BoxMan::default());
        let mut fae = Fae::new(boxman.clone());
        let r = fae.node_create(&[SelData::new(0, 8, 0, "next")], None);
        fae.node_modify(r, 0, Data::null()).unwrap();
        fae.var_push(Data::reference(r));

        let s = fae.root_ta(r).debug_string(&boxman).unwrap();
        assert!(s.contains("next"), "Expected selector name in: {}", s);
        assert!(s.contains("(int)0"), "Expected null leaf in: {}", s);
        assert!(s.contains('*'), "Expected accepting mark in: {}", s);
    }

    #[test]
    fn test_dump_state() {
        let boxman = Rc::new(BoxMan::default());
        let mut fae = Fae::new(boxman.clone());
        let r = fae.node_create(&[SelData::new(0, 8, 0, "next")], None);
        fae.var_push(Data::reference(r));
        let s = fae.dump_state().unwrap();
        assert!(s.contains("roots: count=1 live=1"), "Unexpected dump: {}", s);
        assert!(boxman.dump_boxes().unwrap().contains("count=0"));
    }

    /// A sink that refuses every write.
    struct Refusing;

    impl Write for Refusing {
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_write_errors_propagate() {
        let boxman = Rc::new(BoxMan::default());
        let mut fae = Fae::new(boxman.clone());
        let r = fae.node_create(&[SelData::new(0, 8, 0, "next")], None);
        fae.var_push(Data::reference(r));
        assert_eq!(write_state(&mut Refusing, &fae), Err(fmt::Error));
        assert_eq!(write_boxes(&mut Refusing, &boxman), Err(fmt::Error));
        assert_eq!(write_ta(&mut Refusing, &boxman, fae.root_ta(r)), Err(fmt::Error));
    }
}
