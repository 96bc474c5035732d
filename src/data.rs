//! Values stored in heap cells and program variables.

use std::fmt;

/// A data value.
///
/// Every distinct value is interned once by [`crate::boxman::BoxMan`] and
/// gets its own leaf state.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum Data {
    /// Uninitialised contents.
    #[default]
    Undef,
    /// Any value.
    Unknown,
    /// Address outside the analysed heap (a code pointer, for instance).
    NativePtr(usize),
    /// Pointer to an untyped block of the given size.
    VoidPtr(usize),
    /// Pointer into the node at a root, shifted by `displ` bytes.
    Ref { root: usize, displ: i32 },
    Int(i64),
    Bool(bool),
    /// Compound value: `(offset, value)` pairs.
    Struct(Vec<(usize, Data)>),
}

impl Data {
    pub fn null() -> Self {
        Data::Int(0)
    }

    pub fn reference(root: usize) -> Self {
        Data::Ref { root, displ: 0 }
    }

    pub fn reference_displ(root: usize, displ: i32) -> Self {
        Data::Ref { root, displ }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Data::Undef)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Int(0))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Data::Ref { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Data::Struct(_))
    }

    /// Root index of a reference.
    pub fn root(&self) -> Option<usize> {
        match *self {
            Data::Ref { root, .. } => Some(root),
            _ => None,
        }
    }

    /// Displacement of a reference, 0 for anything else.
    pub fn displ(&self) -> i32 {
        match *self {
            Data::Ref { displ, .. } => displ,
            _ => 0,
        }
    }

    /// Same value with the displacement of a reference shifted by `offset`.
    pub fn shifted(&self, offset: i32) -> Data {
        match *self {
            Data::Ref { root, displ } => Data::Ref {
                root,
                displ: displ + offset,
            },
            _ => self.clone(),
        }
    }

    /// Same value with a reference target renamed by `f`.
    ///
    /// References mapped to `None` become [`Data::Undef`].
    pub fn map_root<F>(&self, f: F) -> Data
    where
        F: Fn(usize) -> Option<usize>,
    {
        match *self {
            Data::Ref { root, displ } => match f(root) {
                Some(root) => Data::Ref { root, displ },
                None => Data::Undef,
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Undef => write!(f, "(undef)"),
            Data::Unknown => write!(f, "(unknw)"),
            Data::NativePtr(p) => write!(f, "(native_ptr){}", p),
            Data::VoidPtr(size) => write!(f, "(void_ptr){}", size),
            Data::Ref { root, displ } => write!(f, "(ref){}{:+}", root, displ),
            Data::Int(i) => write!(f, "(int){}", i),
            Data::Bool(b) => write!(f, "(bool){}", b),
            Data::Struct(items) => {
                write!(f, "{{ ")?;
                for (offset, d) in items {
                    write!(f, "+{}:{} ", offset, d)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Description of one selector of a node.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SelData {
    /// Offset of the selector inside the node.
    pub offset: usize,
    /// Size of the stored value in bytes.
    pub size: usize,
    /// Displacement of the pointer stored in the selector.
    pub displ: i32,
    pub name: String,
}

impl SelData {
    pub fn new(offset: usize, size: usize, displ: i32, name: impl Into<String>) -> Self {
        Self {
            offset,
            size,
            displ,
            name: name.into(),
        }
    }
}

impl fmt::Display for SelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}:{}:{:+}]", self.name, self.offset, self.size, self.displ)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Data::Undef.to_string(), "(undef)");
        assert_eq!(Data::null().to_string(), "(int)0");
        assert_eq!(Data::reference(3).to_string(), "(ref)3+0");
        assert_eq!(Data::reference_displ(1, -8).to_string(), "(ref)1-8");
        assert_eq!(
            Data::Struct(vec![(0, Data::Int(1)), (8, Data::Undef)]).to_string(),
            "{ +0:(int)1 +8:(undef) }"
        );
        assert_eq!(SelData::new(8, 8, 0, "next").to_string(), "next[8:8:+0]");
    }

    #[test]
    fn test_map_root() {
        let d = Data::reference_displ(2, 4);
        assert_eq!(d.map_root(|r| Some(r + 1)), Data::reference_displ(3, 4));
        assert_eq!(d.map_root(|_| None), Data::Undef);
        assert_eq!(Data::Int(5).map_root(|_| None), Data::Int(5));
    }

    #[test]
    fn test_shifted() {
        assert_eq!(Data::reference(0).shifted(8).displ(), 8);
        assert!(Data::null().shifted(8).is_null());
        assert_eq!(Data::reference(7).root(), Some(7));
    }
}
