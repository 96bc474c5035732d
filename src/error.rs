use thiserror::Error;

/// Errors reported by forest-automaton operations.
///
/// These describe properties of the analysed program (garbage, bad
/// dereferences) or misuse of the type registry. Broken internal invariants
/// panic instead.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FaError {
    #[error("garbage detected in root {root} during {operation}")]
    GarbageDetected { root: usize, operation: &'static str },

    #[error("selector +{offset} of root {root} does not hold a data value")]
    NotALeaf { root: usize, offset: usize },

    #[error("type '{0}' is not registered")]
    TypeNotFound(String),

    #[error("type '{0}' is already registered")]
    DuplicateType(String),
}

pub type FaResult<T> = Result<T, FaError>;

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_messages() {
        let e = FaError::GarbageDetected {
            root: 3,
            operation: "normalization",
        };
        assert_eq!(e.to_string(), "garbage detected in root 3 during normalization");
        assert_eq!(
            FaError::NotALeaf { root: 0, offset: 8 }.to_string(),
            "selector +8 of root 0 does not hold a data value"
        );
        assert_eq!(FaError::TypeNotFound("node".into()).to_string(), "type 'node' is not registered");
    }
}
