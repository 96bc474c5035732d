//! Analysis settings.

use std::fmt;

/// How two transitions must agree for their states to be merged by the
/// height abstraction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum MatchMode {
    /// Identical labels.
    Exact,
    /// Node labels covering the same selectors; other labels identical.
    #[default]
    Smart,
    /// As [`MatchMode::Smart`], and equal leaf children at every position
    /// where either side has a leaf.
    Smarter,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Exact => write!(f, "exact"),
            MatchMode::Smart => write!(f, "smart"),
            MatchMode::Smarter => write!(f, "smarter"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AnalysisConfig {
    /// Refinement depth of the height abstraction.
    pub abstraction_height: usize,
    pub match_mode: MatchMode,
    /// Only merge states whose cutpoint signatures are equal.
    pub restrict_to_signatures: bool,
    /// New boxes must be discovered twice before they are used.
    pub conditional_folding: bool,
    /// Register boxes found in a fresh snapshot without the two-strikes rule.
    pub learn_boxes: bool,
    /// Variables whose target roots are never folded away or abstracted.
    pub pinned_variables: Vec<usize>,
    /// Bound on fold/abstraction rounds within one fixpoint step.
    pub max_rounds: Option<usize>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            abstraction_height: 1,
            match_mode: MatchMode::default(),
            restrict_to_signatures: true,
            conditional_folding: true,
            learn_boxes: true,
            pinned_variables: Vec::new(),
            max_rounds: None,
        }
    }
}

impl AnalysisConfig {
    /// Checks whether another round is allowed after `rounds` rounds.
    pub fn round_allowed(&self, rounds: usize) -> bool {
        self.max_rounds.map_or(true, |max| rounds < max)
    }
}
