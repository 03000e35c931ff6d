//! Declarative state-to-view matching.
//!
//! A [`StateMatcher`] maps an instance's current state node to a caller value
//! (a view, a label, a handler) through ordered clauses, resolved with the
//! engine's `matches` predicate so descendant states match their ancestors.
//! A state matched by no clause and no fallback is a programmer-contract
//! violation, reported with the unmatched state and every attempted clause.

use crate::engine::{StateNode, StatechartEngine};
use thiserror::Error;

/// Errors raised while resolving a matcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("No live instance '{id}' to match against")]
    NoInstance { id: String },

    #[error("State '{state}' matched none of the clauses {attempted:?} and no fallback was given")]
    NoMatchingClause {
        state: String,
        attempted: Vec<String>,
    },
}

/// Ordered clauses mapping state nodes to values, with an optional fallback.
///
/// # Example
///
/// ```rust
/// use fsmbind::{FlatEngine, StateMatcher, StateNode};
///
/// let matcher = StateMatcher::new()
///     .clause("editing", "show the editor")
///     .clause("dirty", "show the save prompt")
///     .fallback("show the document");
///
/// let view = matcher.resolve(&StateNode::from("dirty"), &FlatEngine).unwrap();
/// assert_eq!(*view, "show the save prompt");
/// ```
#[derive(Clone, Debug)]
pub struct StateMatcher<T> {
    clauses: Vec<(String, T)>,
    fallback: Option<T>,
}

impl<T> Default for StateMatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateMatcher<T> {
    /// Create a matcher with no clauses.
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
            fallback: None,
        }
    }

    /// Add a clause; earlier clauses win.
    pub fn clause(mut self, node: impl Into<String>, value: T) -> Self {
        self.clauses.push((node.into(), value));
        self
    }

    /// Set the fallback value for unmatched states.
    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Resolve the first clause whose node matches `state`.
    pub fn resolve(
        &self,
        state: &StateNode,
        engine: &dyn StatechartEngine,
    ) -> Result<&T, MatchError> {
        for (node, value) in &self.clauses {
            if engine.matches(state, node) {
                return Ok(value);
            }
        }
        if let Some(fallback) = &self.fallback {
            return Ok(fallback);
        }
        Err(MatchError::NoMatchingClause {
            state: state.to_string(),
            attempted: self.clauses.iter().map(|(node, _)| node.clone()).collect(),
        })
    }
}
