//! Validation outcome types.

use reservo_core::error::FieldError;
use serde::{Deserialize, Serialize};

pub use reservo_core::domain::booking::SlotSuggestion as Suggestion;

/// Accumulated result of policy evaluation.
///
/// Errors fail the request; warnings are advisory; suggestions are
/// best-effort alternatives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// Failing conditions.
    pub errors: Vec<FieldError>,
    /// Advisory conditions.
    pub warnings: Vec<String>,
    /// Workable alternatives, best-effort.
    pub suggestions: Vec<Suggestion>,
}

impl ValidationOutcome {
    /// Outcome with nothing to report.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Whether the request passed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record an error.
    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Record a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Record a suggestion.
    pub fn suggest(&mut self, suggestion: Suggestion) {
        self.suggestions.push(suggestion);
    }

    /// Merge another outcome into this one.
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.suggestions.extend(other.suggestions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_fail() {
        let mut outcome = ValidationOutcome::ok();
        outcome.warn("long booking");
        assert!(outcome.is_ok());
        outcome.error("startAt", "in the past");
        assert!(!outcome.is_ok());
    }

    #[test]
    fn merge_accumulates() {
        let mut a = ValidationOutcome::ok();
        a.error("x", "bad");
        let mut b = ValidationOutcome::ok();
        b.warn("w");
        a.merge(b);
        assert_eq!(a.errors.len(), 1);
        assert_eq!(a.warnings.len(), 1);
    }
}
