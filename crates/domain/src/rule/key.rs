//! Rule addressing: a rule lives at `(ruleset, rule)`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifies a rule by its ruleset and rule name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub ruleset: String,
    pub rule: String,
}

impl RuleKey {
    /// Build a key, rejecting empty components.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] if either component is empty.
    pub fn new(ruleset: impl Into<String>, rule: impl Into<String>) -> Result<Self, ValidationError> {
        let key = Self {
            ruleset: ruleset.into(),
            rule: rule.into(),
        };
        if key.ruleset.is_empty() || key.rule.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        Ok(key)
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ruleset, self.rule)
    }
}
