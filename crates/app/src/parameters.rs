//! Parameter store: definitions plus the shared resolved-value cache.
//!
//! Definitions are only touched from the dispatcher. Resolved values sit
//! behind a lock in [`ParameterValues`] so they can be read while rules
//! evaluate, or from outside the dispatcher through a cloned handle.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use mqttrules_domain::error::MqttRulesError;
use mqttrules_domain::expression::{self, CompiledExpr, PayloadFn, Scope};
use mqttrules_domain::parameter::Parameter;
use mqttrules_domain::value;

/// Cloneable, lock-protected handle on the resolved values.
#[derive(Debug, Clone, Default)]
pub struct ParameterValues {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl ParameterValues {
    /// Resolved value of `name`, or the empty-string sentinel if never set.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_else(value::unset)
    }

    /// Copy of every resolved value, used as an evaluation scope.
    #[must_use]
    pub fn snapshot(&self) -> Scope {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, name: &str, value: Value) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }
}

#[derive(Debug, Clone)]
struct Definition {
    parameter: Parameter,
    expression: Option<CompiledExpr>,
}

/// Name → parameter definition, and the resolved values derived from them.
#[derive(Debug, Default)]
pub struct ParameterStore {
    definitions: BTreeMap<String, Definition>,
    values: ParameterValues,
}

impl ParameterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `parameter` can be installed, compiling its expression.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::Expression`] when the expression does not parse.
    pub fn prepare(parameter: &Parameter) -> Result<Option<CompiledExpr>, MqttRulesError> {
        if !parameter.has_expression() {
            return Ok(None);
        }
        Ok(Some(expression::compile(&parameter.expression)?))
    }

    /// Install `parameter` under `name`, replacing any previous definition,
    /// and write its value into the resolved cache.
    ///
    /// Returns the replaced definition.
    pub fn install(
        &mut self,
        name: &str,
        parameter: Parameter,
        expression: Option<CompiledExpr>,
    ) -> Option<Parameter> {
        self.values.set(name, parameter.value.clone());
        self.definitions
            .insert(
                name.to_string(),
                Definition {
                    parameter,
                    expression,
                },
            )
            .map(|previous| previous.parameter)
    }

    /// Recompute the resolved value of `name` from a message on its topic.
    ///
    /// Without an expression the coerced payload becomes the value; with one,
    /// the expression result does. Unknown parameters are ignored and
    /// `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::Expression`] when evaluation fails; the
    /// previous resolved value is left unchanged.
    pub fn trigger_update(&self, name: &str, raw: &str) -> Result<Option<Value>, MqttRulesError> {
        let Some(definition) = self.definitions.get(name) else {
            return Ok(None);
        };
        let value = match &definition.expression {
            None => value::coerce(raw),
            Some(expression) => {
                expression.evaluate(&self.values.snapshot(), &PayloadFn::from_message(raw))?
            }
        };
        self.values.set(name, value.clone());
        Ok(Some(value))
    }

    /// Definition of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.definitions.get(name).map(|definition| &definition.parameter)
    }

    /// Resolved value of `name`, or the empty-string sentinel.
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        self.values.get(name)
    }

    /// Handle on the resolved values, shared with this store.
    #[must_use]
    pub fn values(&self) -> ParameterValues {
        self.values.clone()
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.definitions
            .iter()
            .map(|(name, definition)| (name.as_str(), &definition.parameter))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
