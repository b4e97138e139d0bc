//! Expression evaluation: the narrow seam in front of the formula engine.
//!
//! Formulas are compiled once with [`compile`] and evaluated many times
//! against a [`Scope`] of parameter values plus the injectable `payload`
//! function ([`PayloadFn`]). Arithmetic, comparison and boolean operators
//! come from `evalexpr`; nothing outside this module touches its types.
//!
//! Every number is a float inside a formula: scope values, `payload()`
//! results and integer literals alike, so `7 / 2` is `3.5` and `42.0 == 42`
//! holds. Whole results come back as integral JSON numbers.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use evalexpr::{ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError};
use serde_json::{Number, Value};

use crate::error::Chain;
use crate::json_path::{self, PathError};
use crate::value;

/// Variable scope: parameter name → resolved value.
pub type Scope = HashMap<String, Value>;

/// Name under which the payload function is exposed to formulas.
pub const PAYLOAD_FUNCTION: &str = "payload";

/// Errors raised while compiling or evaluating a formula.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("failed to parse expression {expression:?}")]
    Parse {
        expression: String,
        #[source]
        source: EvalexprError,
    },

    #[error("failed to evaluate expression {expression:?}")]
    Evaluate {
        expression: String,
        #[source]
        source: EvalexprError,
    },

    #[error("payload lookup failed")]
    Payload(#[from] PathError),

    #[error("payload() takes no argument or one path string")]
    PayloadArguments,
}

/// A parsed formula, ready for repeated evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    node: evalexpr::Node,
}

/// Parse `text` into a [`CompiledExpr`].
///
/// # Errors
///
/// Returns [`ExpressionError::Parse`] when the formula is syntactically invalid.
pub fn compile(text: &str) -> Result<CompiledExpr, ExpressionError> {
    let node = evalexpr::build_operator_tree(&float_literals(text)).map_err(|source| {
        ExpressionError::Parse {
            expression: text.to_string(),
            source,
        }
    })?;
    Ok(CompiledExpr {
        source: text.to_string(),
        node,
    })
}

impl CompiledExpr {
    /// Evaluate against `scope`, binding `payload` to the given function.
    ///
    /// Referencing a variable that is not in `scope` is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Evaluate`] for unknown variables, type
    /// mismatches and failures raised by the payload function.
    pub fn evaluate(&self, scope: &Scope, payload: &PayloadFn) -> Result<Value, ExpressionError> {
        let evaluate_err = |source| ExpressionError::Evaluate {
            expression: self.source.clone(),
            source,
        };

        let mut context = evalexpr::HashMapContext::new();
        for (name, value) in scope {
            context
                .set_value(name.clone(), to_engine(value))
                .map_err(evaluate_err)?;
        }
        context
            .set_function(PAYLOAD_FUNCTION.to_string(), payload.as_engine_function())
            .map_err(evaluate_err)?;

        self.node
            .eval_with_context(&context)
            .map(from_engine)
            .map_err(evaluate_err)
    }

    /// Evaluate and require a boolean `true`.
    ///
    /// Any other result, including non-boolean values, counts as not satisfied.
    ///
    /// # Errors
    ///
    /// Same as [`CompiledExpr::evaluate`].
    pub fn is_satisfied(&self, scope: &Scope, payload: &PayloadFn) -> Result<bool, ExpressionError> {
        Ok(self.evaluate(scope, payload)? == Value::Bool(true))
    }
}

type PayloadCallback = dyn Fn(Option<&str>) -> Result<Value, ExpressionError> + Send + Sync;

/// The injectable `payload` function.
///
/// Called as `payload()` it receives `None`; called as `payload("$.path")`
/// it receives the path string.
#[derive(Clone)]
pub struct PayloadFn(Arc<PayloadCallback>);

impl fmt::Debug for PayloadFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadFn")
    }
}

impl PayloadFn {
    /// Wrap an arbitrary callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Option<&str>) -> Result<Value, ExpressionError> + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Bind `payload` to a raw bus message.
    ///
    /// `payload()` yields the coerced message and `payload(path)` looks the
    /// path up in the message parsed as JSON.
    #[must_use]
    pub fn from_message(raw: &str) -> Self {
        let raw: Arc<str> = Arc::from(raw);
        Self::new(move |path| match path {
            None => Ok(value::coerce(&raw)),
            Some(path) => Ok(json_path::lookup(&raw, path)?),
        })
    }

    fn as_engine_function(&self) -> evalexpr::Function {
        let callback = Arc::clone(&self.0);
        evalexpr::Function::new(move |argument| {
            let result = match argument {
                evalexpr::Value::Empty => callback(None),
                evalexpr::Value::String(path) => callback(Some(path.as_str())),
                _ => Err(ExpressionError::PayloadArguments),
            };
            result
                .map(|value| to_engine(&value))
                .map_err(|err| EvalexprError::CustomMessage(Chain(&err).to_string()))
        })
    }
}

/// Rewrite integer literals as float literals (`42` → `42.0`).
///
/// String literals and identifiers such as `sensor2` are copied untouched.
fn float_literals(text: &str) -> Cow<'_, str> {
    if !text.bytes().any(|byte| byte.is_ascii_digit()) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        let after_dot = out.ends_with('.');
        out.push(ch);
        if ch == '"' {
            while let Some(inner) = chars.next() {
                out.push(inner);
                match inner {
                    '\\' => out.extend(chars.next()),
                    '"' => break,
                    _ => {}
                }
            }
        } else if ch.is_alphabetic() || ch == '_' {
            while let Some(&next) = chars.peek() {
                if !(next.is_alphanumeric() || next == '_') {
                    break;
                }
                out.push(next);
                chars.next();
            }
        } else if ch.is_ascii_digit() {
            let mut integral = !after_dot;
            while let Some(&next) = chars.peek() {
                let exponent_sign = matches!(next, '+' | '-') && out.ends_with(['e', 'E']);
                if matches!(next, '.' | 'e' | 'E') {
                    integral = false;
                } else if !(next.is_ascii_digit() || exponent_sign) {
                    break;
                }
                out.push(next);
                chars.next();
            }
            if integral {
                out.push_str(".0");
            }
        }
    }
    Cow::Owned(out)
}

fn to_engine(value: &Value) -> evalexpr::Value {
    match value {
        Value::Null => evalexpr::Value::Empty,
        Value::Bool(flag) => evalexpr::Value::Boolean(*flag),
        Value::Number(number) => evalexpr::Value::Float(number.as_f64().unwrap_or(f64::NAN)),
        Value::String(text) => evalexpr::Value::String(text.clone()),
        Value::Array(items) => evalexpr::Value::Tuple(items.iter().map(to_engine).collect()),
        Value::Object(_) => evalexpr::Value::String(value.to_string()),
    }
}

fn from_engine(value: evalexpr::Value) -> Value {
    match value {
        evalexpr::Value::Empty => Value::Null,
        evalexpr::Value::Boolean(flag) => Value::Bool(flag),
        evalexpr::Value::Int(int) => Value::Number(int.into()),
        evalexpr::Value::Float(float) => float_to_json(float),
        evalexpr::Value::String(text) => Value::String(text),
        evalexpr::Value::Tuple(items) => Value::Array(items.into_iter().map(from_engine).collect()),
    }
}

/// Whole floats within the exactly representable range map to JSON integers.
#[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
fn float_to_json(float: f64) -> Value {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if float.fract() == 0.0 && float.abs() <= EXACT {
        return Value::Number((float as i64).into());
    }
    Number::from_f64(float).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(entries: &[(&str, Value)]) -> Scope {
        entries
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }

    fn no_payload() -> PayloadFn {
        PayloadFn::from_message("")
    }

    #[test]
    fn should_evaluate_arithmetic_with_precedence() {
        let expr = compile("2 + 3 * 4").unwrap();
        assert_eq!(expr.evaluate(&Scope::new(), &no_payload()).unwrap(), json!(14));
    }

    #[test]
    fn should_resolve_variables_from_scope() {
        let expr = compile("param > 41").unwrap();
        let vars = scope(&[("param", json!(42))]);
        assert!(expr.is_satisfied(&vars, &no_payload()).unwrap());
    }

    #[test]
    fn should_compare_float_with_integer_literal() {
        let expr = compile("temperature >= 21").unwrap();
        let vars = scope(&[("temperature", json!(21.5))]);
        assert!(expr.is_satisfied(&vars, &no_payload()).unwrap());
    }

    #[test]
    fn should_combine_boolean_operators() {
        let expr = compile("present && (lux < 100 || override == \"on\")").unwrap();
        let vars = scope(&[
            ("present", json!(true)),
            ("lux", json!(250)),
            ("override", json!("on")),
        ]);
        assert!(expr.is_satisfied(&vars, &no_payload()).unwrap());
    }

    #[test]
    fn should_fail_on_unknown_variable() {
        let expr = compile("missing > 1").unwrap();
        let err = expr.evaluate(&Scope::new(), &no_payload()).unwrap_err();
        assert!(matches!(err, ExpressionError::Evaluate { .. }));
    }

    #[test]
    fn should_fail_to_compile_invalid_formula() {
        assert!(matches!(compile("1 +"), Err(ExpressionError::Parse { .. })));
    }

    #[test]
    fn should_call_payload_without_arguments() {
        let expr = compile("payload() * 2").unwrap();
        let result = expr
            .evaluate(&Scope::new(), &PayloadFn::from_message("21"))
            .unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn should_call_payload_with_path() {
        let expr = compile("payload(\"$.value\")").unwrap();
        let result = expr
            .evaluate(&Scope::new(), &PayloadFn::from_message(r#"{"value":99}"#))
            .unwrap();
        assert_eq!(result, json!(99));
    }

    #[test]
    fn should_fail_when_payload_path_missing() {
        let expr = compile("payload(\"$.value\")").unwrap();
        let err = expr
            .evaluate(&Scope::new(), &PayloadFn::from_message(r#"{"other":1}"#))
            .unwrap_err();
        assert!(matches!(err, ExpressionError::Evaluate { .. }));
    }

    #[test]
    fn should_fail_when_payload_is_not_json() {
        let expr = compile("payload(\"$.value\")").unwrap();
        let result = expr.evaluate(&Scope::new(), &PayloadFn::from_message("plain"));
        assert!(result.is_err());
    }

    #[test]
    fn should_use_custom_payload_function() {
        let payload = PayloadFn::new(|path| Ok(json!(path.unwrap_or("none"))));
        let expr = compile("payload(\"x\") + payload()").unwrap();
        assert_eq!(
            expr.evaluate(&Scope::new(), &payload).unwrap(),
            json!("xnone")
        );
    }

    #[test]
    fn should_treat_non_boolean_result_as_unsatisfied() {
        let expr = compile("1 + 1").unwrap();
        assert!(!expr.is_satisfied(&Scope::new(), &no_payload()).unwrap());
    }

    #[test]
    fn should_divide_integers_as_floats() {
        let expr = compile("t / 2").unwrap();
        let vars = scope(&[("t", json!(7))]);
        assert_eq!(expr.evaluate(&vars, &no_payload()).unwrap(), json!(3.5));
    }

    #[test]
    fn should_compare_whole_float_with_integer_literal() {
        let expr = compile("f == 42").unwrap();
        let vars = scope(&[("f", value::coerce("42.0"))]);
        assert!(expr.is_satisfied(&vars, &no_payload()).unwrap());
    }

    #[test]
    fn should_divide_payload_as_float() {
        let expr = compile("payload() / 4").unwrap();
        let result = expr
            .evaluate(&Scope::new(), &PayloadFn::from_message("10"))
            .unwrap();
        assert_eq!(result, json!(2.5));
    }

    #[test]
    fn should_leave_strings_and_identifiers_alone_when_promoting_literals() {
        assert_eq!(
            float_literals(r#"sensor2 == "room 12" && x > 3 && y < 1.5e3 && z != 2e-1"#),
            r#"sensor2 == "room 12" && x > 3.0 && y < 1.5e3 && z != 2e-1"#
        );
        assert_eq!(float_literals(r#""a\"1" + 7"#), r#""a\"1" + 7.0"#);
        assert!(matches!(float_literals("a && b"), Cow::Borrowed(_)));
    }
}
