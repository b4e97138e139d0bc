//! Rule store: rule definitions with their compiled condition, schedule
//! handle and generation.

use std::collections::BTreeMap;

use mqttrules_domain::error::{Chain, MqttRulesError};
use mqttrules_domain::expression::{self, CompiledExpr, ExpressionError, PayloadFn, Scope};
use mqttrules_domain::recurrence::Recurrence;
use mqttrules_domain::rule::{Rule, RuleKey};
use mqttrules_domain::{template, value};

use crate::ports::ScheduleHandle;

/// One publish produced by a rule execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub payload: String,
}

/// Result of evaluating a rule against the current scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The condition held (or there was none); publish these in order.
    Fire(Vec<Publication>),
    /// The condition evaluated to something other than `true`.
    ConditionNotMet,
}

/// A validated rule, ready to install.
#[derive(Debug, Clone)]
pub struct PreparedRule {
    pub rule: Rule,
    pub condition: Option<CompiledExpr>,
    pub recurrence: Option<Recurrence>,
}

impl PreparedRule {
    /// Validate `rule`, compile its condition and parse its schedule.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::Validation`], [`MqttRulesError::Expression`]
    /// or [`MqttRulesError::Schedule`]; nothing has been installed then.
    pub fn new(rule: Rule) -> Result<Self, MqttRulesError> {
        rule.validate()?;
        let condition = if rule.has_condition() {
            Some(expression::compile(&rule.condition)?)
        } else {
            None
        };
        let recurrence = if rule.has_schedule() {
            Some(rule.schedule.parse::<Recurrence>()?)
        } else {
            None
        };
        Ok(Self {
            rule,
            condition,
            recurrence,
        })
    }
}

/// An installed rule.
#[derive(Debug, Clone)]
pub struct StoredRule {
    pub rule: Rule,
    pub condition: Option<CompiledExpr>,
    pub schedule: Option<ScheduleHandle>,
    pub generation: u64,
}

impl StoredRule {
    /// Evaluate the condition, then render every action payload.
    ///
    /// A `${expr}` span that fails to evaluate renders as an empty string.
    ///
    /// # Errors
    ///
    /// Returns the condition's evaluation error.
    pub fn evaluate(&self, scope: &Scope, payload: &PayloadFn) -> Result<Evaluation, ExpressionError> {
        if let Some(condition) = &self.condition
            && !condition.is_satisfied(scope, payload)?
        {
            return Ok(Evaluation::ConditionNotMet);
        }

        let publications = self
            .rule
            .actions
            .iter()
            .map(|action| Publication {
                topic: action.topic.clone(),
                qos: action.qos,
                retain: action.retain,
                payload: substitute(&action.payload, scope, payload),
            })
            .collect();
        Ok(Evaluation::Fire(publications))
    }
}

fn substitute(template: &str, scope: &Scope, payload: &PayloadFn) -> String {
    template::expand(template, |span| {
        match expression::compile(span).and_then(|expr| expr.evaluate(scope, payload)) {
            Ok(result) => value::render(&result),
            Err(err) => {
                tracing::error!(error = %Chain(&err), expression = span, "failed to substitute expression");
                String::new()
            }
        }
    })
}

/// `(ruleset, rule)` → installed rule.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: BTreeMap<RuleKey, StoredRule>,
    generations: u64,
}

impl RuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation number for the next installed rule.
    pub fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }

    /// Install `stored` under `key`, returning the replaced rule.
    pub fn install(&mut self, key: RuleKey, stored: StoredRule) -> Option<StoredRule> {
        self.rules.insert(key, stored)
    }

    /// Remove the rule under `key`.
    pub fn remove(&mut self, key: &RuleKey) -> Option<StoredRule> {
        self.rules.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &RuleKey) -> Option<&StoredRule> {
        self.rules.get(key)
    }

    /// Whether a scheduled fire tagged with `generation` still belongs to
    /// the rule installed under `key`.
    #[must_use]
    pub fn is_current(&self, key: &RuleKey, generation: u64) -> bool {
        self.rules
            .get(key)
            .is_some_and(|stored| stored.generation == generation)
    }

    /// Remove every schedule handle, for shutdown.
    pub fn take_schedules(&mut self) -> Vec<ScheduleHandle> {
        self.rules
            .values_mut()
            .filter_map(|stored| stored.schedule.take())
            .collect()
    }

    /// Rules in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RuleKey, &Rule)> {
        self.rules.iter().map(|(key, stored)| (key, &stored.rule))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqttrules_domain::error::ValidationError;
    use mqttrules_domain::rule::Action;
    use serde_json::{Value, json};

    fn stored(rule: Rule) -> StoredRule {
        let prepared = PreparedRule::new(rule).unwrap();
        StoredRule {
            rule: prepared.rule,
            condition: prepared.condition,
            schedule: None,
            generation: 1,
        }
    }

    fn scope(entries: &[(&str, Value)]) -> Scope {
        entries
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }

    fn payloads(evaluation: Evaluation) -> Vec<String> {
        match evaluation {
            Evaluation::Fire(publications) => publications.into_iter().map(|p| p.payload).collect(),
            Evaluation::ConditionNotMet => panic!("expected the rule to fire"),
        }
    }

    #[test]
    fn should_reject_rule_without_actions() {
        let result = PreparedRule::new(Rule::default());
        assert!(matches!(
            result,
            Err(MqttRulesError::Validation(ValidationError::NoActions))
        ));
    }

    #[test]
    fn should_reject_unparsable_condition() {
        let rule = Rule {
            condition: "param >".to_string(),
            actions: vec![Action::new("out", "x")],
            ..Rule::default()
        };
        assert!(matches!(
            PreparedRule::new(rule),
            Err(MqttRulesError::Expression(_))
        ));
    }

    #[test]
    fn should_reject_invalid_schedule() {
        let rule = Rule {
            schedule: "@every never".to_string(),
            actions: vec![Action::new("out", "x")],
            ..Rule::default()
        };
        assert!(matches!(
            PreparedRule::new(rule),
            Err(MqttRulesError::Schedule(_))
        ));
    }

    #[test]
    fn should_fire_every_action_in_order_without_condition() {
        let rule = Rule::builder()
            .action(Action::new("a", "1").qos(1))
            .action(Action::new("b", "2").retain(true))
            .build()
            .unwrap();

        let evaluation = stored(rule)
            .evaluate(&Scope::new(), &PayloadFn::from_message(""))
            .unwrap();

        assert_eq!(
            evaluation,
            Evaluation::Fire(vec![
                Publication {
                    topic: "a".to_string(),
                    qos: 1,
                    retain: false,
                    payload: "1".to_string()
                },
                Publication {
                    topic: "b".to_string(),
                    qos: 0,
                    retain: true,
                    payload: "2".to_string()
                },
            ])
        );
    }

    #[test]
    fn should_not_fire_when_condition_false() {
        let rule = Rule::builder()
            .condition("param > 41")
            .action(Action::new("out", "x"))
            .build()
            .unwrap();

        let evaluation = stored(rule)
            .evaluate(&scope(&[("param", json!(7))]), &PayloadFn::from_message(""))
            .unwrap();

        assert_eq!(evaluation, Evaluation::ConditionNotMet);
    }

    #[test]
    fn should_fail_when_condition_references_unknown_parameter() {
        let rule = Rule::builder()
            .condition("param > 41")
            .action(Action::new("out", "x"))
            .build()
            .unwrap();

        let result = stored(rule).evaluate(&Scope::new(), &PayloadFn::from_message(""));

        assert!(result.is_err());
    }

    #[test]
    fn should_evaluate_condition_against_trigger_payload() {
        let rule = Rule::builder()
            .condition("payload(\"$.state\") == \"open\"")
            .action(Action::new("alarm", "door"))
            .build()
            .unwrap();
        let stored = stored(rule);

        let open = stored
            .evaluate(&Scope::new(), &PayloadFn::from_message(r#"{"state":"open"}"#))
            .unwrap();
        let closed = stored
            .evaluate(&Scope::new(), &PayloadFn::from_message(r#"{"state":"closed"}"#))
            .unwrap();

        assert_eq!(payloads(open), vec!["door".to_string()]);
        assert_eq!(closed, Evaluation::ConditionNotMet);
    }

    #[test]
    fn should_substitute_parameters_into_payload() {
        let rule = Rule::builder()
            .action(Action::new("out", "level=${param}"))
            .build()
            .unwrap();

        let evaluation = stored(rule)
            .evaluate(&scope(&[("param", json!(42))]), &PayloadFn::from_message(""))
            .unwrap();

        assert_eq!(payloads(evaluation), vec!["level=42".to_string()]);
    }

    #[test]
    fn should_render_failed_substitution_as_empty() {
        let rule = Rule::builder()
            .action(Action::new("out", "${param} ${missing}"))
            .build()
            .unwrap();

        let evaluation = stored(rule)
            .evaluate(&scope(&[("param", json!(42))]), &PayloadFn::from_message(""))
            .unwrap();

        assert_eq!(payloads(evaluation), vec!["42 ".to_string()]);
    }

    #[test]
    fn should_render_whole_float_without_fraction() {
        let rule = Rule::builder()
            .action(Action::new("out", "${x * 2}"))
            .build()
            .unwrap();

        let evaluation = stored(rule)
            .evaluate(&scope(&[("x", json!(2.5))]), &PayloadFn::from_message(""))
            .unwrap();

        assert_eq!(payloads(evaluation), vec!["5".to_string()]);
    }

    #[test]
    fn should_substitute_trigger_payload() {
        let rule = Rule::builder()
            .action(Action::new("echo", "got ${payload()}"))
            .build()
            .unwrap();

        let evaluation = stored(rule)
            .evaluate(&Scope::new(), &PayloadFn::from_message("hello"))
            .unwrap();

        assert_eq!(payloads(evaluation), vec!["got hello".to_string()]);
    }

    #[test]
    fn should_track_current_generation() {
        let mut store = RuleStore::new();
        let key = RuleKey::new("house", "night").unwrap();
        let rule = Rule::builder().action(Action::new("a", "1")).build().unwrap();

        let mut first = stored(rule.clone());
        first.generation = store.next_generation();
        store.install(key.clone(), first);
        let mut second = stored(rule);
        second.generation = store.next_generation();
        let previous = store.install(key.clone(), second);

        assert_eq!(previous.map(|p| p.generation), Some(1));
        assert!(!store.is_current(&key, 1));
        assert!(store.is_current(&key, 2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn should_take_schedule_handles_once() {
        let mut store = RuleStore::new();
        let key = RuleKey::new("house", "tick").unwrap();
        let rule = Rule::builder().action(Action::new("a", "1")).build().unwrap();
        let mut entry = stored(rule);
        entry.schedule = Some(ScheduleHandle::new(9));
        store.install(key, entry);

        assert_eq!(store.take_schedules(), vec![ScheduleHandle::new(9)]);
        assert!(store.take_schedules().is_empty());
    }
}
