//! Agent: the dispatcher owning every store.
//!
//! Each inbound message is routed, independently, to:
//! 1. the parameters and rules subscribed to its topic,
//! 2. `<prefix>param/<name>` → parameter definition,
//! 3. `<prefix>rule/<ruleset>/<rule>` → rule definition,
//! 4. `<prefix>$AGENT` → agent command.
//!
//! The agent is driven from a single [`Mailbox`]; a message is fully
//! handled before the next one is taken, so the stores need no locking
//! apart from the resolved-value cache.

use serde::Serialize;
use serde_json::Value;

use mqttrules_domain::error::{Chain, MqttRulesError, NotFoundError, ValidationError};
use mqttrules_domain::expression::PayloadFn;
use mqttrules_domain::parameter::{Parameter, ParameterInput};
use mqttrules_domain::rule::{Rule, RuleKey};

use crate::config::AgentConfig;
use crate::delivery_queue::{DeliveryQueue, Inbound, Mailbox};
use crate::parameters::{ParameterStore, ParameterValues};
use crate::ports::{Scheduler, Transport};
use crate::rules::{Evaluation, PreparedRule, RuleStore, StoredRule};
use crate::subscriptions::{Consumer, SubscriptionMultiplexer};

const LIST_PARAMETERS: &str = "list parameters";
const LIST_RULES: &str = "list rules";

/// What [`Agent::execute_rule`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// No rule is installed under the key.
    Missing,
    /// The condition did not evaluate to `true`.
    ConditionNotMet,
    /// The condition could not be evaluated.
    ConditionFailed,
    /// Every action was attempted.
    Executed { published: usize, failed: usize },
}

/// A control topic recognised under the configured prefix.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Parameter(&'a str),
    Rule { ruleset: &'a str, rule: &'a str },
    Command,
}

/// Match `topic` against the control topics. Matching is anchored at the
/// start of the topic; trailing levels after the captured names are ignored.
fn route<'a>(prefix: &str, topic: &'a str) -> Option<Route<'a>> {
    let rest = topic.strip_prefix(prefix)?;
    if rest == "$AGENT" {
        return Some(Route::Command);
    }
    if let Some(rest) = rest.strip_prefix("param/") {
        let name = rest.split('/').next().filter(|name| !name.is_empty())?;
        return Some(Route::Parameter(name));
    }
    if let Some(rest) = rest.strip_prefix("rule/") {
        let mut levels = rest.split('/');
        let ruleset = levels.next().filter(|level| !level.is_empty())?;
        let rule = levels.next().filter(|level| !level.is_empty())?;
        return Some(Route::Rule { ruleset, rule });
    }
    None
}

#[derive(Serialize)]
struct ParameterReport<'a> {
    value: Value,
    default: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expression: Option<&'a str>,
}

#[derive(Serialize)]
struct CommandError<'a> {
    error: &'static str,
    command: &'a str,
}

/// The rules agent.
pub struct Agent<T, S> {
    transport: T,
    scheduler: S,
    queue: DeliveryQueue,
    config: AgentConfig,
    subscriptions: SubscriptionMultiplexer,
    parameters: ParameterStore,
    rules: RuleStore,
}

impl<T, S> Agent<T, S>
where
    T: Transport,
    S: Scheduler,
{
    /// Create an agent. Scheduled fires are enqueued on `queue`, which
    /// must feed the [`Mailbox`] later passed to [`Agent::run`].
    pub fn new(transport: T, scheduler: S, queue: DeliveryQueue, config: AgentConfig) -> Self {
        Self {
            subscriptions: SubscriptionMultiplexer::new(config.subscribe_qos),
            transport,
            scheduler,
            queue,
            config,
            parameters: ParameterStore::new(),
            rules: RuleStore::new(),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Connect the transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport error.
    pub async fn connect(&self) -> Result<(), MqttRulesError> {
        tracing::info!("connecting to broker");
        self.transport.connect().await
    }

    /// Subscribe to the parameter, rule and command topics. The rule topic
    /// is skipped when rule updates are disabled.
    ///
    /// # Errors
    ///
    /// Propagates the first failing subscribe.
    pub async fn subscribe_control_topics(&self) -> Result<(), MqttRulesError> {
        let mut topics = vec![self.config.param_filter()];
        if !self.config.disable_rules_update {
            topics.push(self.config.rule_filter());
        }
        topics.push(self.config.command_topic());

        for topic in topics {
            self.transport
                .subscribe(&topic, self.config.subscribe_qos)
                .await?;
            tracing::info!(%topic, "subscribed to control topic");
        }
        Ok(())
    }

    /// Handle queued work until a [`Inbound::Shutdown`] arrives or every
    /// sender is gone.
    pub async fn run(&mut self, mailbox: &mut Mailbox) {
        tracing::info!("agent started");
        while let Some(inbound) = mailbox.recv().await {
            if !self.handle(inbound).await {
                break;
            }
        }
        tracing::info!("agent stopped");
    }

    /// Handle everything already queued, without waiting. Returns the
    /// number of items handled.
    pub async fn process_pending(&mut self, mailbox: &mut Mailbox) -> usize {
        let mut handled = 0;
        while let Some(inbound) = mailbox.try_recv() {
            handled += 1;
            if !self.handle(inbound).await {
                break;
            }
        }
        handled
    }

    /// Cancel every schedule and disconnect the transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport error.
    pub async fn disconnect(&mut self) -> Result<(), MqttRulesError> {
        for handle in self.rules.take_schedules() {
            self.scheduler.cancel(handle);
        }
        tracing::info!("disconnecting from broker");
        self.transport.disconnect().await
    }

    /// Returns `false` once the loop should stop.
    async fn handle(&mut self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Message { topic, payload } => self.handle_message(&topic, &payload).await,
            Inbound::Scheduled { key, generation } => {
                if self.rules.is_current(&key, generation) {
                    self.execute_rule(&key, "").await;
                } else {
                    tracing::debug!(rule = %key, generation, "dropping stale scheduled fire");
                }
            }
            Inbound::Shutdown => return false,
        }
        true
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Route one inbound message. Failures are logged, never returned.
    #[tracing::instrument(skip(self, payload))]
    pub async fn handle_message(&mut self, topic: &str, payload: &str) {
        for consumer in self.subscriptions.consumers(topic) {
            match consumer {
                Consumer::Parameter(name) => {
                    if let Err(err) = self.trigger_parameter_update(&name, payload) {
                        tracing::error!(error = %Chain(&err), parameter = %name, "failed to update parameter");
                    }
                }
                Consumer::Rule(key) => {
                    self.execute_rule(&key, payload).await;
                }
            }
        }

        match route(&self.config.prefix, topic) {
            Some(Route::Parameter(name)) => {
                if let Err(err) = self.set_parameter_from_string(name, payload).await {
                    tracing::error!(error = %Chain(&err), parameter = name, "rejected parameter definition");
                }
            }
            Some(Route::Rule { ruleset, rule }) => {
                if self.config.disable_rules_update {
                    tracing::debug!(ruleset, rule, "rule updates disabled, ignoring definition");
                } else if let Err(err) = self.add_rule_from_string(ruleset, rule, payload).await {
                    tracing::error!(error = %Chain(&err), ruleset, rule, "rejected rule definition");
                }
            }
            Some(Route::Command) => self.handle_command(payload).await,
            None => {}
        }
    }

    // ── Parameters ─────────────────────────────────────────────────

    /// Define `name` from a raw payload: a JSON object is a full definition,
    /// anything else becomes a value-only parameter.
    ///
    /// # Errors
    ///
    /// Same as [`Agent::set_parameter`].
    pub async fn set_parameter_from_string(
        &mut self,
        name: &str,
        raw: &str,
    ) -> Result<(), MqttRulesError> {
        let parameter = match Parameter::interpret(raw) {
            ParameterInput::Definition(parameter) => parameter,
            ParameterInput::Value(value) => Parameter::with_value(value),
        };
        self.set_parameter(name, parameter).await
    }

    /// Define or replace `name`.
    ///
    /// The new topic is subscribed before the old one is released, and the
    /// parameter's value is written to the resolved cache immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`], an expression parse error, or
    /// the transport error of the subscribe; the previous definition is kept.
    #[tracing::instrument(skip(self, parameter))]
    pub async fn set_parameter(
        &mut self,
        name: &str,
        parameter: Parameter,
    ) -> Result<(), MqttRulesError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let expression = ParameterStore::prepare(&parameter)?;
        let consumer = Consumer::Parameter(name.to_string());
        if parameter.has_topic() {
            self.subscriptions
                .ensure_interest(&self.transport, &parameter.topic, consumer.clone())
                .await?;
        }

        let topic = parameter.topic.clone();
        let previous = self.parameters.install(name, parameter, expression);
        if let Some(previous) = previous
            && previous.has_topic()
            && previous.topic != topic
        {
            if let Err(err) = self
                .subscriptions
                .remove_interest(&self.transport, &previous.topic, &consumer)
                .await
            {
                tracing::debug!(parameter = name, topic = %previous.topic, error = %Chain(&err), "previous topic left subscribed");
            }
        }
        tracing::info!(parameter = name, "parameter set");
        Ok(())
    }

    /// Recompute `name` from a message on its topic.
    ///
    /// # Errors
    ///
    /// Returns the evaluation error; the resolved value is unchanged then.
    pub fn trigger_parameter_update(
        &self,
        name: &str,
        raw: &str,
    ) -> Result<Option<Value>, MqttRulesError> {
        let updated = self.parameters.trigger_update(name, raw)?;
        if let Some(value) = &updated {
            tracing::debug!(parameter = name, %value, "parameter updated");
        }
        Ok(updated)
    }

    /// Resolved value of `name`, or the empty-string sentinel if never set.
    #[must_use]
    pub fn get_parameter_value(&self, name: &str) -> Value {
        self.parameters.value(name)
    }

    /// Definition of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::NotFound`] when no such parameter exists.
    pub fn get_parameter(&self, name: &str) -> Result<&Parameter, MqttRulesError> {
        self.parameters.get(name).ok_or_else(|| {
            NotFoundError {
                entity: "Parameter",
                id: name.to_string(),
            }
            .into()
        })
    }

    /// Cloneable read handle on the resolved values.
    #[must_use]
    pub fn parameter_values(&self) -> ParameterValues {
        self.parameters.values()
    }

    // ── Rules ──────────────────────────────────────────────────────

    /// Parse a JSON rule definition and install it.
    ///
    /// # Errors
    ///
    /// Same as [`Rule::from_json`] and [`Agent::add_rule`].
    pub async fn add_rule_from_string(
        &mut self,
        ruleset: &str,
        rule: &str,
        raw: &str,
    ) -> Result<(), MqttRulesError> {
        let key = RuleKey::new(ruleset, rule)?;
        let definition = Rule::from_json(raw)?;
        self.add_rule(key, definition).await
    }

    /// Install or replace the rule under `key`.
    ///
    /// Everything that can fail (validation, condition and schedule parsing,
    /// subscribing the trigger) happens before the previous definition is
    /// torn down, so a rejected rule leaves the old one running.
    ///
    /// # Errors
    ///
    /// Returns the validation, expression, schedule or transport error.
    #[tracing::instrument(skip(self, rule), fields(rule = %key))]
    pub async fn add_rule(&mut self, key: RuleKey, rule: Rule) -> Result<(), MqttRulesError> {
        let prepared = PreparedRule::new(rule)?;
        let consumer = Consumer::Rule(key.clone());
        if prepared.rule.has_trigger() {
            self.subscriptions
                .ensure_interest(&self.transport, &prepared.rule.trigger, consumer.clone())
                .await?;
        }

        if let Some(previous) = self.rules.remove(&key) {
            if let Some(handle) = previous.schedule {
                self.scheduler.cancel(handle);
            }
            if previous.rule.has_trigger() && previous.rule.trigger != prepared.rule.trigger {
                if let Err(err) = self
                    .subscriptions
                    .remove_interest(&self.transport, &previous.rule.trigger, &consumer)
                    .await
                {
                    tracing::debug!(rule = %key, topic = %previous.rule.trigger, error = %Chain(&err), "previous trigger left subscribed");
                }
            }
        }

        let generation = self.rules.next_generation();
        let schedule = prepared.recurrence.map(|recurrence| {
            let queue = self.queue.clone();
            let key = key.clone();
            self.scheduler.schedule(
                recurrence,
                Box::new(move || {
                    queue.try_schedule(key.clone(), generation);
                }),
            )
        });

        self.rules.install(
            key,
            StoredRule {
                rule: prepared.rule,
                condition: prepared.condition,
                schedule,
                generation,
            },
        );
        tracing::info!("rule added");
        Ok(())
    }

    /// Definition of the rule `ruleset/rule`.
    ///
    /// # Errors
    ///
    /// Returns [`MqttRulesError::NotFound`] when no such rule exists.
    pub fn get_rule(&self, ruleset: &str, rule: &str) -> Result<&Rule, MqttRulesError> {
        let key = RuleKey {
            ruleset: ruleset.to_string(),
            rule: rule.to_string(),
        };
        self.rules.get(&key).map(|stored| &stored.rule).ok_or_else(|| {
            NotFoundError {
                entity: "Rule",
                id: key.to_string(),
            }
            .into()
        })
    }

    /// Evaluate the rule under `key` and publish its actions.
    ///
    /// A failing publish is logged and the remaining actions still run.
    #[tracing::instrument(skip(self, trigger_payload), fields(rule = %key))]
    pub async fn execute_rule(&self, key: &RuleKey, trigger_payload: &str) -> ExecutionOutcome {
        let Some(stored) = self.rules.get(key) else {
            return ExecutionOutcome::Missing;
        };
        let scope = self.parameters.values().snapshot();
        let payload = PayloadFn::from_message(trigger_payload);

        let publications = match stored.evaluate(&scope, &payload) {
            Ok(Evaluation::Fire(publications)) => publications,
            Ok(Evaluation::ConditionNotMet) => {
                tracing::debug!("condition not met, rule not executed");
                return ExecutionOutcome::ConditionNotMet;
            }
            Err(err) => {
                tracing::error!(error = %Chain(&err), "failed to evaluate condition");
                return ExecutionOutcome::ConditionFailed;
            }
        };

        let mut published = 0;
        let mut failed = 0;
        for publication in publications {
            let result = self
                .transport
                .publish(
                    &publication.topic,
                    publication.qos,
                    publication.retain,
                    publication.payload,
                )
                .await;
            match result {
                Ok(()) => published += 1,
                Err(err) => {
                    failed += 1;
                    tracing::error!(error = %Chain(&err), topic = %publication.topic, "failed to publish");
                }
            }
        }
        ExecutionOutcome::Executed { published, failed }
    }

    // ── Commands ───────────────────────────────────────────────────

    async fn handle_command(&self, payload: &str) {
        let command = payload.trim();
        match command.to_ascii_lowercase().as_str() {
            LIST_PARAMETERS => self.report_parameters().await,
            LIST_RULES => self.report_rules().await,
            _ => {
                tracing::warn!(command, "unknown agent command");
                let ack = CommandError {
                    error: "unknown command",
                    command,
                };
                let topic = format!("{}/error", self.config.command_topic());
                self.reply(&topic, &ack).await;
            }
        }
    }

    async fn report_parameters(&self) {
        let base = self.config.command_topic();
        for (name, parameter) in self.parameters.iter() {
            let report = ParameterReport {
                value: self.parameters.value(name),
                default: &parameter.value,
                topic: parameter.has_topic().then_some(parameter.topic.as_str()),
                expression: parameter
                    .has_expression()
                    .then_some(parameter.expression.as_str()),
            };
            self.reply(&format!("{base}/parameters/{name}"), &report)
                .await;
        }
    }

    async fn report_rules(&self) {
        let base = self.config.command_topic();
        for (key, rule) in self.rules.iter() {
            self.reply(&format!("{base}/rules/{key}"), rule).await;
        }
    }

    async fn reply<P: Serialize + ?Sized>(&self, topic: &str, payload: &P) {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(%err, %topic, "failed to serialize reply");
                return;
            }
        };
        if let Err(err) = self.transport.publish(topic, 0, false, body).await {
            tracing::error!(error = %Chain(&err), %topic, "failed to publish reply");
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// Whether the multiplexer holds a record for `topic`.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.is_active(topic)
    }
}
