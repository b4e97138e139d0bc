//! # mqttrulesd, the mqttrules daemon
//!
//! Composition root that wires the MQTT transport, the scheduler and the
//! rules agent together and runs the agent.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize logging
//! - Construct the delivery queue, transport and scheduler (adapters)
//! - Construct the agent, injecting them via port traits
//! - Install the parameters and rules from the configuration
//! - Subscribe to the control topics and run until shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::collections::BTreeMap;

use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use mqttrules_adapter_mqtt::MqttTransport;
use mqttrules_app::agent::Agent;
use mqttrules_app::delivery_queue;
use mqttrules_app::ports::{Scheduler, Transport};
use mqttrules_app::scheduler::TokioScheduler;
use mqttrules_domain::error::{Chain, MqttRulesError};
use mqttrules_domain::parameter::Parameter;
use mqttrules_domain::rule::{Rule, RuleKey};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();
    tracing::info!(broker = %config.broker_addr(), prefix = %config.agent.prefix, "starting mqttrulesd");

    let Config {
        mqtt,
        agent: agent_config,
        parameters,
        rules,
        ..
    } = config;

    // Delivery queue
    let (queue, mut mailbox) = delivery_queue::channel(agent_config.queue_capacity);

    // Adapters
    let transport = MqttTransport::new(mqtt, queue.clone());
    let scheduler = TokioScheduler::new(Handle::current());

    // Agent
    let mut agent = Agent::new(transport, scheduler, queue, agent_config);
    agent.connect().await?;
    install_definitions(&mut agent, parameters, rules).await;
    agent.subscribe_control_topics().await?;

    tokio::select! {
        () = agent.run(&mut mailbox) => {}
        () = shutdown_signal() => tracing::info!("shutdown requested"),
    }

    if let Err(err) = agent.disconnect().await {
        tracing::error!(error = %Chain(&err), "failed to disconnect cleanly");
    }
    Ok(())
}

/// Install configured parameters, then rules. Failures are logged per entry.
async fn install_definitions<T, S>(
    agent: &mut Agent<T, S>,
    parameters: BTreeMap<String, Parameter>,
    rules: BTreeMap<String, BTreeMap<String, Rule>>,
) where
    T: Transport,
    S: Scheduler,
{
    for (name, parameter) in parameters {
        if let Err(err) = agent.set_parameter(&name, parameter).await {
            tracing::error!(parameter = %name, error = %Chain(&err), "failed to install configured parameter");
        }
    }

    for (ruleset, entries) in rules {
        for (name, rule) in entries {
            let result = match RuleKey::new(ruleset.as_str(), name.as_str()) {
                Ok(key) => agent.add_rule(key, rule).await,
                Err(err) => Err(MqttRulesError::from(err)),
            };
            if let Err(err) = result {
                tracing::error!(%ruleset, rule = %name, error = %Chain(&err), "failed to install configured rule");
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
