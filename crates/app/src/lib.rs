//! # mqttrules-app
//!
//! Application layer: the rules agent and its **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `Transport`: connect, (un)subscribe, publish on the message bus
//!   - `Scheduler`: install and cancel recurring callbacks
//! - Provide **in-process infrastructure** that doesn't need IO:
//!   - the delivery queue feeding the dispatcher
//!   - a tokio-backed scheduler
//! - Own the agent state:
//!   - `SubscriptionMultiplexer`: topic → interested parameters and rules
//!   - `ParameterStore`: definitions and the resolved-value cache
//!   - `RuleStore`: rules with compiled conditions and schedule handles
//!   - `Agent`: routes inbound messages and drives outbound publishes
//!
//! ## Dependency rule
//! Depends on `mqttrules-domain` only (plus `tokio` for channels and tasks).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod agent;
pub mod config;
pub mod delivery_queue;
pub mod parameters;
pub mod ports;
pub mod rules;
pub mod scheduler;
pub mod subscriptions;

#[cfg(test)]
mod testing;
