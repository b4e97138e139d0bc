//! # mqttrules-adapter-mqtt
//!
//! MQTT adapter built on [rumqttc](https://docs.rs/rumqttc).
//!
//! ## Responsibilities
//! - Implement the `Transport` port from `mqttrules-app`
//! - Own the broker connection and its event loop
//! - Forward every received publish into the agent's delivery queue
//! - Restore tracked subscriptions after a reconnect
//!
//! ## Dependency rule
//! Depends on `mqttrules-app` (for the port trait and delivery queue) and
//! `mqttrules-domain` (for the error type). Neither references this adapter.

pub mod config;
pub mod error;
pub mod transport;

pub use config::MqttConfig;
pub use error::MqttError;
pub use transport::MqttTransport;
