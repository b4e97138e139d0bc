//! # mqttrules-domain
//!
//! Pure domain model for the mqttrules agent.
//!
//! ## Responsibilities
//! - Foundational types: error conventions, timestamps, value coercion
//! - Define **Parameters** (named values, optionally fed from a topic)
//! - Define **Rules** (trigger/schedule → condition → actions)
//! - Evaluate **Expressions** and expand `${expr}` payload templates
//! - Extract values from JSON payloads with a path subset (`$.a.b[0]`)
//! - Parse **Recurrences** (`@every 10s`, cron)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod time;
pub mod value;

pub mod expression;
pub mod json_path;
pub mod parameter;
pub mod recurrence;
pub mod rule;
pub mod template;
