//! # knight-bot
//!
//! Runtime around the event-sourced store: configuration, the send decorator
//! stack, inbound guarding, session supervision, housekeeping and reports.
//! The `knight-bot` binary wires these together and replays an event feed
//! from stdin.

pub mod config;
pub mod enhancer;
pub mod error;
pub mod feed;
pub mod guard;
pub mod housekeeping;
pub mod memory;
pub mod rate_limit;
pub mod report;
pub mod send;
pub mod supervisor;

pub use config::BotConfig;
pub use enhancer::Enhancer;
pub use error::BotError;
