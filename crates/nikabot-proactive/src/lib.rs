//! Proactive Scheduler (C8) and Outbox (C9): the two background sweeps
//! that originate outbound messages without an inbound trigger.

pub mod error;
pub mod outbox;
pub mod scheduler;

pub use error::{ProactiveError, Result};
pub use outbox::OutboxPump;
pub use scheduler::ProactiveScheduler;
