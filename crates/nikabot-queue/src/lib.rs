//! Task Queue (C7): durable work items with leasing, heartbeat,
//! watchdog recovery, and dedup-key idempotence.

pub mod db;
pub mod error;
pub mod queue;
pub mod types;

pub use error::{QueueError, Result};
pub use queue::TaskQueue;
pub use types::{IncomingUserMessage, LeaseOptions, Task, TaskStatus, WatchdogStats};
