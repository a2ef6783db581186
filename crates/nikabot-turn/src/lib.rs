//! Turn-coordination engine: the Debounce Buffer (C5) and Turn Processor
//! (C6) that sit between the transport adapters and the Upstream Client,
//! plus the reply-delay policy, in-band command handling, and the
//! abuse-moderation gate they share.

pub mod buffer;
pub mod commands;
pub mod delay;
pub mod error;
pub mod moderation;
pub mod processor;
pub mod sender;
pub mod worker;

pub use buffer::{AppendOutcome, DebounceBuffer, FlushedTurn, InboundEvent, TurnFlusher};
pub use commands::Command;
pub use delay::{compute_delay, DelayDecision, DelayInputs, DelayKind, MediaDelayOrigin};
pub use error::{Result, TurnError};
pub use processor::{TurnInput, TurnOutcome, TurnProcessor};
pub use sender::OutboundSender;
pub use worker::{run_watchdog, QueueWorker};
