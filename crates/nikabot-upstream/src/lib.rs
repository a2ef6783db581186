//! Upstream Client (C4): JSON POST to the configured workflow URL,
//! response-shape normalisation, and 4xx/5xx/other failure classification.

pub mod client;
pub mod error;
pub mod types;

pub use client::UpstreamClient;
pub use error::{Result, UpstreamError};
pub use types::*;
