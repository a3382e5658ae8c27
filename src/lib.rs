//! Digest Dispatch: batched, rate-limited delivery of personalized digests.

pub mod api;
pub mod config;
pub mod content;
pub mod delivery;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod schedule;
pub mod store;
pub mod trigger;
