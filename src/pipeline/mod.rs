//! Digest batch pipeline.
//!
//! One invocation processes one slice of the eligible population:
//! 1. `dedupe_topics()`: skip paused / topic-less recipients, collapse topics
//! 2. `fetch_slice_content()`: one content fetch for the whole slice
//! 3. `Preparer::prepare_slice()`: parallel summarization, joined
//! 4. `package_digest()`: per-recipient ordering and rendering
//! 5. `RateLimitedDispatcher::dispatch()`: serial, rate-limited delivery
//! 6. `AuditRecorder::record()` and `continue_chain()`
//!
//! **No send starts before every recipient in the slice is prepared.**

pub mod audit;
pub mod continuation;
pub mod dedupe;
pub mod dispatch;
pub mod package;
pub mod prepare;
pub mod runner;
pub mod types;
