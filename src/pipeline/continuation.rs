//! Batch continuation: slicing the population and chaining invocations.
//!
//! One invocation handles `[cursor, cursor + batch_size)`. When that does
//! not reach the end of the population, a follow-up invocation is fired at
//! `cursor + slice_len`. A failed trigger is logged and reported, never
//! retried here; a stalled chain shows up as `remaining > 0` with
//! `next_batch_triggered == false`.

use tracing::{info, warn};

use crate::pipeline::types::ContinuationTrigger;

/// Where the chain stands after a slice has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationDecision {
    MoreRemaining { next_cursor: usize, remaining: usize },
    Done,
}

/// Decide whether to chain, given the slice just processed.
pub fn decide(cursor: usize, slice_len: usize, total: usize) -> ContinuationDecision {
    let next_cursor = cursor + slice_len;
    // An empty slice cannot advance the cursor; chaining would loop forever.
    if slice_len > 0 && next_cursor < total {
        ContinuationDecision::MoreRemaining {
            next_cursor,
            remaining: total - next_cursor,
        }
    } else {
        ContinuationDecision::Done
    }
}

/// What the response reports about the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationOutcome {
    pub remaining: usize,
    pub next_batch_triggered: bool,
}

/// Act on a decision. Returns `None` when the chain is done.
pub fn continue_chain(
    trigger: &dyn ContinuationTrigger,
    decision: ContinuationDecision,
) -> Option<ContinuationOutcome> {
    match decision {
        ContinuationDecision::Done => {
            info!("Digest chain complete");
            None
        }
        ContinuationDecision::MoreRemaining {
            next_cursor,
            remaining,
        } => {
            let next_batch_triggered = match trigger.fire(next_cursor) {
                Ok(()) => {
                    info!(next_cursor, remaining, "Next batch triggered");
                    true
                }
                Err(e) => {
                    warn!(
                        next_cursor,
                        remaining,
                        error = %e,
                        "Failed to trigger next batch; chain stalled"
                    );
                    false
                }
            };
            Some(ContinuationOutcome {
                remaining,
                next_batch_triggered,
            })
        }
    }
}
