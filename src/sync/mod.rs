//! Offline synchronization: the pending-write queue lifecycle.

mod backoff;
mod engine;

pub use backoff::RetryPolicy;
pub use engine::{FlushSummary, SubmitOutcome, SyncEngine};
