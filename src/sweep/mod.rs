//! Multi-segment sweeps.
//!
//! A device measures at most a few hundred points per `scan`. A
//! [`SweepPlan`] splits a larger request into device-sized segments, the
//! [`SweepController`] runs them one after another with bounded retries,
//! and the [`SweepWorker`] does so in the background, one sweep at a time per
//! connection.

mod controller;
mod plan;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use self::controller::{SweepController, SweepOutcome, SweepState};
pub use self::plan::{Segment, SweepPlan, SweepRequest};
pub use self::worker::{CalibrationStatus, Snapshot, SweepWorker, WorkerSettings};

/// Cooperative cancellation flag, checked between segments.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a cancelled sweep hands back.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Nothing; the samples acquired so far are dropped.
    #[default]
    Discard,
    /// The samples acquired so far, reported as [`SweepOutcome::Cancelled`].
    ReturnPartial,
}
