//! Run lifecycle state machine — `pending -> running -> {completed, failed,
//! cancelled}` (§4.I).
//!
//! Grounded in the teacher's OMS order state machine
//! (`mqk-execution::oms::state_machine::OmsOrder`): every event carries an
//! optional dedup key, and a transition whose key has already been applied
//! is silently absorbed rather than re-validated against the current state.
//! Illegal transitions (e.g. `Cancel` from `Completed`) return a typed
//! [`TransitionError`] instead of panicking — callers treat that as a halt
//! signal.

use std::collections::HashSet;

use dqe_schemas::RunStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Start,
    Complete,
    Fail { reason: String },
    Cancel,
}

/// Returned when an event cannot legally be applied in the current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: RunStatus,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal run transition: {:?} + {}", self.from, self.event)
    }
}

impl std::error::Error for TransitionError {}

/// Tracks one run's status through its lifecycle. Not the durable record —
/// [`dqe_store`] owns that — this is the in-process guard the orchestrator
/// consults before writing a status change, so an illegal sequence of
/// events (e.g. a late cancel arriving after the run already finalized)
/// is rejected before it ever reaches the store.
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    pub status: RunStatus,
    applied: HashSet<String>,
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Pending,
            applied: HashSet::new(),
        }
    }

    /// Apply `event`. `event_id`, when supplied, is deduplicated against
    /// previously-applied events — a repeat is `Ok(())` and a no-op.
    pub fn apply(&mut self, event: &RunEvent, event_id: Option<&str>) -> Result<(), TransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(());
            }
        }

        self.do_transition(event)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }

        Ok(())
    }

    fn do_transition(&mut self, event: &RunEvent) -> Result<(), TransitionError> {
        use RunEvent::*;
        use RunStatus::*;

        match (&self.status, event) {
            (Pending, Start) => self.status = Running,
            // begin_run itself can fail (auth/store) before the run ever reaches Running.
            (Pending, Fail { .. }) => self.status = Failed,
            (Running, Complete) => self.status = Completed,
            (Running, Fail { .. }) => self.status = Failed,
            (Running, Cancel) => self.status = Cancelled,

            (state, ev) => {
                return Err(TransitionError {
                    from: state.clone(),
                    event: format!("{ev:?}"),
                })
            }
        }
        Ok(())
    }
}
