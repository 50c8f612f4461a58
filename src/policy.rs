//! Rejection policy - pure lifecycle transitions
//!
//! Maps (current status, strike count, readiness) to the next persisted
//! state plus the audit and annotation obligations that go with it.

use crate::readiness::{BlockingReason, Readiness};
use crate::types::{HistoryAction, MrStatus};

/// What the caller must tell the annotation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Obligation {
    /// Nothing to report
    None,
    /// MR became ready
    Ready,
    /// Persistent not-ready cycle, with the strike it produced
    NotReady {
        /// Failing reasons this cycle
        reasons: Vec<BlockingReason>,
        /// Strike count after this cycle
        strike: u32,
    },
    /// Strike threshold reached
    Rejected {
        /// Failing reasons of the final cycle
        reasons: Vec<BlockingReason>,
    },
}

/// Result of one policy step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Status to persist
    pub status: MrStatus,
    /// Strike count to persist
    pub rejection_count: u32,
    /// Audit row to append, if the step is a state transition
    pub history: Option<HistoryAction>,
    /// Annotation to emit
    pub obligation: Obligation,
}

impl Transition {
    const fn unchanged(status: MrStatus, rejection_count: u32) -> Self {
        Self {
            status,
            rejection_count,
            history: None,
            obligation: Obligation::None,
        }
    }

    /// Whether anything needs persisting
    pub fn changes(&self, status: MrStatus, rejection_count: u32) -> bool {
        self.status != status || self.rejection_count != rejection_count
    }
}

/// Apply one readiness evaluation to an MR's lifecycle.
///
/// - Terminal MRs (`merged`, `rejected`) are left alone.
/// - Ready resets the strike count to zero.
/// - A pipeline that is merely still running parks the MR in `not_ready`
///   without a strike.
/// - Any other failure adds a strike; reaching `threshold` rejects.
pub fn apply(
    status: MrStatus,
    rejection_count: u32,
    readiness: &Readiness,
    threshold: u32,
) -> Transition {
    if status.is_terminal() {
        return Transition::unchanged(status, rejection_count);
    }

    if readiness.is_ready() {
        if status == MrStatus::Ready {
            return Transition::unchanged(MrStatus::Ready, 0);
        }
        return Transition {
            status: MrStatus::Ready,
            rejection_count: 0,
            history: Some(HistoryAction::Ready),
            obligation: Obligation::Ready,
        };
    }

    if readiness.is_transient() {
        return Transition {
            status: MrStatus::NotReady,
            rejection_count,
            history: (status != MrStatus::NotReady).then_some(HistoryAction::NotReady),
            obligation: Obligation::None,
        };
    }

    let strike = rejection_count.saturating_add(1);
    let reasons = readiness.reasons.clone();

    if strike >= threshold {
        Transition {
            status: MrStatus::Rejected,
            rejection_count: strike,
            history: Some(HistoryAction::Rejected),
            obligation: Obligation::Rejected { reasons },
        }
    } else {
        Transition {
            status: MrStatus::NotReady,
            rejection_count: strike,
            history: Some(HistoryAction::NotReady),
            obligation: Obligation::NotReady { reasons, strike },
        }
    }
}

/// Re-admit a rejected MR after the automation user was re-assigned.
///
/// Returns `None` for MRs that are not rejected.
pub fn reset_on_reassign(status: MrStatus) -> Option<Transition> {
    (status == MrStatus::Rejected).then_some(Transition {
        status: MrStatus::Recognized,
        rejection_count: 0,
        history: Some(HistoryAction::Recognized),
        obligation: Obligation::None,
    })
}
