//! Document status state machine and display-progress heuristic.
//!
//! [`transition`] is the single gate for status changes: forward-only along
//! `pending -> downloading -> inserting -> ready | error`, never out of a
//! terminal state. [`estimate_progress`] is a pure display fallback for
//! clients without access to the push stream; it is never a correctness
//! signal.

use crate::error::{Error, Result};
use crate::models::{DocStatus, ProcessingPhase};

/// Position of a status along the monotonic ingestion path.
fn rank(status: DocStatus) -> u8 {
    match status {
        DocStatus::Pending => 0,
        DocStatus::Downloading => 1,
        DocStatus::Inserting => 2,
        DocStatus::Ready | DocStatus::Error => 3,
    }
}

/// Validates a status change and returns the new status.
///
/// Fails with [`Error::InvalidTransition`] if `from` is terminal or `to`
/// does not move strictly forward. Skipping forward is legal: an upload
/// goes straight `pending -> inserting`, and a failed download goes
/// `downloading -> error`.
pub fn transition(from: DocStatus, to: DocStatus) -> Result<DocStatus> {
    if from.is_terminal() || rank(to) <= rank(from) {
        return Err(Error::InvalidTransition { from, to });
    }
    Ok(to)
}

/// Nominal display percentage for a named processing phase.
///
/// The phase order is a display convention; these bands just give the UI a
/// monotone-looking number while the engine works.
pub fn phase_percent(phase: ProcessingPhase) -> u8 {
    match phase {
        ProcessingPhase::PdfExtraction => 10,
        ProcessingPhase::TextChunking => 30,
        ProcessingPhase::EntityExtraction => 45,
        ProcessingPhase::GraphClustering => 60,
        ProcessingPhase::CommunityReports => 80,
        ProcessingPhase::Finalizing => 95,
    }
}

/// Best-effort progress estimate for a document, used when no authoritative
/// progress is available (status polling without the push stream).
///
/// Deterministic: `pending` and `downloading` map to fixed bands, an
/// `inserting` document without phase info creeps from 50 toward 90 as
/// poll attempts accumulate, and terminal statuses pin to their endpoints
/// (100 for `ready`, 0 for `error`), never a mid-band value.
pub fn estimate_progress(
    status: DocStatus,
    phase: Option<ProcessingPhase>,
    poll_attempt: u32,
) -> u8 {
    match status {
        DocStatus::Pending => 10,
        DocStatus::Downloading => 30,
        DocStatus::Inserting => match phase {
            Some(p) => phase_percent(p),
            None => 50 + (poll_attempt.saturating_mul(2)).min(40) as u8,
        },
        DocStatus::Ready => 100,
        DocStatus::Error => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_accepted() {
        assert_eq!(
            transition(DocStatus::Pending, DocStatus::Downloading).unwrap(),
            DocStatus::Downloading
        );
        assert_eq!(
            transition(DocStatus::Pending, DocStatus::Inserting).unwrap(),
            DocStatus::Inserting
        );
        assert_eq!(
            transition(DocStatus::Downloading, DocStatus::Inserting).unwrap(),
            DocStatus::Inserting
        );
        assert_eq!(
            transition(DocStatus::Inserting, DocStatus::Ready).unwrap(),
            DocStatus::Ready
        );
        assert_eq!(
            transition(DocStatus::Inserting, DocStatus::Error).unwrap(),
            DocStatus::Error
        );
        // A failed download jumps straight to error.
        assert_eq!(
            transition(DocStatus::Downloading, DocStatus::Error).unwrap(),
            DocStatus::Error
        );
    }

    #[test]
    fn status_never_regresses() {
        assert!(matches!(
            transition(DocStatus::Inserting, DocStatus::Pending),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            transition(DocStatus::Inserting, DocStatus::Downloading),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            transition(DocStatus::Downloading, DocStatus::Downloading),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn terminal_states_reject_all_transitions() {
        for to in [
            DocStatus::Pending,
            DocStatus::Downloading,
            DocStatus::Inserting,
            DocStatus::Ready,
            DocStatus::Error,
        ] {
            assert!(transition(DocStatus::Ready, to).is_err());
            assert!(transition(DocStatus::Error, to).is_err());
        }
    }

    #[test]
    fn estimate_bands() {
        assert_eq!(estimate_progress(DocStatus::Pending, None, 0), 10);
        assert_eq!(estimate_progress(DocStatus::Downloading, None, 3), 30);
        // Phase info wins over the poll-attempt creep.
        assert_eq!(
            estimate_progress(
                DocStatus::Inserting,
                Some(ProcessingPhase::CommunityReports),
                50
            ),
            80
        );
    }

    #[test]
    fn inserting_without_phase_creeps_toward_90() {
        assert_eq!(estimate_progress(DocStatus::Inserting, None, 0), 50);
        assert_eq!(estimate_progress(DocStatus::Inserting, None, 5), 60);
        assert_eq!(estimate_progress(DocStatus::Inserting, None, 20), 90);
        // Capped: more attempts never push past 90.
        assert_eq!(estimate_progress(DocStatus::Inserting, None, 1000), 90);
    }

    #[test]
    fn terminal_estimates_are_endpoints() {
        for attempt in [0, 1, 59] {
            assert_eq!(estimate_progress(DocStatus::Ready, None, attempt), 100);
            assert_eq!(estimate_progress(DocStatus::Error, None, attempt), 0);
        }
        // Stale phase info must not produce a mid-band value on terminals.
        assert_eq!(
            estimate_progress(DocStatus::Ready, Some(ProcessingPhase::Finalizing), 2),
            100
        );
    }
}
