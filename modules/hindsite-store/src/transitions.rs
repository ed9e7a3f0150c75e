//! The scrape-page status transition table. Anything not listed here is an
//! `InvalidTransition`; filter verdicts are terminal except through manual
//! override.

use hindsite_common::PageStatus;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: PageStatus,
    pub to: PageStatus,
}

/// Whether `from -> to` is a legal transition. Same-status writes are legal
/// no-ops so idempotent upserts never trip the guard.
pub fn is_legal(from: PageStatus, to: PageStatus) -> bool {
    use PageStatus::*;

    if from == to {
        return true;
    }
    match (from, to) {
        // The processing loop.
        (Pending | Failed | AwaitingManualReview, InProgress) => true,
        (InProgress, Completed | Failed | AwaitingManualReview) => true,

        // Operator retry re-queues a failure.
        (Failed, Pending) => true,

        // Manual override unlocks filtered captures.
        (f, ManuallyApproved | ManuallySkipped) if f.is_filtered() => true,

        // Operators may also skip or approve live captures.
        (Pending | Failed | AwaitingManualReview, ManuallySkipped) => true,
        (AwaitingManualReview, ManuallyApproved) => true,

        // Approval flows back into the processing loop; a skip can be
        // reversed by a fresh approval.
        (ManuallyApproved, Pending) => true,
        (ManuallySkipped, ManuallyApproved) => true,
        (ManuallyApproved, ManuallySkipped) => true,

        _ => false,
    }
}

pub fn check(from: PageStatus, to: PageStatus) -> Result<(), InvalidTransition> {
    if is_legal(from, to) {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// Transitions that require the manual-override path (and record
/// `original_filter_decision`).
pub fn requires_override(from: PageStatus, to: PageStatus) -> bool {
    from.is_filtered() && matches!(to, PageStatus::ManuallyApproved | PageStatus::ManuallySkipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PageStatus::*;

    #[test]
    fn processing_loop_is_legal() {
        assert!(is_legal(Pending, InProgress));
        assert!(is_legal(Failed, InProgress));
        assert!(is_legal(AwaitingManualReview, InProgress));
        assert!(is_legal(InProgress, Completed));
        assert!(is_legal(InProgress, Failed));
        assert!(is_legal(InProgress, AwaitingManualReview));
    }

    #[test]
    fn filtered_statuses_only_exit_through_override() {
        for f in PageStatus::all().iter().filter(|s| s.is_filtered()) {
            assert!(is_legal(*f, ManuallyApproved), "{f} -> manually_approved");
            assert!(is_legal(*f, ManuallySkipped), "{f} -> manually_skipped");
            assert!(!is_legal(*f, InProgress), "{f} -> in_progress must fail");
            assert!(!is_legal(*f, Pending), "{f} -> pending must fail");
            assert!(!is_legal(*f, Completed), "{f} -> completed must fail");
        }
    }

    #[test]
    fn approval_reenters_the_loop() {
        assert!(is_legal(FilteredListPage, ManuallyApproved));
        assert!(is_legal(ManuallyApproved, Pending));
        assert!(is_legal(Pending, InProgress));
    }

    #[test]
    fn terminal_states_stay_terminal() {
        assert!(!is_legal(Completed, Pending));
        assert!(!is_legal(Completed, InProgress));
        assert!(!is_legal(Pending, Completed));
    }

    #[test]
    fn same_status_is_noop_legal() {
        for s in PageStatus::all() {
            assert!(is_legal(*s, *s));
        }
    }

    #[test]
    fn override_detection() {
        assert!(requires_override(FilteredListPage, ManuallyApproved));
        assert!(requires_override(FilteredSizeTooSmall, ManuallySkipped));
        assert!(!requires_override(Pending, ManuallySkipped));
        assert!(!requires_override(ManuallyApproved, Pending));
    }

    /// Exhaustive sweep: every pair is either explicitly legal or rejected,
    /// and the closed set stays closed.
    #[test]
    fn full_matrix_is_total() {
        for from in PageStatus::all() {
            for to in PageStatus::all() {
                let _ = is_legal(*from, *to);
            }
        }
    }
}
