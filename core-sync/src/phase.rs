//! # Sync Phase State Machine
//!
//! One sync call walks a fixed, linear sequence of phases:
//!
//! ```text
//! Idle → PreconditionCheck → FolderPrep → Diffing → Deleting → Converting
//!      → IndexBuilding → IndexWriting → Cleanup → Complete
//!                                              ↘ Fatal
//! ```
//!
//! Any active phase may jump straight to `Cleanup` when the sync fails, and
//! both terminal states are only reachable through `Cleanup`. `Complete` is
//! further restricted to a cleanup entered from `IndexWriting`.

use crate::error::{Result, SyncError};
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    PreconditionCheck,
    FolderPrep,
    Diffing,
    Deleting,
    Converting,
    IndexBuilding,
    IndexWriting,
    Cleanup,
    Complete,
    Fatal,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Complete | SyncPhase::Fatal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::PreconditionCheck => "precondition_check",
            SyncPhase::FolderPrep => "folder_prep",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Deleting => "deleting",
            SyncPhase::Converting => "converting",
            SyncPhase::IndexBuilding => "index_building",
            SyncPhase::IndexWriting => "index_writing",
            SyncPhase::Cleanup => "cleanup",
            SyncPhase::Complete => "complete",
            SyncPhase::Fatal => "fatal",
        }
    }

    /// The phase that follows on the success path.
    fn next(&self) -> Option<SyncPhase> {
        match self {
            SyncPhase::Idle => Some(SyncPhase::PreconditionCheck),
            SyncPhase::PreconditionCheck => Some(SyncPhase::FolderPrep),
            SyncPhase::FolderPrep => Some(SyncPhase::Diffing),
            SyncPhase::Diffing => Some(SyncPhase::Deleting),
            SyncPhase::Deleting => Some(SyncPhase::Converting),
            SyncPhase::Converting => Some(SyncPhase::IndexBuilding),
            SyncPhase::IndexBuilding => Some(SyncPhase::IndexWriting),
            SyncPhase::IndexWriting => Some(SyncPhase::Cleanup),
            SyncPhase::Cleanup => Some(SyncPhase::Complete),
            SyncPhase::Complete | SyncPhase::Fatal => None,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current phase of one sync call and rejects invalid moves.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: SyncPhase,
    /// Phase that was active when cleanup started
    cleanup_from: Option<SyncPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: SyncPhase::Idle,
            cleanup_from: None,
        }
    }

    pub fn current(&self) -> SyncPhase {
        self.current
    }

    /// Move to `to`, validating the transition.
    pub fn advance(&mut self, to: SyncPhase) -> Result<()> {
        self.validate_transition(to)?;
        trace!(from = %self.current, to = %to, "Sync phase transition");

        if to == SyncPhase::Cleanup {
            self.cleanup_from = Some(self.current);
        }
        self.current = to;
        Ok(())
    }

    fn validate_transition(&self, to: SyncPhase) -> Result<()> {
        let valid = match (self.current, to) {
            (from, _) if from.is_terminal() => false,
            // Failure path: any active phase may start cleanup
            (from, SyncPhase::Cleanup) => from != SyncPhase::Idle && from != SyncPhase::Cleanup,
            (SyncPhase::Cleanup, SyncPhase::Fatal) => true,
            (SyncPhase::Cleanup, SyncPhase::Complete) => {
                self.cleanup_from == Some(SyncPhase::IndexWriting)
            }
            (from, to) => from.next() == Some(to),
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.current.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.current.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS_PATH: [SyncPhase; 9] = [
        SyncPhase::PreconditionCheck,
        SyncPhase::FolderPrep,
        SyncPhase::Diffing,
        SyncPhase::Deleting,
        SyncPhase::Converting,
        SyncPhase::IndexBuilding,
        SyncPhase::IndexWriting,
        SyncPhase::Cleanup,
        SyncPhase::Complete,
    ];

    #[test]
    fn test_success_path() {
        let mut tracker = PhaseTracker::new();
        for phase in SUCCESS_PATH {
            tracker.advance(phase).unwrap();
        }
        assert_eq!(tracker.current(), SyncPhase::Complete);
        assert!(tracker.advance(SyncPhase::Complete).is_err());
    }

    #[test]
    fn test_failure_path_goes_through_cleanup() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(SyncPhase::PreconditionCheck).unwrap();
        assert!(tracker.advance(SyncPhase::Fatal).is_err());

        tracker.advance(SyncPhase::Cleanup).unwrap();
        assert!(tracker.clone().advance(SyncPhase::Complete).is_err());
        tracker.advance(SyncPhase::Fatal).unwrap();
        assert!(tracker.current().is_terminal());
    }

    #[test]
    fn test_index_failure_is_fatal() {
        let mut tracker = PhaseTracker::new();
        for phase in &SUCCESS_PATH[..7] {
            tracker.advance(*phase).unwrap();
        }
        tracker.advance(SyncPhase::Cleanup).unwrap();
        tracker.advance(SyncPhase::Fatal).unwrap();
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(SyncPhase::PreconditionCheck).unwrap();

        let err = tracker.advance(SyncPhase::Converting).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidStateTransition { ref from, ref to, .. }
                if from == "precondition_check" && to == "converting"
        ));
        assert!(PhaseTracker::new().advance(SyncPhase::Cleanup).is_err());
    }
}
