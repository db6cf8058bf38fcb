//! Media item download state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Download status of a single media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    /// Discovered but not yet picked up by a worker.
    #[default]
    Pending,
    /// A worker is fetching, downloading or uploading the item.
    InProgress,
    /// The output file is complete.
    Done,
    /// The item could not be archived in this attempt.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition: cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: MediaStatus,
    pub to: MediaStatus,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Validate a status transition.
    pub fn can_transition_to(&self, target: MediaStatus) -> bool {
        use MediaStatus::*;

        matches!(
            (self, target),
            (Pending, InProgress) | (InProgress, Done | Failed) | (Failed, InProgress)
        )
    }

    /// Attempt to transition to a new status.
    pub fn transition_to(&self, target: MediaStatus) -> Result<MediaStatus, TransitionError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }
}

impl std::fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
