//! Reasons a push into the registry can be rejected.
//!
//! Every variant is MalformedData: the registry counts and drops it, and the
//! caller is free to ignore the returned error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PushError {
    #[error("subject '{0}' has no skeleton yet")]
    UnknownSubject(String),
    #[error("skeleton for '{0}' has no bones")]
    EmptySkeleton(String),
    #[error("skeleton for '{subject}' has {bones} bones but {parents} parent indices")]
    InconsistentSkeleton {
        subject: String,
        bones: usize,
        parents: usize,
    },
    #[error("frame for '{0}' carries no transforms")]
    EmptyTransforms(String),
    #[error("frame for '{subject}' has {got} transforms, skeleton expects {expected}")]
    TransformCountMismatch {
        subject: String,
        expected: usize,
        got: usize,
    },
    #[error("frame for '{subject}' has non-finite time {time}")]
    NonFiniteTime { subject: String, time: f64 },
    #[error("frame for '{subject}' at {time} is older than last read time {last_read}")]
    StaleFrame {
        subject: String,
        time: f64,
        last_read: f64,
    },
}

/// Coarse bucket used by the diagnostic counters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    UnknownSubject,
    MalformedSkeleton,
    MalformedFrame,
    Stale,
}

impl PushError {
    pub fn reason(&self) -> DropReason {
        match self {
            PushError::UnknownSubject(_) => DropReason::UnknownSubject,
            PushError::EmptySkeleton(_) | PushError::InconsistentSkeleton { .. } => {
                DropReason::MalformedSkeleton
            }
            PushError::EmptyTransforms(_)
            | PushError::TransformCountMismatch { .. }
            | PushError::NonFiniteTime { .. } => DropReason::MalformedFrame,
            PushError::StaleFrame { .. } => DropReason::Stale,
        }
    }
}
