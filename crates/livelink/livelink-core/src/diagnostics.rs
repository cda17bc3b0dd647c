use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DropReason;

/// Lock-free counters updated from transport threads.
#[derive(Debug, Default)]
pub struct Diagnostics {
    unknown_subject: AtomicU64,
    malformed_skeleton: AtomicU64,
    malformed_frame: AtomicU64,
    stale: AtomicU64,
    accepted_frames: AtomicU64,
    published_ticks: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub unknown_subject: u64,
    pub malformed_skeleton: u64,
    pub malformed_frame: u64,
    pub stale: u64,
    pub accepted_frames: u64,
    pub published_ticks: u64,
}

impl DiagnosticsSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.unknown_subject + self.malformed_skeleton + self.malformed_frame + self.stale
    }
}

impl Diagnostics {
    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::UnknownSubject => &self.unknown_subject,
            DropReason::MalformedSkeleton => &self.malformed_skeleton,
            DropReason::MalformedFrame => &self.malformed_frame,
            DropReason::Stale => &self.stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self) {
        self.published_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_total(&self) -> u64 {
        self.snapshot().dropped_total()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            unknown_subject: self.unknown_subject.load(Ordering::Relaxed),
            malformed_skeleton: self.malformed_skeleton.load(Ordering::Relaxed),
            malformed_frame: self.malformed_frame.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            accepted_frames: self.accepted_frames.load(Ordering::Relaxed),
            published_ticks: self.published_ticks.load(Ordering::Relaxed),
        }
    }
}
