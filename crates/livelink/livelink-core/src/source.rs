//! The producer-connection abstraction the client drives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::ids::SourceId;
use crate::registry::SubjectRegistry;

/// Connection lifecycle: `Connecting -> Active -> TimedOut | ShutdownRequested -> Closed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceState {
    Connecting,
    Active,
    TimedOut,
    ShutdownRequested,
    Closed,
}

impl SourceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceState::TimedOut | SourceState::Closed)
    }
}

/// One producer connection feeding subjects into a registry.
///
/// The client owns every source and calls into it from the tick thread only;
/// sources that receive on their own thread must push through the registry
/// handed to them in [`Source::attach`].
pub trait Source: Send {
    /// Called once when the client adopts the source. Sources with a
    /// heartbeat take their timeout from `cfg.heartbeat_timeout_secs`.
    fn attach(&mut self, id: SourceId, registry: Arc<SubjectRegistry>, cfg: &ClientConfig);

    /// Polled about once per validation cycle. `false` gets the source removed.
    fn is_alive(&mut self) -> bool;

    /// Release the transport. Idempotent; returns `true` once closed.
    fn request_shutdown(&mut self) -> bool;

    fn state(&self) -> SourceState;

    fn source_type(&self) -> String;

    fn machine_name(&self) -> String;

    /// Short human-readable status for source lists.
    fn status(&self) -> String {
        format!("{:?}", self.state())
    }
}

/// Descriptive view of an attached source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: SourceId,
    pub source_type: String,
    pub machine_name: String,
    pub status: String,
    pub state: SourceState,
}
