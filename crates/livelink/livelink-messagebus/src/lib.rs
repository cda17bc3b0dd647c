//! Message-bus transport for livelink-core.
//!
//! - [`messages`]: the wire protocol (`Connect`, `Heartbeat`, `ClearSubject`,
//!   `SubjectSkeleton`, `SubjectFrame`, `Ping`, `Pong`).
//! - [`bus`]: the [`Transport`] boundary and the in-process [`LocalBus`].
//! - [`MessageBusSource`]: a `livelink_core::Source` fed by one provider.
//! - [`DiscoveryPoller`] and [`Provider`]: the two ends of discovery and the
//!   producer-facing API.

pub mod bus;
pub mod discovery;
pub mod messages;
pub mod provider;
pub mod source;

pub use bus::{BusError, LocalBus, LocalEndpoint, Transport};
pub use discovery::{DiscoveryPoller, ProviderInfo};
pub use messages::{
    Address, ClearSubject, Connect, Envelope, Heartbeat, Message, Ping, Pong, SubjectFrame,
    SubjectSkeleton,
};
pub use provider::Provider;
pub use source::{MessageBusSource, SourceHandle, SOURCE_TYPE};
