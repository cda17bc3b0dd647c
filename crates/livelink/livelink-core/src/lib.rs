//! LiveLink core (transport-agnostic)
//!
//! Receives time-stamped skeletal transforms and named curves from any number
//! of sources and exposes them, per subject, as a once-per-tick snapshot that
//! consumers read without locking.
//!
//! - [`SubjectRegistry`]: thread-safe subject store; producers push, the tick
//!   thread publishes.
//! - [`Client`]: owns sources, validates liveness, runs `tick()`.
//! - [`Retargeter`]: maps a snapshot onto a consumer skeleton by bone name.

pub mod buffer;
pub mod client;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod ids;
pub mod interp;
pub mod liveness;
pub mod registry;
pub mod retarget;
pub mod snapshot;
pub mod source;
pub mod subject;

pub use buffer::FrameBuffer;
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, ConnectionSettings, DEFAULT_HEARTBEAT_TIMEOUT_SECS};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::{DropReason, PushError};
pub use frame::{CurveElement, CurveKey, Frame, RefSkeleton, TimeCode};
pub use ids::SourceId;
pub use interp::Transform;
pub use liveness::{HeartbeatMonitor, HeartbeatPoll};
pub use registry::SubjectRegistry;
pub use retarget::{BoneNameMap, IdentityMapper, NameMapper, Pose, Retargeter, TargetSkeleton};
pub use snapshot::{SnapshotMap, SubjectSnapshot};
pub use source::{Source, SourceInfo, SourceState};
pub use subject::Subject;
