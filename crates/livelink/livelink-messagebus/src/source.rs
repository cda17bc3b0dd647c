//! [`Source`] over a message-bus endpoint.
//!
//! The source owns one endpoint. On attach it sends `Connect` to the provider
//! and starts a receive thread that feeds the registry; the tick thread only
//! polls liveness and sends heartbeats.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use hashbrown::HashMap;
use livelink_core::{
    ClientConfig, Clock, HeartbeatMonitor, HeartbeatPoll, Source, SourceId, SourceState,
    SubjectRegistry, TimeCode, DEFAULT_HEARTBEAT_TIMEOUT_SECS,
};

use crate::bus::{BusError, Transport};
use crate::discovery::ProviderInfo;
use crate::messages::{Address, Connect, Heartbeat, Message, SubjectFrame};

pub const SOURCE_TYPE: &str = "Message Bus Source";

/// How long the receive thread blocks before rechecking for shutdown.
const RECV_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Shared {
    monitor: Mutex<HeartbeatMonitor>,
    state: Mutex<SourceState>,
    shutdown: AtomicBool,
    received: AtomicU64,
}

impl Shared {
    fn state(&self) -> SourceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SourceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn record_activity(&self, now: f64) {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_activity(now);
        self.received.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SourceState::Connecting {
            *state = SourceState::Active;
        }
    }
}

/// Read-only view of a source's connection, usable after the source has been
/// handed to a client.
#[derive(Clone, Debug)]
pub struct SourceHandle(Arc<Shared>);

impl SourceHandle {
    pub fn state(&self) -> SourceState {
        self.0.state()
    }

    pub fn last_activity(&self) -> f64 {
        self.0
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity_received()
    }

    /// Messages accepted from the provider so far.
    pub fn messages_received(&self) -> u64 {
        self.0.received.load(Ordering::Relaxed)
    }
}

/// Receive-side dispatch, owned by the receive thread.
struct Inbox {
    id: SourceId,
    registry: Arc<SubjectRegistry>,
    clock: Arc<dyn Clock>,
    /// Producer-to-local clock offset per subject, fixed on its first frame.
    offsets: HashMap<String, f64>,
}

impl Inbox {
    fn new(id: SourceId, registry: Arc<SubjectRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            registry,
            clock,
            offsets: HashMap::new(),
        }
    }

    // Push failures are counted and logged by the registry.
    fn handle(&mut self, message: Message) {
        match message {
            Message::Heartbeat(_) => {}
            Message::ClearSubject(m) => {
                self.offsets.remove(&m.subject_name);
                self.registry.clear_subject(&m.subject_name);
            }
            Message::SubjectSkeleton(m) => {
                let _ = self.registry.push_skeleton(&m.subject_name, m.ref_skeleton);
            }
            Message::SubjectFrame(frame) => self.push_frame(frame),
            other => log::trace!("source {}: ignoring {}", self.id, other.kind()),
        }
    }

    fn push_frame(&mut self, frame: SubjectFrame) {
        let now = self.clock.now();
        let offset = *self
            .offsets
            .entry(frame.subject_name.clone())
            .or_insert_with(|| now - frame.producer_time);
        let time_code = TimeCode::new(frame.producer_time, i64::from(frame.frame_number), offset);
        let _ = self.registry.push_frame(
            self.id,
            &frame.subject_name,
            frame.transforms,
            &frame.curves,
            time_code,
        );
    }
}

fn receive_loop<T: Transport>(
    endpoint: Arc<T>,
    provider: Address,
    shared: Arc<Shared>,
    mut inbox: Inbox,
) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let envelope = match endpoint.recv_timeout(RECV_POLL) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(err) => {
                if !shared.shutdown.load(Ordering::Acquire) {
                    log::warn!("source {}: receive failed: {err}", inbox.id);
                }
                break;
            }
        };
        if envelope.sender != provider {
            continue;
        }
        shared.record_activity(inbox.clock.now());
        inbox.handle(envelope.message);
    }
    log::debug!("source {}: receive thread exiting", inbox.id);
}

/// A [`Source`] connected to one provider over a [`Transport`].
pub struct MessageBusSource<T: Transport> {
    endpoint: Arc<T>,
    provider: ProviderInfo,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    id: Option<SourceId>,
}

impl<T: Transport> std::fmt::Debug for MessageBusSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBusSource")
            .field("address", &self.endpoint.address())
            .field("provider", &self.provider)
            .field("state", &self.shared.state())
            .field("id", &self.id)
            .finish()
    }
}

impl<T: Transport> MessageBusSource<T> {
    /// The heartbeat timeout defaults to 15 s until the client attaches the
    /// source and hands over its configured value.
    pub fn new(endpoint: T, provider: ProviderInfo, clock: Arc<dyn Clock>) -> Self {
        let monitor = HeartbeatMonitor::new(DEFAULT_HEARTBEAT_TIMEOUT_SECS, clock.now());
        Self {
            endpoint: Arc::new(endpoint),
            provider,
            clock,
            shared: Arc::new(Shared {
                monitor: Mutex::new(monitor),
                state: Mutex::new(SourceState::Connecting),
                shutdown: AtomicBool::new(false),
                received: AtomicU64::new(0),
            }),
            worker: None,
            id: None,
        }
    }

    pub fn provider(&self) -> &ProviderInfo {
        &self.provider
    }

    pub fn address(&self) -> Address {
        self.endpoint.address()
    }

    pub fn handle(&self) -> SourceHandle {
        SourceHandle(Arc::clone(&self.shared))
    }

    fn send(&self, message: Message) -> Result<(), BusError> {
        self.endpoint.send(self.provider.address, message)
    }
}

impl<T: Transport> Source for MessageBusSource<T> {
    fn attach(&mut self, id: SourceId, registry: Arc<SubjectRegistry>, cfg: &ClientConfig) {
        if self.worker.is_some() {
            log::warn!("source {id}: already attached");
            return;
        }
        self.id = Some(id);
        *self.shared.monitor.lock().unwrap_or_else(PoisonError::into_inner) =
            HeartbeatMonitor::new(cfg.heartbeat_timeout_secs, self.clock.now());
        let inbox = Inbox::new(id, registry, Arc::clone(&self.clock));
        let endpoint = Arc::clone(&self.endpoint);
        let shared = Arc::clone(&self.shared);
        let provider = self.provider.address;
        let spawned = std::thread::Builder::new()
            .name(format!("livelink-source-{id}"))
            .spawn(move || receive_loop(endpoint, provider, shared, inbox));
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(err) => {
                log::warn!("source {id}: could not start receive thread: {err}");
                return;
            }
        }
        if let Err(err) = self.send(Connect {}.into()) {
            log::warn!("source {id}: connect to {} failed: {err}", self.provider.provider_name);
        }
    }

    fn is_alive(&mut self) -> bool {
        if self.shared.state().is_terminal() || self.shared.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let poll = self
            .shared
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .poll(self.clock.now());
        match poll {
            HeartbeatPoll::SendHeartbeat => {
                if let Err(err) = self.send(Heartbeat {}.into()) {
                    log::debug!("heartbeat to {} failed: {err}", self.provider.provider_name);
                }
                true
            }
            HeartbeatPoll::TimedOut => {
                log::info!(
                    "provider {} on {} timed out",
                    self.provider.provider_name,
                    self.provider.machine_name
                );
                self.shared.set_state(SourceState::TimedOut);
                false
            }
        }
    }

    fn request_shutdown(&mut self) -> bool {
        if self.shared.state() == SourceState::Closed {
            return true;
        }
        if self.shared.state() != SourceState::TimedOut {
            self.shared.set_state(SourceState::ShutdownRequested);
        }
        self.shared.shutdown.store(true, Ordering::Release);
        self.endpoint.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("source receive thread panicked");
            }
        }
        self.shared.set_state(SourceState::Closed);
        true
    }

    fn state(&self) -> SourceState {
        self.shared.state()
    }

    fn source_type(&self) -> String {
        SOURCE_TYPE.to_string()
    }

    fn machine_name(&self) -> String {
        self.provider.machine_name.clone()
    }

    fn status(&self) -> String {
        match self.shared.state() {
            SourceState::Connecting => "Connecting".into(),
            SourceState::Active => format!("Receiving from {}", self.provider.provider_name),
            SourceState::TimedOut => "Timed out".into(),
            SourceState::ShutdownRequested => "Shutting down".into(),
            SourceState::Closed => "Closed".into(),
        }
    }
}

impl<T: Transport> Drop for MessageBusSource<T> {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::messages::{ClearSubject, SubjectSkeleton};
    use livelink_core::{CurveElement, ManualClock, RefSkeleton, Transform};

    fn frame(subject: &str, producer_time: f64, frame_number: i32) -> Message {
        SubjectFrame {
            subject_name: subject.into(),
            transforms: vec![Transform::IDENTITY],
            curves: vec![CurveElement::new("jaw", 0.5)],
            producer_time,
            frame_number,
        }
        .into()
    }

    fn skeleton(subject: &str) -> Message {
        SubjectSkeleton {
            subject_name: subject.into(),
            ref_skeleton: RefSkeleton::flat(["root"]),
        }
        .into()
    }

    #[test]
    fn inbox_caches_offset_per_subject() {
        let clock = Arc::new(ManualClock::new(50.0));
        let registry = Arc::new(SubjectRegistry::default());
        let mut inbox = Inbox::new(SourceId::new(), registry.clone(), clock.clone());

        inbox.handle(skeleton("A"));
        inbox.handle(frame("A", 10.0, 1));
        clock.advance(5.0);
        inbox.handle(frame("A", 10.5, 2));

        let times: Vec<f64> = registry
            .with_subject("A", |s| s.buffer().frames().iter().map(|f| f.local_time()).collect())
            .unwrap();
        assert_eq!(times, vec![50.0, 50.5]);
        assert_eq!(inbox.offsets.get("A"), Some(&40.0));
    }

    #[test]
    fn inbox_clear_resets_offset() {
        let clock = Arc::new(ManualClock::new(50.0));
        let registry = Arc::new(SubjectRegistry::default());
        let mut inbox = Inbox::new(SourceId::new(), registry.clone(), clock.clone());

        inbox.handle(skeleton("A"));
        inbox.handle(frame("A", 10.0, 1));
        inbox.handle(
            ClearSubject {
                subject_name: "A".into(),
            }
            .into(),
        );
        assert!(!registry.contains("A"));
        assert!(inbox.offsets.is_empty());

        clock.set(80.0);
        inbox.handle(skeleton("A"));
        inbox.handle(frame("A", 0.0, 0));
        assert_eq!(inbox.offsets.get("A"), Some(&80.0));
    }

    #[test]
    fn frame_before_skeleton_is_dropped() {
        let clock = Arc::new(ManualClock::new(0.0));
        let registry = Arc::new(SubjectRegistry::default());
        let mut inbox = Inbox::new(SourceId::new(), registry.clone(), clock);
        inbox.handle(frame("Ghost", 1.0, 0));
        assert!(!registry.contains("Ghost"));
        assert_eq!(registry.diagnostics().snapshot().unknown_subject, 1);
    }

    #[test]
    fn shutdown_is_idempotent_and_closes_endpoint() {
        let bus = LocalBus::new();
        let provider = bus.endpoint();
        let clock = Arc::new(ManualClock::new(0.0));
        let info = ProviderInfo {
            provider_name: "Bridge".into(),
            machine_name: "stage-pc".into(),
            address: provider.address(),
        };
        let mut source = MessageBusSource::new(bus.endpoint(), info, clock);
        source.attach(
            SourceId::new(),
            Arc::new(SubjectRegistry::default()),
            &ClientConfig::default(),
        );

        let connect = provider
            .recv_timeout(Duration::from_secs(1))
            .unwrap()
            .expect("connect sent");
        assert_eq!(connect.message, Message::from(Connect {}));
        assert_eq!(connect.sender, source.address());
        assert_eq!(source.state(), SourceState::Connecting);

        assert!(source.request_shutdown());
        assert!(source.request_shutdown());
        assert_eq!(source.state(), SourceState::Closed);
        assert!(!source.is_alive());
        assert_eq!(bus.endpoint_count(), 1);
    }

    #[test]
    fn attach_takes_heartbeat_timeout_from_config() {
        let bus = LocalBus::new();
        let provider = bus.endpoint();
        let clock = Arc::new(ManualClock::new(0.0));
        let info = ProviderInfo {
            provider_name: "Bridge".into(),
            machine_name: "stage-pc".into(),
            address: provider.address(),
        };
        let cfg = ClientConfig {
            heartbeat_timeout_secs: 4.0,
            ..ClientConfig::default()
        };
        let mut source = MessageBusSource::new(bus.endpoint(), info, clock.clone());
        source.attach(SourceId::new(), Arc::new(SubjectRegistry::default()), &cfg);

        // The provider never answers, so only the configured window matters.
        for _ in 0..3 {
            clock.advance(1.0);
            assert!(source.is_alive());
        }
        clock.advance(1.0);
        assert!(!source.is_alive());
        assert_eq!(source.state(), SourceState::TimedOut);
        assert!(source.request_shutdown());
    }
}
