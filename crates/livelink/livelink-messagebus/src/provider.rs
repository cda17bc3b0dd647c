//! Producer side of the protocol.
//!
//! A [`Provider`] is driven from the producing application's own loop: it
//! fans subject updates out to every connected client and, on [`Provider::pump`],
//! answers discovery pings, registers clients, echoes heartbeats and forgets
//! clients that have gone quiet.

use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use livelink_core::{Clock, CurveElement, RefSkeleton, Transform, DEFAULT_HEARTBEAT_TIMEOUT_SECS};

use crate::bus::{BusError, Transport};
use crate::messages::{
    Address, ClearSubject, Heartbeat, Message, Ping, Pong, SubjectFrame, SubjectSkeleton,
};

pub struct Provider<T: Transport> {
    name: String,
    machine_name: String,
    endpoint: T,
    clock: Arc<dyn Clock>,
    client_timeout: f64,
    /// Connected clients and when each was last heard from.
    clients: IndexMap<Address, f64>,
    skeletons: IndexMap<String, RefSkeleton>,
    last_frames: HashMap<String, SubjectFrame>,
}

impl<T: Transport> std::fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("machine_name", &self.machine_name)
            .field("address", &self.endpoint.address())
            .field("clients", &self.clients)
            .field("subjects", &self.skeletons.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Transport> Provider<T> {
    pub fn new(
        endpoint: T,
        name: impl Into<String>,
        machine_name: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            machine_name: machine_name.into(),
            endpoint,
            clock,
            client_timeout: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            clients: IndexMap::new(),
            skeletons: IndexMap::new(),
            last_frames: HashMap::new(),
        }
    }

    pub fn with_client_timeout(mut self, secs: f64) -> Self {
        self.client_timeout = secs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.endpoint.address()
    }

    pub fn clients(&self) -> Vec<Address> {
        self.clients.keys().copied().collect()
    }

    /// Declare or redeclare a subject's skeleton and send it to every client.
    pub fn update_subject(
        &mut self,
        name: &str,
        bone_names: Vec<String>,
        bone_parents: Vec<i32>,
    ) -> usize {
        let ref_skeleton = RefSkeleton::new(bone_names, bone_parents);
        self.last_frames.remove(name);
        self.skeletons.insert(name.to_string(), ref_skeleton.clone());
        self.broadcast(
            SubjectSkeleton {
                subject_name: name.to_string(),
                ref_skeleton,
            }
            .into(),
        )
    }

    /// Send one frame to every client. Returns how many were reached.
    pub fn update_subject_frame(
        &mut self,
        name: &str,
        transforms: Vec<Transform>,
        curves: Vec<CurveElement>,
        local_time: f64,
        frame_number: i32,
    ) -> usize {
        let frame = SubjectFrame {
            subject_name: name.to_string(),
            transforms,
            curves,
            producer_time: local_time,
            frame_number,
        };
        self.last_frames.insert(name.to_string(), frame.clone());
        self.broadcast(frame.into())
    }

    pub fn clear_subject(&mut self, name: &str) -> usize {
        self.skeletons.shift_remove(name);
        self.last_frames.remove(name);
        self.broadcast(
            ClearSubject {
                subject_name: name.to_string(),
            }
            .into(),
        )
    }

    /// Process every queued inbound message, then drop silent clients.
    /// Returns the number of messages handled.
    pub fn pump(&mut self) -> Result<usize, BusError> {
        let mut handled = 0;
        while let Some(envelope) = self.endpoint.try_recv()? {
            self.handle(envelope.sender, envelope.message);
            handled += 1;
        }
        self.forget_silent_clients();
        Ok(handled)
    }

    fn handle(&mut self, sender: Address, message: Message) {
        let now = self.clock.now();
        match message {
            Message::Ping(Ping { poll_id }) => {
                let pong = Pong {
                    provider_name: self.name.clone(),
                    machine_name: self.machine_name.clone(),
                    poll_id,
                };
                if let Err(err) = self.endpoint.send(sender, pong.into()) {
                    log::warn!("pong to {sender} failed: {err}");
                }
            }
            Message::Connect(_) => {
                log::info!("client {sender} connected to {}", self.name);
                self.clients.insert(sender, now);
                self.replay(sender);
            }
            Message::Heartbeat(_) => {
                if let Some(last) = self.clients.get_mut(&sender) {
                    *last = now;
                    if let Err(err) = self.endpoint.send(sender, Heartbeat {}.into()) {
                        log::warn!("heartbeat echo to {sender} failed: {err}");
                    }
                }
            }
            other => log::trace!("provider {}: ignoring {}", self.name, other.kind()),
        }
    }

    /// Bring a newly connected client up to date.
    fn replay(&mut self, to: Address) {
        let mut messages: Vec<Message> = Vec::with_capacity(self.skeletons.len() * 2);
        for (name, skeleton) in &self.skeletons {
            messages.push(
                SubjectSkeleton {
                    subject_name: name.clone(),
                    ref_skeleton: skeleton.clone(),
                }
                .into(),
            );
            if let Some(frame) = self.last_frames.get(name) {
                messages.push(frame.clone().into());
            }
        }
        for message in messages {
            if let Err(err) = self.endpoint.send(to, message) {
                log::warn!("replay to {to} failed: {err}");
                self.clients.shift_remove(&to);
                return;
            }
        }
    }

    fn broadcast(&mut self, message: Message) -> usize {
        let endpoint = &self.endpoint;
        let before = self.clients.len();
        self.clients.retain(|addr, _| match endpoint.send(*addr, message.clone()) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("dropping client {addr}: {err}");
                false
            }
        });
        if self.clients.len() < before {
            log::debug!("{} clients dropped on send", before - self.clients.len());
        }
        self.clients.len()
    }

    fn forget_silent_clients(&mut self) {
        let now = self.clock.now();
        let timeout = self.client_timeout;
        self.clients.retain(|addr, last| {
            let alive = now - *last < timeout;
            if !alive {
                log::info!("client {addr} stopped heartbeating");
            }
            alive
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::messages::Connect;
    use livelink_core::ManualClock;
    use uuid::Uuid;

    fn drain<T: Transport>(endpoint: &T) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(env) = endpoint.try_recv().unwrap() {
            out.push(env.message);
        }
        out
    }

    fn setup() -> (LocalBus, Provider<crate::bus::LocalEndpoint>, Arc<ManualClock>) {
        let bus = LocalBus::new();
        let clock = Arc::new(ManualClock::new(0.0));
        let provider = Provider::new(bus.endpoint(), "Bridge", "stage-pc", clock.clone());
        (bus, provider, clock)
    }

    #[test]
    fn answers_ping_with_pong() {
        let (bus, mut provider, _) = setup();
        let poller = bus.endpoint();
        let poll_id = Uuid::new_v4();
        poller.send(provider.address(), Ping { poll_id }.into()).unwrap();
        assert_eq!(provider.pump().unwrap(), 1);

        let reply = drain(&poller);
        assert_eq!(
            reply,
            vec![Message::from(Pong {
                provider_name: "Bridge".into(),
                machine_name: "stage-pc".into(),
                poll_id,
            })]
        );
        assert!(provider.clients().is_empty());
    }

    #[test]
    fn connect_replays_cached_subjects() {
        let (bus, mut provider, _) = setup();
        provider.update_subject("A", vec!["root".into()], vec![-1]);
        provider.update_subject_frame("A", vec![Transform::IDENTITY], Vec::new(), 1.0, 7);
        provider.update_subject("B", vec!["root".into()], vec![-1]);

        let client = bus.endpoint();
        client.send(provider.address(), Connect {}.into()).unwrap();
        provider.pump().unwrap();

        let kinds: Vec<&str> = drain(&client).iter().map(Message::kind).collect();
        assert_eq!(kinds, vec!["SubjectSkeleton", "SubjectFrame", "SubjectSkeleton"]);
        assert_eq!(provider.clients(), vec![client.address()]);
    }

    #[test]
    fn echoes_heartbeats_and_forgets_silent_clients() {
        let (bus, mut provider, clock) = setup();
        let client = bus.endpoint();
        client.send(provider.address(), Connect {}.into()).unwrap();
        provider.pump().unwrap();

        clock.set(10.0);
        client.send(provider.address(), Heartbeat {}.into()).unwrap();
        provider.pump().unwrap();
        assert_eq!(drain(&client), vec![Message::from(Heartbeat {})]);

        clock.set(24.0);
        provider.pump().unwrap();
        assert_eq!(provider.clients().len(), 1);

        clock.set(25.0);
        provider.pump().unwrap();
        assert!(provider.clients().is_empty());
    }

    #[test]
    fn unreachable_clients_are_dropped_on_broadcast() {
        let (bus, mut provider, _) = setup();
        let client = bus.endpoint();
        client.send(provider.address(), Connect {}.into()).unwrap();
        provider.pump().unwrap();
        assert_eq!(provider.update_subject("A", vec!["root".into()], vec![-1]), 1);

        client.close();
        assert_eq!(provider.clear_subject("A"), 0);
        assert!(provider.clients().is_empty());
    }
}
