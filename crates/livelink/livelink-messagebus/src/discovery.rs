//! Ping/Pong provider discovery.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::{BusError, Transport};
use crate::messages::{Address, Message, Ping};

/// A provider that answered a discovery ping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub provider_name: String,
    pub machine_name: String,
    pub address: Address,
}

/// Publishes pings and gathers the matching pongs.
///
/// Only replies to the most recent poll count; late pongs from an earlier
/// poll are discarded.
#[derive(Debug)]
pub struct DiscoveryPoller<T: Transport> {
    endpoint: T,
    poll_id: Option<Uuid>,
    found: IndexMap<Address, ProviderInfo>,
}

impl<T: Transport> DiscoveryPoller<T> {
    pub fn new(endpoint: T) -> Self {
        Self {
            endpoint,
            poll_id: None,
            found: IndexMap::new(),
        }
    }

    pub fn endpoint(&self) -> &T {
        &self.endpoint
    }

    /// Start a new poll, forgetting previous results.
    pub fn start(&mut self) -> Result<Uuid, BusError> {
        let poll_id = Uuid::new_v4();
        self.found.clear();
        self.poll_id = Some(poll_id);
        let reached = self.endpoint.publish(Ping { poll_id }.into())?;
        log::debug!("discovery poll {poll_id} published to {reached} endpoints");
        Ok(poll_id)
    }

    /// Wait up to `wait` for replies, then drain whatever is queued.
    pub fn collect(&mut self, wait: Duration) -> Result<Vec<ProviderInfo>, BusError> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.endpoint.recv_timeout(remaining)? {
                Some(envelope) => self.accept(envelope.sender, envelope.message),
                None => break,
            }
        }
        Ok(self.providers())
    }

    fn accept(&mut self, sender: Address, message: Message) {
        let Message::Pong(pong) = message else {
            return;
        };
        if Some(pong.poll_id) != self.poll_id {
            log::debug!("ignoring pong from {sender} for stale poll {}", pong.poll_id);
            return;
        }
        self.found.insert(
            sender,
            ProviderInfo {
                provider_name: pong.provider_name,
                machine_name: pong.machine_name,
                address: sender,
            },
        );
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.found.values().cloned().collect()
    }

    pub fn find(&self, provider_name: &str) -> Option<&ProviderInfo> {
        self.found.values().find(|p| p.provider_name == provider_name)
    }

    /// Hand the endpoint on, typically to the source that connects.
    pub fn into_endpoint(self) -> T {
        self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::messages::Pong;

    fn pong(name: &str, poll_id: Uuid) -> Message {
        Pong {
            provider_name: name.into(),
            machine_name: "stage-pc".into(),
            poll_id,
        }
        .into()
    }

    #[test]
    fn collects_only_current_poll() {
        let bus = LocalBus::new();
        let provider = bus.endpoint();
        let mut poller = DiscoveryPoller::new(bus.endpoint());

        let poll_id = poller.start().unwrap();
        let ping = provider.try_recv().unwrap().expect("ping delivered");
        assert_eq!(ping.message, Message::from(Ping { poll_id }));

        let to = poller.endpoint().address();
        provider.send(to, pong("Old", Uuid::new_v4())).unwrap();
        provider.send(to, pong("Bridge", poll_id)).unwrap();
        provider.send(to, pong("Bridge", poll_id)).unwrap();

        let found = poller.collect(Duration::from_millis(10)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider_name, "Bridge");
        assert_eq!(found[0].address, provider.address());
        assert!(poller.find("Old").is_none());
    }

    #[test]
    fn restarting_forgets_previous_results() {
        let bus = LocalBus::new();
        let provider = bus.endpoint();
        let mut poller = DiscoveryPoller::new(bus.endpoint());
        let first = poller.start().unwrap();
        provider
            .send(poller.endpoint().address(), pong("Bridge", first))
            .unwrap();
        assert_eq!(poller.collect(Duration::ZERO).unwrap().len(), 1);

        poller.start().unwrap();
        assert!(poller.providers().is_empty());
    }
}
