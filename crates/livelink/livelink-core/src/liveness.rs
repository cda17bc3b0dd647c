//! Heartbeat bookkeeping shared by sources that prove liveness over a bus.
//!
//! A source is declared dead only when a heartbeat went out less than half a
//! timeout ago and nothing at all has been received for a full timeout. Any
//! inbound message counts as activity, not only heartbeat replies.

/// Outcome of one liveness poll.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatPoll {
    /// Still alive; the caller must send a heartbeat now.
    SendHeartbeat,
    TimedOut,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeartbeatMonitor {
    timeout: f64,
    last_heartbeat_sent: f64,
    last_activity_received: f64,
}

impl HeartbeatMonitor {
    /// Fresh monitor; both timestamps start at `now`.
    pub fn new(timeout: f64, now: f64) -> Self {
        Self::with_times(timeout, now, now)
    }

    pub fn with_times(timeout: f64, last_heartbeat_sent: f64, last_activity_received: f64) -> Self {
        Self {
            timeout,
            last_heartbeat_sent,
            last_activity_received,
        }
    }

    #[inline]
    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    #[inline]
    pub fn half_timeout(&self) -> f64 {
        self.timeout * 0.5
    }

    pub fn last_heartbeat_sent(&self) -> f64 {
        self.last_heartbeat_sent
    }

    pub fn last_activity_received(&self) -> f64 {
        self.last_activity_received
    }

    pub fn record_activity(&mut self, now: f64) {
        if now > self.last_activity_received {
            self.last_activity_received = now;
        }
    }

    pub fn poll(&mut self, now: f64) -> HeartbeatPoll {
        let heartbeat_in_flight = now - self.last_heartbeat_sent < self.half_timeout();
        let silent = now - self.last_activity_received >= self.timeout;
        if heartbeat_in_flight && silent {
            return HeartbeatPoll::TimedOut;
        }
        self.last_heartbeat_sent = now;
        HeartbeatPoll::SendHeartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: f64 = 15.0;

    #[test]
    fn silent_peer_with_recent_heartbeat_times_out() {
        let now = 100.0;
        let mut m = HeartbeatMonitor::with_times(TIMEOUT, now - 6.0, now - 20.0);
        assert_eq!(m.poll(now), HeartbeatPoll::TimedOut);
        // A timed-out poll does not pretend a heartbeat went out.
        assert_eq!(m.last_heartbeat_sent(), now - 6.0);
    }

    #[test]
    fn fresh_activity_is_alive_regardless_of_heartbeat() {
        let now = 100.0;
        for sent in [now - 0.5, now - 6.0, now - 30.0] {
            let mut m = HeartbeatMonitor::with_times(TIMEOUT, sent, now - 1.0);
            assert_eq!(m.poll(now), HeartbeatPoll::SendHeartbeat);
            assert_eq!(m.last_heartbeat_sent(), now);
        }
    }

    #[test]
    fn stale_heartbeat_gets_another_chance() {
        // Nothing heard for 20s, but our last heartbeat is older than half the
        // window: send a new one instead of declaring the peer dead.
        let now = 100.0;
        let mut m = HeartbeatMonitor::with_times(TIMEOUT, now - 8.0, now - 20.0);
        assert_eq!(m.poll(now), HeartbeatPoll::SendHeartbeat);
        assert_eq!(m.poll(now + 1.0), HeartbeatPoll::TimedOut);
    }

    #[test]
    fn dead_peer_detected_within_one_window_when_polled_regularly() {
        let mut m = HeartbeatMonitor::new(TIMEOUT, 0.0);
        let mut t = 0.0;
        let dead_at = loop {
            t += 1.0;
            if m.poll(t) == HeartbeatPoll::TimedOut {
                break t;
            }
            assert!(t < 60.0, "never timed out");
        };
        assert_eq!(dead_at, TIMEOUT);
    }
}
