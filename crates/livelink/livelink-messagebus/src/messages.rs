//! Wire messages exchanged between providers and clients.
//!
//! JSON encoding is internally tagged by message name, e.g.
//! `{"type":"ClearSubject","subject_name":"Performer"}`.

use std::fmt;

use livelink_core::{CurveElement, RefSkeleton, Transform};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::BusError;

/// Endpoint address on a bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub Uuid);

impl Address {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Connect {}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClearSubject {
    pub subject_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectSkeleton {
    pub subject_name: String,
    pub ref_skeleton: RefSkeleton,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectFrame {
    pub subject_name: String,
    pub transforms: Vec<Transform>,
    #[serde(default)]
    pub curves: Vec<CurveElement>,
    /// Producer clock, seconds.
    pub producer_time: f64,
    pub frame_number: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub poll_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub provider_name: String,
    pub machine_name: String,
    pub poll_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    Connect(Connect),
    Heartbeat(Heartbeat),
    ClearSubject(ClearSubject),
    SubjectSkeleton(SubjectSkeleton),
    SubjectFrame(SubjectFrame),
    Ping(Ping),
    Pong(Pong),
}

macro_rules! impl_from_message {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(m: $variant) -> Self {
                    Message::$variant(m)
                }
            }
        )*
    };
}

impl_from_message!(Connect, Heartbeat, ClearSubject, SubjectSkeleton, SubjectFrame, Ping, Pong);

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connect(_) => "Connect",
            Message::Heartbeat(_) => "Heartbeat",
            Message::ClearSubject(_) => "ClearSubject",
            Message::SubjectSkeleton(_) => "SubjectSkeleton",
            Message::SubjectFrame(_) => "SubjectFrame",
            Message::Ping(_) => "Ping",
            Message::Pong(_) => "Pong",
        }
    }

    /// Serialize for an out-of-process transport.
    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BusError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A message together with the address it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Address,
    pub message: Message,
}
