use crate::domain::{ChatId, MessageKey};

/// Transport-reported link state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closed,
}

/// A `connection.update`-style lifecycle event from the transport.
#[derive(Clone, Debug, Default)]
pub struct ConnectionUpdate {
    pub link: Option<LinkState>,
    /// One-time visual pairing challenge payload, emitted while no valid
    /// credential material exists. Rendering is the bridge's concern.
    pub pairing_code: Option<String>,
    pub disconnect_reason: Option<String>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            link: Some(LinkState::Open),
            ..Self::default()
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self {
            link: Some(LinkState::Closed),
            disconnect_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Inbound message payload variants the core cares about.
#[derive(Clone, Debug)]
pub enum Payload {
    Text(String),
    Image { data: Vec<u8>, mime: String },
    /// Remote deletion notice (protocol marker); never answered.
    Deleted,
}

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat: ChatId,
    pub key: MessageKey,
    pub from_self: bool,
    pub payload: Payload,
}

/// Everything a live transport session can surface to the core.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Connection(ConnectionUpdate),
    Message(InboundMessage),
}
