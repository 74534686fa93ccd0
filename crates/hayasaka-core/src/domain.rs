/// Stable address of a chat peer on the transport (a WhatsApp JID).
///
/// Used as the key for all per-conversation state.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Opaque transport-level token identifying one inbound message.
///
/// The transport adapter decides its shape; core only echoes it back for
/// read acknowledgements.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey(pub String);

/// Who produced a dialogue turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One turn of per-conversation dialogue history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}
