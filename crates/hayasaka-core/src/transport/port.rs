use async_trait::async_trait;

use crate::{
    credentials::CredentialStore,
    domain::{ChatId, MessageKey},
    transport::types::SessionEvent,
    Result,
};

/// Factory for transport sessions.
///
/// Each reconnect gets a brand-new session object (new authentication, new
/// socket); only the supervision counters survive across sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credentials: &CredentialStore) -> Result<Box<dyn TransportSession>>;
}

/// One live messaging-transport session.
///
/// WhatsApp-over-Baileys is the first implementation; the shape is kept
/// narrow so fakes can drive the Connection Manager in tests.
#[async_trait]
pub trait TransportSession: Send {
    /// Next lifecycle or message event; `None` when the session's event
    /// stream has ended.
    async fn next_event(&mut self) -> Result<Option<SessionEvent>>;

    /// Acknowledge receipt (mark as read).
    async fn mark_read(&mut self, key: &MessageKey) -> Result<()>;

    async fn send_text(&mut self, chat: &ChatId, text: &str) -> Result<()>;

    async fn send_image(&mut self, chat: &ChatId, png: &[u8], caption: &str) -> Result<()>;
}
