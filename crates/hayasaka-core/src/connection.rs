//! Session supervision: connect, dispatch, reconnect.
//!
//! The manager owns the only mutable lifecycle state in the process. Each
//! transport session is driven to completion, then the supervisor decides
//! whether to wipe credentials and how long to back off before the next
//! connect.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    credentials::CredentialStore,
    errors::Error,
    router::{CommandRouter, Reply},
    transport::{
        port::{Transport, TransportSession},
        types::{InboundMessage, LinkState, Payload, SessionEvent},
    },
    Result,
};

/// Lifecycle of the managed transport link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Authenticating,
    Open,
    Closed,
}

/// Supervision knobs, lifted from [`crate::config::Config`] at startup.
#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    /// Consecutive failed logins that trigger a credential wipe.
    pub login_attempt_threshold: u32,
    /// Consecutive reconnects without a successful open before giving up.
    /// Zero means never give up.
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    router: CommandRouter,
    credentials: CredentialStore,
    settings: SupervisorSettings,
    state: ConnectionState,
    login_failures: u32,
    reconnects_without_open: u32,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: CommandRouter,
        credentials: CredentialStore,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            transport,
            router,
            credentials,
            settings,
            state: ConnectionState::Idle,
            login_failures: 0,
            reconnects_without_open: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the supervision loop until the reconnect ceiling is exhausted.
    ///
    /// Every close advances the failed-login counter (a successful open
    /// resets it); at the threshold the credential material is wiped
    /// wholesale so the next connect starts a fresh pairing instead of
    /// retrying bad state.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.credentials.ensure()?;
            self.state = ConnectionState::Authenticating;

            let opened = match self.transport.connect(&self.credentials).await {
                Ok(mut session) => self.run_session(session.as_mut()).await,
                Err(e) => {
                    tracing::error!(error = %e, "transport connect failed");
                    false
                }
            };

            self.state = ConnectionState::Closed;

            if opened {
                self.reconnects_without_open = 0;
            } else {
                self.reconnects_without_open += 1;
            }

            // Every close counts toward the wipe threshold; a successful open
            // already reset the counter, so opens forgive earlier failures.
            self.login_failures += 1;
            if self.login_failures >= self.settings.login_attempt_threshold {
                tracing::warn!(
                    failures = self.login_failures,
                    "login attempt threshold reached, wiping credentials"
                );
                self.credentials.wipe()?;
                self.login_failures = 0;
            }

            if self.settings.max_reconnect_attempts > 0
                && self.reconnects_without_open >= self.settings.max_reconnect_attempts
            {
                tracing::error!(
                    attempts = self.reconnects_without_open,
                    "reconnect ceiling reached, giving up"
                );
                return Err(Error::Transport(format!(
                    "gave up after {} reconnect attempts without a successful open",
                    self.reconnects_without_open
                )));
            }

            let delay = self.backoff_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting");
            sleep(delay).await;
        }
    }

    /// Drive one session to completion. Returns whether it ever opened.
    async fn run_session(&mut self, session: &mut dyn TransportSession) -> bool {
        let mut opened = false;

        loop {
            let event = match session.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    tracing::info!("session event stream ended");
                    return opened;
                }
                Err(e) => {
                    tracing::error!(error = %e, "session event stream failed");
                    return opened;
                }
            };

            match event {
                SessionEvent::Connection(update) => {
                    if let Some(code) = &update.pairing_code {
                        tracing::info!(code = %code, "pairing challenge issued");
                    }
                    match update.link {
                        Some(LinkState::Open) => {
                            opened = true;
                            self.state = ConnectionState::Open;
                            self.login_failures = 0;
                            self.reconnects_without_open = 0;
                            tracing::info!("connection open");
                        }
                        Some(LinkState::Closed) => {
                            let reason = update.disconnect_reason.as_deref().unwrap_or("unknown");
                            tracing::warn!(reason = %reason, "connection closed");
                            return opened;
                        }
                        None => {}
                    }
                }
                SessionEvent::Message(message) => {
                    // Uniform boundary: a failed message never kills the session.
                    if let Err(e) = self.handle_message(session, message).await {
                        tracing::error!(error = %e, "message handling failed");
                    }
                }
            }
        }
    }

    async fn handle_message(
        &self,
        session: &mut dyn TransportSession,
        message: InboundMessage,
    ) -> Result<()> {
        if message.from_self {
            return Ok(());
        }

        let reply = match &message.payload {
            Payload::Deleted => return Ok(()),
            Payload::Text(text) => {
                session.mark_read(&message.key).await?;
                self.router.handle_text(&message.chat, text).await?
            }
            Payload::Image { data, mime } => {
                session.mark_read(&message.key).await?;
                Some(self.router.handle_image(data, mime).await)
            }
        };

        match reply {
            Some(Reply::Text(text)) => session.send_text(&message.chat, &text).await,
            Some(Reply::Image { png, caption }) => {
                session.send_image(&message.chat, &png, &caption).await
            }
            None => Ok(()),
        }
    }

    /// Exponential backoff, doubling from the initial delay up to the cap.
    fn backoff_delay(&self) -> Duration {
        let exp = self.reconnects_without_open.saturating_sub(1).min(16);
        let delay = self
            .settings
            .reconnect_initial_delay
            .saturating_mul(1u32 << exp);
        delay.min(self.settings.reconnect_max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::GenerativeBackend;
    use crate::domain::{ChatId, MessageKey, Turn};
    use crate::gateway::{Location, ScheduleGateway};
    use crate::store::SessionStore;
    use crate::transport::types::ConnectionUpdate;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    enum Sent {
        Read(String),
        Text(String, String),
        Image(String, String),
    }

    struct FakeSession {
        events: VecDeque<SessionEvent>,
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    #[async_trait]
    impl TransportSession for FakeSession {
        async fn next_event(&mut self) -> Result<Option<SessionEvent>> {
            Ok(self.events.pop_front())
        }

        async fn mark_read(&mut self, key: &MessageKey) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Read(key.0.clone()));
            Ok(())
        }

        async fn send_text(&mut self, chat: &ChatId, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Text(chat.0.clone(), text.to_string()));
            Ok(())
        }

        async fn send_image(&mut self, chat: &ChatId, _png: &[u8], caption: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Image(chat.0.clone(), caption.to_string()));
            Ok(())
        }
    }

    struct FakeTransport {
        sessions: Mutex<VecDeque<Vec<SessionEvent>>>,
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    impl FakeTransport {
        fn new(sessions: Vec<Vec<SessionEvent>>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into_iter().collect()),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self, _credentials: &CredentialStore) -> Result<Box<dyn TransportSession>> {
            let events = self
                .sessions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Transport("no more sessions".to_string()))?;
            Ok(Box::new(FakeSession {
                events: events.into(),
                sent: self.sent.clone(),
            }))
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl GenerativeBackend for EchoBackend {
        async fn chat(&self, history: &[Turn]) -> Result<String> {
            let last = history.last().map(|t| t.text.clone()).unwrap_or_default();
            Ok(format!("echo: {last}"))
        }

        async fn describe_image(&self, _: &str, _: &[u8], _: &str) -> Result<String> {
            Ok("sebuah foto".to_string())
        }

        async fn generate_image(&self, _: &str) -> Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    struct NoGateway;

    #[async_trait]
    impl ScheduleGateway for NoGateway {
        async fn list_locations(&self) -> Option<Vec<Location>> {
            None
        }

        async fn schedule_text(&self, _: &str) -> Option<String> {
            None
        }
    }

    fn router() -> CommandRouter {
        CommandRouter::new(
            Arc::new(SessionStore::new(40, 16)),
            Arc::new(NoGateway),
            Arc::new(EchoBackend),
        )
    }

    fn settings(max_reconnects: u32) -> SupervisorSettings {
        SupervisorSettings {
            login_attempt_threshold: 3,
            max_reconnect_attempts: max_reconnects,
            reconnect_initial_delay: Duration::from_millis(1),
            reconnect_max_delay: Duration::from_millis(2),
        }
    }

    fn tmp_creds(prefix: &str) -> CredentialStore {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        CredentialStore::new(format!("/tmp/{prefix}-{}-{ts}", std::process::id()))
    }

    fn text_msg(text: &str) -> SessionEvent {
        SessionEvent::Message(InboundMessage {
            chat: ChatId::new("628@s.whatsapp.net"),
            key: MessageKey("K1".to_string()),
            from_self: false,
            payload: Payload::Text(text.to_string()),
        })
    }

    #[tokio::test]
    async fn dispatches_text_message_and_marks_read() {
        let transport = Arc::new(FakeTransport::new(vec![vec![
            SessionEvent::Connection(ConnectionUpdate::open()),
            text_msg("halo"),
            SessionEvent::Connection(ConnectionUpdate::closed("done")),
        ]]));
        let sent = transport.sent.clone();
        let creds = tmp_creds("hayasaka-conn-dispatch");

        let manager = ConnectionManager::new(transport, router(), creds.clone(), settings(1));
        // The scripted transport runs dry, so the supervisor gives up.
        assert!(manager.run().await.is_err());

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], Sent::Read("K1".to_string()));
        assert_eq!(
            sent[1],
            Sent::Text("628@s.whatsapp.net".to_string(), "echo: halo".to_string())
        );
        creds.wipe().unwrap();
    }

    #[tokio::test]
    async fn ignores_own_and_deleted_messages() {
        let chat = ChatId::new("628@s.whatsapp.net");
        let transport = Arc::new(FakeTransport::new(vec![vec![
            SessionEvent::Connection(ConnectionUpdate::open()),
            SessionEvent::Message(InboundMessage {
                chat: chat.clone(),
                key: MessageKey("K1".to_string()),
                from_self: true,
                payload: Payload::Text("halo".to_string()),
            }),
            SessionEvent::Message(InboundMessage {
                chat,
                key: MessageKey("K2".to_string()),
                from_self: false,
                payload: Payload::Deleted,
            }),
            SessionEvent::Connection(ConnectionUpdate::closed("done")),
        ]]));
        let sent = transport.sent.clone();
        let creds = tmp_creds("hayasaka-conn-ignore");

        let manager = ConnectionManager::new(transport, router(), creds.clone(), settings(1));
        assert!(manager.run().await.is_err());

        assert!(sent.lock().unwrap().is_empty());
        creds.wipe().unwrap();
    }

    #[tokio::test]
    async fn third_failed_login_wipes_credentials_once() {
        // Three sessions that close before ever opening.
        let failing = || {
            vec![SessionEvent::Connection(ConnectionUpdate::closed(
                "stream errored",
            ))]
        };
        let transport = Arc::new(FakeTransport::new(vec![failing(), failing(), failing()]));
        let creds = tmp_creds("hayasaka-conn-wipe");
        creds.ensure().unwrap();
        std::fs::write(creds.dir().join("creds.json"), "{}").unwrap();

        let manager = ConnectionManager::new(transport, router(), creds.clone(), settings(3));
        assert!(manager.run().await.is_err());

        // Wiped at the third strike; ensure() on later iterations would have
        // recreated an empty dir, but the ceiling stops the loop first.
        assert!(!creds.dir().join("creds.json").exists());
    }

    #[tokio::test]
    async fn close_after_open_counts_toward_credential_wipe() {
        // A post-open disconnect is strike one; two failed logins after it
        // are strikes two and three.
        let opened_then_closed = vec![
            SessionEvent::Connection(ConnectionUpdate::open()),
            SessionEvent::Connection(ConnectionUpdate::closed("transport lost")),
        ];
        let fail = vec![SessionEvent::Connection(ConnectionUpdate::closed("err"))];
        let transport = Arc::new(FakeTransport::new(vec![
            opened_then_closed,
            fail.clone(),
            fail,
        ]));
        let creds = tmp_creds("hayasaka-conn-post-open-wipe");
        creds.ensure().unwrap();
        std::fs::write(creds.dir().join("creds.json"), "{}").unwrap();

        let manager = ConnectionManager::new(transport, router(), creds.clone(), settings(2));
        assert!(manager.run().await.is_err());

        assert!(!creds.dir().join("creds.json").exists());
    }

    #[tokio::test]
    async fn open_resets_failure_counter_and_state() {
        let transport = Arc::new(FakeTransport::new(vec![]));
        let sent = transport.sent.clone();
        let mut manager = ConnectionManager::new(
            transport,
            router(),
            tmp_creds("hayasaka-conn-reset"),
            settings(2),
        );
        assert_eq!(manager.state(), ConnectionState::Idle);
        manager.login_failures = 2;

        let mut session = FakeSession {
            events: vec![
                SessionEvent::Connection(ConnectionUpdate::open()),
                SessionEvent::Connection(ConnectionUpdate::closed("done")),
            ]
            .into(),
            sent,
        };
        let opened = manager.run_session(&mut session).await;

        assert!(opened);
        assert_eq!(manager.state(), ConnectionState::Open);
        // Two earlier strikes are forgiven by the successful open.
        assert_eq!(manager.login_failures, 0);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let manager = ConnectionManager::new(
            Arc::new(FakeTransport::new(vec![])),
            router(),
            tmp_creds("hayasaka-conn-backoff"),
            SupervisorSettings {
                login_attempt_threshold: 3,
                max_reconnect_attempts: 0,
                reconnect_initial_delay: Duration::from_millis(1000),
                reconnect_max_delay: Duration::from_millis(60_000),
            },
        );

        let mut m = manager;
        m.reconnects_without_open = 1;
        assert_eq!(m.backoff_delay(), Duration::from_millis(1000));
        m.reconnects_without_open = 4;
        assert_eq!(m.backoff_delay(), Duration::from_millis(8000));
        m.reconnects_without_open = 12;
        assert_eq!(m.backoff_delay(), Duration::from_millis(60_000));
    }
}
