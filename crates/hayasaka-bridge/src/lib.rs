//! WhatsApp transport over a Baileys sidecar process.
//!
//! The sidecar owns the WhatsApp socket and the QR rendering; this crate
//! speaks newline-delimited JSON with it: events arrive on the sidecar's
//! stdout, commands go in on its stdin. Binary payloads (inbound photos,
//! outbound generated images) cross the pipe as base64.

use std::{collections::VecDeque, process::Stdio, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};

use hayasaka_core::{
    credentials::CredentialStore,
    domain::{ChatId, MessageKey},
    transport::{
        port::{Transport, TransportSession},
        types::{ConnectionUpdate, InboundMessage, LinkState, Payload, SessionEvent},
    },
    Error, Result,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

/// Spawns one sidecar process per session.
pub struct BridgeTransport {
    command: Vec<String>,
}

impl BridgeTransport {
    /// `command` is the full argv of the sidecar, e.g. `["node", "bridge/index.js"]`.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(&self, credentials: &CredentialStore) -> Result<Box<dyn TransportSession>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::Transport("bridge command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .env("HAYASAKA_AUTH_DIR", credentials.dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn bridge {program:?}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("bridge stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("bridge stdout was not captured".to_string()))?;

        let stderr_tail: Arc<Mutex<StderrTail>> = Arc::new(Mutex::new(StderrTail::default()));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            // Drain stderr in background to avoid blocking on a full pipe.
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tail.lock().await.push_line(line);
                }
            });
        }

        tracing::info!(program = %program, "bridge process started");

        Ok(Box::new(BridgeSession {
            child,
            stdin,
            reader: BufReader::new(stdout).lines(),
            stderr_tail,
        }))
    }
}

pub struct BridgeSession {
    child: Child,
    stdin: ChildStdin,
    reader: Lines<BufReader<ChildStdout>>,
    stderr_tail: Arc<Mutex<StderrTail>>,
}

#[async_trait]
impl TransportSession for BridgeSession {
    async fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        loop {
            let line = match self.reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    // Pipe closed; reap the sidecar so it doesn't linger.
                    let status = self.child.wait().await?;
                    let stderr = self.stderr_tail.lock().await.snapshot();
                    if !status.success() && !stderr.trim().is_empty() {
                        tracing::warn!(%status, stderr = %stderr, "bridge exited");
                    }
                    return Ok(None);
                }
                Err(e) => return Err(Error::Io(e)),
            };

            if line.trim().is_empty() {
                continue;
            }

            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    let stderr = self.stderr_tail.lock().await.snapshot();
                    let mut msg = format!(
                        "bridge event parse failed: {e}\nstdout line: {}",
                        truncate_text(&line, 500)
                    );
                    if !stderr.trim().is_empty() {
                        msg.push_str("\nstderr (tail):\n");
                        msg.push_str(&stderr);
                    }
                    return Err(Error::Transport(msg));
                }
            };

            match parse_event(&value)? {
                Some(event) => return Ok(Some(event)),
                None => {
                    tracing::debug!(line = %truncate_text(&line, 200), "ignoring bridge event");
                }
            }
        }
    }

    async fn mark_read(&mut self, key: &MessageKey) -> Result<()> {
        self.write_command(&serde_json::json!({ "cmd": "read", "key": key.0 }))
            .await
    }

    async fn send_text(&mut self, chat: &ChatId, text: &str) -> Result<()> {
        self.write_command(&serde_json::json!({ "cmd": "text", "chat": chat.0, "text": text }))
            .await
    }

    async fn send_image(&mut self, chat: &ChatId, png: &[u8], caption: &str) -> Result<()> {
        self.write_command(&serde_json::json!({
            "cmd": "image",
            "chat": chat.0,
            "png": BASE64.encode(png),
            "caption": caption,
        }))
        .await
    }
}

impl BridgeSession {
    async fn write_command(&mut self, command: &serde_json::Value) -> Result<()> {
        let mut line = command.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

/// Map one sidecar event object to a core session event.
///
/// Unrecognized `event` kinds and unanswerable message kinds map to `None`;
/// a recognized event with missing required fields is an error.
fn parse_event(value: &serde_json::Value) -> Result<Option<SessionEvent>> {
    let str_field = |v: &serde_json::Value, k: &str| -> Result<String> {
        v.get(k)
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Transport(format!("bridge event missing field {k:?}")))
    };

    match value.get("event").and_then(|v| v.as_str()) {
        Some("connection") => {
            let link = match value.get("link").and_then(|v| v.as_str()) {
                Some("open") => Some(LinkState::Open),
                Some("closed") => Some(LinkState::Closed),
                _ => None,
            };
            Ok(Some(SessionEvent::Connection(ConnectionUpdate {
                link,
                pairing_code: value
                    .get("pairing_code")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                disconnect_reason: value
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            })))
        }
        Some("message") => {
            let chat = ChatId::new(str_field(value, "chat")?);
            let key = MessageKey(str_field(value, "key")?);
            let from_self = value
                .get("from_self")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let payload = match value.get("kind").and_then(|v| v.as_str()) {
                Some("text") => Payload::Text(str_field(value, "text")?),
                Some("image") => {
                    let data = BASE64.decode(str_field(value, "data")?).map_err(|e| {
                        Error::Transport(format!("bridge image payload is not base64: {e}"))
                    })?;
                    let mime = value
                        .get("mime")
                        .and_then(|v| v.as_str())
                        .unwrap_or("image/jpeg")
                        .to_string();
                    Payload::Image { data, mime }
                }
                Some("deleted") => Payload::Deleted,
                _ => return Ok(None),
            };

            Ok(Some(SessionEvent::Message(InboundMessage {
                chat,
                key,
                from_self,
                payload,
            })))
        }
        _ => Ok(None),
    }
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
