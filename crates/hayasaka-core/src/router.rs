//! Message classification and command handling.
//!
//! Given one inbound message, the router produces exactly one of: a text
//! reply, an image reply, or no reply. Command failures come back as fixed
//! user-facing strings; only unexpected errors propagate to the Connection
//! Manager boundary.

use std::{collections::HashMap, sync::Arc};

use crate::{
    ai::GenerativeBackend,
    domain::{ChatId, Turn},
    formatting::{capitalize_first, clean_image_analysis, strip_emphasis},
    gateway::ScheduleGateway,
    store::SessionStore,
    Result,
};

const IMAGE_COMMAND_PREFIX: &str = ".gambar ";
const SCHEDULE_COMMAND: &str = ".salat";

/// Canonical prayer vocabulary, in match priority order.
pub const PRAYER_KEYWORDS: [&str; 5] = ["subuh", "dzuhur", "ashar", "magrib", "isya"];

const PERSONA_PREAMBLE: &str = "Kamu adalah asisten pribadi saya bernama Hayasaka AI. \
    Kamu membantu saya dalam menjawab pertanyaan, menganalisis gambar, serta memberikan \
    informasi berdasarkan konteks yang saya berikan. Jawablah dengan sopan, jelas, dan \
    langsung ke inti.";
const PERSONA_GREETING: &str =
    "Halo! Saya adalah Hayasaka AI, siap membantu kamu. Silakan tanya apa pun.";
const IMAGE_ANALYSIS_PROMPT: &str = "Apa yang bisa kamu analisa dari gambar ini?";

const IMAGE_FAILURE_REPLY: &str = "❌ Gagal membuat gambar dari prompt.";
const LOCATIONS_FAILURE_REPLY: &str = "⚠️ Gagal mengambil daftar kota. Coba lagi nanti.";
const CITY_ID_FORMAT_REPLY: &str =
    "⚠️ Format ID kota salah. Harus 4 digit angka.\nContoh: .salat 1632";
const SCHEDULE_FAILURE_REPLY: &str = "⚠️ Data tidak ditemukan. Pastikan ID kota benar.";
const NO_SCHEDULE_REPLY: &str =
    "⚠️ Saya belum memiliki data jadwal salat. Gunakan perintah .salat [ID Kota] terlebih dahulu.";
const CHAT_FAILURE_REPLY: &str = "Maaf, terjadi kesalahan dalam memproses pesan.";
const IMAGE_ANALYSIS_FAILURE_REPLY: &str = "Maaf, saya tidak bisa memproses gambar ini.";

/// Outbound reply produced for one inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Generated artifact, carried in memory end-to-end.
    Image { png: Vec<u8>, caption: String },
}

pub struct CommandRouter {
    store: Arc<SessionStore>,
    gateway: Arc<dyn ScheduleGateway>,
    backend: Arc<dyn GenerativeBackend>,
}

impl CommandRouter {
    pub fn new(
        store: Arc<SessionStore>,
        gateway: Arc<dyn ScheduleGateway>,
        backend: Arc<dyn GenerativeBackend>,
    ) -> Self {
        Self {
            store,
            gateway,
            backend,
        }
    }

    /// Classify one text message and produce its reply, if any.
    ///
    /// First match wins: image command, schedule command (bare, then with
    /// argument), prayer-keyword follow-up, conversational fallback.
    pub async fn handle_text(&self, chat: &ChatId, text: &str) -> Result<Option<Reply>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        if let Some(prompt) = text.strip_prefix(IMAGE_COMMAND_PREFIX) {
            return Ok(Some(self.generate_image(prompt.trim()).await));
        }

        if text == SCHEDULE_COMMAND {
            return Ok(Some(Reply::Text(self.location_directory().await)));
        }

        if let Some(arg) = text.strip_prefix(".salat ") {
            return Ok(Some(Reply::Text(self.fetch_schedule(chat, arg.trim()).await)));
        }

        if let Some(key) = canonical_prayer_key(text) {
            return Ok(Some(Reply::Text(self.prayer_follow_up(chat, key))));
        }

        Ok(Some(Reply::Text(self.conversational_reply(chat, text).await)))
    }

    /// Separate entry point for inbound images: analyze, clean, reply.
    /// Does not touch the dialogue history.
    pub async fn handle_image(&self, image: &[u8], mime: &str) -> Reply {
        match self
            .backend
            .describe_image(IMAGE_ANALYSIS_PROMPT, image, mime)
            .await
        {
            Ok(raw) => Reply::Text(clean_image_analysis(&raw)),
            Err(e) => {
                tracing::warn!(error = %e, "image analysis failed");
                Reply::Text(IMAGE_ANALYSIS_FAILURE_REPLY.to_string())
            }
        }
    }

    async fn generate_image(&self, prompt: &str) -> Reply {
        match self.backend.generate_image(prompt).await {
            Ok(png) => Reply::Image {
                png,
                caption: format!("🖼️ Gambar untuk prompt:\n{prompt}"),
            },
            Err(e) => {
                tracing::warn!(error = %e, "image generation failed");
                Reply::Text(IMAGE_FAILURE_REPLY.to_string())
            }
        }
    }

    async fn location_directory(&self) -> String {
        let Some(locations) = self.gateway.list_locations().await else {
            return LOCATIONS_FAILURE_REPLY.to_string();
        };

        let listing = locations
            .iter()
            .map(|loc| format!("- {} (ID: {})", loc.name, loc.id))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "📍 *Daftar Kota untuk Jadwal Salat*\n\n\
             Kirim perintah:\n.salat [ID Kota]\n\n{listing}"
        )
    }

    async fn fetch_schedule(&self, chat: &ChatId, city_id: &str) -> String {
        // Validate before any network call.
        if !is_valid_city_id(city_id) {
            return CITY_ID_FORMAT_REPLY.to_string();
        }

        let Some(schedule) = self.gateway.schedule_text(city_id).await else {
            return SCHEDULE_FAILURE_REPLY.to_string();
        };

        self.store.set_schedule(chat, parse_schedule_map(&schedule));
        format!("📅 *Jadwal Salat untuk Kota ID {city_id}*\n\n{schedule}")
    }

    fn prayer_follow_up(&self, chat: &ChatId, key: &'static str) -> String {
        match self.store.schedule_time(chat, key) {
            Some(time) => format!("🕌 {}: {time}", capitalize_first(key)),
            None => NO_SCHEDULE_REPLY.to_string(),
        }
    }

    async fn conversational_reply(&self, chat: &ChatId, text: &str) -> String {
        let history = self.store.push_user_turn(chat, text, &persona_seed());

        match self.backend.chat(&history).await {
            Ok(raw) => {
                let cleaned = strip_emphasis(&raw);
                self.store.push_assistant_turn(chat, &cleaned);
                cleaned
            }
            Err(e) => {
                // The user never sees raw backend detail.
                tracing::warn!(chat = %chat.0, error = %e, "chat backend failed");
                CHAT_FAILURE_REPLY.to_string()
            }
        }
    }
}

/// Fixed seed for a fresh conversation: persona preamble + assistant greeting.
pub fn persona_seed() -> Vec<Turn> {
    vec![
        Turn::user(PERSONA_PREAMBLE),
        Turn::assistant(PERSONA_GREETING),
    ]
}

fn is_valid_city_id(arg: &str) -> bool {
    arg.len() == 4 && arg.bytes().all(|b| b.is_ascii_digit())
}

/// First canonical prayer keyword contained in `text` (case-insensitive).
/// "maghrib" is accepted as an alternate spelling of "magrib".
fn canonical_prayer_key(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    PRAYER_KEYWORDS.iter().copied().find(|k| {
        lower.contains(k) || (*k == "magrib" && lower.contains("maghrib"))
    })
}

/// Parse the provider's "Label: Value" lines into the canonical prayer map.
///
/// Only the fixed 5-prayer vocabulary is retained; values stay raw.
fn parse_schedule_map(schedule: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in schedule.lines() {
        let Some((label, time)) = line.split_once(": ") else {
            continue;
        };
        let Some(key) = canonical_prayer_key(label) else {
            continue;
        };
        map.insert(key.to_string(), time.trim().to_string());
    }
    map
}
