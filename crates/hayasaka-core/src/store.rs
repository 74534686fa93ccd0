//! Per-conversation session state (dialogue history + cached prayer schedule).
//!
//! The store is an owned component with explicit bounds: history length per
//! chat and total tracked chats (LRU eviction). All methods are cheap and
//! synchronous; callers never hold the lock across an await point.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use crate::domain::{ChatId, Turn};

#[derive(Debug, Default)]
struct ChatSession {
    history: Vec<Turn>,
    seed_len: usize,
    prayer_schedule: Option<HashMap<String, String>>,
    touched: u64,
}

#[derive(Debug, Default)]
struct Inner {
    chats: HashMap<ChatId, ChatSession>,
    clock: u64,
}

/// Mapping from conversation identifier to conversational state.
///
/// Get-or-create semantics: a chat entry exists from the first touch until it
/// is evicted to keep the map under `max_tracked_chats`.
#[derive(Debug)]
pub struct SessionStore {
    inner: Mutex<Inner>,
    max_history_turns: usize,
    max_tracked_chats: usize,
}

impl SessionStore {
    pub fn new(max_history_turns: usize, max_tracked_chats: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_history_turns: max_history_turns.max(4),
            max_tracked_chats: max_tracked_chats.max(1),
        }
    }

    /// Append a user turn, seeding the history first if this chat has none.
    ///
    /// Returns a snapshot of the full history including the new turn.
    pub fn push_user_turn(&self, chat: &ChatId, text: &str, seed: &[Turn]) -> Vec<Turn> {
        let mut inner = self.lock();
        let max_turns = self.max_history_turns;
        let session = touch(&mut inner, chat);
        if session.history.is_empty() {
            session.history.extend_from_slice(seed);
            session.seed_len = seed.len();
        }
        session.history.push(Turn::user(text));
        trim_history(session, max_turns);
        let snapshot = session.history.clone();
        drop(inner);
        self.evict_over_capacity();
        snapshot
    }

    pub fn push_assistant_turn(&self, chat: &ChatId, text: &str) {
        let mut inner = self.lock();
        let max_turns = self.max_history_turns;
        let session = touch(&mut inner, chat);
        session.history.push(Turn::assistant(text));
        trim_history(session, max_turns);
    }

    /// Overwrite the chat's cached prayer schedule wholesale.
    pub fn set_schedule(&self, chat: &ChatId, schedule: HashMap<String, String>) {
        let mut inner = self.lock();
        touch(&mut inner, chat).prayer_schedule = Some(schedule);
        drop(inner);
        self.evict_over_capacity();
    }

    /// Cached time for one canonical prayer key, if a schedule was fetched.
    pub fn schedule_time(&self, chat: &ChatId, key: &str) -> Option<String> {
        let inner = self.lock();
        let session = inner.chats.get(chat)?;
        session.prayer_schedule.as_ref()?.get(key).cloned()
    }

    /// Snapshot of the chat's dialogue history (empty if never seeded).
    pub fn history(&self, chat: &ChatId) -> Vec<Turn> {
        let inner = self.lock();
        inner
            .chats
            .get(chat)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub fn tracked_chats(&self) -> usize {
        self.lock().chats.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-update; state is per-chat and
        // best-effort, so keep serving the remaining chats.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn evict_over_capacity(&self) {
        let mut inner = self.lock();
        while inner.chats.len() > self.max_tracked_chats {
            let Some(oldest) = inner
                .chats
                .iter()
                .min_by_key(|(_, s)| s.touched)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            inner.chats.remove(&oldest);
        }
    }
}

fn touch<'a>(inner: &'a mut Inner, chat: &ChatId) -> &'a mut ChatSession {
    inner.clock += 1;
    let clock = inner.clock;
    let session = inner.chats.entry(chat.clone()).or_default();
    session.touched = clock;
    session
}

/// Keep the seed turns plus the most recent tail within the configured bound.
fn trim_history(session: &mut ChatSession, max_turns: usize) {
    if session.history.len() <= max_turns {
        return;
    }
    let keep_tail = max_turns.saturating_sub(session.seed_len);
    let drop_from = session.seed_len;
    let drop_to = session.history.len() - keep_tail;
    session.history.drain(drop_from..drop_to);
}
