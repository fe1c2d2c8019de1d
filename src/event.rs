use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// One inbound chat message considered for matching.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i32,
    pub chat_id: i64,
    pub chat_title: String,
    pub text: String,
    pub date: DateTime<Utc>,
    pub link: Option<String>,
}

impl Event {
    /// Identity key used for deduplication.
    pub fn dedup_key(&self) -> (i64, i32) {
        (self.chat_id, self.id)
    }
}

/// Display metadata for an allow-listed chat.
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    pub title: String,
    pub username: Option<String>,
}

/// Allow-list of monitored chats, keyed by chat id.
///
/// Acts as a capability list: events from chats absent from this map must
/// never reach the rule engine. Seeded once from config at startup; display
/// metadata is refreshed from observed messages. Locking is internal, callers
/// only see `contains`/`lookup`/`update`.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    inner: RwLock<HashMap<i64, PeerInfo>>,
}

impl PeerDirectory {
    pub fn new(chat_ids: &[i64]) -> Self {
        let map = chat_ids
            .iter()
            .map(|&id| (id, PeerInfo::default()))
            .collect();
        Self {
            inner: RwLock::new(map),
        }
    }

    pub fn contains(&self, chat_id: i64) -> bool {
        self.inner
            .read()
            .map(|m| m.contains_key(&chat_id))
            .unwrap_or(false)
    }

    pub fn lookup(&self, chat_id: i64) -> Option<PeerInfo> {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(&chat_id).cloned())
    }

    /// Refresh the display metadata for an already allow-listed chat.
    /// Chats outside the allow-list are never inserted here.
    pub fn update(&self, chat_id: i64, title: &str, username: Option<&str>) {
        if let Ok(mut map) = self.inner.write() {
            if let Some(info) = map.get_mut(&chat_id) {
                if !title.is_empty() {
                    info.title = title.to_string();
                }
                if username.is_some() {
                    info.username = username.map(str::to_string);
                }
            }
        }
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }
}
