//! Per-session memory instances.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::summary_buffer::{ConversationMemory, MemoryConfig};
use crate::llm::LlmClient;

/// Session used when a request carries no identifier.
pub const DEFAULT_SESSION_ID: &str = "default";

pub type SharedMemory = Arc<Mutex<ConversationMemory>>;

struct SessionEntry {
    memory: SharedMemory,
    last_used: AtomicU64,
}

/// Memory instances keyed by session id, each behind its own lock.
///
/// Requests against the same session serialize on that session's mutex;
/// different sessions never contend. Once `max_sessions` is reached, creating
/// a new session evicts the least recently used one.
#[derive(Clone)]
pub struct SessionMemoryStore {
    sessions: Arc<DashMap<String, SessionEntry>>,
    clock: Arc<AtomicU64>,
    summarizer: Arc<dyn LlmClient>,
    config: MemoryConfig,
}

impl SessionMemoryStore {
    pub fn new(summarizer: Arc<dyn LlmClient>, config: MemoryConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            clock: Arc::new(AtomicU64::new(0)),
            summarizer,
            config,
        }
    }

    /// Memory for `session_id`, created empty on first use.
    pub fn session(&self, session_id: &str) -> SharedMemory {
        let now = self.tick();
        if let Some(existing) = self.sessions.get(session_id) {
            existing.last_used.store(now, Ordering::Relaxed);
            return existing.memory.clone();
        }

        let max_sessions = self.config.max_sessions.max(1);
        while self.sessions.len() >= max_sessions && self.evict_least_recent() {}

        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Creating conversation memory");
                SessionEntry {
                    memory: Arc::new(Mutex::new(ConversationMemory::new(
                        self.summarizer.clone(),
                        self.config.clone(),
                    ))),
                    last_used: AtomicU64::new(now),
                }
            })
            .memory
            .clone()
    }

    pub fn default_session(&self) -> SharedMemory {
        self.session(DEFAULT_SESSION_ID)
    }

    /// Drop a session. Returns its memory if it existed.
    pub fn remove(&self, session_id: &str) -> Option<SharedMemory> {
        self.sessions
            .remove(session_id)
            .map(|(_, entry)| entry.memory)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_least_recent(&self) -> bool {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        match oldest {
            Some(session_id) => {
                tracing::debug!(session_id = %session_id, "Evicting idle conversation memory");
                self.sessions.remove(&session_id).is_some()
            }
            None => false,
        }
    }
}
