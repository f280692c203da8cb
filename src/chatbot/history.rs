//! Rolling per-scope conversation history.
//!
//! Each scope (a group chat, or the shared direct-message sentinel) owns its
//! own log behind its own lock. A turn that holds a scope's lock from the
//! history read through the history write keeps that scope's log in arrival
//! order, while other scopes proceed independently.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Scope id for direct messages, which have no community.
pub const DIRECT_SCOPE: i64 = 0;

/// Timestamp format rendered into stored turns.
const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Local::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Local::now(),
        }
    }
}

pub fn current_time() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

/// Ordered turns of one scope, oldest first.
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationLog {
    fn push(&mut self, turn: ConversationTurn, capacity: usize) {
        self.turns.push_back(turn);
        while self.turns.len() > capacity {
            self.turns.pop_front();
        }
    }

    fn latest(&self, count: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(count);
        self.turns.iter().skip(skip).cloned().collect()
    }
}

/// History store shared by every handler.
pub struct ChatHistory {
    latest_n: Arc<AtomicUsize>,
    logs: Mutex<HashMap<i64, Arc<AsyncMutex<ConversationLog>>>>,
}

impl ChatHistory {
    pub fn new(latest_n: usize) -> Self {
        Self {
            latest_n: Arc::new(AtomicUsize::new(latest_n)),
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of exchanges kept; each exchange is a user and an assistant turn.
    pub fn latest_n(&self) -> usize {
        self.latest_n.load(Ordering::Relaxed)
    }

    /// Takes effect on the next append; already trimmed turns stay gone.
    pub fn set_latest_n(&self, latest_n: usize) {
        self.latest_n.store(latest_n, Ordering::Relaxed);
    }

    fn log(&self, scope_id: i64) -> Arc<AsyncMutex<ConversationLog>> {
        let mut logs = self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        logs.entry(scope_id).or_default().clone()
    }

    /// Lock one scope for the duration of a turn.
    pub async fn lock_scope(&self, scope_id: i64) -> ScopedHistory {
        ScopedHistory {
            scope_id,
            latest_n: self.latest_n.clone(),
            log: self.log(scope_id).lock_owned().await,
        }
    }

    pub async fn add_user_message(&self, scope_id: i64, user_name: &str, content: &str) {
        self.lock_scope(scope_id).await.add_user_message(user_name, content);
    }

    pub async fn add_assistant_message(&self, scope_id: i64, bot_name: &str, content: &str) {
        self.lock_scope(scope_id).await.add_assistant_message(bot_name, content);
    }

    pub async fn latest_history(&self, scope_id: i64) -> Vec<ConversationTurn> {
        self.lock_scope(scope_id).await.latest_history()
    }

    pub async fn clear(&self, scope_id: i64) {
        self.lock_scope(scope_id).await.clear();
    }
}

/// Exclusive access to one scope's log.
pub struct ScopedHistory {
    scope_id: i64,
    latest_n: Arc<AtomicUsize>,
    log: OwnedMutexGuard<ConversationLog>,
}

impl ScopedHistory {
    fn capacity(&self) -> usize {
        self.latest_n.load(Ordering::Relaxed) * 2
    }

    pub fn add_user_message(&mut self, user_name: &str, content: &str) {
        let turn = ConversationTurn::user(format!("[time: {}] {user_name}: {content}", current_time()));
        let capacity = self.capacity();
        self.log.push(turn, capacity);
    }

    pub fn add_assistant_message(&mut self, bot_name: &str, content: &str) {
        debug!(scope = self.scope_id, bot = bot_name, "storing assistant turn");
        let turn = ConversationTurn::assistant(format!("[time: {}] {content}", current_time()));
        let capacity = self.capacity();
        self.log.push(turn, capacity);
    }

    /// The most recent `2 * latest_n` turns, oldest first.
    pub fn latest_history(&self) -> Vec<ConversationTurn> {
        let turns = self.log.latest(self.capacity());
        debug!(scope = self.scope_id, turns = turns.len(), "latest history");
        turns
    }

    pub fn clear(&mut self) {
        self.log.turns.clear();
    }
}
