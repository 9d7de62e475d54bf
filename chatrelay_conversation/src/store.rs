//! Process-wide table of live sessions, keyed by sender id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use chatrelay_core::{Sender, SenderLimits};

use crate::session::{ConversationSession, SessionDefaults, SessionFlags};

pub type SessionHandle = Arc<Mutex<ConversationSession>>;

/// Fields overwritten on an existing session after lookup.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub model: Option<String>,
    pub flags: Option<SessionFlags>,
    pub limits: Option<SenderLimits>,
}

/// At most one session per sender. Different senders never contend on the
/// same session lock; the table lock is only held for lookups.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `sender.id`, or a new one seeded from `defaults`.
    pub async fn get_or_create(&self, sender: &Sender, defaults: &SessionDefaults) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(&sender.id) {
            return Arc::clone(handle);
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(sender.id.clone()).or_insert_with(|| {
            info!("Creating session for {}", sender.id);
            Arc::new(Mutex::new(ConversationSession::new(sender.clone(), defaults)))
        }))
    }

    pub async fn get(&self, sender_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(sender_id).map(Arc::clone)
    }

    /// Returns whether a session was removed.
    pub async fn delete(&self, sender_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(sender_id).is_some();
        if removed {
            debug!("Deleted session for {sender_id}");
        }
        removed
    }

    /// Overwrite configuration fields on an existing session. Returns `false`
    /// when there is no session for `sender_id`.
    pub async fn update_fields(&self, sender_id: &str, update: SessionUpdate) -> bool {
        let Some(handle) = self.get(sender_id).await else {
            return false;
        };
        let mut session = handle.lock().await;
        if let Some(model) = update.model {
            session.params.model = model;
        }
        if let Some(flags) = update.flags {
            session.flags = flags;
        }
        if let Some(limits) = update.limits {
            session.update_limits(limits);
        }
        true
    }

    /// Restart the sender's session and drop it from the table, so the next
    /// lookup builds a brand-new session. Holders of the returned handle see
    /// the restarted state.
    pub async fn restart(&self, sender_id: &str) -> Option<SessionHandle> {
        let handle = self.sessions.write().await.remove(sender_id)?;
        handle.lock().await.restart();
        info!("Restarted session for {sender_id}");
        Some(handle)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
