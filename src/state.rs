use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::config::AppConfig;
use crate::db::DocumentStore;
use crate::services::ai::LlmProvider;
use crate::services::auth::SessionAuth;
use crate::services::booking::BookingService;
use crate::services::conversation::ConversationEngine;
use crate::services::directory::DirectoryService;

/// One chat client's engine and sign-in state.
#[derive(Clone)]
pub struct ChatSession {
    pub engine: Arc<tokio::sync::Mutex<ConversationEngine>>,
    pub auth: Arc<SessionAuth>,
}

impl ChatSession {
    /// A turn holds the engine lock for its whole duration.
    fn is_busy(&self) -> bool {
        self.engine.try_lock().is_err()
    }
}

struct SessionSlot {
    session: ChatSession,
    last_active: Instant,
}

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: AppConfig,
    pub llm: Arc<dyn LlmProvider>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: AppConfig, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            store,
            config,
            llm,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> DirectoryService {
        DirectoryService::new(Arc::clone(&self.store))
    }

    /// Returns the session for `session_id`, starting a fresh conversation if there is none.
    /// Sessions idle for longer than the configured TTL are dropped on the way.
    pub fn session(&self, session_id: &str) -> ChatSession {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        self.evict_idle(&mut sessions, session_id);

        let slot = sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::info!(session_id, "starting chat session");
            let auth = Arc::new(SessionAuth::new());
            let engine = ConversationEngine::new(
                Arc::clone(&self.llm),
                auth.clone(),
                self.directory(),
                BookingService::new(Arc::clone(&self.store)),
                self.config.agent_settings(),
            );
            SessionSlot {
                session: ChatSession {
                    engine: Arc::new(tokio::sync::Mutex::new(engine)),
                    auth,
                },
                last_active: Instant::now(),
            }
        });
        slot.last_active = Instant::now();
        slot.session.clone()
    }

    pub fn existing_session(&self, session_id: &str) -> Option<ChatSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get_mut(session_id).map(|slot| {
            slot.last_active = Instant::now();
            slot.session.clone()
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn evict_idle(&self, sessions: &mut HashMap<String, SessionSlot>, keep: &str) {
        let ttl = self.config.session_ttl();
        let before = sessions.len();
        sessions.retain(|id, slot| id == keep || slot.last_active.elapsed() < ttl || slot.session.is_busy());
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = sessions.len(), "dropped idle chat sessions");
        }
    }
}
