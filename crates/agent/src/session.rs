use mozi_core::types::{Message, Role};
use mozi_persistence::SqliteSessionStore;
use std::sync::Arc;

/// Bound on conversation history pulled into a single turn's context.
const HISTORY_WINDOW: i64 = 20;

/// Thin wrapper around the SQLite-backed session store, scoped to what a
/// single-turn agent run needs: append the user's message, read back
/// recent history, append the assistant's reply.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<SqliteSessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<SqliteSessionStore>) -> Self {
        Self { store }
    }

    pub async fn record_turn(
        &self,
        session_key: &str,
        user_message: &str,
        assistant_reply: &str,
    ) -> anyhow::Result<()> {
        self.store
            .add_message(&Message::new("agent", session_key, Role::User, user_message))
            .await?;
        self.store
            .add_message(&Message::new(
                "agent",
                session_key,
                Role::Assistant,
                assistant_reply,
            ))
            .await?;
        Ok(())
    }

    pub async fn history(&self, session_key: &str) -> anyhow::Result<Vec<Message>> {
        self.store.get_history(session_key, HISTORY_WINDOW).await
    }
}
