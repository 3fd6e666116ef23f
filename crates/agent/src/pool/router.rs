//! Session routing: resolves `(explicitSessionId?, threadKey?, userId?)`
//! plus a request classification into the `agentId` the HTTP layer should
//! lease (see [`super::AgentPool::lease`]).

use crate::error::{AgentError, AgentResult};
use crate::store::Store;
use atrium_provider::{ChatMessage, ChatRole};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Whether an incoming request looks like the start of a new conversation
/// or a continuation of one the caller already has history for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClassification {
    New,
    History,
    Unknown,
}

/// *new* iff only system messages precede exactly one trailing user message;
/// *history* iff it contains an assistant/tool message or ≥2 user messages;
/// otherwise *unknown*.
pub fn classify_request(messages: &[ChatMessage]) -> RequestClassification {
    let user_count = messages.iter().filter(|m| m.role == ChatRole::User).count();
    let has_assistant_or_tool = messages
        .iter()
        .any(|m| matches!(m.role, ChatRole::Assistant | ChatRole::Tool));

    if has_assistant_or_tool || user_count >= 2 {
        return RequestClassification::History;
    }

    let all_but_last_are_system = messages
        .split_last()
        .map(|(last, rest)| last.role == ChatRole::User && rest.iter().all(|m| m.role == ChatRole::System))
        .unwrap_or(false);

    if all_but_last_are_system && user_count == 1 {
        RequestClassification::New
    } else {
        RequestClassification::Unknown
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq)]
enum LastMode {
    #[default]
    None,
    New,
    History,
}

struct UserState {
    thread_map: HashMap<String, String>,
    auto_default: Option<String>,
    last_mode: LastMode,
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            thread_map: HashMap::new(),
            auto_default: None,
            last_mode: LastMode::None,
        }
    }
}

/// Resolves the `agentId` a request should be routed to, per the precedence:
/// explicit id, then thread key, then auto mode (new-vs-reuse based on the
/// last observed classification for that user's auto-default session).
pub struct SessionRouter {
    store: Arc<dyn Store>,
    /// Keyed by `userId.unwrap_or("")`, so per-user state is isolated but a
    /// single global bucket still works when no `userId` is supplied.
    users: Mutex<HashMap<String, UserState>>,
}

impl SessionRouter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            users: Mutex::new(HashMap::new()),
        }
    }

    pub async fn route(
        &self,
        explicit_session_id: Option<&str>,
        thread_key: Option<&str>,
        classification: RequestClassification,
        user_id: Option<&str>,
    ) -> AgentResult<String> {
        if let Some(id) = explicit_session_id {
            if !self.store.exists(id).await? {
                return Err(AgentError::AgentNotFound(id.to_string()));
            }
            return Ok(id.to_string());
        }

        let user_key = user_id.unwrap_or("").to_string();

        if let Some(thread_key) = thread_key {
            let existing = {
                let users = self.users.lock();
                users.get(&user_key).and_then(|u| u.thread_map.get(thread_key).cloned())
            };
            if let Some(agent_id) = existing {
                if self.store.exists(&agent_id).await? {
                    return Ok(agent_id);
                }
            }
            let agent_id = new_agent_id();
            let mut users = self.users.lock();
            users
                .entry(user_key)
                .or_default()
                .thread_map
                .insert(thread_key.to_string(), agent_id.clone());
            return Ok(agent_id);
        }

        // Auto mode: start a fresh default only when the prior turn was
        // *history* and this one looks like the start of a new conversation;
        // otherwise keep reusing the existing default (if any).
        let mut users = self.users.lock();
        let state = users.entry(user_key).or_default();

        let start_fresh = state.last_mode == LastMode::History && classification == RequestClassification::New;
        if !start_fresh {
            if let Some(agent_id) = &state.auto_default {
                state.last_mode = mode_for(classification);
                return Ok(agent_id.clone());
            }
        }

        let agent_id = new_agent_id();
        state.auto_default = Some(agent_id.clone());
        state.last_mode = mode_for(classification);
        Ok(agent_id)
    }
}

fn mode_for(classification: RequestClassification) -> LastMode {
    match classification {
        RequestClassification::New => LastMode::New,
        RequestClassification::History => LastMode::History,
        RequestClassification::Unknown => LastMode::None,
    }
}

fn new_agent_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::protocol::AgentInfo;

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    fn user(text: &str) -> ChatMessage {
        ChatMessage::user(text)
    }

    #[test]
    fn classifies_single_trailing_user_message_as_new() {
        let messages = vec![ChatMessage::text(ChatRole::System, "be nice"), user("hi")];
        assert_eq!(classify_request(&messages), RequestClassification::New);
    }

    #[test]
    fn classifies_assistant_message_present_as_history() {
        let messages = vec![user("hi"), ChatMessage::assistant("hello")];
        assert_eq!(classify_request(&messages), RequestClassification::History);
    }

    #[test]
    fn classifies_two_user_messages_as_history() {
        let messages = vec![user("hi"), user("again")];
        assert_eq!(classify_request(&messages), RequestClassification::History);
    }

    #[tokio::test]
    async fn explicit_session_id_is_used_when_it_exists() {
        let store = store();
        store
            .save_info(
                "a1",
                &AgentInfo {
                    agent_id: "a1".into(),
                    template_id: None,
                    model: "m".into(),
                    created_at: time::OffsetDateTime::now_utc(),
                    last_active_at: time::OffsetDateTime::now_utc(),
                    runtime_config: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        let router = SessionRouter::new(store);

        let agent_id = router
            .route(Some("a1"), None, RequestClassification::New, None)
            .await
            .unwrap();
        assert_eq!(agent_id, "a1");
    }

    #[tokio::test]
    async fn unknown_explicit_session_id_is_an_error() {
        let router = SessionRouter::new(store());
        let result = router.route(Some("ghost"), None, RequestClassification::New, None).await;
        assert!(matches!(result, Err(AgentError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn thread_key_is_remembered_across_calls() {
        let router = SessionRouter::new(store());
        let first = router
            .route(None, Some("thread-1"), RequestClassification::New, None)
            .await
            .unwrap();
        let second = router
            .route(None, Some("thread-1"), RequestClassification::History, None)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn auto_mode_reuses_the_default_until_a_new_classification_follows_history() {
        let router = SessionRouter::new(store());

        let first = router.route(None, None, RequestClassification::New, None).await.unwrap();
        let second = router.route(None, None, RequestClassification::History, None).await.unwrap();
        assert_eq!(first, second);

        // After a history turn, a *new*-classified request should start a fresh auto-default.
        let third = router.route(None, None, RequestClassification::New, None).await.unwrap();
        assert_ne!(second, third);
    }
}
