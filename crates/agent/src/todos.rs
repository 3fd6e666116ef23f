//! Todo subsystem, CRUD half: list mutation on top of
//! [`TodoSnapshot`]'s at-most-one-`InProgress` invariant, persisted via
//! [`Store`] after every mutation.

use crate::error::{AgentError, AgentResult};
use crate::protocol::{TodoItem, TodoSnapshot, TodoStatus};
use crate::store::Store;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

pub struct TodoManager {
    store: Arc<dyn Store>,
}

impl TodoManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn add(
        &self,
        agent_id: &str,
        state: &mut TodoSnapshot,
        title: impl Into<String>,
        assignee: Option<String>,
    ) -> AgentResult<TodoItem> {
        let now = OffsetDateTime::now_utc();
        let item = TodoItem {
            id: Uuid::now_v7().to_string(),
            title: title.into(),
            status: TodoStatus::Pending,
            assignee,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        state.items.push(item.clone());
        self.store.save_todos(agent_id, state).await?;
        Ok(item)
    }

    pub async fn set_status(
        &self,
        agent_id: &str,
        state: &mut TodoSnapshot,
        id: &str,
        status: TodoStatus,
    ) -> AgentResult<()> {
        state.set_status(id, status)?;
        self.store.save_todos(agent_id, state).await?;
        Ok(())
    }

    pub async fn remove(&self, agent_id: &str, state: &mut TodoSnapshot, id: &str) -> AgentResult<()> {
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        if state.items.len() == before {
            return Err(AgentError::Validation(format!("unknown todo id {id}")));
        }
        self.store.save_todos(agent_id, state).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn manager() -> TodoManager {
        TodoManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn add_then_set_in_progress_then_complete() {
        let manager = manager();
        let mut state = TodoSnapshot::default();

        let item = manager.add("a1", &mut state, "write tests", None).await.unwrap();
        manager.set_status("a1", &mut state, &item.id, TodoStatus::InProgress).await.unwrap();
        manager.set_status("a1", &mut state, &item.id, TodoStatus::Completed).await.unwrap();

        assert_eq!(state.items[0].status, TodoStatus::Completed);
    }

    #[tokio::test]
    async fn second_in_progress_item_is_rejected() {
        let manager = manager();
        let mut state = TodoSnapshot::default();

        let first = manager.add("a1", &mut state, "first", None).await.unwrap();
        let second = manager.add("a1", &mut state, "second", None).await.unwrap();
        manager.set_status("a1", &mut state, &first.id, TodoStatus::InProgress).await.unwrap();

        let result = manager.set_status("a1", &mut state, &second.id, TodoStatus::InProgress).await;
        assert!(matches!(result, Err(AgentError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn removing_unknown_id_is_an_error() {
        let manager = manager();
        let mut state = TodoSnapshot::default();
        let result = manager.remove("a1", &mut state, "ghost").await;
        assert!(matches!(result, Err(AgentError::Validation(_))));
    }
}
