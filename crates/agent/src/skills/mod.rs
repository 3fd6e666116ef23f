//! Skills subsystem, activation half: tracks which of the
//! installed skills an agent has activated, and offers a simple recommender
//! over the installed set. The specific matching/ranking policy is a
//! collaborator concern; this module only guarantees the activation-state
//! invariant (a skill must be installed to be activated) and persistence.

use crate::error::{AgentError, AgentResult};
use crate::protocol::SkillsState;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;

/// One installed skill's identity and the instructions it contributes once
/// activated.
#[derive(Debug, Clone)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

/// The set of skills installed for this deployment, independent of any
/// particular agent's activation state.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, SkillDescriptor>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: SkillDescriptor) {
        self.skills.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&SkillDescriptor> {
        self.skills.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    /// Skills whose name or description contains one of `keywords`
    /// (case-insensitive), in registration order — a minimal recommender a
    /// richer ranking policy can later replace without changing the
    /// activation contract below.
    pub fn recommend(&self, keywords: &[&str]) -> Vec<&str> {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        self.skills
            .values()
            .filter(|s| {
                let haystack = format!("{} {}", s.name, s.description).to_lowercase();
                keywords.iter().any(|k| haystack.contains(k.as_str()))
            })
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Persists activation state and enforces the "activated skills stay
/// installed" invariant: activation fails loudly against an unknown skill
/// rather than silently recording a dangling name.
pub struct SkillsManager {
    store: Arc<dyn Store>,
    registry: Arc<SkillRegistry>,
}

impl SkillsManager {
    pub fn new(store: Arc<dyn Store>, registry: Arc<SkillRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn activate(&self, agent_id: &str, state: &mut SkillsState, name: &str) -> AgentResult<()> {
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| AgentError::Validation(format!("skill not installed: {name}")))?;
        state
            .activated
            .insert(name.to_string(), serde_json::json!({"instructions": descriptor.instructions}));
        self.store.save_skills_state(agent_id, state).await?;
        Ok(())
    }

    pub async fn deactivate(&self, agent_id: &str, state: &mut SkillsState, name: &str) -> AgentResult<()> {
        state.activated.remove(name);
        self.store.save_skills_state(agent_id, state).await?;
        Ok(())
    }

    /// Verifies every activated skill is still installed, diagnosing (not
    /// silently dropping) any that are not.
    pub fn diagnose(&self, state: &SkillsState) -> Vec<String> {
        state
            .activated
            .keys()
            .filter(|name| self.registry.get(name).is_none())
            .map(|name| format!("activated skill '{name}' is no longer installed"))
            .collect()
    }

    pub fn recommend(&self, keywords: &[&str]) -> Vec<&str> {
        self.registry.recommend(keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn registry() -> Arc<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        registry.register(SkillDescriptor {
            name: "rust-review".into(),
            description: "Review Rust code for idioms and safety".into(),
            instructions: "Prefer Result over panics.".into(),
        });
        Arc::new(registry)
    }

    #[tokio::test]
    async fn activating_an_installed_skill_records_its_instructions() {
        let manager = SkillsManager::new(Arc::new(MemoryStore::new()), registry());
        let mut state = SkillsState::default();

        manager.activate("a1", &mut state, "rust-review").await.unwrap();

        assert!(state.activated.contains_key("rust-review"));
    }

    #[tokio::test]
    async fn activating_an_unknown_skill_is_diagnosed_not_silently_dropped() {
        let manager = SkillsManager::new(Arc::new(MemoryStore::new()), registry());
        let mut state = SkillsState::default();

        let result = manager.activate("a1", &mut state, "ghost-skill").await;

        assert!(matches!(result, Err(AgentError::Validation(_))));
        assert!(state.activated.is_empty());
    }

    #[test]
    fn diagnose_flags_activated_skills_that_were_since_uninstalled() {
        let manager = SkillsManager::new(Arc::new(MemoryStore::new()), registry());
        let mut state = SkillsState::default();
        state.activated.insert("removed-skill".into(), serde_json::json!({}));

        let diagnostics = manager.diagnose(&state);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn recommend_matches_keywords_against_name_and_description() {
        let manager = SkillsManager::new(Arc::new(MemoryStore::new()), registry());
        assert_eq!(manager.recommend(&["rust"]), vec!["rust-review"]);
        assert!(manager.recommend(&["python"]).is_empty());
    }
}
