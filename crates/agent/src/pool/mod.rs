//! Agent pool: a keyed lease allocator guaranteeing
//! at-most-one live [`crate::session::Agent`] instance per `agentId`, with
//! refcounted attach/detach and idle-TTL eviction.

pub mod router;

pub use router::{RequestClassification, SessionRouter, classify_request};

use crate::config::AgentConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{AgentError, AgentResult};
use crate::event_bus::EventBus;
use crate::hooks::HookPipeline;
use crate::protocol::AgentInfo;
use crate::session::Agent;
use crate::store::Store;
use crate::tools::ToolRegistry;
use atrium_provider::Provider;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// The shared collaborators every leased [`Agent`] is built from. Cloned
/// cheaply (every field is an `Arc` or a `Clone`-cheap pipeline) into each
/// new instance the pool constructs.
#[derive(Clone)]
pub struct AgentDeps {
    pub store: Arc<dyn Store>,
    pub event_bus: Arc<EventBus>,
    pub provider: Arc<dyn Provider>,
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub hooks: HookPipeline,
    pub sandbox: Arc<atrium_sandbox::Boundary>,
}

struct PoolEntry {
    agent: Arc<AsyncMutex<Agent>>,
    refcount: usize,
    /// Bumped on every lease; an eviction task started for generation `g`
    /// aborts if the stored generation has moved past `g` by the time its
    /// idle timer fires (the entry was re-leased in the meantime).
    generation: u64,
}

struct Inner {
    entries: SyncMutex<HashMap<String, PoolEntry>>,
    /// One construction lock per `agentId`, held for the duration of
    /// `construct()` so concurrent first-lease callers on the same cold key
    /// await the same construction instead of each running their own Store
    /// load / `save_info` and racing to publish into `entries`.
    construction_locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    deps: AgentDeps,
    config: AgentConfig,
    idle_ttl: Duration,
}

/// Keyed agent-instance pool. `lease` attaches to a resident instance or
/// constructs one (resuming from [`Store`] if its meta exists); dropping the
/// returned [`Lease`] decrements the refcount and, at zero, starts an
/// idle-eviction timer.
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<Inner>,
}

impl AgentPool {
    pub fn new(deps: AgentDeps, config: AgentConfig, idle_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: SyncMutex::new(HashMap::new()),
                construction_locks: SyncMutex::new(HashMap::new()),
                deps,
                config,
                idle_ttl,
            }),
        }
    }

    /// Attaches to (or constructs) the agent instance for `agent_id`.
    /// Cancellable: if `cancellation` fires while construction (Store IO) is
    /// in flight, returns `AgentError::Cancelled` without ever publishing the
    /// entry into the pool.
    pub async fn lease(&self, agent_id: &str, cancellation: CancellationToken) -> AgentResult<Lease> {
        if let Some(agent) = self.try_attach(agent_id) {
            return Ok(self.make_lease(agent_id, agent));
        }

        let construction_lock = {
            let mut locks = self.inner.construction_locks.lock();
            Arc::clone(locks.entry(agent_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };

        let guard = tokio::select! {
            _ = cancellation.cancelled() => return Err(AgentError::Cancelled),
            guard = construction_lock.lock() => guard,
        };

        // Another caller may have constructed and published while we waited
        // for the construction lock; prefer their result over constructing again.
        if let Some(agent) = self.try_attach(agent_id) {
            drop(guard);
            return Ok(self.make_lease(agent_id, agent));
        }

        let construct = self.construct(agent_id);
        let agent = tokio::select! {
            _ = cancellation.cancelled() => return Err(AgentError::Cancelled),
            result = construct => result?,
        };

        let agent = Arc::new(AsyncMutex::new(agent));
        let (published_agent, generation) = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(agent_id.to_string()).or_insert_with(|| PoolEntry {
                agent: Arc::clone(&agent),
                refcount: 0,
                generation: 0,
            });
            entry.refcount += 1;
            entry.generation += 1;
            (Arc::clone(&entry.agent), entry.generation)
        };
        drop(guard);
        Ok(Lease {
            pool: self.inner.clone(),
            agent_id: agent_id.to_string(),
            agent: published_agent,
            generation,
            released: false,
        })
    }

    fn try_attach(&self, agent_id: &str) -> Option<Arc<AsyncMutex<Agent>>> {
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(agent_id)?;
        entry.refcount += 1;
        entry.generation += 1;
        Some(Arc::clone(&entry.agent))
    }

    fn make_lease(&self, agent_id: &str, agent: Arc<AsyncMutex<Agent>>) -> Lease {
        let generation = self.inner.entries.lock().get(agent_id).map(|e| e.generation).unwrap_or(0);
        Lease {
            pool: self.inner.clone(),
            agent_id: agent_id.to_string(),
            agent,
            generation,
            released: false,
        }
    }

    async fn construct(&self, agent_id: &str) -> AgentResult<Agent> {
        let deps = &self.inner.deps;
        let (messages, tool_call_records, todos, skills, info) = if deps.store.exists(agent_id).await? {
            (
                deps.store.load_messages(agent_id).await?,
                deps.store.load_tool_call_records(agent_id).await?,
                deps.store.load_todos(agent_id).await?,
                deps.store.load_skills_state(agent_id).await?,
                deps.store.load_info(agent_id).await?,
            )
        } else {
            let info = AgentInfo {
                agent_id: agent_id.to_string(),
                template_id: None,
                model: self.inner.config.model.clone(),
                created_at: OffsetDateTime::now_utc(),
                last_active_at: OffsetDateTime::now_utc(),
                runtime_config: serde_json::Value::Null,
            };
            deps.store.save_info(agent_id, &info).await?;
            (Vec::new(), Vec::new(), Default::default(), Default::default(), info)
        };

        Ok(Agent::new(
            agent_id.to_string(),
            self.inner.config.clone(),
            Arc::clone(&deps.store),
            Arc::clone(&deps.event_bus),
            Arc::clone(&deps.provider),
            Arc::clone(&deps.registry),
            Arc::clone(&deps.dispatcher),
            deps.hooks.clone(),
            Arc::clone(&deps.sandbox),
            messages,
            tool_call_records,
            todos,
            skills,
            info,
        ))
    }

    fn release(&self, agent_id: &str, generation: u64) {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(agent_id) else { return };
        if entry.generation != generation {
            // A newer lease is active; this release is stale, ignore.
            return;
        }
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            let inner = Arc::clone(&self.inner);
            let agent_id = agent_id.to_string();
            let idle_ttl = inner.idle_ttl;
            tokio::spawn(async move {
                tokio::time::sleep(idle_ttl).await;
                let mut entries = inner.entries.lock();
                if let Some(entry) = entries.get(&agent_id) {
                    if entry.refcount == 0 && entry.generation == generation {
                        entries.remove(&agent_id);
                    }
                }
            });
        }
    }
}

/// A held reference to a resident agent instance. Dropping it releases the
/// reference; the instance is evicted after `idle_ttl` past the last
/// release leaving the refcount at zero.
pub struct Lease {
    pool: Arc<Inner>,
    agent_id: String,
    agent: Arc<AsyncMutex<Agent>>,
    generation: u64,
    released: bool,
}

impl Lease {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent(&self) -> &AsyncMutex<Agent> {
        &self.agent
    }

    /// Releases the lease early instead of waiting for `Drop`.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.released = true;
            let pool = AgentPool { inner: Arc::clone(&self.pool) };
            pool.release(&self.agent_id, self.generation);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.do_release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ToolPolicy;
    use crate::store::memory::MemoryStore;

    fn deps() -> AgentDeps {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let event_bus = Arc::new(EventBus::new(Arc::clone(&store)));
        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), HookPipeline::new(), ToolPolicy::default()));
        AgentDeps {
            store,
            event_bus,
            provider: Arc::new(atrium_provider::mock::MockProvider::new("mock")),
            registry,
            dispatcher,
            hooks: HookPipeline::new(),
            sandbox: Arc::new(atrium_sandbox::Boundary::new(std::env::temp_dir())),
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            model: "test-model".into(),
            system_prompt: None,
            max_iterations: 50,
            concurrency: 4,
            event_buffer: 256,
            idle_ttl_secs: 300,
            permissions: Default::default(),
            retry: Default::default(),
            store_root: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn leasing_the_same_agent_id_attaches_to_one_resident_instance() {
        let pool = AgentPool::new(deps(), config(), Duration::from_millis(50));

        let lease_a = pool.lease("a1", CancellationToken::new()).await.unwrap();
        let lease_b = pool.lease("a1", CancellationToken::new()).await.unwrap();

        assert!(Arc::ptr_eq(&lease_a.agent, &lease_b.agent));
    }

    #[tokio::test]
    async fn instance_is_evicted_after_idle_ttl_once_refcount_hits_zero() {
        let pool = AgentPool::new(deps(), config(), Duration::from_millis(20));

        let lease = pool.lease("a1", CancellationToken::new()).await.unwrap();
        drop(lease);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!pool.inner.entries.lock().contains_key("a1"));
    }

    #[tokio::test]
    async fn releasing_then_re_leasing_before_ttl_cancels_eviction() {
        let pool = AgentPool::new(deps(), config(), Duration::from_millis(30));

        let lease = pool.lease("a1", CancellationToken::new()).await.unwrap();
        drop(lease);
        // Re-lease before the idle timer fires; the instance must survive.
        let lease2 = pool.lease("a1", CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(pool.inner.entries.lock().contains_key("a1"));
        drop(lease2);
    }

    #[tokio::test]
    async fn cancelled_lease_while_constructing_does_not_allocate() {
        let pool = AgentPool::new(deps(), config(), Duration::from_millis(50));
        let token = CancellationToken::new();
        token.cancel();

        let result = pool.lease("a1", token).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(!pool.inner.entries.lock().contains_key("a1"));
    }
}
