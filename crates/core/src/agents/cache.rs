//! Keyed cache of live agent adapters.
//!
//! Adapters are keyed by (provider, model, tool permissions). Each key owns a
//! slot holding a `tokio::sync::OnceCell`, so concurrent callers for one key
//! wait on a single creation while callers for other keys proceed. The map
//! lock is held only to look up, insert or remove slots, never across an
//! await.

use crate::agents::base::{AgentAdapter, AgentError};
use af_protocol::settings_models::{AgentSettings, Provider};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Identity of a cached adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: Provider,
    pub model_name: String,
    pub tool_permissions: BTreeSet<String>,
}

impl CacheKey {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            provider: settings.provider,
            model_name: settings.model_settings.model_name.clone(),
            tool_permissions: settings.tool_permissions.clone(),
        }
    }
}

/// A caller's reference to a cached adapter.
///
/// The adapter stays usable after eviction; `generation` tells whether it is
/// still the one the cache hands out (see [`AgentCache::is_live`]).
#[derive(Clone)]
pub struct AgentHandle {
    pub agent_id: String,
    pub key: CacheKey,
    pub adapter: Arc<dyn AgentAdapter>,
    pub generation: u64,
    pub last_used_at: DateTime<Utc>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent_id", &self.agent_id)
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("last_used_at", &self.last_used_at)
            .finish_non_exhaustive()
    }
}

struct Slot {
    generation: u64,
    cell: OnceCell<Arc<dyn AgentAdapter>>,
    /// Agent ids that resolved to this slot.
    owners: Mutex<BTreeSet<String>>,
    last_used_ms: AtomicI64,
}

impl Slot {
    fn touch(&self) -> DateTime<Utc> {
        let now = Utc::now();
        self.last_used_ms.store(now.timestamp_millis(), Ordering::Relaxed);
        now
    }

    fn owned_by(&self, agent_id: &str) -> bool {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(agent_id)
    }
}

#[derive(Default)]
pub struct AgentCache {
    slots: RwLock<HashMap<CacheKey, Arc<Slot>>>,
    next_generation: AtomicU64,
}

impl AgentCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CacheKey) -> Arc<Slot> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_insert_with(|| {
            Arc::new(Slot {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed) + 1,
                cell: OnceCell::new(),
                owners: Mutex::new(BTreeSet::new()),
                last_used_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            })
        }))
    }

    /// Return the cached adapter for `key`, creating it with `init` on a miss.
    ///
    /// Concurrent misses for one key run `init` once; if it fails the next
    /// waiter tries again.
    pub async fn get_or_try_insert<F, Fut>(
        &self,
        key: &CacheKey,
        agent_id: &str,
        init: F,
    ) -> Result<AgentHandle, AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn AgentAdapter>, AgentError>>,
    {
        let slot = self.slot(key);
        let adapter = slot.cell.get_or_try_init(init).await?;

        slot.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id.to_string());
        let last_used_at = slot.touch();

        Ok(AgentHandle {
            agent_id: agent_id.to_string(),
            key: key.clone(),
            adapter: Arc::clone(adapter),
            generation: slot.generation,
            last_used_at,
        })
    }

    /// Remove every entry `agent_id` resolved to. Returns the number removed.
    pub fn evict(&self, agent_id: &str) -> usize {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| !slot.owned_by(agent_id));
        before - slots.len()
    }

    /// Remove entries unused for longer than `max_idle`. Returns the number
    /// removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let max_idle_ms = i64::try_from(max_idle.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(max_idle_ms);
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| slot.last_used_ms.load(Ordering::Relaxed) >= cutoff);
        before - slots.len()
    }

    pub fn clear(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of created adapters.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `handle` still refers to the adapter the cache hands out.
    pub fn is_live(&self, handle: &AgentHandle) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.key)
            .is_some_and(|slot| slot.generation == handle.generation && slot.cell.initialized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::adapters::MockAgent;
    use af_protocol::settings_models::ModelSettings;
    use std::sync::atomic::AtomicUsize;

    fn key(model: &str) -> CacheKey {
        CacheKey::from_settings(&AgentSettings::new(
            "dev",
            Provider::Mock,
            ModelSettings::new(model),
        ))
    }

    fn mock() -> Arc<dyn AgentAdapter> {
        Arc::new(MockAgent::echo())
    }

    #[tokio::test]
    async fn test_hit_reuses_adapter() {
        let cache = AgentCache::new();
        let created = AtomicUsize::new(0);
        let create = || async {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(mock())
        };
        let first = cache.get_or_try_insert(&key("m"), "a", create).await.unwrap();
        let second = cache.get_or_try_insert(&key("m"), "b", create).await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first.adapter, &second.adapter));
        assert_eq!(first.generation, second.generation);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let cache = AgentCache::new();
        let result = cache
            .get_or_try_insert(&key("m"), "a", || async {
                Err(AgentError::Configuration("missing".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());

        let handle = cache
            .get_or_try_insert(&key("m"), "a", || async { Ok(mock()) })
            .await;
        assert!(handle.is_ok());
    }

    #[tokio::test]
    async fn test_evict_by_owner_keeps_handle_usable() {
        let cache = AgentCache::new();
        let handle = cache
            .get_or_try_insert(&key("m"), "a", || async { Ok(mock()) })
            .await
            .unwrap();
        cache
            .get_or_try_insert(&key("other"), "b", || async { Ok(mock()) })
            .await
            .unwrap();

        assert_eq!(cache.evict("a"), 1);
        assert!(!cache.is_live(&handle));
        assert_eq!(cache.len(), 1);
        assert!(handle.adapter.check_availability().await);

        let rebuilt = cache
            .get_or_try_insert(&key("m"), "a", || async { Ok(mock()) })
            .await
            .unwrap();
        assert!(rebuilt.generation > handle.generation);
        assert!(cache.is_live(&rebuilt));
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let cache = AgentCache::new();
        cache
            .get_or_try_insert(&key("m"), "a", || async { Ok(mock()) })
            .await
            .unwrap();

        assert_eq!(cache.evict_idle(Duration::from_secs(60)), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.evict_idle(Duration::from_millis(1)), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_misses_create_once() {
        let cache = Arc::new(AgentCache::new());
        let created = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            let created = Arc::clone(&created);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_try_insert(&key("m"), &format!("agent-{i}"), || async move {
                        created.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(mock())
                    })
                    .await
                    .map(|h| h.generation)
            }));
        }

        let mut generations = BTreeSet::new();
        for task in tasks {
            generations.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(generations.len(), 1);
    }

    #[test]
    fn test_key_includes_permissions() {
        let base = AgentSettings::new("a", Provider::Mock, ModelSettings::new("m"));
        let with_tools = base.clone().with_tools(["echo"]);
        assert_ne!(CacheKey::from_settings(&base), CacheKey::from_settings(&with_tools));

        let prompt_only = base.clone().with_system_prompt("different");
        assert_eq!(CacheKey::from_settings(&base), CacheKey::from_settings(&prompt_only));
    }
}
