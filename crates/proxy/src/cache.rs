//! TTL and size-aware response cache with per-agent pools.
//!
//! Two-level locking: a top-level lock guards the agent-pool map and pool
//! metadata, each pool's own lock guards its entry map. The top-level lock
//! is always taken first and never while a pool lock is held.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use config::ProxySettings;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::content::Item;

/// Pool name used when no agent id is supplied and for legacy unprefixed
/// cache ids.
pub const DEFAULT_AGENT: &str = "default";

/// Cache sizing and expiry limits. Immutable after construction.
#[derive(Debug, Clone)]
pub struct CacheLimits {
    /// Maximum live entries per agent pool.
    pub max_entries_per_agent: usize,
    /// Maximum total text bytes per agent pool.
    pub max_bytes_per_agent: usize,
    /// Entry time-to-live.
    pub ttl: Duration,
    /// Maximum number of agent pools.
    pub max_agents: usize,
}

impl CacheLimits {
    /// Derives cache limits from the proxy settings. Without agent
    /// isolation everything lands in one pool sized by the legacy knobs.
    pub fn from_settings(settings: &ProxySettings) -> Self {
        if settings.enable_agent_isolation {
            Self {
                max_entries_per_agent: settings.max_entries_per_agent,
                max_bytes_per_agent: settings.max_memory_per_agent,
                ttl: Duration::from_secs(settings.cache_ttl_seconds),
                max_agents: settings.max_total_agents,
            }
        } else {
            Self {
                max_entries_per_agent: settings.cache_max_entries,
                max_bytes_per_agent: settings.max_memory_per_agent,
                ttl: Duration::from_secs(settings.cache_ttl_seconds),
                max_agents: 1,
            }
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    content: Vec<Item>,
    tool_name: String,
    #[allow(dead_code)]
    arguments: Value,
    created_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
    size_bytes: usize,
}

impl CacheEntry {
    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn idle(&self) -> Duration {
        self.last_accessed_at.elapsed()
    }

    /// Eviction score: large, stale, rarely-used entries go first. A hot
    /// small entry outlives a cold huge one.
    fn eviction_score(&self) -> f64 {
        self.idle().as_secs_f64() * self.size_bytes.max(1) as f64
            / self.access_count.max(1) as f64
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: HashMap<String, CacheEntry>,
    total_bytes: usize,
}

/// One agent's private cache of tool responses.
#[derive(Debug)]
pub struct CachePool {
    agent_id: String,
    limits: CacheLimits,
    inner: Mutex<PoolInner>,
}

impl CachePool {
    fn new(agent_id: String, limits: CacheLimits) -> Self {
        Self {
            agent_id,
            limits,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Stores content and returns a fresh 12-hex cache id.
    ///
    /// Content larger than the pool's byte budget is not cached, but a
    /// fresh id is still returned so the caller always has one to report.
    pub async fn put(&self, content: Vec<Item>, tool_name: &str, arguments: Value) -> String {
        let size_bytes: usize = content
            .iter()
            .filter_map(Item::as_text)
            .map(str::len)
            .sum();

        let mut inner = self.inner.lock().await;

        if size_bytes > self.limits.max_bytes_per_agent {
            log::warn!(
                "Result for {tool_name} ({size_bytes} bytes) exceeds the per-agent \
                 budget of agent {}, not caching",
                self.agent_id
            );
            return fresh_id(&inner.entries);
        }

        sweep_expired(&mut inner, self.limits.ttl);

        while !inner.entries.is_empty()
            && (inner.entries.len() >= self.limits.max_entries_per_agent
                || inner.total_bytes + size_bytes > self.limits.max_bytes_per_agent)
        {
            evict_worst(&mut inner);
        }

        let cache_id = fresh_id(&inner.entries);
        let now = Instant::now();
        inner.total_bytes += size_bytes;
        inner.entries.insert(
            cache_id.clone(),
            CacheEntry {
                content,
                tool_name: tool_name.to_string(),
                arguments,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                size_bytes,
            },
        );

        log::debug!(
            "Cached result for {tool_name} ({size_bytes} bytes) in pool {} as cache_id={cache_id}",
            self.agent_id
        );
        cache_id
    }

    /// Retrieves content, refreshing the access metadata. Expired entries
    /// are removed and reported as missing.
    pub async fn get(&self, cache_id: &str) -> Option<Vec<Item>> {
        let mut inner = self.inner.lock().await;

        let expired = match inner.entries.get(cache_id) {
            None => return None,
            Some(entry) => entry.age() > self.limits.ttl,
        };

        if expired {
            if let Some(entry) = inner.entries.remove(cache_id) {
                inner.total_bytes -= entry.size_bytes;
                log::debug!("Cache entry {cache_id} expired (age={:.1}s)", entry.age().as_secs_f64());
            }
            return None;
        }

        let entry = inner.entries.get_mut(cache_id)?;
        entry.access_count += 1;
        entry.last_accessed_at = Instant::now();
        Some(entry.content.clone())
    }

    /// Removes an entry. Returns whether it existed.
    pub async fn remove(&self, cache_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.entries.remove(cache_id) {
            Some(entry) => {
                inner.total_bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// True when the pool holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sum of cached text bytes.
    pub async fn total_bytes(&self) -> usize {
        self.inner.lock().await.total_bytes
    }
}

fn fresh_id(entries: &HashMap<String, CacheEntry>) -> String {
    loop {
        let bytes: [u8; 6] = rand::rng().random();
        let id: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        if !entries.contains_key(&id) {
            return id;
        }
    }
}

fn sweep_expired(inner: &mut PoolInner, ttl: Duration) {
    let expired: Vec<String> = inner
        .entries
        .iter()
        .filter(|(_, entry)| entry.age() > ttl)
        .map(|(id, _)| id.clone())
        .collect();

    for id in &expired {
        if let Some(entry) = inner.entries.remove(id) {
            inner.total_bytes -= entry.size_bytes;
        }
    }

    if !expired.is_empty() {
        log::debug!("Evicted {} expired cache entries", expired.len());
    }
}

fn evict_worst(inner: &mut PoolInner) {
    let worst = inner
        .entries
        .iter()
        .max_by(|(_, a), (_, b)| {
            a.eviction_score()
                .partial_cmp(&b.eviction_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(id, _)| id.clone());

    if let Some(id) = worst
        && let Some(entry) = inner.entries.remove(&id)
    {
        inner.total_bytes -= entry.size_bytes;
        log::debug!(
            "Evicting cache entry {id} for {} (idle={:.1}s, size={} bytes)",
            entry.tool_name,
            entry.idle().as_secs_f64(),
            entry.size_bytes
        );
    }
}

struct PoolSlot {
    pool: Arc<CachePool>,
    last_accessed: Instant,
}

/// Aggregate cache statistics for logging.
#[derive(Debug)]
pub struct CacheStats {
    /// Number of live agent pools.
    pub pools: usize,
    /// Total entries across pools.
    pub entries: usize,
    /// Total cached text bytes across pools.
    pub total_bytes: usize,
}

/// The process-wide response cache, mapping agent ids to pools.
pub struct ResponseCache {
    limits: CacheLimits,
    prefix_ids: bool,
    pools: Mutex<HashMap<String, PoolSlot>>,
}

impl ResponseCache {
    /// Creates an empty cache. When `prefix_ids` is set, external cache ids
    /// carry the `{agent}:` prefix.
    pub fn new(limits: CacheLimits, prefix_ids: bool) -> Self {
        Self {
            limits,
            prefix_ids,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Stores content in the agent's pool and returns the external cache id.
    pub async fn put(
        &self,
        content: Vec<Item>,
        tool_name: &str,
        arguments: Value,
        agent_id: Option<&str>,
    ) -> String {
        let agent = agent_id.unwrap_or(DEFAULT_AGENT);
        let pool = self.pool_for(agent, true).await;

        let id = match pool {
            Some(pool) => pool.put(content, tool_name, arguments).await,
            // Unreachable with create=true, but keep the caller supplied
            // with an id either way.
            None => fresh_id(&HashMap::new()),
        };

        if self.prefix_ids && agent_id.is_some() {
            format!("{agent}:{id}")
        } else {
            id
        }
    }

    /// Retrieves content by external cache id. Unprefixed ids address the
    /// default pool.
    pub async fn get(&self, external_id: &str) -> Option<Vec<Item>> {
        let (agent, id) = split_external_id(external_id);
        let pool = self.pool_for(agent, false).await?;
        pool.get(id).await
    }

    /// Removes one entry by external cache id.
    pub async fn remove(&self, external_id: &str) -> bool {
        let (agent, id) = split_external_id(external_id);
        match self.pool_for(agent, false).await {
            Some(pool) => pool.remove(id).await,
            None => false,
        }
    }

    /// Drops all pools and entries.
    pub async fn clear(&self) {
        self.pools.lock().await.clear();
    }

    /// Aggregate statistics over every pool.
    pub async fn stats(&self) -> CacheStats {
        let pools: Vec<Arc<CachePool>> = {
            let guard = self.pools.lock().await;
            guard.values().map(|slot| slot.pool.clone()).collect()
        };

        let mut entries = 0;
        let mut total_bytes = 0;
        for pool in &pools {
            entries += pool.len().await;
            total_bytes += pool.total_bytes().await;
        }

        CacheStats {
            pools: pools.len(),
            entries,
            total_bytes,
        }
    }

    /// Fetches a pool, updating its last-access time so recently queried
    /// pools are not evicted. Creates the pool when `create` is set,
    /// evicting the least-recently-accessed pool if the agent limit would
    /// be exceeded.
    async fn pool_for(&self, agent: &str, create: bool) -> Option<Arc<CachePool>> {
        let mut pools = self.pools.lock().await;

        if let Some(slot) = pools.get_mut(agent) {
            slot.last_accessed = Instant::now();
            return Some(slot.pool.clone());
        }

        if !create {
            return None;
        }

        if pools.len() >= self.limits.max_agents {
            let oldest = pools
                .iter()
                .min_by_key(|(_, slot)| slot.last_accessed)
                .map(|(name, _)| name.clone());
            if let Some(name) = oldest {
                log::debug!("Evicting least-recently-used agent pool {name}");
                pools.remove(&name);
            }
        }

        let pool = Arc::new(CachePool::new(agent.to_string(), self.limits.clone()));
        pools.insert(
            agent.to_string(),
            PoolSlot {
                pool: pool.clone(),
                last_accessed: Instant::now(),
            },
        );
        Some(pool)
    }
}

fn split_external_id(external_id: &str) -> (&str, &str) {
    match external_id.split_once(':') {
        Some((agent, id)) => (agent, id),
        None => (DEFAULT_AGENT, external_id),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{CacheLimits, CachePool, ResponseCache};
    use crate::content::Item;

    fn limits(max_entries: usize, max_bytes: usize, ttl_secs: u64) -> CacheLimits {
        CacheLimits {
            max_entries_per_agent: max_entries,
            max_bytes_per_agent: max_bytes,
            ttl: Duration::from_secs(ttl_secs),
            max_agents: 3,
        }
    }

    fn pool(max_entries: usize, max_bytes: usize, ttl_secs: u64) -> CachePool {
        CachePool::new("test".to_string(), limits(max_entries, max_bytes, ttl_secs))
    }

    #[tokio::test]
    async fn put_and_get() {
        let pool = pool(10, 1 << 20, 60);
        let id = pool
            .put(vec![Item::text("hello world")], "test_tool", json!({"arg": "val"}))
            .await;

        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let content = pool.get(&id).await.unwrap();
        assert_eq!(content[0].as_text().unwrap(), "hello world");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let pool = pool(10, 1 << 20, 60);
        assert!(pool.get("nonexistent00").await.is_none());
    }

    #[tokio::test]
    async fn zero_ttl_expires_after_any_delay() {
        let pool = pool(10, 1 << 20, 0);
        let id = pool.put(vec![Item::text("ephemeral")], "t", json!({})).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.get(&id).await.is_none());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn single_entry_pool_evicts_previous() {
        let pool = pool(1, 1 << 20, 300);
        let first = pool.put(vec![Item::text("a")], "t1", json!({})).await;
        let second = pool.put(vec![Item::text("b")], "t2", json!({})).await;

        assert!(pool.get(&first).await.is_none());
        assert!(pool.get(&second).await.is_some());
    }

    #[tokio::test]
    async fn eviction_prefers_large_idle_entries() {
        let pool = pool(2, 1 << 20, 300);
        let small = pool.put(vec![Item::text("tiny")], "t1", json!({})).await;
        let large = pool
            .put(vec![Item::Text("x".repeat(5000))], "t2", json!({}))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        // Touch the small entry so it is fresher and more used.
        assert!(pool.get(&small).await.is_some());

        let third = pool.put(vec![Item::text("c")], "t3", json!({})).await;

        assert!(pool.get(&small).await.is_some());
        assert!(pool.get(&third).await.is_some());
        assert!(pool.get(&large).await.is_none());
    }

    #[tokio::test]
    async fn byte_budget_holds_after_every_put() {
        let pool = pool(100, 100, 300);

        for i in 0..20 {
            pool.put(vec![Item::Text("y".repeat(30))], &format!("t{i}"), json!({}))
                .await;
            assert!(pool.total_bytes().await <= 100);
        }
    }

    #[tokio::test]
    async fn oversized_content_is_not_cached_but_gets_an_id() {
        let pool = pool(10, 50, 300);
        let id = pool
            .put(vec![Item::Text("z".repeat(100))], "big", json!({}))
            .await;

        assert_eq!(id.len(), 12);
        assert!(pool.is_empty().await);
        assert!(pool.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let pool = pool(10, 1 << 20, 300);
        let id = pool.put(vec![Item::text("x")], "t", json!({})).await;

        assert!(pool.remove(&id).await);
        assert!(!pool.remove(&id).await);

        pool.put(vec![Item::text("y")], "t", json!({})).await;
        pool.clear().await;
        assert!(pool.is_empty().await);
        assert_eq!(pool.total_bytes().await, 0);
    }

    #[tokio::test]
    async fn prefixed_ids_round_trip_per_agent() {
        let cache = ResponseCache::new(limits(10, 1 << 20, 300), true);

        let id_a = cache
            .put(vec![Item::text("for a")], "t", json!({}), Some("agent_a"))
            .await;
        let id_b = cache
            .put(vec![Item::text("for b")], "t", json!({}), Some("agent_b"))
            .await;

        assert!(id_a.starts_with("agent_a:"));
        assert!(id_b.starts_with("agent_b:"));

        assert_eq!(cache.get(&id_a).await.unwrap()[0].as_text().unwrap(), "for a");
        assert_eq!(cache.get(&id_b).await.unwrap()[0].as_text().unwrap(), "for b");
    }

    #[tokio::test]
    async fn agents_cannot_read_each_other() {
        let cache = ResponseCache::new(limits(10, 1 << 20, 300), true);

        let id_a = cache
            .put(vec![Item::text("private")], "t", json!({}), Some("agent_a"))
            .await;
        let bare = id_a.split_once(':').unwrap().1;

        // The bare suffix addresses the default pool, which has no entry.
        assert!(cache.get(bare).await.is_none());
        assert!(cache.get(&format!("agent_b:{bare}")).await.is_none());
    }

    #[tokio::test]
    async fn unprefixed_id_uses_default_pool() {
        let cache = ResponseCache::new(limits(10, 1 << 20, 300), false);

        let id = cache.put(vec![Item::text("legacy")], "t", json!({}), None).await;
        assert!(!id.contains(':'));
        assert_eq!(cache.get(&id).await.unwrap()[0].as_text().unwrap(), "legacy");
    }

    #[tokio::test]
    async fn pool_count_is_bounded_with_lru_eviction() {
        let cache = ResponseCache::new(limits(10, 1 << 20, 300), true);

        let id_1 = cache.put(vec![Item::text("1")], "t", json!({}), Some("a1")).await;
        cache.put(vec![Item::text("2")], "t", json!({}), Some("a2")).await;
        cache.put(vec![Item::text("3")], "t", json!({}), Some("a3")).await;

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Touch a1 so a2 becomes the least recently used pool.
        assert!(cache.get(&id_1).await.is_some());

        cache.put(vec![Item::text("4")], "t", json!({}), Some("a4")).await;

        let stats = cache.stats().await;
        assert_eq!(stats.pools, 3);
        assert!(cache.get(&id_1).await.is_some());
    }
}
