//! Hierarchical Memory Manager
//!
//! Owns the metadata index and statistics for one agent and coordinates them
//! with the similarity index that holds memory content:
//! - Storing memories with per-tier capacity enforcement
//! - Ranked retrieval across tiers
//! - Consolidation (promotion between tiers)
//! - TTL expiry and orphan reconciliation
//!
//! Similarity index calls are never made while the metadata lock is held.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use memtier_core::{
    DocumentMetadata, MemoryMetadata, MemoryStatistics, MetadataIndex, MetadataStore,
    SimilarityIndex, Tier,
};

use super::consolidation::{consolidation_score, is_candidate, promotion_target, similar_pairs};
use super::eviction::{is_expired, select_evictions};
use super::retrieval::{RetrievalFilter, composite_score, rank};
use super::summary::summarize;
use super::types::{
    ConsolidationResult, Eviction, GcReport, MemoryResult, MemorySummary, MessageRole, Promotion,
    PruneReport, RetrieveQuery, StoreMemoryInput,
};
use crate::config::{MemoryConfig, SDKConfig};
use crate::utils::{extract_keywords, normalize_importance, truncate_chars, validate_content};
use crate::{SDKError, SDKResult};

/// Characters kept from a captured conversation message
const CAPTURE_MAX_CHARS: usize = 500;
/// Keywords extracted from a captured conversation message
const CAPTURE_KEYWORDS: usize = 5;
/// Default traversal depth for related memories
pub const DEFAULT_RELATED_DEPTH: usize = 2;

/// Metadata index and counters, guarded together
#[derive(Debug, Default)]
struct MemoryState {
    entries: MetadataIndex,
    stats: MemoryStatistics,
}

struct MaintenanceTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Hierarchical memory for one agent
pub struct HierarchicalMemory {
    index: Arc<dyn SimilarityIndex>,
    store: MetadataStore,
    config: MemoryConfig,
    agent_name: String,
    context_id: String,
    state: RwLock<MemoryState>,
    persist_lock: Mutex<()>,
    consolidation_lock: Mutex<()>,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl HierarchicalMemory {
    /// Open the agent's memory, loading any persisted index and statistics
    pub async fn open(config: &SDKConfig, index: Arc<dyn SimilarityIndex>) -> SDKResult<Self> {
        config.validate()?;

        let store = MetadataStore::new(config.resolved_memory_dir());
        let entries = store.load_index().await?;
        let stats = store.load_stats().await?;

        info!(
            agent = %config.agent_name,
            dir = %store.dir().display(),
            entries = entries.len(),
            "Opened hierarchical memory"
        );

        Ok(Self {
            index,
            store,
            config: config.memory.clone(),
            agent_name: config.agent_name.clone(),
            context_id: config.context_id.clone(),
            state: RwLock::new(MemoryState { entries, stats }),
            persist_lock: Mutex::new(()),
            consolidation_lock: Mutex::new(()),
            maintenance: Mutex::new(None),
        })
    }

    /// Memory configuration in effect
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Store
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a memory and return its id.
    ///
    /// Content goes to the similarity index first; metadata is only committed
    /// once that succeeds. If the tier is over capacity afterwards, the
    /// lowest-retention entries are evicted in the same critical section.
    pub async fn store_memory(&self, input: StoreMemoryInput) -> SDKResult<String> {
        validate_content(&input.content)?;
        let importance = normalize_importance(input.importance, self.config.importance_policy)?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let tier = input.tier;

        let mut meta = MemoryMetadata::new(&id, tier, importance, now);
        meta.tags = input.tags.into_iter().collect();
        meta.keywords = input.keywords;
        meta.parent_ids = input.parent_ids;
        meta.source_type = input.source_type;
        meta.agent_name = self.agent_name.clone();
        meta.context_id = self.context_id.clone();

        let document = document_metadata(&meta, input.metadata);
        self.index_call("insert", self.index.insert(tier, &id, &input.content, &document))
            .await?;

        let evicted = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            for parent_id in &meta.parent_ids {
                if let Some(parent) = state.entries.get_mut(parent_id) {
                    if !parent.child_ids.contains(&id) {
                        parent.child_ids.push(id.clone());
                    }
                }
            }

            state.entries.insert(id.clone(), meta);
            state.stats.total_memories += 1;
            self.evict_over_capacity(state, tier, now)
        };

        debug!(memory_id = %id, tier = %tier, importance, "Stored memory");

        self.remove_content(&evicted).await;
        self.persist().await?;
        Ok(id)
    }

    /// Store one conversation message in working memory
    pub async fn capture_message(&self, content: &str, role: MessageRole) -> SDKResult<String> {
        let content = truncate_chars(content, CAPTURE_MAX_CHARS);
        let input = StoreMemoryInput::new(content, Tier::Working)
            .with_importance(role.importance())
            .with_keywords(extract_keywords(content, CAPTURE_KEYWORDS))
            .with_source("conversation")
            .with_metadata("role", role.as_str());

        self.store_memory(input).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retrieve
    // ─────────────────────────────────────────────────────────────────────────

    /// Retrieve memories ranked by similarity, importance and recency.
    ///
    /// Every candidate that passes the filters has its access recorded, even
    /// if it falls outside the returned `limit`.
    pub async fn retrieve_memory(&self, query: RetrieveQuery) -> SDKResult<Vec<MemoryResult>> {
        if query.query.trim().is_empty() {
            return Err(SDKError::validation("query cannot be empty"));
        }

        let cfg = &self.config.retrieval;
        let limit = query.limit.unwrap_or(cfg.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let tiers: Vec<Tier> = match query.tier {
            Some(tier) => vec![tier],
            None => Tier::ALL.to_vec(),
        };
        let candidates = limit.saturating_mul(cfg.candidate_multiplier);

        let mut hits = Vec::new();
        for tier in tiers {
            let found = self
                .index_call(
                    "search",
                    self.index
                        .search(tier, &query.query, candidates, cfg.similarity_floor),
                )
                .await?;
            hits.extend(found.into_iter().map(|hit| (tier, hit)));
        }

        let filter = RetrievalFilter {
            importance_threshold: query
                .importance_threshold
                .unwrap_or(cfg.importance_threshold),
            time_range: query.time_range,
            tags: &query.tags,
        };

        let now = Utc::now();
        let mut results = Vec::new();
        {
            let mut state = self.state.write().await;
            for (tier, hit) in hits {
                let Some(meta) = state.entries.get_mut(&hit.id) else {
                    warn!(memory_id = %hit.id, tier = %tier, "Search hit has no metadata; skipping");
                    continue;
                };
                if meta.tier != tier {
                    warn!(
                        memory_id = %hit.id,
                        tier = %tier,
                        metadata_tier = %meta.tier,
                        "Search hit tier does not match metadata; skipping"
                    );
                    continue;
                }
                if !filter.matches(meta) {
                    continue;
                }

                meta.touch(now);
                let score = composite_score(hit.similarity, meta, now, cfg);
                results.push(MemoryResult {
                    content: hit.content,
                    score,
                    similarity: hit.similarity,
                    metadata: meta.clone(),
                    document: hit.metadata,
                });
            }
        }

        let touched = results.len();
        rank(&mut results, limit);

        debug!(
            query = %query.query,
            touched,
            returned = results.len(),
            "Retrieved memories"
        );

        if touched > 0 {
            self.persist().await?;
        }
        Ok(results)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consolidation
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one consolidation pass over a tier (or all tiers for `None`).
    ///
    /// Recomputes consolidation scores, links similar candidates and promotes
    /// eligible entries one tier up. Content is moved in the similarity index
    /// before the metadata change is committed; a failed move aborts only that
    /// promotion.
    pub async fn consolidate_memories(&self, tier: Option<Tier>) -> SDKResult<ConsolidationResult> {
        let _pass = self.consolidation_lock.lock().await;
        let started = Instant::now();
        let now = Utc::now();
        let rule = &self.config.consolidation;
        let tiers: Vec<Tier> = match tier {
            Some(tier) => vec![tier],
            None => Tier::ALL.to_vec(),
        };

        let mut result = ConsolidationResult {
            tier,
            ..Default::default()
        };

        let (plans, candidates) = {
            let mut state = self.state.write().await;
            let mut plans = Vec::new();
            let mut candidates: BTreeMap<Tier, Vec<String>> = BTreeMap::new();

            for meta in state.entries.values_mut().filter(|m| tiers.contains(&m.tier)) {
                let score = consolidation_score(meta, now, rule);
                meta.consolidation_score = score;

                if is_candidate(meta, rule) {
                    candidates.entry(meta.tier).or_default().push(meta.id.clone());
                }
                if let Some(target) = promotion_target(meta, now, rule) {
                    plans.push((meta.id.clone(), meta.tier, target, score));
                }
            }
            (plans, candidates)
        };
        result.candidates = candidates.values().map(Vec::len).sum();

        if rule.link_similar {
            result.linked = self.link_similar(&candidates).await;
        }

        for (id, from, to, score) in plans {
            if let Err(e) = self.move_content(&id, from, to).await {
                warn!(memory_id = %id, from = %from, to = %to, error = %e, "Promotion aborted");
                result.errors.push(format!("{id}: {e}"));
                continue;
            }

            // The target tier is trimmed in the same critical section as the
            // commit, so it never exceeds capacity + 1.
            let (committed, evicted) = {
                let mut guard = self.state.write().await;
                let state = &mut *guard;
                match state.entries.get_mut(&id) {
                    Some(meta) if meta.tier == from => {
                        meta.tier = to;
                        state.stats.promotions += 1;
                        (true, self.evict_over_capacity(state, to, now))
                    }
                    _ => (false, Vec::new()),
                }
            };

            if committed {
                info!(memory_id = %id, from = %from, to = %to, score, "Promoted memory");
                result.promoted.push(Promotion { id, from, to, score });
                self.remove_content(&evicted).await;
            } else {
                // Evicted or moved while the content was in flight
                debug!(memory_id = %id, "Promoted entry vanished; dropping moved content");
                self.delete_content(to, &id).await;
            }
        }

        self.state.write().await.stats.consolidations += 1;

        result.duration_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        info!(
            tier = ?tier,
            candidates = result.candidates,
            promoted = result.promoted.len(),
            linked = result.linked.len(),
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Consolidation pass complete"
        );

        self.persist().await?;
        Ok(result)
    }

    /// Link candidates with near-identical content through `related_ids`
    async fn link_similar(&self, candidates: &BTreeMap<Tier, Vec<String>>) -> Vec<(String, String)> {
        let threshold = self.config.consolidation.similarity_threshold;
        let mut pairs = Vec::new();

        for (tier, ids) in candidates {
            if ids.len() < 2 {
                continue;
            }

            let mut docs = Vec::with_capacity(ids.len());
            for id in ids {
                match self.index_call("get", self.index.get(*tier, id)).await {
                    Ok(Some(record)) => docs.push((id.clone(), record.content)),
                    Ok(None) => debug!(memory_id = %id, tier = %tier, "Candidate has no content"),
                    Err(e) => warn!(memory_id = %id, tier = %tier, error = %e, "Failed to load candidate content"),
                }
            }
            pairs.extend(similar_pairs(&docs, threshold));
        }

        if pairs.is_empty() {
            return pairs;
        }

        let mut state = self.state.write().await;
        let mut linked = Vec::new();
        for (a, b) in pairs {
            if !state.entries.contains_key(&a) || !state.entries.contains_key(&b) {
                continue;
            }
            let mut added = false;
            if let Some(meta) = state.entries.get_mut(&a) {
                added |= push_unique(&mut meta.related_ids, &b);
            }
            if let Some(meta) = state.entries.get_mut(&b) {
                added |= push_unique(&mut meta.related_ids, &a);
            }
            if added {
                debug!(memory_a = %a, memory_b = %b, "Linked similar memories");
                linked.push((a, b));
            }
        }
        linked
    }

    /// Copy content into the target tier and remove it from the source tier
    async fn move_content(&self, id: &str, from: Tier, to: Tier) -> SDKResult<()> {
        let record = self
            .index_call("get", self.index.get(from, id))
            .await?
            .ok_or_else(|| SDKError::not_found("memory content", id))?;

        let mut document = record.metadata;
        document.insert("tier".into(), to.as_str().into());
        self.index_call("insert", self.index.insert(to, id, &record.content, &document))
            .await?;

        // A leftover copy in the source tier is an orphan for collect_garbage
        self.delete_content(from, id).await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pruning
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one capacity pruning pass on a tier
    pub async fn enforce_capacity(&self, tier: Tier) -> SDKResult<PruneReport> {
        let (evicted, remaining) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let evicted = self.evict_over_capacity(state, tier, Utc::now());
            (evicted, tier_counts(&state.entries))
        };

        self.remove_content(&evicted).await;
        if !evicted.is_empty() {
            self.persist().await?;
        }
        Ok(PruneReport { evicted, remaining })
    }

    /// Remove entries idle longer than their tier's TTL
    pub async fn expire_memories(&self) -> SDKResult<PruneReport> {
        let now = Utc::now();
        let (expired, remaining) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            let ids: Vec<(String, Tier, i64)> = state
                .entries
                .values()
                .filter(|m| is_expired(m, self.config.tiers.get(m.tier), now))
                .map(|m| (m.id.clone(), m.tier, m.idle_days(now)))
                .collect();

            let mut expired = Vec::with_capacity(ids.len());
            for (id, tier, idle_days) in ids {
                state.entries.remove(&id);
                info!(memory_id = %id, tier = %tier, idle_days, "Expired memory");
                expired.push(Eviction {
                    id,
                    tier,
                    score: idle_days as f64,
                });
            }
            state.stats.expirations += expired.len() as u64;
            (expired, tier_counts(&state.entries))
        };

        self.remove_content(&expired).await;
        if !expired.is_empty() {
            self.persist().await?;
        }
        Ok(PruneReport {
            evicted: expired,
            remaining,
        })
    }

    /// Reconcile the similarity index with the metadata index.
    ///
    /// Content with no metadata in its tier is deleted. Metadata whose
    /// content is missing is reported and kept. Content younger than the
    /// index timeout is left alone, since its store may still be committing.
    pub async fn collect_garbage(&self) -> SDKResult<GcReport> {
        let _pass = self.consolidation_lock.lock().await;
        let grace = chrono::Duration::milliseconds(
            self.config.index_timeout_ms.try_into().unwrap_or(i64::MAX),
        );
        let mut report = GcReport::default();

        for tier in Tier::ALL {
            let content_ids: BTreeSet<String> = self
                .index_call("ids", self.index.ids(tier))
                .await?
                .into_iter()
                .collect();

            let known: BTreeSet<String> = {
                let state = self.state.read().await;
                state
                    .entries
                    .values()
                    .filter(|m| m.tier == tier)
                    .map(|m| m.id.clone())
                    .collect()
            };

            for id in content_ids.difference(&known) {
                if self.recently_indexed(tier, id, grace).await {
                    continue;
                }
                if self.state.read().await.entries.get(id).is_some_and(|m| m.tier == tier) {
                    continue;
                }
                self.delete_content(tier, id).await;
                info!(memory_id = %id, tier = %tier, "Deleted orphaned content");
                report.orphaned_content.push((tier, id.clone()));
            }

            for id in known.difference(&content_ids) {
                warn!(memory_id = %id, tier = %tier, "Memory content not found in similarity index");
                report.missing_content.push((tier, id.clone()));
            }
        }

        Ok(report)
    }

    async fn recently_indexed(&self, tier: Tier, id: &str, grace: chrono::Duration) -> bool {
        let Ok(Some(record)) = self.index_call("get", self.index.get(tier, id)).await else {
            return false;
        };
        record
            .metadata
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .is_some_and(|created| Utc::now() - created.with_timezone(&Utc) < grace)
    }

    /// Evict the lowest-retention entries of `tier` beyond its capacity.
    ///
    /// Must be called with the state write lock held.
    fn evict_over_capacity(&self, state: &mut MemoryState, tier: Tier, now: DateTime<Utc>) -> Vec<Eviction> {
        let capacity = self.config.tiers.get(tier).capacity;
        let selected = select_evictions(
            state.entries.values().filter(|m| m.tier == tier),
            capacity,
            now,
            &self.config.retention,
        );
        if selected.is_empty() {
            return Vec::new();
        }

        let mut evicted = Vec::with_capacity(selected.len());
        for (id, retention) in selected {
            state.entries.remove(&id);
            info!(memory_id = %id, tier = %tier, retention, "Evicted memory");
            evicted.push(Eviction {
                id,
                tier,
                score: retention,
            });
        }

        state.stats.prunings += 1;
        state.stats.evictions += evicted.len() as u64;
        evicted
    }

    async fn remove_content(&self, removed: &[Eviction]) {
        for eviction in removed {
            self.delete_content(eviction.tier, &eviction.id).await;
        }
    }

    async fn delete_content(&self, tier: Tier, id: &str) {
        if let Err(e) = self.index_call("delete", self.index.delete(tier, id)).await {
            warn!(memory_id = %id, tier = %tier, error = %e, "Failed to delete content; left for garbage collection");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metadata operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Metadata for a memory, without recording an access
    pub async fn get_memory(&self, id: &str) -> Option<MemoryMetadata> {
        self.state.read().await.entries.get(id).cloned()
    }

    /// Number of live memories in a tier
    pub async fn tier_count(&self, tier: Tier) -> usize {
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|m| m.tier == tier)
            .count()
    }

    /// Current counters
    pub async fn stats(&self) -> MemoryStatistics {
        self.state.read().await.stats
    }

    /// Add tags to a memory
    pub async fn tag_memory<I, S>(&self, id: &str, tags: I) -> SDKResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.write().await;
            let meta = state
                .entries
                .get_mut(id)
                .ok_or_else(|| SDKError::not_found("memory", id))?;
            meta.tags.extend(tags.into_iter().map(Into::into));
        }
        self.persist().await
    }

    /// Change the importance of a memory
    pub async fn set_importance(&self, id: &str, importance: f64) -> SDKResult<()> {
        let importance = normalize_importance(importance, self.config.importance_policy)?;
        {
            let mut state = self.state.write().await;
            let meta = state
                .entries
                .get_mut(id)
                .ok_or_else(|| SDKError::not_found("memory", id))?;
            meta.importance = importance;
        }
        self.persist().await
    }

    /// Ids of memories carrying any of `tags`, ascending
    pub async fn memories_by_tag<S: AsRef<str>>(&self, tags: &[S]) -> Vec<String> {
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|m| m.has_any_tag(tags))
            .map(|m| m.id.clone())
            .collect()
    }

    /// Link two memories as related, in both directions
    pub async fn link_memories(&self, a: &str, b: &str) -> SDKResult<()> {
        if a == b {
            return Err(SDKError::validation("cannot link a memory to itself"));
        }
        {
            let mut state = self.state.write().await;
            for id in [a, b] {
                if !state.entries.contains_key(id) {
                    return Err(SDKError::not_found("memory", id));
                }
            }
            if let Some(meta) = state.entries.get_mut(a) {
                push_unique(&mut meta.related_ids, b);
            }
            if let Some(meta) = state.entries.get_mut(b) {
                push_unique(&mut meta.related_ids, a);
            }
        }
        self.persist().await
    }

    /// Memories reachable through related, parent and child links.
    ///
    /// Breadth-first up to `max_depth` hops; the start id is excluded and
    /// ids without metadata are reported but not expanded.
    pub async fn related_memories(&self, id: &str, max_depth: usize) -> SDKResult<Vec<String>> {
        let state = self.state.read().await;
        if !state.entries.contains_key(id) {
            return Err(SDKError::not_found("memory", id));
        }

        let mut visited: HashSet<&str> = HashSet::from([id]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(id, 0)]);
        let mut related = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(meta) = state.entries.get(current) else {
                continue;
            };
            for next in meta.linked_ids() {
                if visited.insert(next.as_str()) {
                    related.push(next.clone());
                    queue.push_back((next.as_str(), depth + 1));
                }
            }
        }

        Ok(related)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Summary
    // ─────────────────────────────────────────────────────────────────────────

    /// Counts per tier and importance band, plus counters
    pub async fn get_memory_summary(&self) -> MemorySummary {
        let state = self.state.read().await;
        summarize(state.entries.values(), state.stats, Utc::now())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Background maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Consolidate every tier, expire TTL entries and collect garbage.
    ///
    /// Failures are logged; the next run retries.
    pub async fn run_maintenance(&self) {
        if let Err(e) = self.consolidate_memories(None).await {
            warn!(error = %e, "Maintenance consolidation failed");
        }
        if let Err(e) = self.expire_memories().await {
            warn!(error = %e, "Maintenance expiry failed");
        }
        if let Err(e) = self.collect_garbage().await {
            warn!(error = %e, "Maintenance garbage collection failed");
        }
    }

    /// Start the background maintenance task
    pub async fn start_background_maintenance(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.maintenance.lock().await;
        if slot.is_some() {
            return;
        }
        if interval.is_zero() {
            warn!("Background maintenance interval is zero; not starting");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let memory: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(memory) = memory.upgrade() else { break };
                        memory.run_maintenance().await;
                    }
                }
            }
            debug!("Background maintenance stopped");
        });

        info!(interval_ms = interval.as_millis() as u64, "Started background maintenance");
        *slot = Some(MaintenanceTask {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background maintenance task and wait for it to finish
    pub async fn stop_background_maintenance(&self) {
        let task = self.maintenance.lock().await.take();
        if let Some(task) = task {
            // A closed channel means the task already exited
            let _ = task.shutdown_tx.send(()).await;
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Background maintenance task failed");
            }
        }
    }

    /// Whether the background maintenance task is running
    pub async fn is_maintenance_running(&self) -> bool {
        self.maintenance.lock().await.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence & index plumbing
    // ─────────────────────────────────────────────────────────────────────────

    /// Write the metadata index and counters to disk.
    ///
    /// Retries with exponential backoff. On final failure the in-memory state
    /// is kept and stays authoritative.
    pub async fn persist(&self) -> SDKResult<()> {
        let _writer = self.persist_lock.lock().await;
        let retry = &self.config.persistence;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (entries, stats) = {
                let state = self.state.read().await;
                (state.entries.clone(), state.stats)
            };

            let outcome = match self.store.save_index(&entries).await {
                Ok(()) => self.store.save_stats(&stats).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retry.max_retries => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Failed to persist memory index; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to persist memory index");
                    return Err(SDKError::persistence(attempt, e.to_string()));
                }
            }
        }
    }

    async fn index_call<T, F>(&self, op: &'static str, call: F) -> SDKResult<T>
    where
        F: Future<Output = memtier_core::Result<T>>,
    {
        match timeout(self.config.index_timeout(), call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SDKError::storage(format!("similarity index {op} failed: {e}"))),
            Err(_) => {
                warn!(op, timeout_ms = self.config.index_timeout_ms, "Similarity index call timed out");
                Err(SDKError::timeout(self.config.index_timeout_ms))
            }
        }
    }
}

/// Document metadata stored with content: caller keys overlaid with ours
fn document_metadata(meta: &MemoryMetadata, mut document: DocumentMetadata) -> DocumentMetadata {
    document.insert("id".into(), meta.id.clone().into());
    document.insert("tier".into(), meta.tier.as_str().into());
    document.insert("importance".into(), meta.importance.into());
    document.insert("created_at".into(), meta.created_at.to_rfc3339().into());
    document.insert("tags".into(), join_ids(meta.tags.iter()).into());
    document.insert("keywords".into(), join_ids(meta.keywords.iter()).into());
    document.insert("source_type".into(), meta.source_type.clone().into());
    document.insert("agent_name".into(), meta.agent_name.clone().into());
    document.insert("context_id".into(), meta.context_id.clone().into());
    document
}

fn join_ids<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join(",")
}

fn tier_counts(entries: &MetadataIndex) -> BTreeMap<Tier, usize> {
    let mut counts: BTreeMap<Tier, usize> = Tier::ALL.iter().map(|t| (*t, 0)).collect();
    for meta in entries.values() {
        *counts.entry(meta.tier).or_default() += 1;
    }
    counts
}

fn push_unique(ids: &mut Vec<String>, id: &str) -> bool {
    if ids.iter().any(|existing| existing == id) {
        return false;
    }
    ids.push(id.to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use memtier_core::{InMemoryIndex, MemoryRecord, SearchHit};
    use tempfile::TempDir;

    use crate::config::{ImportancePolicy, MemoryConfig};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn config_in(dir: &TempDir, memory: MemoryConfig) -> SDKConfig {
        SDKConfig::new("agent0")
            .with_memory_dir(dir.path().join("agent0"))
            .with_context("ctx-1")
            .with_memory(memory)
    }

    async fn open_with(dir: &TempDir, memory: MemoryConfig) -> (HierarchicalMemory, Arc<InMemoryIndex>) {
        init_tracing();
        let index = Arc::new(InMemoryIndex::new());
        let hm = HierarchicalMemory::open(&config_in(dir, memory), index.clone())
            .await
            .unwrap();
        (hm, index)
    }

    async fn open(dir: &TempDir) -> (HierarchicalMemory, Arc<InMemoryIndex>) {
        open_with(dir, MemoryConfig::default()).await
    }

    /// Rewrite metadata directly, as if time had passed
    async fn edit(hm: &HierarchicalMemory, id: &str, f: impl FnOnce(&mut MemoryMetadata)) {
        let mut state = hm.state.write().await;
        f(state.entries.get_mut(id).unwrap());
    }

    async fn age(hm: &HierarchicalMemory, id: &str, days: i64, access_count: u64) {
        edit(hm, id, |m| {
            m.created_at = Utc::now() - ChronoDuration::days(days);
            m.last_accessed = m.created_at;
            m.access_count = access_count;
        })
        .await;
    }

    /// Index double whose calls fail or stall
    struct BrokenIndex {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SimilarityIndex for BrokenIndex {
        async fn insert(&self, _: Tier, _: &str, _: &str, _: &DocumentMetadata) -> memtier_core::Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
                return Ok(());
            }
            Err(memtier_core::Error::index("collection unavailable"))
        }

        async fn search(&self, _: Tier, _: &str, _: usize, _: f64) -> memtier_core::Result<Vec<SearchHit>> {
            Err(memtier_core::Error::index("collection unavailable"))
        }

        async fn delete(&self, _: Tier, _: &str) -> memtier_core::Result<bool> {
            Ok(false)
        }

        async fn get(&self, _: Tier, _: &str) -> memtier_core::Result<Option<MemoryRecord>> {
            Ok(None)
        }

        async fn ids(&self, _: Tier) -> memtier_core::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    // ── Store ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_store_records_metadata_and_content() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let id = hm
            .store_memory(
                StoreMemoryInput::new("Deploy uses blue-green rollout", Tier::Procedural)
                    .with_importance(0.9)
                    .with_tags(["deploy"])
                    .with_keywords(["rollout"])
                    .with_metadata("source_url", "runbook"),
            )
            .await
            .unwrap();

        let meta = hm.get_memory(&id).await.unwrap();
        assert_eq!(meta.id, id);
        assert_eq!(meta.tier, Tier::Procedural);
        assert_eq!(meta.importance, 0.9);
        assert_eq!(meta.access_count, 0);
        assert_eq!(meta.agent_name, "agent0");
        assert_eq!(meta.context_id, "ctx-1");
        assert_eq!(meta.source_type, "agent");
        assert_eq!(meta.created_at, meta.last_accessed);

        let record = index.get(Tier::Procedural, &id).await.unwrap().unwrap();
        assert_eq!(record.content, "Deploy uses blue-green rollout");
        assert_eq!(record.metadata["source_url"], "runbook");
        assert_eq!(record.metadata["tier"], "procedural");
        assert_eq!(record.metadata["tags"], "deploy");

        assert_eq!(hm.stats().await.total_memories, 1);
        assert!(dir.path().join("agent0/metadata_index.json").exists());
        assert!(dir.path().join("agent0/stats.json").exists());
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_input() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let err = hm
            .store_memory(StoreMemoryInput::new("   ", Tier::Working))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        for importance in [1.5, -0.2, f64::NAN] {
            let err = hm
                .store_memory(StoreMemoryInput::new("x", Tier::Working).with_importance(importance))
                .await
                .unwrap_err();
            assert!(err.is_validation());
        }

        assert_eq!(hm.get_memory_summary().await.total, 0);
        assert_eq!(hm.stats().await.total_memories, 0);
        assert_eq!(index.len(Tier::Working).await, 0);
    }

    #[tokio::test]
    async fn test_store_clamps_importance_when_configured() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryConfig::default().with_importance_policy(ImportancePolicy::Clamp);
        let (hm, _) = open_with(&dir, memory).await;

        let id = hm
            .store_memory(StoreMemoryInput::new("x", Tier::Working).with_importance(1.5))
            .await
            .unwrap();
        assert_eq!(hm.get_memory(&id).await.unwrap().importance, 1.0);
    }

    #[tokio::test]
    async fn test_identical_content_is_not_deduplicated() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let a = hm.store_memory(StoreMemoryInput::new("same", Tier::Working)).await.unwrap();
        let b = hm.store_memory(StoreMemoryInput::new("same", Tier::Working)).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(hm.tier_count(Tier::Working).await, 2);
    }

    #[tokio::test]
    async fn test_store_links_existing_parents() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let parent = hm.store_memory(StoreMemoryInput::new("parent", Tier::Semantic)).await.unwrap();
        let child = hm
            .store_memory(
                StoreMemoryInput::new("child", Tier::Working)
                    .with_parent(&parent)
                    .with_parent("ghost"),
            )
            .await
            .unwrap();

        assert_eq!(hm.get_memory(&parent).await.unwrap().child_ids, vec![child.clone()]);
        assert_eq!(
            hm.get_memory(&child).await.unwrap().parent_ids,
            vec![parent, "ghost".to_string()]
        );
    }

    #[tokio::test]
    async fn test_index_failure_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let hm = HierarchicalMemory::open(
            &config_in(&dir, MemoryConfig::default()),
            Arc::new(BrokenIndex { delay: None }),
        )
        .await
        .unwrap();

        let err = hm.store_memory(StoreMemoryInput::new("x", Tier::Working)).await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(hm.get_memory_summary().await.total, 0);
        assert_eq!(hm.stats().await.total_memories, 0);

        let err = hm.retrieve_memory(RetrieveQuery::new("x")).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_index_timeout_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryConfig::default().with_index_timeout(Duration::from_millis(20));
        let hm = HierarchicalMemory::open(
            &config_in(&dir, memory),
            Arc::new(BrokenIndex {
                delay: Some(Duration::from_millis(500)),
            }),
        )
        .await
        .unwrap();

        let err = hm.store_memory(StoreMemoryInput::new("x", Tier::Working)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(hm.get_memory_summary().await.total, 0);
    }

    #[tokio::test]
    async fn test_capture_message() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let long = format!("Please remember the staging database password rotation {}", "x".repeat(600));
        let id = hm.capture_message(&long, MessageRole::User).await.unwrap();

        let meta = hm.get_memory(&id).await.unwrap();
        assert_eq!(meta.tier, Tier::Working);
        assert_eq!(meta.importance, 0.7);
        assert_eq!(meta.source_type, "conversation");
        assert_eq!(meta.keywords[..3], ["please", "remember", "staging"]);

        let record = index.get(Tier::Working, &id).await.unwrap().unwrap();
        assert_eq!(record.content.chars().count(), 500);
        assert_eq!(record.metadata["role"], "user");

        let id = hm.capture_message("ok", MessageRole::Agent).await.unwrap();
        assert_eq!(hm.get_memory(&id).await.unwrap().importance, 0.5);
    }

    // ── Capacity ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_lowest_retention_evicted_at_capacity() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let weak = hm
            .store_memory(StoreMemoryInput::new("trivial note", Tier::Working).with_importance(0.1))
            .await
            .unwrap();
        for i in 0..50 {
            hm.store_memory(StoreMemoryInput::new(format!("note {i}"), Tier::Working))
                .await
                .unwrap();
        }

        assert_eq!(hm.tier_count(Tier::Working).await, 50);
        assert!(hm.get_memory(&weak).await.is_none());
        assert!(index.get(Tier::Working, &weak).await.unwrap().is_none());
        assert_eq!(index.len(Tier::Working).await, 50);

        let stats = hm.stats().await;
        assert_eq!(stats.total_memories, 51);
        assert_eq!(stats.prunings, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_increasing_importance_evicts_least_important() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let mut ids = Vec::new();
        for i in 1..=51 {
            let id = hm
                .store_memory(
                    StoreMemoryInput::new(format!("observation {i}"), Tier::Working)
                        .with_importance(0.01 * i as f64),
                )
                .await
                .unwrap();
            ids.push(id);
        }

        assert_eq!(hm.tier_count(Tier::Working).await, 50);
        assert!(hm.get_memory(&ids[0]).await.is_none());
        assert!(index.get(Tier::Working, &ids[0]).await.unwrap().is_none());
        for id in &ids[1..] {
            assert!(hm.get_memory(id).await.is_some());
        }
        assert_eq!(hm.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_capacity_is_per_tier() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryConfig::default().with_capacity(Tier::Working, 2);
        let (hm, _) = open_with(&dir, memory).await;

        for i in 0..3 {
            hm.store_memory(StoreMemoryInput::new(format!("w{i}"), Tier::Working)).await.unwrap();
            hm.store_memory(StoreMemoryInput::new(format!("s{i}"), Tier::Semantic)).await.unwrap();
        }

        assert_eq!(hm.tier_count(Tier::Working).await, 2);
        assert_eq!(hm.tier_count(Tier::Semantic).await, 3);
    }

    #[tokio::test]
    async fn test_enforce_capacity_noop_under_capacity() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;
        hm.store_memory(StoreMemoryInput::new("a", Tier::Episodic)).await.unwrap();

        let report = hm.enforce_capacity(Tier::Episodic).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.remaining[&Tier::Episodic], 1);
        assert_eq!(hm.stats().await.prunings, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stores_at_capacity_boundary() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryConfig::default().with_capacity(Tier::Working, 2);
        let (hm, _) = open_with(&dir, memory).await;
        let hm = Arc::new(hm);

        hm.store_memory(StoreMemoryInput::new("seed", Tier::Working)).await.unwrap();

        let a = tokio::spawn({
            let hm = hm.clone();
            async move { hm.store_memory(StoreMemoryInput::new("left", Tier::Working)).await }
        });
        let b = tokio::spawn({
            let hm = hm.clone();
            async move { hm.store_memory(StoreMemoryInput::new("right", Tier::Working)).await }
        });
        let id_a = a.await.unwrap().unwrap();
        let id_b = b.await.unwrap().unwrap();

        assert_ne!(id_a, id_b);
        assert!(hm.tier_count(Tier::Working).await <= 2);

        let stats = hm.stats().await;
        assert_eq!(stats.total_memories, 3);
        assert_eq!(stats.evictions, 1);
        // Every store is accounted for: live or evicted
        assert_eq!(hm.tier_count(Tier::Working).await as u64 + stats.evictions, 3);
    }

    // ── Retrieve ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_retrieve_ranks_and_records_access() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let high = hm
            .store_memory(StoreMemoryInput::new("deploy checklist", Tier::Semantic).with_importance(0.9))
            .await
            .unwrap();
        let low = hm
            .store_memory(StoreMemoryInput::new("deploy notes", Tier::Working).with_importance(0.4))
            .await
            .unwrap();
        hm.store_memory(StoreMemoryInput::new("lunch order", Tier::Working)).await.unwrap();

        let results = hm.retrieve_memory(RetrieveQuery::new("deploy")).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.metadata.id.as_str()).collect();
        assert_eq!(ids, vec![high.as_str(), low.as_str()]);
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].similarity, 1.0);
        assert_eq!(results[0].metadata.access_count, 1);
        assert_eq!(results[0].document["tier"], "semantic");

        assert_eq!(hm.get_memory(&high).await.unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_retrieve_importance_threshold_filters_everything() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        for importance in [0.3, 0.5, 0.8] {
            hm.store_memory(StoreMemoryInput::new("deploy step", Tier::Working).with_importance(importance))
                .await
                .unwrap();
        }

        let results = hm
            .retrieve_memory(RetrieveQuery::new("deploy").with_importance_threshold(0.9))
            .await
            .unwrap();
        assert!(results.is_empty());

        let summary = hm.get_memory_summary().await;
        assert_eq!(summary.total_accesses, 0);
    }

    #[tokio::test]
    async fn test_retrieve_filters_tier_tags_and_time() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let ops = hm
            .store_memory(StoreMemoryInput::new("deploy ops", Tier::Episodic).with_tags(["ops"]))
            .await
            .unwrap();
        hm.store_memory(StoreMemoryInput::new("deploy dev", Tier::Episodic).with_tags(["dev"]))
            .await
            .unwrap();
        hm.store_memory(StoreMemoryInput::new("deploy other tier", Tier::Working).with_tags(["ops"]))
            .await
            .unwrap();

        let results = hm
            .retrieve_memory(RetrieveQuery::new("deploy").in_tier(Tier::Episodic).with_tags(["ops"]))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.id, ops);

        let now = Utc::now();
        let results = hm
            .retrieve_memory(
                RetrieveQuery::new("deploy").between(now - ChronoDuration::days(3), now - ChronoDuration::days(2)),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_limit_applies_after_access() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(hm.store_memory(StoreMemoryInput::new("deploy", Tier::Working)).await.unwrap());
        }
        ids.sort();

        let results = hm.retrieve_memory(RetrieveQuery::new("deploy").with_limit(2)).await.unwrap();
        assert_eq!(results.len(), 2);
        // Equal scores: ascending id wins
        assert_eq!(results[0].metadata.id, ids[0]);
        assert_eq!(results[1].metadata.id, ids[1]);

        // The dropped candidate was still touched
        assert_eq!(hm.get_memory(&ids[2]).await.unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_retrieve_edge_cases() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;
        let id = hm.store_memory(StoreMemoryInput::new("deploy", Tier::Working)).await.unwrap();

        assert!(hm.retrieve_memory(RetrieveQuery::new("  ")).await.unwrap_err().is_validation());
        assert!(hm.retrieve_memory(RetrieveQuery::new("deploy").with_limit(0)).await.unwrap().is_empty());
        assert_eq!(hm.get_memory(&id).await.unwrap().access_count, 0);
    }

    #[tokio::test]
    async fn test_retrieve_skips_hits_without_metadata() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        index
            .insert(Tier::Working, "stray", "deploy leftovers", &DocumentMetadata::new())
            .await
            .unwrap();
        let id = hm.store_memory(StoreMemoryInput::new("deploy", Tier::Working)).await.unwrap();

        let results = hm.retrieve_memory(RetrieveQuery::new("deploy")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.id, id);
    }

    // ── Consolidation ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_working_promoted_to_episodic() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let id = hm
            .store_memory(StoreMemoryInput::new("recurring incident fix", Tier::Working).with_importance(0.8))
            .await
            .unwrap();
        age(&hm, &id, 8, 5).await;

        let result = hm.consolidate_memories(Some(Tier::Working)).await.unwrap();
        assert_eq!(result.candidates, 1);
        assert_eq!(result.promoted.len(), 1);
        assert_eq!(result.promoted[0].from, Tier::Working);
        assert_eq!(result.promoted[0].to, Tier::Episodic);
        assert!(result.errors.is_empty());

        let meta = hm.get_memory(&id).await.unwrap();
        assert_eq!(meta.tier, Tier::Episodic);
        assert_eq!(meta.importance, 0.8);
        assert!(meta.consolidation_score > 0.0);

        assert!(index.get(Tier::Working, &id).await.unwrap().is_none());
        let moved = index.get(Tier::Episodic, &id).await.unwrap().unwrap();
        assert_eq!(moved.content, "recurring incident fix");
        assert_eq!(moved.metadata["tier"], "episodic");

        let stats = hm.stats().await;
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.consolidations, 1);
    }

    #[tokio::test]
    async fn test_promotion_moves_one_tier_per_pass() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let id = hm
            .store_memory(StoreMemoryInput::new("busy fact", Tier::Working).with_importance(0.9))
            .await
            .unwrap();
        age(&hm, &id, 30, 50).await;

        hm.consolidate_memories(None).await.unwrap();
        assert_eq!(hm.get_memory(&id).await.unwrap().tier, Tier::Episodic);

        hm.consolidate_memories(None).await.unwrap();
        assert_eq!(hm.get_memory(&id).await.unwrap().tier, Tier::Semantic);

        hm.consolidate_memories(None).await.unwrap();
        assert_eq!(hm.get_memory(&id).await.unwrap().tier, Tier::Semantic);
        assert_eq!(hm.stats().await.promotions, 2);
        assert_eq!(hm.stats().await.consolidations, 3);
    }

    #[tokio::test]
    async fn test_procedural_never_promoted() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let id = hm
            .store_memory(StoreMemoryInput::new("how to rotate keys", Tier::Procedural).with_importance(1.0))
            .await
            .unwrap();
        age(&hm, &id, 100, 100).await;

        let result = hm.consolidate_memories(None).await.unwrap();
        assert!(result.promoted.is_empty());
        assert_eq!(hm.get_memory(&id).await.unwrap().tier, Tier::Procedural);
    }

    #[tokio::test]
    async fn test_young_candidates_not_promoted() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let id = hm
            .store_memory(StoreMemoryInput::new("fresh", Tier::Working).with_importance(0.9))
            .await
            .unwrap();
        age(&hm, &id, 2, 5).await;

        let result = hm.consolidate_memories(Some(Tier::Working)).await.unwrap();
        assert_eq!(result.candidates, 1);
        assert!(result.promoted.is_empty());
        assert_eq!(hm.stats().await.promotions, 0);
    }

    #[tokio::test]
    async fn test_promotion_aborted_when_content_missing() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let id = hm
            .store_memory(StoreMemoryInput::new("lost content", Tier::Working).with_importance(0.9))
            .await
            .unwrap();
        age(&hm, &id, 10, 5).await;
        index.delete(Tier::Working, &id).await.unwrap();

        let result = hm.consolidate_memories(Some(Tier::Working)).await.unwrap();
        assert!(result.promoted.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(hm.get_memory(&id).await.unwrap().tier, Tier::Working);
        assert_eq!(hm.stats().await.promotions, 0);
    }

    #[tokio::test]
    async fn test_similar_candidates_are_linked_not_merged() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let a = hm
            .store_memory(StoreMemoryInput::new("restart the api worker after deploy", Tier::Semantic))
            .await
            .unwrap();
        let b = hm
            .store_memory(StoreMemoryInput::new("restart the api worker after deploy", Tier::Semantic))
            .await
            .unwrap();
        age(&hm, &a, 1, 3).await;
        age(&hm, &b, 1, 3).await;

        let result = hm.consolidate_memories(Some(Tier::Semantic)).await.unwrap();
        assert_eq!(result.linked.len(), 1);

        assert_eq!(hm.get_memory(&a).await.unwrap().related_ids, vec![b.clone()]);
        assert_eq!(hm.get_memory(&b).await.unwrap().related_ids, vec![a.clone()]);
        assert_eq!(index.len(Tier::Semantic).await, 2);

        // Already linked pairs are not reported again
        let result = hm.consolidate_memories(Some(Tier::Semantic)).await.unwrap();
        assert!(result.linked.is_empty());
    }

    #[tokio::test]
    async fn test_promotion_respects_target_capacity() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryConfig::default().with_capacity(Tier::Episodic, 1);
        let (hm, index) = open_with(&dir, memory).await;

        let resident = hm
            .store_memory(StoreMemoryInput::new("resident", Tier::Episodic).with_importance(0.1))
            .await
            .unwrap();
        let id = hm
            .store_memory(StoreMemoryInput::new("promoted", Tier::Working).with_importance(0.9))
            .await
            .unwrap();
        age(&hm, &id, 8, 5).await;

        hm.consolidate_memories(Some(Tier::Working)).await.unwrap();

        assert_eq!(hm.tier_count(Tier::Episodic).await, 1);
        assert!(hm.get_memory(&resident).await.is_none());
        assert!(index.get(Tier::Episodic, &resident).await.unwrap().is_none());
        assert_eq!(hm.get_memory(&id).await.unwrap().tier, Tier::Episodic);
    }

    /// Index that records the metadata count of one tier on every insert
    struct TierWatchIndex {
        inner: InMemoryIndex,
        watched: Tier,
        memory: std::sync::OnceLock<std::sync::Weak<HierarchicalMemory>>,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl SimilarityIndex for TierWatchIndex {
        async fn insert(&self, tier: Tier, id: &str, content: &str, metadata: &DocumentMetadata) -> memtier_core::Result<()> {
            if let Some(hm) = self.memory.get().and_then(std::sync::Weak::upgrade) {
                let count = hm.tier_count(self.watched).await;
                self.peak.fetch_max(count, std::sync::atomic::Ordering::SeqCst);
            }
            self.inner.insert(tier, id, content, metadata).await
        }

        async fn search(&self, tier: Tier, query: &str, limit: usize, floor: f64) -> memtier_core::Result<Vec<SearchHit>> {
            self.inner.search(tier, query, limit, floor).await
        }

        async fn delete(&self, tier: Tier, id: &str) -> memtier_core::Result<bool> {
            self.inner.delete(tier, id).await
        }

        async fn get(&self, tier: Tier, id: &str) -> memtier_core::Result<Option<MemoryRecord>> {
            self.inner.get(tier, id).await
        }

        async fn ids(&self, tier: Tier) -> memtier_core::Result<Vec<String>> {
            self.inner.ids(tier).await
        }
    }

    #[tokio::test]
    async fn test_promotions_keep_target_within_capacity_bound() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let memory = MemoryConfig::default().with_capacity(Tier::Episodic, 2);
        let index = Arc::new(TierWatchIndex {
            inner: InMemoryIndex::new(),
            watched: Tier::Episodic,
            memory: std::sync::OnceLock::new(),
            peak: std::sync::atomic::AtomicUsize::new(0),
        });
        let hm = Arc::new(
            HierarchicalMemory::open(&config_in(&dir, memory), index.clone())
                .await
                .unwrap(),
        );

        for i in 0..2 {
            hm.store_memory(StoreMemoryInput::new(format!("resident {i}"), Tier::Episodic).with_importance(0.1))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let id = hm
                .store_memory(StoreMemoryInput::new(format!("incident {i}"), Tier::Working).with_importance(0.9))
                .await
                .unwrap();
            age(&hm, &id, 8, 5).await;
        }

        index.memory.set(Arc::downgrade(&hm)).ok();
        let result = hm.consolidate_memories(Some(Tier::Working)).await.unwrap();

        assert_eq!(result.promoted.len(), 5);
        assert!(index.peak.load(std::sync::atomic::Ordering::SeqCst) <= 3);
        assert_eq!(hm.tier_count(Tier::Episodic).await, 2);
        assert_eq!(index.inner.len(Tier::Episodic).await, 2);
    }

    // ── Expiry & GC ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_expire_idle_working_memories() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        let idle = hm.store_memory(StoreMemoryInput::new("idle", Tier::Working)).await.unwrap();
        let fresh = hm.store_memory(StoreMemoryInput::new("fresh", Tier::Working)).await.unwrap();
        let fact = hm.store_memory(StoreMemoryInput::new("fact", Tier::Semantic)).await.unwrap();
        age(&hm, &idle, 2, 0).await;
        age(&hm, &fact, 400, 0).await;

        let report = hm.expire_memories().await.unwrap();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].id, idle);
        assert_eq!(report.remaining[&Tier::Working], 1);

        assert!(hm.get_memory(&idle).await.is_none());
        assert!(hm.get_memory(&fresh).await.is_some());
        assert!(hm.get_memory(&fact).await.is_some());
        assert!(index.get(Tier::Working, &idle).await.unwrap().is_none());
        assert_eq!(hm.stats().await.expirations, 1);
    }

    #[tokio::test]
    async fn test_collect_garbage() {
        let dir = TempDir::new().unwrap();
        let (hm, index) = open(&dir).await;

        index
            .insert(Tier::Episodic, "orphan", "left behind", &DocumentMetadata::new())
            .await
            .unwrap();
        let id = hm.store_memory(StoreMemoryInput::new("kept", Tier::Working)).await.unwrap();
        let missing = hm.store_memory(StoreMemoryInput::new("gone", Tier::Working)).await.unwrap();
        index.delete(Tier::Working, &missing).await.unwrap();

        // Freshly stored content is inside the grace window
        let report = hm.collect_garbage().await.unwrap();
        assert_eq!(report.orphaned_content, vec![(Tier::Episodic, "orphan".to_string())]);
        assert_eq!(report.missing_content, vec![(Tier::Working, missing.clone())]);

        assert!(index.get(Tier::Episodic, "orphan").await.unwrap().is_none());
        assert!(index.get(Tier::Working, &id).await.unwrap().is_some());
        assert!(hm.get_memory(&missing).await.is_some());
    }

    // ── Metadata operations ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_tags_and_importance() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let a = hm.store_memory(StoreMemoryInput::new("a", Tier::Working)).await.unwrap();
        let b = hm.store_memory(StoreMemoryInput::new("b", Tier::Working)).await.unwrap();

        hm.tag_memory(&a, ["infra", "urgent"]).await.unwrap();
        hm.tag_memory(&b, ["infra"]).await.unwrap();

        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(hm.memories_by_tag(&["infra"]).await, expected);
        assert_eq!(hm.memories_by_tag(&["urgent", "missing"]).await, vec![a.clone()]);

        hm.set_importance(&a, 0.95).await.unwrap();
        assert_eq!(hm.get_memory(&a).await.unwrap().importance, 0.95);
        assert!(hm.set_importance(&a, 2.0).await.unwrap_err().is_validation());
        assert!(hm.set_importance("nope", 0.5).await.unwrap_err().is_not_found());
        assert!(hm.tag_memory("nope", ["x"]).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_related_memories_traversal() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let a = hm.store_memory(StoreMemoryInput::new("a", Tier::Semantic)).await.unwrap();
        let b = hm.store_memory(StoreMemoryInput::new("b", Tier::Semantic)).await.unwrap();
        let c = hm.store_memory(StoreMemoryInput::new("c", Tier::Semantic)).await.unwrap();
        let d = hm.store_memory(StoreMemoryInput::new("d", Tier::Semantic)).await.unwrap();

        hm.link_memories(&a, &b).await.unwrap();
        hm.link_memories(&b, &c).await.unwrap();
        hm.link_memories(&c, &d).await.unwrap();

        assert_eq!(hm.related_memories(&a, DEFAULT_RELATED_DEPTH).await.unwrap(), vec![b.clone(), c.clone()]);
        assert_eq!(hm.related_memories(&a, 1).await.unwrap(), vec![b.clone()]);
        assert_eq!(hm.related_memories(&a, 5).await.unwrap(), vec![b.clone(), c.clone(), d.clone()]);

        assert!(hm.link_memories(&a, &a).await.unwrap_err().is_validation());
        assert!(hm.link_memories(&a, "nope").await.unwrap_err().is_not_found());
        assert!(hm.related_memories("nope", 2).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_related_memories_tolerates_dangling_links() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        let child = hm
            .store_memory(StoreMemoryInput::new("child", Tier::Working).with_parent("evicted-parent"))
            .await
            .unwrap();

        assert_eq!(
            hm.related_memories(&child, 2).await.unwrap(),
            vec!["evicted-parent".to_string()]
        );
    }

    // ── Summary & persistence ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_summary() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;

        hm.store_memory(StoreMemoryInput::new("a", Tier::Working).with_importance(1.0)).await.unwrap();
        hm.store_memory(StoreMemoryInput::new("b", Tier::Semantic).with_importance(0.2)).await.unwrap();

        let summary = hm.get_memory_summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_tier[&Tier::Working], 1);
        assert_eq!(summary.by_tier[&Tier::Procedural], 0);
        assert_eq!(summary.by_importance[&memtier_core::ImportanceBand::Critical], 1);
        assert_eq!(summary.by_importance[&memtier_core::ImportanceBand::Low], 1);
        assert_eq!(summary.age_distribution.today, 2);
        assert_eq!(summary.stats.total_memories, 2);
    }

    #[tokio::test]
    async fn test_reopen_restores_index_and_stats() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(InMemoryIndex::new());
        let config = config_in(&dir, MemoryConfig::default());

        let (id, before) = {
            let hm = HierarchicalMemory::open(&config, index.clone()).await.unwrap();
            let id = hm
                .store_memory(
                    StoreMemoryInput::new("persisted fact", Tier::Semantic)
                        .with_importance(0.65)
                        .with_tags(["b", "a"])
                        .with_keywords(["persisted", "fact"]),
                )
                .await
                .unwrap();
            (id.clone(), hm.get_memory(&id).await.unwrap())
        };

        let hm = HierarchicalMemory::open(&config, index).await.unwrap();
        let after = hm.get_memory(&id).await.unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.tier, before.tier);
        assert_eq!(after.importance, before.importance);
        assert_eq!(after.tags, before.tags);
        assert_eq!(after.keywords, before.keywords);
        assert_eq!(after.created_at.timestamp(), before.created_at.timestamp());
        assert_eq!(after.last_accessed.timestamp(), before.last_accessed.timestamp());
        assert_eq!(hm.stats().await.total_memories, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_state() {
        let dir = TempDir::new().unwrap();
        let memory_dir = dir.path().join("agent0");

        let mut memory = MemoryConfig::default();
        memory.persistence.backoff_base_ms = 1;
        let config = SDKConfig::new("agent0")
            .with_memory_dir(&memory_dir)
            .with_memory(memory);
        let hm = HierarchicalMemory::open(&config, Arc::new(InMemoryIndex::new()))
            .await
            .unwrap();

        // A file where the directory should be makes every write fail
        std::fs::write(&memory_dir, "not a directory").unwrap();

        let err = hm.store_memory(StoreMemoryInput::new("x", Tier::Working)).await.unwrap_err();
        match err {
            SDKError::Persistence { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hm.tier_count(Tier::Working).await, 1);
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_background_maintenance_promotes_and_stops() {
        let dir = TempDir::new().unwrap();
        let (hm, _) = open(&dir).await;
        let hm = Arc::new(hm);

        let id = hm
            .store_memory(StoreMemoryInput::new("nightly job fix", Tier::Working).with_importance(0.9))
            .await
            .unwrap();
        age(&hm, &id, 8, 5).await;
        // Keep it from expiring before it is promoted
        edit(&hm, &id, |m| m.last_accessed = Utc::now()).await;

        hm.start_background_maintenance(Duration::from_millis(20)).await;
        assert!(hm.is_maintenance_running().await);

        let mut promoted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if hm.get_memory(&id).await.is_some_and(|m| m.tier == Tier::Episodic) {
                promoted = true;
                break;
            }
        }
        assert!(promoted);

        hm.stop_background_maintenance().await;
        assert!(!hm.is_maintenance_running().await);
        assert!(hm.stats().await.consolidations >= 1);
    }
}
