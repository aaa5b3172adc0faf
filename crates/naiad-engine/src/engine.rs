//! Memory engine facade
//!
//! Owns the graph store, the two model providers, and the I/O context, and
//! exposes the public surface: `add_episode`, `search`, `traverse`, node
//! and edge accessors, `sleep`, and the auto-sleep scheduler. There is no
//! global state: every cache and scheduler handle lives on an explicit
//! engine instance, and multiple engines coexist freely.

use chrono::{DateTime, Utc};
use naiad_core::io::IoContext;
use naiad_dst::{DeterministicRng, SimClock};
use naiad_graph::{
    EntityEdge, EpisodeType, EpisodicNode, GraphStore, Node, SimGraphStore,
};
use naiad_providers::{
    EmbeddingProvider, LlmProvider, SimEmbeddingProvider, SimLlmProvider,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::ingestion::{EpisodeInput, IngestionPipeline};
use crate::retrieval::{RetrievalEngine, SearchParams, TraverseParams, TraverseResult};
use crate::scheduler::{isolated, ms_until_next, AutoSleepConfig};
use crate::sleep::{SleepEngine, SleepOptions, SleepReport, SleepTarget};

/// Group used when the caller doesn't scope a call.
pub const DEFAULT_GROUP_ID: &str = "default";

// =============================================================================
// Configuration & parameters
// =============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_group_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_group_id: DEFAULT_GROUP_ID.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_group_id(mut self, group_id: impl Into<String>) -> Self {
        let group_id = group_id.into();
        assert!(!group_id.is_empty(), "group_id cannot be empty");
        self.default_group_id = group_id;
        self
    }
}

/// Input to [`MemoryEngine::add_episode`].
#[derive(Debug, Clone)]
pub struct AddEpisodeParams {
    pub content: String,
    pub episode_type: Option<EpisodeType>,
    pub group_id: Option<String>,
    pub reference_id: Option<String>,
    /// When the described event occurred; defaults to ingestion time.
    pub valid_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl AddEpisodeParams {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            episode_type: None,
            group_id: None,
            reference_id: None,
            valid_at: None,
            metadata: None,
        }
    }

    pub fn with_episode_type(mut self, episode_type: EpisodeType) -> Self {
        self.episode_type = Some(episode_type);
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_valid_at(mut self, valid_at: DateTime<Utc>) -> Self {
        self.valid_at = Some(valid_at);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// =============================================================================
// Engine
// =============================================================================

struct AutoSleepTask {
    handle: tokio::task::JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

struct EngineInner {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    io: IoContext,
    config: EngineConfig,
    /// Serializes sleep cycles: never more than one in flight per engine.
    sleep_lock: tokio::sync::Mutex<()>,
    auto_sleep: Mutex<Option<AutoSleepTask>>,
}

/// The engine facade. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl MemoryEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        io: IoContext,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                llm,
                embedder,
                io,
                config,
                sleep_lock: tokio::sync::Mutex::new(()),
                auto_sleep: Mutex::new(None),
            }),
        }
    }

    /// Fully simulated engine: in-memory store, deterministic providers,
    /// simulated clock. Seeded, so runs replay exactly.
    pub fn sim(seed: u64) -> Self {
        let rng = DeterministicRng::new(seed);
        let io = IoContext::new(Arc::new(SimClock::default()), Arc::new(rng));

        Self::new(
            Arc::new(SimGraphStore::new()),
            Arc::new(SimLlmProvider::new()),
            Arc::new(SimEmbeddingProvider::default_384()),
            io,
            EngineConfig::default(),
        )
    }

    fn group_or_default<'a>(&'a self, group_id: &'a Option<String>) -> &'a str {
        group_id
            .as_deref()
            .unwrap_or(&self.inner.config.default_group_id)
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Ingest one episode: embed, persist, extract, resolve, link.
    pub async fn add_episode(&self, params: AddEpisodeParams) -> EngineResult<EpisodicNode> {
        if params.content.is_empty() {
            return Err(crate::EngineError::validation("content cannot be empty"));
        }

        let group_id = self.group_or_default(&params.group_id).to_string();
        let pipeline = IngestionPipeline::new(
            self.inner.store.clone(),
            self.inner.llm.clone(),
            self.inner.embedder.clone(),
            self.inner.io.clone(),
        );

        pipeline
            .add_episode(EpisodeInput {
                content: params.content,
                episode_type: params.episode_type.unwrap_or_default(),
                group_id,
                reference_id: params.reference_id,
                valid_at: params.valid_at,
                metadata: params.metadata,
            })
            .await
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Semantic search with community routing, optional graph expansion,
    /// and temporal re-ranking. May return more than `limit` nodes when
    /// expansion kicks in; the caller decides further trimming.
    pub async fn search(&self, params: SearchParams) -> EngineResult<Vec<Node>> {
        let group_id = self.group_or_default(&params.group_id).to_string();
        RetrievalEngine::new(self.inner.store.clone(), self.inner.embedder.clone())
            .search(&params, &group_id)
            .await
    }

    /// Induced subgraph around a start entity.
    pub async fn traverse(&self, params: TraverseParams) -> EngineResult<TraverseResult> {
        let group_id = self.group_or_default(&params.group_id).to_string();
        RetrievalEngine::new(self.inner.store.clone(), self.inner.embedder.clone())
            .traverse(&params, &group_id)
            .await
    }

    // =========================================================================
    // Node / edge accessors
    // =========================================================================

    pub async fn get_node(&self, uuid: Uuid) -> EngineResult<Option<Node>> {
        Ok(self.inner.store.node_by_uuid(uuid).await?)
    }

    pub async fn get_edge(&self, uuid: Uuid) -> EngineResult<Option<EntityEdge>> {
        Ok(self.inner.store.entity_edge_by_uuid(uuid).await?)
    }

    pub async fn delete_node(&self, uuid: Uuid) -> EngineResult<()> {
        Ok(self.inner.store.detach_delete(uuid).await?)
    }

    pub async fn delete_edge(&self, uuid: Uuid) -> EngineResult<()> {
        Ok(self.inner.store.delete_entity_edge(uuid).await?)
    }

    // =========================================================================
    // Sleep
    // =========================================================================

    /// Run one sleep cycle. Cycles are serialized per engine instance.
    pub async fn sleep(
        &self,
        target: SleepTarget,
        options: SleepOptions,
    ) -> EngineResult<SleepReport> {
        let _guard = self.inner.sleep_lock.lock().await;

        SleepEngine::new(
            self.inner.store.clone(),
            self.inner.llm.clone(),
            self.inner.embedder.clone(),
            self.inner.io.clone(),
        )
        .sleep(&target, &options)
        .await
    }

    /// Start the daily auto-sleep task, replacing any previous one.
    pub fn start_auto_sleep(&self, config: AutoSleepConfig) {
        self.stop_auto_sleep();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        // The task holds the engine weakly, so dropping the last engine
        // handle tears the scheduler down instead of leaking it.
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else { break };
                let delay = ms_until_next(
                    inner.io.now_ms(),
                    config.hour,
                    config.minute,
                    config.utc_offset,
                );
                let io = inner.io.clone();
                drop(inner);

                tracing::debug!(delay_ms = delay, "auto-sleep armed");
                io.sleep_ms(delay).await;

                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                let Some(inner) = weak.upgrade() else { break };
                let engine = MemoryEngine { inner };

                match engine
                    .sleep(config.target.clone(), config.options.clone())
                    .await
                {
                    Ok(report) => {
                        if let Some(callback) = &config.on_complete {
                            isolated("on_complete", || callback(&report));
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "auto-sleep cycle failed; retrying next day");
                        if let Some(callback) = &config.on_error {
                            isolated("on_error", || callback(&error));
                        }
                    }
                }
                // Loop re-arms from the post-run clock, absorbing drift,
                // long cycles, and clock jumps.
            }
        });

        let mut slot = self.inner.auto_sleep.lock().unwrap();
        *slot = Some(AutoSleepTask { handle, stop });
    }

    /// Cancel the auto-sleep task, if any.
    pub fn stop_auto_sleep(&self) {
        let mut slot = self.inner.auto_sleep.lock().unwrap();
        if let Some(task) = slot.take() {
            task.stop.store(true, Ordering::SeqCst);
            task.handle.abort();
        }
    }

    /// Whether the auto-sleep task is currently scheduled.
    pub fn auto_sleep_active(&self) -> bool {
        self.inner.auto_sleep.lock().unwrap().is_some()
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.auto_sleep.lock() {
            if let Some(task) = slot.take() {
                task.stop.store(true, Ordering::SeqCst);
                task.handle.abort();
            }
        }
    }
}
