use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use cortex_domain::Config;
use cortex_llm::LlmClient;
use cortex_memory::MemoryClient;
use cortex_skills::SkillRegistry;
use cortex_store::Store;
use parking_lot::Mutex;

/// Shared process state (spec.md §5 "Shared state"): the database
/// handle, the extraction in-flight map, and the server start time are
/// the only mutable globals; everything else here is immutable after
/// startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub registry: Arc<SkillRegistry>,
    pub llm: Arc<LlmClient>,
    pub memory: Arc<MemoryClient>,
    /// Topic keys with an extraction task currently running. Guarded by
    /// the mutex so one topic never runs two extraction coroutines
    /// concurrently (spec.md §4.11).
    pub extraction_inflight: Arc<Mutex<HashSet<String>>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        registry: Arc<SkillRegistry>,
        llm: Arc<LlmClient>,
        memory: Arc<MemoryClient>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            llm,
            memory,
            extraction_inflight: Arc::new(Mutex::new(HashSet::new())),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
