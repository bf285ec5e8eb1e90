use serde::Serialize;

/// Structured trace events emitted across the processor, agent loop, and
/// extraction pipeline. Mirrors `tracing::info!` call sites the teacher
/// emits ad hoc, but collected behind one serializable enum so every
/// event carries a stable `event` tag in JSON logs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    InboxClaimed {
        id: String,
        topic_key: String,
        attempts: i64,
    },
    InboxCompleted {
        id: String,
        status: &'static str,
    },
    LlmRequest {
        model: String,
        duration_ms: u64,
        had_tool_calls: bool,
    },
    LlmFailure {
        model: String,
        error: String,
    },
    AgentRoundCompleted {
        round: u32,
        tool_calls: usize,
    },
    AgentMaxRoundsReached {
        rounds: u32,
    },
    ExtractionSkippedInFlight {
        topic_key: String,
    },
    ExtractionBatchProcessed {
        topic_key: String,
        turns: usize,
        facts_stored: usize,
    },
    ExtractionFailed {
        topic_key: String,
        error: String,
    },
    OutboxEnqueued {
        message_id: String,
        topic_key: String,
    },
    MemoryRecallDegraded {
        topic_key: String,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cortex_event");
    }
}
