//! Core records (spec.md §3). These are the row shapes `cortex-store`
//! reads and writes; they carry no persistence logic themselves.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl InboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxStatus::Pending => "pending",
            InboxStatus::Processing => "processing",
            InboxStatus::Done => "done",
            InboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Leased,
    Delivered,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Leased => "leased",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "delivered" => Some(Self::Delivered),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One inbound event, as ingested through `POST /ingest` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub source: String,
    pub external_message_id: String,
    pub topic_key: String,
    pub user_id: String,
    pub text: String,
    pub occurred_at: i64,
    pub idempotency_key: String,
    pub metadata: Option<serde_json::Value>,
    pub status: InboxStatus,
    pub attempts: i64,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields accepted by `InboxQueue::enqueue`.
#[derive(Debug, Clone)]
pub struct NewInboxMessage {
    pub source: String,
    pub external_message_id: String,
    pub topic_key: String,
    pub user_id: String,
    pub text: String,
    pub occurred_at: i64,
    pub idempotency_key: String,
    pub metadata: Option<serde_json::Value>,
}

/// One outbound reply, leased out by connector processes (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    pub source: String,
    pub topic_key: String,
    pub text: String,
    pub payload: Option<serde_json::Value>,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub next_attempt_at: i64,
    pub lease_token: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A row returned by `OutboxQueue::poll` (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolledOutboxMessage {
    pub message_id: String,
    pub lease_token: String,
    pub topic_key: String,
    pub text: String,
    pub payload: Option<serde_json::Value>,
}

/// The outcome of `OutboxQueue::ack` (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Delivered,
    AlreadyDelivered,
    LeaseConflict,
    NotFound,
}

/// One conversational turn, append-only within a topic (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub rowid: i64,
    pub topic_key: String,
    pub role: TurnRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub created_at: i64,
}

/// Per-topic extraction progress (spec.md §3 ExtractionCursor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionCursor {
    pub topic_key: String,
    pub last_extracted_rowid: i64,
    pub turns_since_extraction: i64,
}

/// Per-topic rolling summary (spec.md §3 TopicSummary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummary {
    pub topic_key: String,
    pub summary: String,
    pub updated_at: i64,
}
