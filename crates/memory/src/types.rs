use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub strength: f64,
    #[serde(default)]
    pub relevance: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct RecallRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecallResponse {
    #[serde(default)]
    pub memories: Vec<Memory>,
    #[serde(default)]
    pub fallback_mode: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct RememberRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RememberResult {
    pub id: String,
    pub status: String,
}
