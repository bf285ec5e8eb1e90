//! C8 — Memory Client. Dual-scope recall and upsert-remember against the
//! external memory service (spec.md §4.8), grounded in the teacher's
//! `serialmemory-client::rest` REST adapter with the retry engine
//! dropped: infrastructure failures here degrade silently rather than
//! retrying, per spec.

use std::time::Duration;

use crate::types::{Memory, RecallRequest, RecallResponse, RememberRequest, RememberResult};

const RECALL_TIMEOUT: Duration = Duration::from_secs(3);
const DUAL_RECALL_LIMIT: u32 = 4;
const DUAL_RECALL_TRUNCATE: usize = 8;

pub struct MemoryClient {
    http: reqwest::Client,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Best-effort recall: any failure (timeout, connection, non-2xx,
    /// bad JSON) logs and returns an empty list rather than propagating.
    pub async fn recall(&self, query: &str, endpoint: &str, limit: Option<u32>, scope_id: Option<&str>) -> Vec<Memory> {
        let url = format!("{}/recall", endpoint.trim_end_matches('/'));
        let req = RecallRequest {
            query: query.to_string(),
            limit,
            scope_id: scope_id.map(String::from),
        };

        let result = self
            .http
            .post(&url)
            .timeout(RECALL_TIMEOUT)
            .json(&req)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<RecallResponse>().await {
                Ok(body) => body.memories,
                Err(e) => {
                    tracing::warn!(error = %e, "memory recall: invalid response body");
                    Vec::new()
                }
            },
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "memory recall: non-2xx response");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory recall: request failed");
                Vec::new()
            }
        }
    }

    /// Two parallel recalls (topic-scoped, global), each capped at 4,
    /// unioned by memory id with topic-scoped entries taking precedence
    /// on collision, truncated to 8. A failing side contributes zero
    /// rather than failing the whole call.
    pub async fn recall_dual(&self, query: &str, topic_key: &str, endpoint: &str) -> Vec<Memory> {
        let (scoped, global) = tokio::join!(
            self.recall(query, endpoint, Some(DUAL_RECALL_LIMIT), Some(topic_key)),
            self.recall(query, endpoint, Some(DUAL_RECALL_LIMIT), None),
        );

        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::with_capacity(scoped.len() + global.len());

        for memory in scoped.into_iter().chain(global) {
            if seen.insert(memory.id.clone()) {
                merged.push(memory);
            }
        }

        merged.truncate(DUAL_RECALL_TRUNCATE);
        merged
    }

    /// Best-effort remember: a failure is logged and silently no-op'd,
    /// never surfaced to the caller.
    pub async fn remember(&self, request: RememberRequest, endpoint: &str) -> Option<RememberResult> {
        let url = format!("{}/remember", endpoint.trim_end_matches('/'));

        let result = self
            .http
            .post(&url)
            .timeout(RECALL_TIMEOUT)
            .json(&request)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<RememberResult>().await {
                Ok(body) => Some(body),
                Err(e) => {
                    tracing::warn!(error = %e, "memory remember: invalid response body");
                    None
                }
            },
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "memory remember: non-2xx response");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory remember: request failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mem(id: &str) -> serde_json::Value {
        serde_json::json!({"id": id, "content": "x", "category": "fact", "strength": 1.0, "relevance": 1.0})
    }

    #[tokio::test]
    async fn recall_returns_empty_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recall"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = MemoryClient::new();
        let result = client.recall("q", &server.uri(), None, None).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn recall_dual_unions_with_topic_precedence_and_truncates() {
        let server = MockServer::start().await;
        let ids: Vec<&str> = vec!["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        Mock::given(method("POST"))
            .and(path("/recall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "memories": ids.iter().map(|id| mem(id)).collect::<Vec<_>>()
            })))
            .mount(&server)
            .await;

        let client = MemoryClient::new();
        let merged = client.recall_dual("q", "t1", &server.uri()).await;
        // Both the scoped and global call hit the same mock and return the
        // same 10 ids; dedup collapses them to 10 distinct, then the
        // result is truncated to 8.
        assert_eq!(merged.len(), 8);
    }

    #[tokio::test]
    async fn remember_returns_none_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/remember"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = MemoryClient::new();
        let result = client
            .remember(
                RememberRequest {
                    content: "fact".into(),
                    ..Default::default()
                },
                &server.uri(),
            )
            .await;
        assert!(result.is_none());
    }
}
