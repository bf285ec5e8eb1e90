//! C7 — LLM Client. Non-streaming OpenAI-compatible chat completions
//! (spec.md §4.7), adapted from the teacher's `openai_compat` adapter
//! with the streaming/embeddings surface dropped (out of scope here).

use std::time::Duration;

use cortex_domain::tool::{ChatMessage, ToolCall, ToolDefinition};
use serde_json::Value;

use crate::error::{Error, Result};

const CHAT_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_SNIPPET_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct ChatCompletionResult {
    pub content: String,
    pub finish_reason: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

pub struct LlmClient {
    http: reqwest::Client,
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        endpoint: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatCompletionResult> {
        let url = format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(
                tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect::<Vec<_>>(),
            )
            .expect("tool list serializes");
        }

        tracing::debug!(url = %url, model = %model, "llm chat request");

        let resp = self
            .http
            .post(&url)
            .timeout(CHAT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            let mut snippet = resp_text;
            snippet.truncate(BODY_SNIPPET_LEN);
            return Err(Error::Status {
                status: status.as_u16(),
                body_snippet: snippet,
            });
        }

        let parsed: Value =
            serde_json::from_str(&resp_text).map_err(|e| Error::InvalidJson(e.to_string()))?;
        parse_chat_completion(&parsed)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(CHAT_TIMEOUT.as_secs())
    } else {
        Error::Connection(e.to_string())
    }
}

fn parse_chat_completion(body: &Value) -> Result<ChatCompletionResult> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or(Error::EmptyChoices)?;

    let message = choice.get("message").ok_or(Error::EmptyChoices)?;

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| serde_json::from_value::<ToolCall>(tc.clone()).ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty());

    let content = message.get("content").and_then(|v| v.as_str());

    if tool_calls.is_none() && content.is_none() {
        return Err(Error::MissingContent);
    }

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(ChatCompletionResult {
        content: content.unwrap_or("").to_string(),
        finish_reason,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_parses_plain_content_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello!"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new();
        let result = client
            .chat(&[ChatMessage::user("hi")], "gpt-4o", &server.uri(), &[])
            .await
            .unwrap();
        assert_eq!(result.content, "hello!");
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
        assert!(result.tool_calls.is_none());
    }

    #[tokio::test]
    async fn chat_parses_tool_calls_with_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "math.add", "arguments": "{\"a\":1,\"b\":2}"}}]
                }, "finish_reason": "tool_calls"}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new();
        let result = client
            .chat(&[ChatMessage::user("add")], "gpt-4o", &server.uri(), &[])
            .await
            .unwrap();
        assert_eq!(result.content, "");
        let calls = result.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "math.add");
    }

    #[tokio::test]
    async fn chat_on_non_2xx_preserves_body_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = LlmClient::new();
        let err = client
            .chat(&[ChatMessage::user("hi")], "gpt-4o", &server.uri(), &[])
            .await
            .unwrap_err();
        match err {
            Error::Status { status, body_snippet } => {
                assert_eq!(status, 500);
                assert_eq!(body_snippet, "boom");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_on_missing_choices_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client = LlmClient::new();
        let err = client
            .chat(&[ChatMessage::user("hi")], "gpt-4o", &server.uri(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyChoices));
    }
}
