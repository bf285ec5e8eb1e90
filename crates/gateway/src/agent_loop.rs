//! C10 — Agent Loop. Bounded-round parallel tool-calling loop over the
//! LLM client and skill registry (spec.md §4.10).

use std::time::Duration;

use cortex_domain::tool::{ChatMessage, ToolCall, ToolDefinition};
use cortex_llm::LlmClient;
use cortex_skills::SkillRegistry;

use crate::trace::TraceEvent;

const FALLBACK_TEXT: &str = "I was unable to complete the task within the allowed number of tool calls.";

pub struct AgentLoopConfig<'a> {
    pub model: &'a str,
    pub synapse_url: &'a str,
    pub tool_timeout_ms: u64,
    pub max_tool_rounds: u32,
}

pub struct AgentLoopResult {
    pub response: String,
    /// Everything appended this loop, in order, for the caller to
    /// persist atomically alongside the leading user turn.
    pub new_turns: Vec<ChatMessage>,
}

/// Runs the bounded tool-calling loop. `messages` is the full prompt
/// (system + history + trailing user turn) already assembled by the
/// prompt builder.
pub async fn run(
    mut messages: Vec<ChatMessage>,
    tools: &[ToolDefinition],
    registry: &SkillRegistry,
    llm: &LlmClient,
    config: AgentLoopConfig<'_>,
) -> cortex_llm::Result<AgentLoopResult> {
    let mut new_turns = Vec::new();
    let mut round: u32 = 0;
    let mut last_content = String::new();

    loop {
        let started = std::time::Instant::now();
        let reply = match llm.chat(&messages, config.model, config.synapse_url, tools).await {
            Ok(r) => r,
            Err(e) => {
                TraceEvent::LlmFailure { model: config.model.to_string(), error: e.to_string() }.emit();
                return Err(e);
            }
        };
        TraceEvent::LlmRequest {
            model: config.model.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            had_tool_calls: reply.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty()),
        }
        .emit();

        let Some(tool_calls) = reply.tool_calls.filter(|tc| !tc.is_empty()) else {
            new_turns.push(ChatMessage::assistant(reply.content.clone()));
            return Ok(AgentLoopResult {
                response: reply.content,
                new_turns,
            });
        };

        last_content = reply.content.clone();
        let assistant_msg = ChatMessage::assistant_with_tool_calls(reply.content, tool_calls.clone());
        messages.push(assistant_msg.clone());
        new_turns.push(assistant_msg);

        let results = execute_tool_calls(&tool_calls, registry, config.tool_timeout_ms).await;
        for (call, content) in tool_calls.iter().zip(results) {
            let tool_msg = ChatMessage::tool_result(content, call.id.clone(), call.function.name.clone());
            messages.push(tool_msg.clone());
            new_turns.push(tool_msg);
        }

        TraceEvent::AgentRoundCompleted { round, tool_calls: tool_calls.len() }.emit();

        round += 1;
        if round >= config.max_tool_rounds {
            TraceEvent::AgentMaxRoundsReached { rounds: round }.emit();
            let fallback = if last_content.is_empty() {
                FALLBACK_TEXT.to_string()
            } else {
                last_content
            };
            new_turns.push(ChatMessage::assistant(fallback.clone()));
            return Ok(AgentLoopResult {
                response: fallback,
                new_turns,
            });
        }
    }
}

async fn execute_tool_calls(
    calls: &[ToolCall],
    registry: &SkillRegistry,
    tool_timeout_ms: u64,
) -> Vec<String> {
    let futures = calls.iter().map(|call| async move {
        let args: serde_json::Value = match serde_json::from_str(&call.function.arguments) {
            Ok(v) => v,
            Err(e) => {
                return format!("Error: Invalid JSON in tool arguments: {e}");
            }
        };

        let timeout = Duration::from_millis(tool_timeout_ms);
        match tokio::time::timeout(timeout, registry.execute(&call.function.name, args)).await {
            Ok(Ok(result)) => result.content,
            Ok(Err(e)) => format!("Error: {e}"),
            Err(_) => format!(
                "Error: Tool execution timed out after {}s",
                timeout.as_secs()
            ),
        }
    });

    futures_util::future::join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_skills::{Skill, SkillRegistration, ToolContext, ToolDescriptor, ToolResult};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Returns `first` while the prompt is still a single message (no
    /// assistant/tool turns appended yet), then `second` once the agent
    /// loop has appended at least one round.
    struct SwitchAfterFirstCall {
        first: serde_json::Value,
        second: serde_json::Value,
    }

    impl Respond for SwitchAfterFirstCall {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
            let message_count = body["messages"].as_array().map(|m| m.len()).unwrap_or(0);
            let payload = if message_count <= 1 { &self.first } else { &self.second };
            ResponseTemplate::new(200).set_body_json(payload)
        }
    }

    struct AddSkill;

    #[async_trait]
    impl Skill for AddSkill {
        fn id(&self) -> &str {
            "math"
        }
        fn api_version(&self) -> u32 {
            1
        }
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "add".into(),
                description: "add two numbers".into(),
                input_schema: serde_json::json!({}),
                mutates_state: false,
            }]
        }
        async fn execute(
            &self,
            _name: &str,
            arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> cortex_skills::Result<ToolResult> {
            let a = arguments["a"].as_i64().unwrap_or(0);
            let b = arguments["b"].as_i64().unwrap_or(0);
            Ok(ToolResult::text((a + b).to_string()))
        }
    }

    fn registry_with_math() -> SkillRegistry {
        SkillRegistry::build(
            vec![SkillRegistration {
                skill: Arc::new(AddSkill),
                config: serde_json::Value::Null,
            }],
            1,
        )
        .unwrap()
    }

    fn tool_call_response(name: &str, args: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": name, "arguments": args}}]
            }, "finish_reason": "tool_calls"}]
        })
    }

    #[tokio::test]
    async fn no_tool_calls_returns_single_assistant_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hi there"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let llm = LlmClient::new();
        let registry = SkillRegistry::empty();
        let result = run(
            vec![ChatMessage::user("hello")],
            &[],
            &registry,
            &llm,
            AgentLoopConfig {
                model: "m",
                synapse_url: &server.uri(),
                tool_timeout_ms: 1000,
                max_tool_rounds: 3,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.response, "hi there");
        assert_eq!(result.new_turns.len(), 1);
    }

    #[tokio::test]
    async fn tool_round_trip_appends_three_turns() {
        let server = MockServer::start().await;
        // First call returns a tool call, second returns final text.
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(SwitchAfterFirstCall {
                first: tool_call_response("math.add", "{\"a\":10,\"b\":20}"),
                second: serde_json::json!({
                    "choices": [{"message": {"content": "10+20=30"}, "finish_reason": "stop"}]
                }),
            })
            .mount(&server)
            .await;

        let llm = LlmClient::new();
        let registry = registry_with_math();
        let result = run(
            vec![ChatMessage::user("add 10 and 20")],
            registry
                .tools()
                .iter()
                .map(|t| ToolDefinition {
                    name: t.qualified_name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect::<Vec<_>>()
                .as_slice(),
            &registry,
            &llm,
            AgentLoopConfig {
                model: "m",
                synapse_url: &server.uri(),
                tool_timeout_ms: 1000,
                max_tool_rounds: 3,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.response, "10+20=30");
        assert_eq!(result.new_turns.len(), 3);
        assert_eq!(result.new_turns[1].content, "30");
    }

    #[tokio::test]
    async fn max_rounds_reached_returns_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_response("math.add", "{\"a\":1,\"b\":1}")))
            .mount(&server)
            .await;

        let llm = LlmClient::new();
        let registry = registry_with_math();
        let result = run(
            vec![ChatMessage::user("loop forever")],
            &[],
            &registry,
            &llm,
            AgentLoopConfig {
                model: "m",
                synapse_url: &server.uri(),
                tool_timeout_ms: 1000,
                max_tool_rounds: 2,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.response, FALLBACK_TEXT);
        // 2 rounds * (assistant + tool) = 4, plus the fallback assistant turn = 5.
        assert_eq!(result.new_turns.len(), 5);
    }

    #[tokio::test]
    async fn invalid_tool_arguments_become_error_tool_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(SwitchAfterFirstCall {
                first: tool_call_response("math.add", "not-json"),
                second: serde_json::json!({
                    "choices": [{"message": {"content": "done"}, "finish_reason": "stop"}]
                }),
            })
            .mount(&server)
            .await;

        let llm = LlmClient::new();
        let registry = registry_with_math();
        let result = run(
            vec![ChatMessage::user("add")],
            &[],
            &registry,
            &llm,
            AgentLoopConfig {
                model: "m",
                synapse_url: &server.uri(),
                tool_timeout_ms: 1000,
                max_tool_rounds: 3,
            },
        )
        .await
        .unwrap();

        assert!(result.new_turns[1].content.starts_with("Error: Invalid JSON"));
    }
}
