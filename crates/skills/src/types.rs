use serde_json::Value;

/// One tool a skill exposes, in its own (unqualified) namespace. The
/// registry qualifies `name` as `"{skill_id}.{name}"` before handing it
/// to the LLM.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub mutates_state: bool,
}

/// Per-call context a skill's `execute` runs under. `config` carries the
/// skill's own startup configuration, injected by the registry so
/// individual skills never reach into global config.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub config: Value,
}

/// Successful tool output. `metadata` is opaque extra data a skill may
/// attach; the agent loop ignores it and forwards only `content` to the
/// LLM as the tool message body.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
        }
    }
}

/// One tool-qualified definition ready to hand the LLM client, mirroring
/// `cortex_domain::tool::ToolDefinition` but carrying the skill-qualified
/// name.
#[derive(Debug, Clone)]
pub struct QualifiedTool {
    pub qualified_name: String,
    pub description: String,
    pub input_schema: Value,
    pub mutates_state: bool,
}
