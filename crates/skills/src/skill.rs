use serde_json::Value;

use crate::error::Result;
use crate::types::{ToolContext, ToolDescriptor, ToolResult};

/// Capability interface every skill module honors (spec.md §9, replacing
/// a duck-typed `{list_tools, execute}` module with a proper trait).
#[async_trait::async_trait]
pub trait Skill: Send + Sync {
    /// Stable lowercase identifier, validated against `^[a-z][a-z0-9_-]*$`
    /// at registration time.
    fn id(&self) -> &str;

    /// Runtime API version this skill was built against; checked by the
    /// registry against the version it requires.
    fn api_version(&self) -> u32;

    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// `name` is the skill-local (unqualified) tool name; the registry
    /// strips the `"{id}."` prefix before calling in.
    async fn execute(&self, name: &str, arguments: Value, ctx: &ToolContext) -> Result<ToolResult>;
}
