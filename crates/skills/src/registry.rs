use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::skill::Skill;
use crate::types::{QualifiedTool, ToolContext, ToolResult};

const IDENTIFIER_PATTERN: &str = r"^[a-z][a-z0-9_-]*$";

struct Entry {
    skill: Arc<dyn Skill>,
    config: Value,
}

/// Immutable namespaced tool catalog (spec.md §4.6). Built once at
/// startup; every lookup afterwards is a plain map read.
pub struct SkillRegistry {
    entries: Vec<Entry>,
    /// qualified tool name -> (skill index, local tool name, mutates_state)
    tools: HashMap<String, (usize, String, bool)>,
    catalog: Vec<QualifiedTool>,
}

/// One skill plus the config slice the registry injects into its
/// `ToolContext` on every call.
pub struct SkillRegistration {
    pub skill: Arc<dyn Skill>,
    pub config: Value,
}

impl SkillRegistry {
    /// Validate and assemble the registry. Fails closed on any of the
    /// conditions spec.md §4.6 lists: duplicate skill id, malformed
    /// identifier, api-version mismatch, duplicate qualified tool name.
    pub fn build(registrations: Vec<SkillRegistration>, required_api_version: u32) -> Result<Self> {
        let id_pattern = Regex::new(IDENTIFIER_PATTERN).expect("static regex is valid");

        let mut entries = Vec::with_capacity(registrations.len());
        let mut seen_ids = std::collections::HashSet::new();
        let mut tools = HashMap::new();
        let mut catalog = Vec::new();

        for reg in registrations {
            let id = reg.skill.id().to_string();

            if !id_pattern.is_match(&id) {
                return Err(Error::InvalidIdentifier(id));
            }
            if !seen_ids.insert(id.clone()) {
                return Err(Error::DuplicateSkill(id));
            }
            if reg.skill.api_version() != required_api_version {
                return Err(Error::ApiVersionMismatch(
                    id,
                    reg.skill.api_version(),
                    required_api_version,
                ));
            }

            let skill_index = entries.len();
            for tool in reg.skill.list_tools() {
                let qualified = format!("{id}.{}", tool.name);
                if tools.contains_key(&qualified) {
                    return Err(Error::DuplicateTool(qualified));
                }
                tools.insert(qualified.clone(), (skill_index, tool.name.clone(), tool.mutates_state));
                catalog.push(QualifiedTool {
                    qualified_name: qualified,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    mutates_state: tool.mutates_state,
                });
            }

            entries.push(Entry {
                skill: reg.skill,
                config: reg.config,
            });
        }

        tracing::info!(
            skills = entries.len(),
            tools = catalog.len(),
            "skill registry built"
        );

        Ok(Self {
            entries,
            tools,
            catalog,
        })
    }

    /// Empty registry (no skills configured): agent loop degrades to a
    /// plain chat call with no tools advertised.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            tools: HashMap::new(),
            catalog: Vec::new(),
        }
    }

    pub fn tools(&self) -> &[QualifiedTool] {
        &self.catalog
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.iter().map(|t| t.qualified_name.clone()).collect()
    }

    pub fn is_mutating(&self, qualified_name: &str) -> bool {
        self.tools
            .get(qualified_name)
            .map(|(_, _, mutates)| *mutates)
            .unwrap_or(false)
    }

    /// Locate the skill owning `qualified_name`, strip the `"id."`
    /// prefix, inject that skill's config, and dispatch. Any panic or
    /// error from the skill is wrapped into a `ToolResult`-compatible
    /// error here rather than propagated — callers (C10) turn it into
    /// an `"Error: ..."` tool message.
    pub async fn execute(&self, qualified_name: &str, arguments: Value) -> Result<ToolResult> {
        let (skill_index, local_name, _) = self
            .tools
            .get(qualified_name)
            .ok_or_else(|| Error::UnknownTool(qualified_name.to_string()))?;

        let entry = &self.entries[*skill_index];
        let ctx = ToolContext {
            config: entry.config.clone(),
        };

        entry
            .skill
            .execute(local_name, arguments, &ctx)
            .await
            .map_err(|e| Error::Execution(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDescriptor;
    use async_trait::async_trait;

    struct EchoSkill;

    #[async_trait]
    impl Skill for EchoSkill {
        fn id(&self) -> &str {
            "echo"
        }
        fn api_version(&self) -> u32 {
            1
        }
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "say".into(),
                description: "echo text back".into(),
                input_schema: serde_json::json!({"type": "object"}),
                mutates_state: false,
            }]
        }
        async fn execute(&self, name: &str, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult> {
            assert_eq!(name, "say");
            Ok(ToolResult::text(arguments.to_string()))
        }
    }

    struct BadIdSkill;

    #[async_trait]
    impl Skill for BadIdSkill {
        fn id(&self) -> &str {
            "Echo!"
        }
        fn api_version(&self) -> u32 {
            1
        }
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![]
        }
        async fn execute(&self, _name: &str, _arguments: Value, _ctx: &ToolContext) -> Result<ToolResult> {
            unreachable!()
        }
    }

    fn reg(skill: impl Skill + 'static) -> SkillRegistration {
        SkillRegistration {
            skill: Arc::new(skill),
            config: Value::Null,
        }
    }

    #[test]
    fn build_qualifies_tool_names_and_execute_dispatches() {
        let registry = SkillRegistry::build(vec![reg(EchoSkill)], 1).unwrap();
        assert_eq!(registry.tool_names(), vec!["echo.say".to_string()]);
        assert!(!registry.is_mutating("echo.say"));

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt
            .block_on(registry.execute("echo.say", serde_json::json!({"x": 1})))
            .unwrap();
        assert_eq!(result.content, "{\"x\":1}");
    }

    #[test]
    fn build_rejects_invalid_identifier() {
        let err = SkillRegistry::build(vec![reg(BadIdSkill)], 1).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
    }

    #[test]
    fn build_rejects_duplicate_skill_id() {
        let err = SkillRegistry::build(vec![reg(EchoSkill), reg(EchoSkill)], 1).unwrap_err();
        assert!(matches!(err, Error::DuplicateSkill(_)));
    }

    #[test]
    fn execute_unknown_tool_errors() {
        let registry = SkillRegistry::build(vec![reg(EchoSkill)], 1).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt
            .block_on(registry.execute("echo.nope", Value::Null))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTool(_)));
    }
}
