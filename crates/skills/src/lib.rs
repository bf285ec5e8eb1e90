pub mod error;
pub mod registry;
pub mod skill;
pub mod types;

pub use error::{Error, Result};
pub use registry::{SkillRegistration, SkillRegistry};
pub use skill::Skill;
pub use types::{QualifiedTool, ToolContext, ToolDescriptor, ToolResult};
