#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("skill id '{0}' is not a valid identifier (expected ^[a-z][a-z0-9_-]*$)")]
    InvalidIdentifier(String),
    #[error("duplicate skill id '{0}'")]
    DuplicateSkill(String),
    #[error("duplicate tool name '{0}'")]
    DuplicateTool(String),
    #[error("skill '{0}' declares api_version {1}, registry expects {2}")]
    ApiVersionMismatch(String, u32, u32),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("{0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, Error>;
