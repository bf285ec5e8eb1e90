/// C7 failure taxonomy (spec.md §4.7): every distinct failure mode the
/// LLM client can hit becomes its own typed variant rather than a string.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("non-2xx response ({status}): {body_snippet}")]
    Status { status: u16, body_snippet: String },
    #[error("invalid JSON in response: {0}")]
    InvalidJson(String),
    #[error("response had missing or empty choices")]
    EmptyChoices,
    #[error("message had no content and no tool_calls")]
    MissingContent,
}

pub type Result<T> = std::result::Result<T, Error>;
