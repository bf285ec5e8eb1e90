pub mod client;
pub mod error;

pub use client::{ChatCompletionResult, LlmClient};
pub use error::{Error, Result};
