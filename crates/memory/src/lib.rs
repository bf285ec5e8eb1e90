pub mod client;
pub mod types;

pub use client::MemoryClient;
pub use types::{Memory, RecallRequest, RecallResponse, RememberRequest, RememberResult};
