//! Generation backend access: chat-completion client plus retry policy.

mod client;
mod retry;

pub use client::{chat_with_retry, BackendError, ChatMessage, GenerationBackend, HttpGenerationBackend};
pub use retry::{with_retry, AttemptOutcome, RetryConfig, RETRYABLE_STATUS_CODES};

#[cfg(test)]
pub(crate) use client::stub::StubBackend;
