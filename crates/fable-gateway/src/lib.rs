//! # fable-gateway
//!
//! Gateway to the external text-completion service.
//!
//! The gateway never carries domain logic. It owns exactly three concerns:
//!
//! - Calling the completion endpoint with retry/backoff, a per-request
//!   timeout and a circuit breaker (transient failures are absorbed here,
//!   not in the orchestration layer)
//! - Best-effort extraction of structured records from raw completion text,
//!   with a deterministic fallback so downstream steps always receive a
//!   well-typed value
//! - Cancellation: every call can be raced against a cancel signal

mod breaker;
mod cancel;
mod client;
mod extract;
mod types;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cancel::{CancelHandle, CancelToken};
pub use client::{complete_cancellable, CompletionBackend, CompletionClient};
pub use extract::{extract_json, extract_or, extract_tag};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, SamplingConfig};
