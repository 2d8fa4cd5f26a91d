//! Shared test doubles for the pipeline crate

use async_trait::async_trait;
use fable_core::{FableError, Result, TokenUsage};
use fable_gateway::{CompletionBackend, CompletionRequest, CompletionResponse, SamplingConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Backend that replays canned responses in order and counts calls
pub(crate) struct ScriptedBackend {
    responses: Mutex<Vec<String>>,
    pub calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| FableError::Gateway("script exhausted".to_string()))?;
        Ok(CompletionResponse {
            text,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                thinking_tokens: 0,
            },
        })
    }
}

pub(crate) fn sampling() -> SamplingConfig {
    SamplingConfig {
        model: "test".to_string(),
        max_tokens: 100,
        temperature: 0.0,
    }
}
