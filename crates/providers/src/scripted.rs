//! Scripted provider: replays canned rounds instead of calling a model.
//!
//! Each call to `stream()` pops the next scripted round; each call to
//! `complete()` pops the next scripted completion. Every request is recorded
//! so tests can assert on exactly what the model would have been sent.

use async_trait::async_trait;
use blocks_core::error::ProviderError;
use blocks_core::message::Message;
use blocks_core::provider::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted answer to `stream()`.
#[derive(Debug, Clone)]
pub enum ScriptedRound {
    /// Deliver these chunks, then close the stream
    Chunks(Vec<StreamChunk>),
    /// Fail to open the stream
    Fail(ProviderError),
    /// Open the stream and never send anything
    Stall,
}

/// A provider driven entirely by a script.
#[derive(Default)]
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    completions: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    released_stalls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_round(self, round: ScriptedRound) -> Self {
        lock(&self.rounds).push_back(round);
        self
    }

    /// A round streaming `fragments` as text, finishing normally.
    pub fn with_text_round(self, fragments: &[&str]) -> Self {
        let mut chunks: Vec<StreamChunk> = fragments.iter().map(|f| StreamChunk::text(*f)).collect();
        chunks.push(StreamChunk::finish(FinishReason::Stop));
        self.with_round(ScriptedRound::Chunks(chunks))
    }

    /// A round requesting one tool call whose arguments arrive as `fragments`.
    pub fn with_tool_call_round(self, id: &str, name: &str, fragments: &[&str]) -> Self {
        let chunks = tool_call_chunks(&[(id, name, fragments)]);
        self.with_round(ScriptedRound::Chunks(chunks))
    }

    pub fn with_failure(self, error: ProviderError) -> Self {
        self.with_round(ScriptedRound::Fail(error))
    }

    pub fn with_stall(self) -> Self {
        self.with_round(ScriptedRound::Stall)
    }

    /// Queue the content of the next `complete()` answer.
    pub fn with_completion(self, content: impl Into<String>) -> Self {
        lock(&self.completions).push_back(Ok(content.into()));
        self
    }

    pub fn with_completion_error(self, error: ProviderError) -> Self {
        lock(&self.completions).push_back(Err(error));
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    /// Stalled rounds whose consumer has gone away.
    pub fn released_stalls(&self) -> usize {
        self.released_stalls.load(Ordering::SeqCst)
    }

    /// Rounds not yet consumed.
    pub fn remaining_rounds(&self) -> usize {
        lock(&self.rounds).len()
    }
}

/// Chunks for a round requesting several tool calls, finishing with
/// `tool_calls`. Each call's id and name arrive on its first fragment.
pub fn tool_call_chunks(calls: &[(&str, &str, &[&str])]) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    for (index, (id, name, fragments)) in calls.iter().enumerate() {
        for (n, fragment) in fragments.iter().enumerate() {
            let first = n == 0;
            chunks.push(StreamChunk {
                tool_calls: vec![ToolCallDelta {
                    index: index as u32,
                    id: first.then(|| id.to_string()),
                    name: first.then(|| name.to_string()),
                    arguments: Some(fragment.to_string()),
                }],
                ..StreamChunk::default()
            });
        }
    }
    chunks.push(StreamChunk::finish(FinishReason::ToolCalls));
    chunks
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        lock(&self.requests).push(request);

        let next = lock(&self.completions).pop_front();
        let content = match next {
            Some(result) => result?,
            None => {
                return Err(ProviderError::NotConfigured(
                    "scripted provider has no completion left".into(),
                ));
            }
        };

        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage: None,
            model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        lock(&self.requests).push(request);

        let next = lock(&self.rounds).pop_front();
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        match next {
            Some(ScriptedRound::Chunks(chunks)) => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                });
            }
            Some(ScriptedRound::Fail(error)) => return Err(error),
            Some(ScriptedRound::Stall) => {
                let released = self.released_stalls.clone();
                tokio::spawn(async move {
                    // Hold the sender open until the consumer goes away
                    tx.closed().await;
                    released.fetch_add(1, Ordering::SeqCst);
                });
            }
            None => {
                return Err(ProviderError::NotConfigured(
                    "scripted provider has no round left".into(),
                ));
            }
        }

        Ok(rx)
    }
}
