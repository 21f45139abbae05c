//! A chat session bound to one conversation.

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::event::ChatEvent;
use crate::reducer::{ChatState, Effect};
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// How a turn ended from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The server finished the turn and the conversation was reconciled.
    Completed,
    /// The stream ended early (aborted or disconnected).
    Interrupted,
}

/// Cancels the turn in flight from anywhere. Cloneable.
#[derive(Debug, Clone, Default)]
pub struct Aborter {
    slot: Arc<Mutex<Option<AbortHandle>>>,
}

impl Aborter {
    /// Abort the turn in flight. Returns false when there was none.
    pub fn abort(&self) -> bool {
        match self.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn set(&self, handle: Option<AbortHandle>) {
        *self.lock() = handle;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ChatSession {
    api: ApiClient,
    state: ChatState,
    aborter: Aborter,
}

impl ChatSession {
    pub fn new(api: ApiClient, conversation_id: impl Into<String>) -> Self {
        Self {
            api,
            state: ChatState::new(conversation_id),
            aborter: Aborter::default(),
        }
    }

    /// Open a session and load the conversation's messages.
    pub async fn open(api: ApiClient, conversation_id: impl Into<String>) -> Result<Self, ClientError> {
        let mut session = Self::new(api, conversation_id);
        session.refresh().await?;
        Ok(session)
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn conversation_id(&self) -> &str {
        &self.state.conversation_id
    }

    pub fn aborter(&self) -> Aborter {
        self.aborter.clone()
    }

    pub fn abort(&self) -> bool {
        self.aborter.abort()
    }

    /// Reload the authoritative message list.
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        let detail = self.api.get_conversation(&self.state.conversation_id).await?;
        self.state.replace_messages(detail.messages);
        Ok(())
    }

    /// Send one message and drive the turn to its end.
    ///
    /// `on_event` sees every event after the state has absorbed it.
    pub async fn send<F>(&mut self, message: &str, mut on_event: F) -> Result<TurnOutcome, ClientError>
    where
        F: FnMut(&ChatEvent, &ChatState),
    {
        self.state.begin(message);

        let mut stream = match self.api.stream_chat(&self.state.conversation_id, message).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state.interrupt();
                return Err(e);
            }
        };
        self.aborter.set(Some(stream.abort_handle()));

        let mut outcome = TurnOutcome::Interrupted;
        while let Some(event) = stream.events.recv().await {
            let effect = self.state.apply(&event);
            on_event(&event, &self.state);

            if let Some(Effect::Refetch { local_content }) = effect {
                self.reconcile(&local_content).await;
                outcome = TurnOutcome::Completed;
            }
        }
        self.aborter.set(None);

        if self.state.is_streaming() {
            let partial = self.state.interrupt();
            debug!(conversation_id = %self.state.conversation_id, "Turn interrupted before completion");
            self.state.push_local_assistant(&partial);
        }
        Ok(outcome)
    }

    async fn reconcile(&mut self, local_content: &str) {
        if let Err(e) = self.refresh().await {
            warn!(conversation_id = %self.state.conversation_id, error = %e, "Refetch failed, keeping local content");
            self.state.push_local_assistant(local_content);
        }
    }
}
