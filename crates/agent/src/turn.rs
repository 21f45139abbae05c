//! Folding a turn's event stream into the record that gets persisted.

use blocks_core::store::{ToolEventRecord, TurnRecord};
use blocks_core::stream::StreamEvent;

/// Watches the events of one turn and builds its [`TurnRecord`].
///
/// Text from every round is concatenated; tool calls from every round are
/// flattened in invocation order.
#[derive(Debug, Default)]
pub struct TurnRecorder {
    record: TurnRecord,
    failed: bool,
}

impl TurnRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ContentDelta { content } => self.record.content.push_str(content),
            StreamEvent::ToolCallStarted { tool, input } => self.record.tools.push(ToolEventRecord {
                name: tool.clone(),
                input: input.clone(),
                result: None,
            }),
            StreamEvent::ToolCallResult { result, .. } => {
                if let Some(last) = self.record.tools.last_mut() {
                    last.result = Some(result.clone());
                }
            }
            StreamEvent::Error { .. } => self.failed = true,
            StreamEvent::MessageComplete { .. } => {}
        }
    }

    /// Whether any `error` event was seen.
    pub fn saw_error(&self) -> bool {
        self.failed
    }

    pub fn record(&self) -> &TurnRecord {
        &self.record
    }
}
