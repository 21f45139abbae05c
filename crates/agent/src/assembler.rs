//! Reassembly of tool calls from streamed fragments.

use blocks_core::message::MessageToolCall;
use blocks_core::provider::ToolCallDelta;
use std::collections::HashMap;

/// Accumulates tool-call deltas by position index.
///
/// Calls come out in the order their index was first seen. Argument text is
/// always appended; ids and names are overwritten only when a fragment
/// actually carries one.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<MessageToolCall>,
    slots: HashMap<u32, usize>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: ToolCallDelta) {
        let slot = *self.slots.entry(delta.index).or_insert_with(|| {
            self.calls.push(MessageToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            self.calls.len() - 1
        });
        let call = &mut self.calls[slot];

        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            call.id = id;
        }
        if let Some(name) = delta.name.filter(|name| !name.is_empty()) {
            call.name = name;
        }
        if let Some(arguments) = delta.arguments {
            call.arguments.push_str(&arguments);
        }
    }

    pub fn finish(self) -> Vec<MessageToolCall> {
        self.calls
    }
}
