//! OpenAI → Anthropic streaming translation
//!
//! Consumes a Chat Completions SSE byte stream and re-emits the
//! Anthropic event sequence:
//!
//! ```text
//! message_start
//!   (content_block_start (content_block_delta)* content_block_stop)*
//! message_delta
//! message_stop
//! ```
//!
//! # State machine rules
//!
//! - Output block indices are dense, assigned in order of first
//!   appearance.
//! - At most one text and one thinking block are open at a time; any
//!   number of tool-call blocks may be open. Text arriving while a
//!   thinking block is open closes the thinking block first.
//! - Tool-call blocks stay open until stream end, matching the
//!   convention that `input_json_delta` chunks may interleave across
//!   calls. At termination still-open blocks close in reverse order of
//!   opening.
//! - Some upstream providers emit the same tool call twice under two
//!   delta indices ("ghost streams"). The first index seen for a call
//!   id is the primary; entries for that id under any other index are
//!   dropped wholesale, as are argument-only entries whose index maps
//!   to no registered call.
//!
//! The translator is pure with respect to the byte stream: replaying a
//! recorded stream produces identical output events.

use std::collections::HashMap;

use crate::config::ReasoningPolicy;
use crate::protocol::anthropic::{
    format_sse_event, generate_message_id, ContentBlockDeltaEvent, ContentBlockStartEvent,
    ContentBlockStopEvent, ContentDelta, DeltaUsage, MessageDelta, MessageDeltaEvent,
    MessageStartEvent, MessageStartPayload, MessageStopEvent, StartBlock, Usage,
};
use crate::protocol::openai::{ChatCompletionChunk, ChatUsage, ToolCallDelta};
use crate::tokens::approx_tokens;

use super::response::map_stop_reason;

/// One output content block and its lifecycle state.
#[derive(Debug)]
enum OpenBlock {
    Text {
        open: bool,
    },
    Thinking {
        open: bool,
    },
    ToolCall {
        open: bool,
        args: String,
    },
}

impl OpenBlock {
    fn is_open(&self) -> bool {
        match self {
            Self::Text { open } | Self::Thinking { open } | Self::ToolCall { open, .. } => *open,
        }
    }

    fn close(&mut self) {
        match self {
            Self::Text { open } | Self::Thinking { open } | Self::ToolCall { open, .. } => {
                *open = false
            }
        }
    }
}

/// Token counts observed over one stream, for the usage meter.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
}

/// Per-request streaming translator. All state is owned here; nothing
/// leaks across requests.
pub struct StreamTranslator {
    client_model: String,
    policy: ReasoningPolicy,

    /// Raw bytes awaiting a complete line (SSE events can split at any
    /// byte boundary, including inside UTF-8 sequences).
    byte_buffer: Vec<u8>,

    message_started: bool,
    done: bool,

    blocks: Vec<OpenBlock>,
    open_text: Option<u32>,
    open_thinking: Option<u32>,

    /// Ghost-stream bookkeeping: call id → primary upstream delta index.
    active_tool_call_ids: HashMap<String, u32>,
    /// Upstream delta index → output block index, for id-less entries.
    tool_block_by_upstream: HashMap<u32, u32>,

    finish_reason: Option<String>,
    stop_sequence_hit: bool,
    usage: Option<ChatUsage>,

    /// Accumulated output text (text deltas + tool arguments), kept for
    /// token approximation and content analytics.
    text_accum: String,
    thinking_chars: usize,
}

impl StreamTranslator {
    pub fn new(client_model: String, policy: ReasoningPolicy) -> Self {
        Self {
            client_model,
            policy,
            byte_buffer: Vec::new(),
            message_started: false,
            done: false,
            blocks: Vec::new(),
            open_text: None,
            open_thinking: None,
            active_tool_call_ids: HashMap::new(),
            tool_block_by_upstream: HashMap::new(),
            finish_reason: None,
            stop_sequence_hit: false,
            usage: None,
            text_accum: String::new(),
            thinking_chars: 0,
        }
    }

    /// Feed raw backend bytes; returns Anthropic SSE bytes to forward.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut output = Vec::new();
        if self.done {
            return output;
        }

        self.byte_buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = self.byte_buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.byte_buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                // event:/comment lines carry nothing the client needs
                continue;
            };

            if data == "[DONE]" {
                output.extend(self.finish());
                break;
            }

            self.handle_data(data, &mut output);
        }

        output
    }

    /// Terminate the stream: close open blocks in reverse order, emit
    /// the final message_delta and message_stop. Idempotent; also
    /// called on backend EOF without a `[DONE]` marker.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut output = Vec::new();
        if self.done {
            return output;
        }
        self.done = true;

        if !self.message_started {
            self.emit_message_start(None, &mut output);
        }

        for index in (0..self.blocks.len()).rev() {
            if self.blocks[index].is_open() {
                self.blocks[index].close();
                output.extend(format_sse_event(
                    "content_block_stop",
                    &ContentBlockStopEvent {
                        event_type: "content_block_stop".to_string(),
                        index: index as u32,
                    },
                ));
            }
        }
        self.open_text = None;
        self.open_thinking = None;

        let stop_reason = map_stop_reason(self.finish_reason.as_deref(), self.stop_sequence_hit);
        output.extend(format_sse_event(
            "message_delta",
            &MessageDeltaEvent {
                event_type: "message_delta".to_string(),
                delta: MessageDelta {
                    stop_reason,
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    output_tokens: self.usage_totals().output_tokens,
                },
            },
        ));

        output.extend(format_sse_event(
            "message_stop",
            &MessageStopEvent {
                event_type: "message_stop".to_string(),
            },
        ));

        output
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Final token accounting. `output_tokens` is the backend's
    /// `completion_tokens` verbatim (reasoning included, per the OpenAI
    /// convention); `thinking_tokens` is the separately-metered
    /// sub-count.
    pub fn usage_totals(&self) -> StreamUsage {
        let thinking_estimate = (self.thinking_chars as u64) / 4;
        match self.usage {
            Some(usage) => StreamUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                thinking_tokens: usage.reasoning_tokens().unwrap_or(thinking_estimate),
            },
            None => StreamUsage {
                input_tokens: 0,
                output_tokens: approx_tokens(&self.text_accum) as u64,
                thinking_tokens: thinking_estimate,
            },
        }
    }

    /// All output text observed (text deltas plus tool-call argument
    /// JSON), for content analytics.
    pub fn collected_output(&self) -> &str {
        &self.text_accum
    }

    pub fn tool_call_count(&self) -> usize {
        self.active_tool_call_ids.len()
    }

    // ────────────────────────────────────────────────────────────────
    // Per-frame processing
    // ────────────────────────────────────────────────────────────────

    fn handle_data(&mut self, data: &str, output: &mut Vec<u8>) {
        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Skipping unparseable SSE frame: {}", e);
                return;
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        if !self.message_started {
            self.emit_message_start(chunk.id.as_deref(), output);
        }

        for choice in &chunk.choices {
            // Thinking first, then text, then tool calls.
            if let Some(reasoning) = &choice.delta.reasoning {
                if !reasoning.is_empty() {
                    self.handle_reasoning(reasoning, output);
                }
            }

            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    self.handle_text(content, output);
                }
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for entry in tool_calls {
                    self.handle_tool_call(entry, output);
                }
            }

            if let Some(finish_reason) = &choice.finish_reason {
                self.finish_reason = Some(finish_reason.clone());
                if choice.stop_reason.as_ref().is_some_and(|v| !v.is_null()) {
                    self.stop_sequence_hit = true;
                }
            }
        }
    }

    fn emit_message_start(&mut self, backend_id: Option<&str>, output: &mut Vec<u8>) {
        self.message_started = true;

        let id = match backend_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("msg_{}", id.trim_start_matches("chatcmpl-")),
            None => generate_message_id(),
        };

        let input_tokens = self.usage.map(|u| u.prompt_tokens).unwrap_or(0);

        output.extend(format_sse_event(
            "message_start",
            &MessageStartEvent {
                event_type: "message_start".to_string(),
                message: MessageStartPayload {
                    id,
                    msg_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: vec![],
                    model: self.client_model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens,
                        output_tokens: 0,
                    },
                },
            },
        ));
    }

    fn handle_reasoning(&mut self, reasoning: &str, output: &mut Vec<u8>) {
        if self.policy.exclude {
            return;
        }

        let index = match self.open_thinking {
            Some(index) => index,
            None => {
                let index = self.blocks.len() as u32;
                self.blocks.push(OpenBlock::Thinking { open: true });
                self.open_thinking = Some(index);
                output.extend(format_sse_event(
                    "content_block_start",
                    &ContentBlockStartEvent {
                        event_type: "content_block_start".to_string(),
                        index,
                        content_block: StartBlock::Thinking {
                            thinking: String::new(),
                        },
                    },
                ));
                index
            }
        };

        self.thinking_chars += reasoning.chars().count();
        output.extend(format_sse_event(
            "content_block_delta",
            &ContentBlockDeltaEvent {
                event_type: "content_block_delta".to_string(),
                index,
                delta: ContentDelta::ThinkingDelta {
                    thinking: reasoning.to_string(),
                },
            },
        ));
    }

    fn handle_text(&mut self, content: &str, output: &mut Vec<u8>) {
        // Text signals end-of-thinking.
        if let Some(index) = self.open_thinking.take() {
            self.blocks[index as usize].close();
            output.extend(format_sse_event(
                "content_block_stop",
                &ContentBlockStopEvent {
                    event_type: "content_block_stop".to_string(),
                    index,
                },
            ));
        }

        let index = match self.open_text {
            Some(index) => index,
            None => {
                let index = self.blocks.len() as u32;
                self.blocks.push(OpenBlock::Text { open: true });
                self.open_text = Some(index);
                output.extend(format_sse_event(
                    "content_block_start",
                    &ContentBlockStartEvent {
                        event_type: "content_block_start".to_string(),
                        index,
                        content_block: StartBlock::Text {
                            text: String::new(),
                        },
                    },
                ));
                index
            }
        };

        self.text_accum.push_str(content);
        output.extend(format_sse_event(
            "content_block_delta",
            &ContentBlockDeltaEvent {
                event_type: "content_block_delta".to_string(),
                index,
                delta: ContentDelta::TextDelta {
                    text: content.to_string(),
                },
            },
        ));
    }

    fn handle_tool_call(&mut self, entry: &ToolCallDelta, output: &mut Vec<u8>) {
        let block_index = match entry.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                match self.active_tool_call_ids.get(id).copied() {
                    None => {
                        // First sighting: this delta index is the primary.
                        self.active_tool_call_ids
                            .insert(id.to_string(), entry.index);

                        let index = self.blocks.len() as u32;
                        self.blocks.push(OpenBlock::ToolCall {
                            open: true,
                            args: String::new(),
                        });
                        self.tool_block_by_upstream.insert(entry.index, index);

                        let name = entry
                            .function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default();
                        output.extend(format_sse_event(
                            "content_block_start",
                            &ContentBlockStartEvent {
                                event_type: "content_block_start".to_string(),
                                index,
                                content_block: StartBlock::ToolUse {
                                    id: id.to_string(),
                                    name,
                                    input: serde_json::json!({}),
                                },
                            },
                        ));
                        index
                    }
                    Some(primary) if primary != entry.index => {
                        // Ghost stream: same call id under a second
                        // index. Drop the whole entry.
                        tracing::debug!(
                            "Dropping ghost tool-call delta for {} (index {} != primary {})",
                            id,
                            entry.index,
                            primary
                        );
                        return;
                    }
                    Some(_) => match self.tool_block_by_upstream.get(&entry.index) {
                        Some(&index) => index,
                        None => return,
                    },
                }
            }
            None => {
                // Argument-only entry: match by upstream index.
                match self.tool_block_by_upstream.get(&entry.index) {
                    Some(&index) => index,
                    None => {
                        tracing::debug!(
                            "Dropping orphan tool-call delta at index {}",
                            entry.index
                        );
                        return;
                    }
                }
            }
        };

        let Some(arguments) = entry
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .filter(|a| !a.is_empty())
        else {
            return;
        };

        if let OpenBlock::ToolCall { args, .. } = &mut self.blocks[block_index as usize] {
            args.push_str(arguments);
        }
        self.text_accum.push_str(arguments);

        output.extend(format_sse_event(
            "content_block_delta",
            &ContentBlockDeltaEvent {
                event_type: "content_block_delta".to_string(),
                index: block_index,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: arguments.to_string(),
                },
            },
        ));
    }
}
