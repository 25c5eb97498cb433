//! Anthropic Messages API types
//!
//! Inbound request types deserialize what Claude-family clients send to
//! `/v1/messages`; outbound response and SSE event types serialize what
//! they expect back.
//!
//! # Key points
//!
//! - `content` is either a plain string or a sequence of typed blocks
//!   (`#[serde(untagged)]` union)
//! - content blocks are a tagged enum on `"type"` — unknown block types
//!   fail deserialization up front instead of surfacing later as
//!   half-translated requests
//! - SSE event payloads mirror the exact field layout Claude Code
//!   expects; field order is irrelevant but presence is not

use serde::{Deserialize, Serialize};

// ============================================================================
// Request Types (Deserialize)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    /// No OpenAI equivalent; accepted and dropped.
    #[serde(default)]
    #[allow(dead_code)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub thinking: Option<ThinkingConfig>,
    /// Opaque passthrough; never forwarded.
    #[serde(default)]
    #[allow(dead_code)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

/// System blocks are always `{type: "text", text}`; modeled as a struct
/// so extra fields (cache_control and friends) are tolerated.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemBlock {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        /// Optional at the type level so a missing id can surface as a
        /// proper 400 instead of a generic parse failure.
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<ToolResultContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// Prior-turn thinking echoed back by the client; never forwarded.
    Thinking {
        thinking: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    /// Kept as raw values: results may mix text with images or other
    /// block types, and non-text results are re-serialized wholesale.
    Blocks(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    Tool { name: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub config_type: String,
    #[serde(default)]
    pub budget_tokens: Option<u32>,
}

// ============================================================================
// Response Types (Serialize)
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<ResponseContentBlock>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentBlock {
    Thinking {
        thinking: String,
    },
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// ============================================================================
// Streaming Event Types (Serialize)
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MessageStartEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: MessageStartPayload,
}

#[derive(Debug, Serialize)]
pub struct MessageStartPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub role: String,
    pub content: Vec<serde_json::Value>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct ContentBlockStartEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub index: u32,
    pub content_block: StartBlock,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Serialize)]
pub struct ContentBlockDeltaEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub index: u32,
    pub delta: ContentDelta,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Serialize)]
pub struct ContentBlockStopEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub index: u32,
}

#[derive(Debug, Serialize)]
pub struct MessageDeltaEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub delta: MessageDelta,
    pub usage: DeltaUsage,
}

#[derive(Debug, Serialize)]
pub struct MessageDelta {
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeltaUsage {
    pub output_tokens: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageStopEvent {
    #[serde(rename = "type")]
    pub event_type: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

// ============================================================================
// SSE Formatting
// ============================================================================

/// Format a single Anthropic SSE frame: `event: <type>\ndata: <json>\n\n`
pub fn format_sse_event<T: Serialize>(event_type: &str, data: &T) -> Vec<u8> {
    // Event structs serialize infallibly (no maps with non-string keys,
    // no non-finite floats), so a failure here is a programming error.
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", event_type, json).into_bytes()
}

/// Generate a fresh message id in Anthropic's `msg_` format.
pub fn generate_message_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let suffix: u32 = (timestamp % 1_000_000) as u32;

    format!("msg_{:x}{:06x}", timestamp, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_content_deserializes() {
        let req: MessagesRequest = serde_json::from_str(
            r#"{"model":"claude-sonnet-4","max_tokens":100,"messages":[{"role":"user","content":"Hi"}]}"#,
        )
        .unwrap();
        assert_eq!(req.model, "claude-sonnet-4");
        assert!(matches!(req.messages[0].content, MessageContent::Text(_)));
        assert!(!req.stream);
    }

    #[test]
    fn test_block_content_deserializes() {
        let req: MessagesRequest = serde_json::from_str(
            r#"{"model":"m","max_tokens":1,"messages":[{"role":"user","content":[
                {"type":"text","text":"a"},
                {"type":"image","source":{"type":"base64","media_type":"image/png","data":"AAAA"}},
                {"type":"tool_result","tool_use_id":"tu_1","content":"ok","is_error":true}
            ]}]}"#,
        )
        .unwrap();

        let MessageContent::Blocks(blocks) = &req.messages[0].content else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[1], ContentBlock::Image { .. }));
        assert!(matches!(
            blocks[2],
            ContentBlock::ToolResult {
                is_error: Some(true),
                ..
            }
        ));
    }

    #[test]
    fn test_system_prompt_union() {
        let text: SystemPrompt = serde_json::from_str(r#""be nice""#).unwrap();
        assert!(matches!(text, SystemPrompt::Text(_)));

        let blocks: SystemPrompt =
            serde_json::from_str(r#"[{"type":"text","text":"be nice"}]"#).unwrap();
        let SystemPrompt::Blocks(b) = blocks else {
            panic!("expected blocks");
        };
        assert_eq!(b[0].text, "be nice");
    }

    #[test]
    fn test_unknown_block_type_rejected() {
        let result: Result<MessageContent, _> =
            serde_json::from_str(r#"[{"type":"hologram","data":"x"}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_sse_event_framing() {
        let event = MessageStopEvent {
            event_type: "message_stop".to_string(),
        };
        let bytes = format_sse_event("message_stop", &event);
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.starts_with("event: message_stop\ndata: "));
        assert!(s.ends_with("\n\n"));
    }

    #[test]
    fn test_message_id_format() {
        let id = generate_message_id();
        assert!(id.starts_with("msg_"));
        assert!(id.len() > 10);
    }
}
