//! OpenAI Chat Completions wire types
//!
//! Outbound request types serialize the payload sent to the backend;
//! inbound types deserialize unary completions and SSE delta chunks.
//! Deserialization is deliberately lenient: providers disagree on which
//! fields they send (`object`, `created`, `usage` are all optional in
//! the wild), and a missing decoration must never fail a request.

use serde::{Deserialize, Serialize};

// ============================================================================
// Request Types (Serialize)
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ChatToolChoice>,
    /// Provider extensions (`reasoning`, `verbosity`, ...). Flattened so
    /// the backend sees them at the top level of the JSON body; strict
    /// SDK clients reject them as named parameters, direct marshaling
    /// does not care.
    #[serde(flatten)]
    pub extra_body: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    /// Serialized even when `None`: assistant tool-call messages carry
    /// an explicit `content: null`.
    pub content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(ChatContent::Text(content)),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Serialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, per the Chat Completions convention.
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

#[derive(Debug, Serialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatToolChoice {
    Mode(String), // "auto", "none", "required"
    Specific {
        #[serde(rename = "type")]
        choice_type: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Serialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

// ============================================================================
// Unary Response Types (Deserialize)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    #[allow(dead_code)]
    pub index: u32,
    pub message: CompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Non-standard field some providers set when a stop sequence hit.
    #[serde(default)]
    pub stop_reason: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    #[allow(dead_code)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning text, as surfaced by OpenRouter-style backends.
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionToolCall {
    pub id: String,
    #[serde(rename = "type")]
    #[serde(default)]
    #[allow(dead_code)]
    pub call_type: Option<String>,
    pub function: CompletionFunctionCall,
}

#[derive(Debug, Deserialize)]
pub struct CompletionFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    #[allow(dead_code)]
    pub total_tokens: u64,
    #[serde(default)]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: Option<u64>,
}

impl ChatUsage {
    /// Reasoning tokens, when the backend reports them separately.
    /// By OpenAI convention these are already included in
    /// `completion_tokens`; the client-facing `output_tokens` keeps
    /// them, and only the usage meter records them as their own
    /// column.
    pub fn reasoning_tokens(&self) -> Option<u64> {
        self.completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens)
    }
}

// ============================================================================
// Streaming Types (Deserialize)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    #[allow(dead_code)]
    pub index: u32,
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    /// The backend's tool-call slot index within the stream.
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[serde(default)]
    #[allow(dead_code)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_body_flattens_to_top_level() {
        let mut extra = serde_json::Map::new();
        extra.insert(
            "reasoning".to_string(),
            serde_json::json!({"max_tokens": 8192, "enabled": true, "exclude": false}),
        );
        extra.insert("verbosity".to_string(), serde_json::json!("high"));

        let req = ChatCompletionRequest {
            model: "openai/gpt-5".to_string(),
            messages: vec![ChatMessage::text("user", "Hi".to_string())],
            max_tokens: Some(10),
            temperature: None,
            top_p: None,
            stop: None,
            stream: None,
            tools: None,
            tool_choice: None,
            extra_body: extra,
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["reasoning"]["max_tokens"], 8192);
        assert_eq!(value["verbosity"], "high");
        assert!(value.get("extra_body").is_none());
    }

    #[test]
    fn test_assistant_null_content_serialized() {
        let msg = ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "tc_1".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: "f".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            tool_call_id: None,
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert!(value["content"].is_null());
        assert_eq!(value["tool_calls"][0]["type"], "function");
    }

    #[test]
    fn test_sparse_chunk_deserializes() {
        // ZAI/GLM-style chunk with almost everything missing
        let chunk: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"hey"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hey"));
        assert!(chunk.id.is_none());
    }

    #[test]
    fn test_reasoning_tokens_stay_inside_completion_tokens() {
        let usage: ChatUsage = serde_json::from_str(
            r#"{"prompt_tokens":10,"completion_tokens":100,
                "completion_tokens_details":{"reasoning_tokens":40}}"#,
        )
        .unwrap();
        // reasoning is a sub-count of completion_tokens, not a deduction
        assert_eq!(usage.completion_tokens, 100);
        assert_eq!(usage.reasoning_tokens(), Some(40));

        let plain: ChatUsage =
            serde_json::from_str(r#"{"prompt_tokens":10,"completion_tokens":30}"#).unwrap();
        assert_eq!(plain.reasoning_tokens(), None);
    }
}
