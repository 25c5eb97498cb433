//! OpenAI → Anthropic unary response translation
//!
//! Maps one Chat Completion onto one Messages response. Block order is
//! fixed: thinking (when present and not excluded), then text, then
//! tool_use blocks in backend order.

use crate::config::ReasoningPolicy;
use crate::protocol::anthropic::{
    generate_message_id, MessagesResponse, ResponseContentBlock, Usage,
};
use crate::protocol::openai::ChatCompletion;

/// Convert a completed backend response.
///
/// `client_model` is the model name the client asked for; responses
/// echo it back so callers never see the routed backend id.
pub fn transform_completion(
    completion: &ChatCompletion,
    client_model: &str,
    policy: &ReasoningPolicy,
) -> MessagesResponse {
    let choice = completion.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(choice) = choice {
        if !policy.exclude {
            if let Some(reasoning) = &choice.message.reasoning {
                if !reasoning.is_empty() {
                    content.push(ResponseContentBlock::Thinking {
                        thinking: reasoning.clone(),
                    });
                }
            }
        }

        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(tool_calls) = &choice.message.tool_calls {
            for tc in tool_calls {
                content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input: parse_tool_arguments(&tc.function.arguments, &tc.id),
                });
            }
        }
    }

    let stop_reason = choice.map(|c| {
        map_stop_reason(
            c.finish_reason.as_deref(),
            c.stop_reason.as_ref().is_some_and(|v| !v.is_null()),
        )
    });

    // completion_tokens already includes any reasoning tokens (OpenAI
    // convention); they stay in output_tokens and are only broken out
    // separately by the usage meter.
    let usage = completion
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    MessagesResponse {
        id: completion
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_message_id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: client_model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

/// Parse tool-call arguments leniently. Backends occasionally emit
/// truncated or otherwise invalid JSON here; the request still carries
/// the raw string forward instead of failing.
fn parse_tool_arguments(arguments: &str, tool_id: &str) -> serde_json::Value {
    if arguments.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(arguments) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                "Tool call {} has unparseable arguments ({}); passing through raw",
                tool_id,
                e
            );
            serde_json::json!({ "raw": arguments })
        }
    }
}

/// Map an OpenAI finish_reason to an Anthropic stop_reason.
///
/// `stop_sequence` is only reported when the backend explicitly flagged
/// a stop-sequence hit; a bare `"stop"` collapses to `end_turn` (the
/// lossy direction, documented).
pub fn map_stop_reason(finish_reason: Option<&str>, stop_sequence_hit: bool) -> String {
    match finish_reason {
        Some("stop") if stop_sequence_hit => "stop_sequence".to_string(),
        Some("length") => "max_tokens".to_string(),
        Some("tool_calls") => "tool_use".to_string(),
        _ => "end_turn".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReasoningMode, ReasoningPolicy};

    fn parse_completion(json: &str) -> ChatCompletion {
        serde_json::from_str(json).unwrap()
    }

    fn policy_on() -> ReasoningPolicy {
        ReasoningPolicy {
            mode: ReasoningMode::Budget(8192),
            exclude: false,
            verbosity: None,
        }
    }

    #[test]
    fn test_simple_text_response() {
        let completion = parse_completion(
            r#"{"id":"c1","choices":[{"index":0,
                "message":{"role":"assistant","content":"Hello."},
                "finish_reason":"stop"}],
                "usage":{"prompt_tokens":1,"completion_tokens":2}}"#,
        );

        let response = transform_completion(&completion, "claude-opus-4", &ReasoningPolicy::off());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["id"], "c1");
        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["model"], "claude-opus-4");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "Hello.");
        assert_eq!(value["stop_reason"], "end_turn");
        assert_eq!(value["usage"]["input_tokens"], 1);
        assert_eq!(value["usage"]["output_tokens"], 2);
    }

    #[test]
    fn test_missing_id_generates_msg_id() {
        let completion = parse_completion(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"x"},
                "finish_reason":"stop"}]}"#,
        );
        let response = transform_completion(&completion, "m", &ReasoningPolicy::off());
        assert!(response.id.starts_with("msg_"));
    }

    #[test]
    fn test_reasoning_becomes_thinking_block_first() {
        let completion = parse_completion(
            r#"{"id":"c1","choices":[{"index":0,
                "message":{"role":"assistant","content":"Answer","reasoning":"Let me think"},
                "finish_reason":"stop"}]}"#,
        );

        let response = transform_completion(&completion, "m", &policy_on());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["content"][0]["type"], "thinking");
        assert_eq!(value["content"][0]["thinking"], "Let me think");
        assert_eq!(value["content"][1]["type"], "text");
    }

    #[test]
    fn test_reasoning_excluded_by_policy() {
        let completion = parse_completion(
            r#"{"id":"c1","choices":[{"index":0,
                "message":{"role":"assistant","content":"Answer","reasoning":"secret"},
                "finish_reason":"stop"}]}"#,
        );

        let mut policy = policy_on();
        policy.exclude = true;
        let response = transform_completion(&completion, "m", &policy);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["content"].as_array().unwrap().len(), 1);
        assert_eq!(value["content"][0]["type"], "text");
    }

    #[test]
    fn test_tool_calls_to_tool_use() {
        let completion = parse_completion(
            r#"{"id":"c1","choices":[{"index":0,
                "message":{"role":"assistant","content":null,
                    "tool_calls":[{"id":"tc_1","type":"function",
                        "function":{"name":"get_weather","arguments":"{\"city\":\"London\"}"}}]},
                "finish_reason":"tool_calls"}],
                "usage":{"prompt_tokens":10,"completion_tokens":20}}"#,
        );

        let response = transform_completion(&completion, "m", &ReasoningPolicy::off());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["stop_reason"], "tool_use");
        assert_eq!(value["content"][0]["type"], "tool_use");
        assert_eq!(value["content"][0]["id"], "tc_1");
        assert_eq!(value["content"][0]["input"]["city"], "London");
    }

    #[test]
    fn test_invalid_tool_arguments_wrapped_raw() {
        let completion = parse_completion(
            r#"{"id":"c1","choices":[{"index":0,
                "message":{"role":"assistant",
                    "tool_calls":[{"id":"tc_1","type":"function",
                        "function":{"name":"f","arguments":"{\"broken\": tru"}}]},
                "finish_reason":"tool_calls"}]}"#,
        );

        let response = transform_completion(&completion, "m", &ReasoningPolicy::off());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["content"][0]["input"]["raw"], "{\"broken\": tru");
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(map_stop_reason(Some("stop"), false), "end_turn");
        assert_eq!(map_stop_reason(Some("stop"), true), "stop_sequence");
        assert_eq!(map_stop_reason(Some("length"), false), "max_tokens");
        assert_eq!(map_stop_reason(Some("tool_calls"), false), "tool_use");
        assert_eq!(map_stop_reason(Some("content_filter"), false), "end_turn");
        assert_eq!(map_stop_reason(None, false), "end_turn");
    }

    #[test]
    fn test_reasoning_tokens_stay_in_output_tokens() {
        let completion = parse_completion(
            r#"{"id":"c1","choices":[{"index":0,
                "message":{"role":"assistant","content":"x"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":5,"completion_tokens":100,
                         "completion_tokens_details":{"reasoning_tokens":30}}}"#,
        );

        // reasoning tokens are already part of completion_tokens and
        // must not be deducted from the client-facing count
        let response = transform_completion(&completion, "m", &ReasoningPolicy::off());
        assert_eq!(response.usage.output_tokens, 100);
    }
}
