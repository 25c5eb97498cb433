//! Anthropic → OpenAI request translation
//!
//! Converts a Messages API request into the Chat Completions payload
//! the routed backend expects.
//!
//! # Key Differences
//!
//! | Anthropic                       | OpenAI                           |
//! |---------------------------------|----------------------------------|
//! | Top-level `system` field        | Leading `role: "system"` message |
//! | `tool_use` content blocks       | `tool_calls` on the assistant    |
//! | `tool_result` content blocks    | Separate `role: "tool"` messages |
//! | `image` base64 blocks           | `image_url` data: URLs           |
//! | `stop_sequences` (array)        | `stop` (array)                   |
//! | `thinking.budget_tokens`        | `reasoning.max_tokens` extension |
//! | `top_k`                         | (no equivalent, dropped)         |
//!
//! A single Anthropic message can fan out into several chat messages:
//! tool results become individual `role: "tool"` entries, with any
//! surrounding plain text kept in its original position relative to
//! them.

use crate::config::{
    clamp_reasoning_budget, Config, ReasoningMode, ReasoningPolicy,
};
use crate::protocol::anthropic::{
    ContentBlock, Message, MessageContent, MessagesRequest, SystemPrompt, ToolChoice,
    ToolResultContent,
};
use crate::protocol::openai::{
    ChatCompletionRequest, ChatContent, ChatMessage, ChatToolChoice, ContentPart, FunctionCall,
    FunctionDef, ImageUrl, Tool, ToolCall, ToolChoiceFunction,
};
use crate::router::TierRoute;

use super::TransformError;

/// Translate a Messages request onto a resolved route.
///
/// Returns the outgoing Chat Completions request and the reasoning
/// policy that actually applies (the route's, unless the request's own
/// `thinking` config overrode it) so the response side knows whether to
/// surface thinking blocks.
pub fn transform_request(
    req: &MessagesRequest,
    route: &TierRoute,
    config: &Config,
) -> Result<(ChatCompletionRequest, ReasoningPolicy), TransformError> {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(system) = &req.system {
        let system_text = flatten_system(system);
        if !system_text.is_empty() {
            messages.push(ChatMessage::text("system", system_text));
        }
    }

    for msg in &req.messages {
        messages.extend(convert_message(msg)?);
    }

    let policy = effective_policy(req, route);

    let mut extra_body = serde_json::Map::new();
    match policy.mode {
        ReasoningMode::Off => {}
        ReasoningMode::Effort(level) => {
            extra_body.insert(
                "reasoning".to_string(),
                serde_json::json!({
                    "effort": level.as_str(),
                    "enabled": true,
                    "exclude": policy.exclude,
                }),
            );
        }
        ReasoningMode::Budget(tokens) => {
            extra_body.insert(
                "reasoning".to_string(),
                serde_json::json!({
                    "max_tokens": tokens,
                    "enabled": true,
                    "exclude": policy.exclude,
                }),
            );
        }
    }
    if !policy.is_off() {
        if let Some(verbosity) = policy.verbosity {
            extra_body.insert(
                "verbosity".to_string(),
                serde_json::Value::String(verbosity.as_str().to_string()),
            );
        }
    }

    let max_tokens = req
        .max_tokens
        .clamp(config.min_tokens_limit, config.max_tokens_limit);

    let request = ChatCompletionRequest {
        model: route.model_id.clone(),
        messages,
        max_tokens: Some(max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        // top_k has no Chat Completions equivalent and is dropped here.
        stop: req.stop_sequences.clone(),
        stream: if req.stream { Some(true) } else { None },
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| Tool {
                    tool_type: "function".to_string(),
                    function: FunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect()
        }),
        tool_choice: req.tool_choice.as_ref().map(convert_tool_choice),
        extra_body,
    };

    Ok((request, policy))
}

/// The reasoning policy in force for this request: the request's own
/// `thinking` config wins over the route, provided the routed model can
/// reason at all.
fn effective_policy(req: &MessagesRequest, route: &TierRoute) -> ReasoningPolicy {
    if let Some(thinking) = &req.thinking {
        if thinking.config_type == "enabled" && route.supports_reasoning {
            let budget = thinking.budget_tokens.unwrap_or(crate::config::MIN_REASONING_BUDGET);
            return ReasoningPolicy {
                mode: ReasoningMode::Budget(clamp_reasoning_budget(budget)),
                exclude: false,
                verbosity: route.reasoning.verbosity,
            };
        }
    }
    route.reasoning
}

/// Concatenate system blocks into the single system string OpenAI
/// expects.
fn flatten_system(system: &SystemPrompt) -> String {
    match system {
        SystemPrompt::Text(text) => text.clone(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

/// Convert one Anthropic message into one or more chat messages.
///
/// Ordering rule: tool_result blocks each become their own
/// `role: "tool"` message, and runs of plain text/images before or
/// after them are flushed as separate user messages so the relative
/// order the client sent is preserved.
fn convert_message(msg: &Message) -> Result<Vec<ChatMessage>, TransformError> {
    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            return Ok(vec![ChatMessage::text(&msg.role, text.clone())]);
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    if msg.role == "assistant" {
        return convert_assistant_blocks(blocks);
    }

    let mut out: Vec<ChatMessage> = Vec::new();
    let mut pending: Vec<&ContentBlock> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                flush_user_parts(&msg.role, &mut pending, &mut out)?;

                let tool_use_id = tool_use_id
                    .as_ref()
                    .ok_or(TransformError::MissingToolUseId)?;
                let mut text = stringify_tool_result(content.as_ref());
                if is_error.unwrap_or(false) {
                    text = format!("[ERROR] {}", text);
                }
                out.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(text)),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            other => pending.push(other),
        }
    }
    flush_user_parts(&msg.role, &mut pending, &mut out)?;

    if out.is_empty() {
        out.push(ChatMessage::text(&msg.role, String::new()));
    }

    Ok(out)
}

/// Flush accumulated text/image blocks as a single user-role message.
fn flush_user_parts(
    role: &str,
    pending: &mut Vec<&ContentBlock>,
    out: &mut Vec<ChatMessage>,
) -> Result<(), TransformError> {
    if pending.is_empty() {
        return Ok(());
    }

    let has_images = pending
        .iter()
        .any(|b| matches!(b, ContentBlock::Image { .. }));

    let content = if has_images {
        let mut parts: Vec<ContentPart> = Vec::new();
        for block in pending.iter() {
            match block {
                ContentBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
                ContentBlock::Image { source } => {
                    if source.source_type != "base64" {
                        return Err(TransformError::UnsupportedImageSource(
                            source.source_type.clone(),
                        ));
                    }
                    parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{};base64,{}", source.media_type, source.data),
                        },
                    });
                }
                // Thinking echoes are dropped; tool_use in a user
                // message has no chat-side meaning either.
                _ => {}
            }
        }
        ChatContent::Parts(parts)
    } else {
        let texts: Vec<&str> = pending
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            pending.clear();
            return Ok(());
        }
        ChatContent::Text(texts.join("\n\n"))
    };

    out.push(ChatMessage {
        role: role.to_string(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    });
    pending.clear();
    Ok(())
}

/// Assistant messages fold into a single chat message: text parts
/// joined (or null), tool_use blocks becoming tool_calls in order.
fn convert_assistant_blocks(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>, TransformError> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            // Prior-turn thinking is never replayed to the backend.
            ContentBlock::Thinking { .. } => {}
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text_parts.join("\n\n")))
    };

    Ok(vec![ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    }])
}

/// Stringify a tool_result payload for the `role: "tool"` message.
///
/// Plain strings pass through; all-text block lists are joined; results
/// carrying anything else (images, nested structures) are serialized
/// wholesale so no information silently vanishes.
fn stringify_tool_result(content: Option<&ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => {
            let all_text = blocks
                .iter()
                .all(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"));
            if all_text {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            } else {
                serde_json::to_string(blocks).unwrap_or_default()
            }
        }
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> ChatToolChoice {
    match choice {
        ToolChoice::Auto => ChatToolChoice::Mode("auto".to_string()),
        // OpenAI "required" means "must call some tool"; not a perfect
        // match for Anthropic's "any" but the standard mapping.
        ToolChoice::Any => ChatToolChoice::Mode("required".to_string()),
        ToolChoice::Tool { name } => ChatToolChoice::Specific {
            choice_type: "function".to_string(),
            function: ToolChoiceFunction { name: name.clone() },
        },
    }
}
