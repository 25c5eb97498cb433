//! Anthropic ↔ OpenAI translation
//!
//! Three one-way conversions:
//!
//! - `request`: Anthropic Messages request → Chat Completions request
//! - `response`: unary Chat Completion → Messages response
//! - `stream`: Chat Completions SSE deltas → Anthropic SSE events
//!
//! All three are pure with respect to their inputs: given the same
//! request or the same recorded byte stream, they produce identical
//! output. Anything stateful (HTTP, metering) lives outside.

pub mod request;
pub mod response;
pub mod stream;

/// Client-input problems detected during request translation.
/// All variants surface to the client as 400 invalid_request.
#[derive(Debug, PartialEq, Eq)]
pub enum TransformError {
    /// Image block whose `source.type` is not `base64`.
    UnsupportedImageSource(String),
    /// `tool_result` block with no `tool_use_id` to correlate.
    MissingToolUseId,
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedImageSource(source_type) => write!(
                f,
                "image source type '{}' is not supported; only base64 images can be forwarded",
                source_type
            ),
            Self::MissingToolUseId => {
                write!(f, "tool_result block is missing its tool_use_id")
            }
        }
    }
}

impl std::error::Error for TransformError {}
