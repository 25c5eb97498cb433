//! Wire formats for both sides of the gateway
//!
//! The gateway speaks two dialects:
//!
//! - `anthropic`: the Messages API the client sends and receives
//!   (`/v1/messages`, SSE event schema)
//! - `openai`: the Chat Completions format sent to and received from
//!   the backend (`/chat/completions`, delta chunk schema)
//!
//! Types here are plain serde structs; all conversion logic lives in
//! `crate::transform`.

pub mod anthropic;
pub mod openai;
