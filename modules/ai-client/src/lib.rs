//! Client for the AI chat-completion backend.
//!
//! All pipeline analysis goes through structured-JSON completions: the caller
//! supplies a reply shape via [`schema::StructuredOutput`] and the backend is
//! put in strict mode so the model must conform. Interactive review sessions
//! use the separate streaming entry point.

mod client;
pub mod error;
pub mod limits;
pub mod schema;
pub mod stream;
pub mod types;

pub use client::{strip_thought, ChatClient};
pub use error::{AiError, Result};
pub use limits::RequestLimits;
pub use schema::StructuredOutput;
pub use stream::StreamOptions;
pub use types::{ChatMessage, ChatRequest, ChatResponse, ContentPart, MessageContent, Role};
