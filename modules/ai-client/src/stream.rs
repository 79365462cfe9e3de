//! Streaming chat for interactive review sessions.
//!
//! A turn produces two channels: a buffered chunk channel delivering text as
//! it arrives, and a single-slot history channel that receives the post-turn
//! conversation exactly once. Each turn is bounded by an output-token cap and
//! a hard per-turn timeout.

use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::client::ChatClient;
use crate::error::AiError;
use crate::types::{ChatMessage, MessageContent, Role};

/// Bounds on an interactive chat turn.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub max_output_tokens: u32,
    pub turn_timeout: Duration,
    /// Only the most recent messages are sent back to the model.
    pub history_limit: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 200,
            turn_timeout: Duration::from_secs(20),
            history_limit: 6,
        }
    }
}

/// One server-sent chunk of a streamed completion.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    /// Send `message` against `history` and stream the reply.
    ///
    /// Returns `(chunks, history)`. The chunk channel closes when the turn
    /// ends (normally, by timeout, or by cancellation); the history channel
    /// then receives the full post-turn history exactly once.
    pub fn stream_response(
        &self,
        ctx: &CancellationToken,
        history: Vec<ChatMessage>,
        system_prompt: String,
        message: String,
        options: StreamOptions,
    ) -> (mpsc::Receiver<String>, mpsc::Receiver<Vec<ChatMessage>>) {
        let (chunk_tx, chunk_rx) = mpsc::channel::<String>(32);
        let (history_tx, history_rx) = mpsc::channel::<Vec<ChatMessage>>(1);

        let client = self.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            // Limit context to the most recent turns.
            let mut trimmed = history;
            if trimmed.len() > options.history_limit {
                trimmed = trimmed.split_off(trimmed.len() - options.history_limit);
            }
            trimmed.push(ChatMessage::user(message));

            let reply = tokio::select! {
                _ = ctx.cancelled() => None,
                outcome = tokio::time::timeout(
                    options.turn_timeout,
                    client.run_stream(&trimmed, &system_prompt, options, &chunk_tx),
                ) => match outcome {
                    Ok(Ok(text)) => Some(text),
                    Ok(Err(e)) => {
                        error!(error = %e, "Chat stream failed");
                        let _ = chunk_tx.send(format!("Error: {e}")).await;
                        None
                    }
                    Err(_) => {
                        debug!("Chat turn timed out");
                        None
                    }
                },
            };

            drop(chunk_tx);

            if let Some(text) = reply {
                trimmed.push(ChatMessage {
                    role: Role::Assistant,
                    content: MessageContent::Text(text),
                });
            }
            let _ = history_tx.send(trimmed).await;
        });

        (chunk_rx, history_rx)
    }

    /// Drive one streamed completion, forwarding content deltas to `chunks`.
    /// Returns the accumulated reply text.
    async fn run_stream(
        &self,
        history: &[ChatMessage],
        system_prompt: &str,
        options: StreamOptions,
        chunks: &mpsc::Sender<String>,
    ) -> crate::error::Result<String> {
        let mut request = self
            .request()
            .message(ChatMessage::system(system_prompt))
            .messages(history.iter().cloned())
            .max_tokens(options.max_output_tokens)
            .temperature(0.5)
            .top_p(0.7);
        request.stream = true;

        let url = format!("{}/chat/completions", self.base_url());
        let response = self
            .http_client()
            .post(&url)
            .bearer_auth(self.api_key())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let mut accumulated = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // SSE frames are newline-delimited `data: {json}` lines.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }

                let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
                    continue;
                };
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            accumulated.push_str(&content);
                            if chunks.send(content).await.is_err() {
                                // Receiver went away; stop streaming.
                                return Ok(accumulated);
                            }
                        }
                    }
                }
            }
        }

        if accumulated.is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(accumulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_chunk_parses_delta_content() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"partial"},"index":0}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("partial"));
    }

    #[test]
    fn stream_chunk_tolerates_empty_delta() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"index":0}]}"#).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn default_options_match_review_session_bounds() {
        let options = StreamOptions::default();
        assert_eq!(options.turn_timeout, Duration::from_secs(20));
        assert_eq!(options.history_limit, 6);
    }
}
