use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use thornwall_common::{with_retry, RetryOptions};

use crate::error::{AiError, Result};
use crate::schema::StructuredOutput;
use crate::types::{ApiErrorBody, ChatRequest, ChatResponse, ResponseFormat};

/// Client for the chat-completion endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: endpoint.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Start a request against the configured model.
    pub fn request(&self) -> ChatRequest {
        ChatRequest::new(&self.model)
    }

    /// Send a chat request once, mapping backend failures into the error
    /// taxonomy.
    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, messages = request.messages.len(), "Chat request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &body));
        }

        let parsed: ChatResponse = response.json().await?;

        if parsed.finish_reason() == Some("content_filter") {
            return Err(AiError::ContentBlocked);
        }

        Ok(parsed)
    }

    /// Send with jittered-backoff retry. Blocked-content and schema errors
    /// are surfaced immediately.
    pub async fn chat(&self, ctx: &CancellationToken, request: ChatRequest) -> Result<ChatResponse> {
        with_retry(ctx, RetryOptions::ai(), AiError::is_retryable, || {
            self.send(&request)
        })
        .await
    }

    /// Structured-JSON completion: attach the strict schema for `T`, send the
    /// request, and decode the reply into `T`.
    pub async fn extract<T: StructuredOutput>(
        &self,
        ctx: &CancellationToken,
        request: ChatRequest,
    ) -> Result<T> {
        let request =
            request.response_format(ResponseFormat::strict(
                <T as StructuredOutput>::schema_name(),
                T::strict_schema(),
            ));

        let response = self.chat(ctx, request).await?;
        let content = response.content().ok_or(AiError::EmptyResponse)?;

        let (thought, body) = strip_thought(content);
        if let Some(thought) = thought {
            debug!(model = %self.model, thought, "Model thought process");
        }

        serde_json::from_str(body).map_err(|e| AiError::SchemaViolation(e.to_string()))
    }
}

/// Map a non-success HTTP status and body onto the error taxonomy.
fn classify_api_error(status: StatusCode, body: &str) -> AiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AiError::RateLimited;
    }

    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error);

    if let Some(ref detail) = detail {
        let code = detail.code.as_deref().unwrap_or_default();
        let kind = detail.kind.as_deref().unwrap_or_default();
        let message = detail.message.to_lowercase();
        if code == "content_filter"
            || kind == "content_filter"
            || message.contains("safety")
            || message.contains("blocked")
        {
            return AiError::ContentBlocked;
        }
    }

    AiError::Api {
        status: status.as_u16(),
        message: detail.map(|d| d.message).unwrap_or_else(|| body.to_string()),
    }
}

/// Split a `<thought>…</thought>` prefix off a model reply. The remainder is
/// the JSON body.
pub fn strip_thought(content: &str) -> (Option<String>, &str) {
    let trimmed = content.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<thought>") {
        if let Some(end) = rest.find("</thought>") {
            let thought = rest[..end].trim().to_string();
            let body = rest[end + "</thought>".len()..].trim_start();
            return (Some(thought), body);
        }
    }
    (None, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_thought_prefix() {
        let (thought, body) =
            strip_thought("<thought>weighing the evidence</thought>{\"confidence\":0.8}");
        assert_eq!(thought.as_deref(), Some("weighing the evidence"));
        assert_eq!(body, "{\"confidence\":0.8}");
    }

    #[test]
    fn passes_through_plain_json() {
        let (thought, body) = strip_thought("{\"confidence\":0.8}");
        assert!(thought.is_none());
        assert_eq!(body, "{\"confidence\":0.8}");
    }

    #[test]
    fn unterminated_thought_is_left_alone() {
        let input = "<thought>never closed";
        let (thought, body) = strip_thought(input);
        assert!(thought.is_none());
        assert_eq!(body, input);
    }

    #[test]
    fn rate_limit_status_maps_to_rate_limited() {
        let err = classify_api_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, AiError::RateLimited));
    }

    #[test]
    fn content_filter_code_maps_to_blocked() {
        let body = r#"{"error":{"message":"request rejected","code":"content_filter"}}"#;
        let err = classify_api_error(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, AiError::ContentBlocked));
    }

    #[test]
    fn safety_message_maps_to_blocked() {
        let body = r#"{"error":{"message":"Input was blocked by safety filters"}}"#;
        let err = classify_api_error(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, AiError::ContentBlocked));
    }

    #[test]
    fn other_errors_keep_status_and_message() {
        let body = r#"{"error":{"message":"model overloaded"}}"#;
        let err = classify_api_error(StatusCode::INTERNAL_SERVER_ERROR, body);
        match err {
            AiError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
