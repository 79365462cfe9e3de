//! The AI calls analyzers make, behind one seam.
//!
//! Analyzers depend on this trait; [`AiBackend`] is the production
//! implementation over the chat client, with per-feature request limits.
//! Tests supply canned implementations.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ai_client::{ChatClient, ChatMessage, ChatRequest, RequestLimits};

use super::friend::{FriendReasonBatch, FRIEND_REASON_SYSTEM_PROMPT};
use super::outfit::{
    OutfitAnalysis, OutfitThemeAnalysis, OUTFIT_THEME_SYSTEM_PROMPT,
    OUTFIT_VIOLATION_SYSTEM_PROMPT,
};
use super::profile::{ProfileBatchAnalysis, PROFILE_SYSTEM_PROMPT};

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Structured profile analysis for a batch of users. `payload` is the
    /// serialized user summaries.
    async fn analyze_profiles(
        &self,
        ctx: &CancellationToken,
        payload: String,
    ) -> ai_client::Result<ProfileBatchAnalysis>;

    /// One-sentence natural-language reasons for users with flagged friend
    /// networks.
    async fn generate_friend_reasons(
        &self,
        ctx: &CancellationToken,
        payload: String,
    ) -> ai_client::Result<FriendReasonBatch>;

    /// Multimodal violation analysis of outfit images for an already-flagged
    /// user.
    async fn analyze_outfit_violations(
        &self,
        ctx: &CancellationToken,
        username: &str,
        images: Vec<String>,
        outfit_names: &[String],
    ) -> ai_client::Result<OutfitAnalysis>;

    /// Multimodal theme detection over outfit images for an unflagged user.
    async fn analyze_outfit_themes(
        &self,
        ctx: &CancellationToken,
        username: &str,
        images: Vec<String>,
        outfit_names: &[String],
    ) -> ai_client::Result<OutfitThemeAnalysis>;
}

pub struct AiBackend {
    client: ChatClient,
    limits: RequestLimits,
}

impl AiBackend {
    pub fn new(client: ChatClient, limits: RequestLimits) -> Self {
        Self { client, limits }
    }

    fn outfit_request(
        &self,
        system_prompt: &str,
        username: &str,
        images: Vec<String>,
        outfit_names: &[String],
    ) -> ChatRequest {
        let prompt = format!(
            "Analyze the outfits for user {username:?}.\n\
             Each image corresponds to the outfit name at the same position.\n\
             Outfit names: {}",
            outfit_names.join(", ")
        );
        self.client
            .request()
            .message(ChatMessage::system(system_prompt))
            .message(ChatMessage::user_with_images(images, prompt))
            .temperature(0.2)
            .top_p(0.1)
    }
}

#[async_trait]
impl AnalysisBackend for AiBackend {
    async fn analyze_profiles(
        &self,
        ctx: &CancellationToken,
        payload: String,
    ) -> ai_client::Result<ProfileBatchAnalysis> {
        let request = self
            .client
            .request()
            .message(ChatMessage::system(PROFILE_SYSTEM_PROMPT))
            .message(ChatMessage::user(payload))
            .temperature(0.2);
        self.client.extract(ctx, request).await
    }

    async fn generate_friend_reasons(
        &self,
        ctx: &CancellationToken,
        payload: String,
    ) -> ai_client::Result<FriendReasonBatch> {
        let request = self
            .client
            .request()
            .message(ChatMessage::system(FRIEND_REASON_SYSTEM_PROMPT))
            .message(ChatMessage::user(payload))
            .temperature(0.0)
            .max_tokens(400);
        self.client.extract(ctx, request).await
    }

    async fn analyze_outfit_violations(
        &self,
        ctx: &CancellationToken,
        username: &str,
        images: Vec<String>,
        outfit_names: &[String],
    ) -> ai_client::Result<OutfitAnalysis> {
        let _permit = self.limits.acquire_outfit_analysis().await?;
        let request =
            self.outfit_request(OUTFIT_VIOLATION_SYSTEM_PROMPT, username, images, outfit_names);
        self.client.extract(ctx, request).await
    }

    async fn analyze_outfit_themes(
        &self,
        ctx: &CancellationToken,
        username: &str,
        images: Vec<String>,
        outfit_names: &[String],
    ) -> ai_client::Result<OutfitThemeAnalysis> {
        let _permit = self.limits.acquire_outfit_analysis().await?;
        let request =
            self.outfit_request(OUTFIT_THEME_SYSTEM_PROMPT, username, images, outfit_names);
        self.client.extract(ctx, request).await
    }
}
