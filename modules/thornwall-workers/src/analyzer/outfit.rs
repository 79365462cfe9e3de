//! Outfit image analysis.
//!
//! Outfit thumbnails are resolved in batches, downloaded concurrently, and
//! submitted to the multimodal model in sub-batches. Already-flagged users
//! get the violation prompt; unflagged users get the theme prompt and are
//! only flagged when a theme reaches 0.5. The current avatar is always the
//! first image. Blocked content converts into a maximum-confidence entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use thornwall_common::{
    Reason, SubjectStatus, User, UserReasonType, THUMBNAIL_PLACEHOLDER,
};

use crate::fetcher::{ImageSource, ThumbnailSource};
use platform_client::ThumbnailRequest;

use super::{AnalysisBackend, Analyzer, SharedReasons};

pub const OUTFIT_VIOLATION_SYSTEM_PROMPT: &str = "\
You are a moderation analyst reviewing avatar outfit images for predatory or \
sexualized content. Each image corresponds to the outfit name at the same \
position in the provided list; the first image, when present, is the user's \
current avatar. Judge only the visual content, never the names. Report \
revealing or fetish clothing, simulated nudity, exaggerated anatomy, and \
adult-themed accessories. Use the exact submitted outfit names, unmodified. \
Confidence: 0.1-0.3 minor, 0.4-0.6 moderate, 0.7-0.8 serious, 0.9-1.0 \
extreme. Return only outfits with violations.";

pub const OUTFIT_THEME_SYSTEM_PROMPT: &str = "\
You are an outfit theme detector. Each image corresponds to the outfit name \
at the same position in the provided list; the first image, when present, is \
the user's current avatar. Identify sexual or adult themes, exaggerated \
body-figure themes, and fetish themes when clearly visible in the image. Do \
not judge outfit names. Use the exact submitted outfit names, unmodified. \
Return an empty list when no listed theme is present.";

const BLOCKED_OUTFIT_NAME: &str = "Unknown Outfits";
const BLOCKED_OUTFIT_TEXT: &str = "Content was blocked by AI safety filters.";

/// Themes below this confidence never flag an unflagged user.
const THEME_FLAG_THRESHOLD: f64 = 0.5;

const CURRENT_OUTFIT_NAME: &str = "Current Outfit";

const THUMBNAIL_BATCH: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutfitViolation {
    /// Exact name of the outfit with a violation.
    pub outfit_name: String,
    pub violation: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutfitAnalysis {
    pub username: String,
    pub evidence: Vec<OutfitViolation>,
    /// Highest confidence among the violations.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutfitTheme {
    /// Exact name of the outfit with a detected theme.
    pub outfit_name: String,
    pub theme: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutfitThemeAnalysis {
    pub username: String,
    pub themes: Vec<OutfitTheme>,
}

#[derive(Debug, Clone, Copy)]
pub struct OutfitConfig {
    /// Maximum outfits considered per subject.
    pub max_outfits: usize,
    /// Outfits per multimodal request.
    pub sub_batch: usize,
}

struct DownloadedOutfit {
    name: String,
    data_url: String,
}

pub struct OutfitAnalyzer {
    backend: Arc<dyn AnalysisBackend>,
    thumbnails: Arc<dyn ThumbnailSource>,
    images: Arc<dyn ImageSource>,
    config: OutfitConfig,
}

impl OutfitAnalyzer {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        thumbnails: Arc<dyn ThumbnailSource>,
        images: Arc<dyn ImageSource>,
        config: OutfitConfig,
    ) -> Self {
        Self {
            backend,
            thumbnails,
            images,
            config,
        }
    }

    /// Resolve outfit thumbnails for the whole batch in one pass.
    async fn outfit_thumbnails(
        &self,
        ctx: &CancellationToken,
        subjects: &[User],
    ) -> HashMap<u64, String> {
        let requests: Vec<ThumbnailRequest> = subjects
            .iter()
            .flat_map(|s| s.outfits.iter().take(self.config.max_outfits))
            .map(|outfit| ThumbnailRequest::outfit(outfit.outfit_id))
            .collect();

        self.thumbnails
            .process_batch(ctx, requests, THUMBNAIL_BATCH)
            .await
    }

    /// Download every usable outfit image for one subject, current avatar
    /// first.
    async fn download_outfits(
        &self,
        ctx: &CancellationToken,
        subject: &User,
        thumbnail_urls: &HashMap<u64, String>,
    ) -> Vec<DownloadedOutfit> {
        let mut targets: Vec<(String, String)> = Vec::new();

        if !subject.thumbnail_url.is_empty() && subject.thumbnail_url != THUMBNAIL_PLACEHOLDER {
            targets.push((
                CURRENT_OUTFIT_NAME.to_string(),
                subject.thumbnail_url.clone(),
            ));
        }
        for outfit in subject.outfits.iter().take(self.config.max_outfits) {
            match thumbnail_urls.get(&outfit.outfit_id) {
                Some(url) if !url.is_empty() && url != THUMBNAIL_PLACEHOLDER => {
                    targets.push((outfit.name.clone(), url.clone()));
                }
                _ => {}
            }
        }

        let downloads: Vec<Option<DownloadedOutfit>> = stream::iter(targets)
            .map(|(name, url)| {
                let images = self.images.clone();
                let ctx = ctx.clone();
                async move {
                    match images.fetch_image(&ctx, &url).await {
                        Ok(bytes) => {
                            use base64::Engine;
                            let encoded =
                                base64::engine::general_purpose::STANDARD.encode(&bytes);
                            Some(DownloadedOutfit {
                                name,
                                data_url: format!("data:image/webp;base64,{encoded}"),
                            })
                        }
                        Err(e) => {
                            warn!(url, error = %e, "Failed to download outfit image");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(8)
            .collect()
            .await;

        let mut downloads: Vec<DownloadedOutfit> = downloads.into_iter().flatten().collect();
        // The current avatar leads the request regardless of download order.
        downloads.sort_by_key(|d| d.name != CURRENT_OUTFIT_NAME);
        downloads
    }

    async fn analyze_flagged_subject(
        &self,
        ctx: &CancellationToken,
        subject: &User,
        downloads: &[DownloadedOutfit],
        reasons: &SharedReasons,
    ) {
        let mut all_evidence: Vec<String> = Vec::new();
        let mut max_confidence = 0.0f64;

        for chunk in downloads.chunks(self.config.sub_batch.max(1)) {
            let names: Vec<String> = chunk.iter().map(|d| d.name.clone()).collect();
            let images: Vec<String> = chunk.iter().map(|d| d.data_url.clone()).collect();

            match self
                .backend
                .analyze_outfit_violations(ctx, &subject.name, images, &names)
                .await
            {
                Ok(analysis) => {
                    // The overall confidence gates the whole response; items
                    // inside an accepted response are not re-filtered.
                    if analysis.confidence < 0.1
                        || analysis.confidence > 1.0
                        || analysis.evidence.is_empty()
                    {
                        continue;
                    }
                    for violation in analysis.evidence {
                        if !names.contains(&violation.outfit_name) {
                            warn!(
                                user_id = subject.id,
                                outfit = %violation.outfit_name,
                                "Model returned an outfit name that was not submitted"
                            );
                            continue;
                        }
                        max_confidence = max_confidence.max(violation.confidence);
                        all_evidence.push(format!(
                            "{}: {} ({:.2})",
                            violation.outfit_name, violation.violation, violation.confidence
                        ));
                    }
                }
                Err(ai_client::AiError::ContentBlocked) => {
                    info!(user_id = subject.id, "Outfit analysis blocked");
                    max_confidence = 1.0;
                    all_evidence.push(format!(
                        "{BLOCKED_OUTFIT_NAME}: {BLOCKED_OUTFIT_TEXT} (1.00)"
                    ));
                }
                Err(e) => {
                    // A failing sub-batch costs only itself.
                    warn!(user_id = subject.id, error = %e, "Outfit sub-batch failed");
                }
            }
        }

        if max_confidence > 0.0 {
            reasons.add(
                subject.id,
                UserReasonType::Outfit,
                Reason::new("User has inappropriate outfits.", max_confidence)
                    .with_evidence(all_evidence),
            );
        }
    }

    async fn analyze_unflagged_subject(
        &self,
        ctx: &CancellationToken,
        subject: &User,
        downloads: &[DownloadedOutfit],
        reasons: &SharedReasons,
    ) {
        let mut suspicious: Vec<String> = Vec::new();
        let mut highest = 0.0f64;

        for chunk in downloads.chunks(self.config.sub_batch.max(1)) {
            let names: Vec<String> = chunk.iter().map(|d| d.name.clone()).collect();
            let images: Vec<String> = chunk.iter().map(|d| d.data_url.clone()).collect();

            match self
                .backend
                .analyze_outfit_themes(ctx, &subject.name, images, &names)
                .await
            {
                Ok(analysis) => {
                    for theme in analysis.themes {
                        if theme.confidence < 0.1 || theme.confidence > 1.0 {
                            continue;
                        }
                        if !names.contains(&theme.outfit_name) {
                            warn!(
                                user_id = subject.id,
                                outfit = %theme.outfit_name,
                                "Model returned an outfit name that was not submitted"
                            );
                            continue;
                        }
                        highest = highest.max(theme.confidence);
                        suspicious.push(format!(
                            "{}: {} ({:.2})",
                            theme.outfit_name, theme.theme, theme.confidence
                        ));
                    }
                }
                Err(ai_client::AiError::ContentBlocked) => {
                    info!(user_id = subject.id, "Outfit theme analysis blocked");
                    highest = 1.0;
                    suspicious.push(format!(
                        "{BLOCKED_OUTFIT_NAME}: {BLOCKED_OUTFIT_TEXT} (1.00)"
                    ));
                }
                Err(e) => {
                    warn!(user_id = subject.id, error = %e, "Outfit theme sub-batch failed");
                }
            }
        }

        if !suspicious.is_empty() && highest >= THEME_FLAG_THRESHOLD {
            reasons.add(
                subject.id,
                UserReasonType::Outfit,
                Reason::new("User has outfits with inappropriate themes.", highest)
                    .with_evidence(suspicious),
            );
        }
    }
}

#[async_trait]
impl Analyzer for OutfitAnalyzer {
    fn name(&self) -> &'static str {
        "outfit"
    }

    async fn analyze(
        &self,
        ctx: &CancellationToken,
        subjects: &[User],
        reasons: &SharedReasons,
    ) -> anyhow::Result<()> {
        let with_outfits: Vec<&User> = subjects
            .iter()
            .filter(|s| !s.outfits.is_empty() || !s.thumbnail_url.is_empty())
            .collect();
        if with_outfits.is_empty() {
            return Ok(());
        }

        let thumbnail_urls = self.outfit_thumbnails(ctx, subjects).await;

        for subject in with_outfits {
            if ctx.is_cancelled() {
                return Ok(());
            }

            let downloads = self.download_outfits(ctx, subject, &thumbnail_urls).await;
            if downloads.is_empty() {
                continue;
            }

            if subject.status == SubjectStatus::Unflagged {
                self.analyze_unflagged_subject(ctx, subject, &downloads, reasons)
                    .await;
            } else {
                self.analyze_flagged_subject(ctx, subject, &downloads, reasons)
                    .await;
            }
        }

        Ok(())
    }
}
