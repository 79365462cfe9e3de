//! Dependency wiring for the worker binary.

use std::sync::Arc;

use anyhow::{Context, Result};

use ai_client::{ChatClient, RequestLimits};
use platform_client::PlatformClient;
use thornwall_common::{Config, Translator};
use thornwall_store::{
    KvStore, PipelineStore, PriorityQueue, ProcessingCache, RedisKv, StatusReporter, Store,
};

use crate::analyzer::{
    AiBackend, Analyzer, CondoAnalyzer, FriendAnalyzer, GroupAnalyzer, GroupPercentagePolicy,
    OutfitAnalyzer, OutfitConfig, ProfileAnalyzer,
};
use crate::checker::{ThresholdChecker, UserChecker};
use crate::fetcher::{
    FriendFetcher, GroupFetcher, PlatformImageSource, ThumbnailFetcher, UserFetcher,
};
use crate::harness::Worker;
use crate::progress::Bar;
use crate::workers::maintenance::MaintenanceConfig;
use crate::workers::{
    FriendWorker, GroupWorker, MaintenanceWorker, QueueWorker, ReasonWorker, StatsWorker,
    SyncWorker,
};

/// The worker kinds the binary exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Friend,
    Group,
    Maintenance,
    Stats,
    Queue,
    Sync,
    Reason,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Group => "group",
            Self::Maintenance => "maintenance",
            Self::Stats => "stats",
            Self::Queue => "queue",
            Self::Sync => "sync",
            Self::Reason => "reason",
        }
    }

    /// The reason worker ignores the instance-count flag.
    pub fn single_instance(&self) -> bool {
        matches!(self, Self::Reason)
    }
}

/// Shared handles for constructing workers.
pub struct App {
    pub config: Config,
    pub store: Arc<Store>,
    pub kv: Arc<dyn KvStore>,
    pub queue: Arc<PriorityQueue>,
    pub cache: Arc<ProcessingCache>,
    pub platform: Arc<PlatformClient>,
    pub chat: ChatClient,
    pub limits: RequestLimits,
    pub translator: Arc<Translator>,
}

impl App {
    /// Connect every backing service. Failure here is fatal to the process.
    pub async fn initialize(config: Config) -> Result<Self> {
        let store = Arc::new(
            Store::connect(&config.sql.dsn)
                .await
                .context("Failed to connect to Postgres")?,
        );
        store.migrate().await.context("Failed to run migrations")?;

        let kv: Arc<dyn KvStore> = Arc::new(
            RedisKv::connect(&config.kv.url)
                .await
                .context("Failed to connect to the shared KV store")?,
        );

        let queue = Arc::new(PriorityQueue::new(kv.clone()));
        let cache = Arc::new(ProcessingCache::new(
            kv.clone(),
            config.session.processed_ttl,
        ));

        let platform = Arc::new(PlatformClient::new(
            &config.platform.base_url,
            config.platform.api_key.clone(),
        ));
        let chat = ChatClient::new(&config.ai.endpoint, &config.ai.api_key, &config.ai.model);
        let limits = RequestLimits::new(config.worker.batch_sizes.outfit_analysis);
        let translator = Arc::new(Translator::new(config.translate_endpoint.clone()));

        Ok(Self {
            config,
            store,
            kv,
            queue,
            cache,
            platform,
            chat,
            limits,
            translator,
        })
    }

    fn pipeline_store(&self) -> Arc<dyn PipelineStore> {
        self.store.clone()
    }

    /// The orchestrator with the full analyzer set, in dispatch order.
    fn build_checker(&self) -> Arc<UserChecker> {
        let store = self.pipeline_store();
        let backend = Arc::new(AiBackend::new(self.chat.clone(), self.limits.clone()));
        let thumbnails = Arc::new(ThumbnailFetcher::new(self.platform.clone()));
        let images = Arc::new(PlatformImageSource::new(self.platform.clone()));

        let analyzers: Vec<Arc<dyn Analyzer>> = vec![
            Arc::new(ProfileAnalyzer::new(backend.clone(), self.translator.clone())),
            Arc::new(FriendAnalyzer::new(store.clone(), backend.clone())),
            Arc::new(GroupAnalyzer::new(
                store.clone(),
                self.config.worker.thresholds.group_flag_confidence,
            )),
            Arc::new(OutfitAnalyzer::new(
                backend,
                thumbnails,
                images,
                OutfitConfig {
                    max_outfits: self.config.worker.batch_sizes.outfit_analysis_cap,
                    sub_batch: self.config.worker.batch_sizes.outfit_analysis_batch,
                },
            )),
            Arc::new(CondoAnalyzer::new(store.clone())),
        ];

        Arc::new(UserChecker::new(store, self.cache.clone(), analyzers))
    }

    fn percentage_policy(&self) -> GroupPercentagePolicy {
        GroupPercentagePolicy {
            min_flagged_override: self.config.worker.thresholds.min_flagged_override,
            min_flagged_percentage: self.config.worker.thresholds.min_flagged_percentage,
        }
    }

    /// Construct one worker instance. Called by the harness on every
    /// (re)start.
    pub fn make_worker(&self, kind: WorkerKind, instance: usize, bar: Bar) -> Box<dyn Worker> {
        let store = self.pipeline_store();
        let reporter = StatusReporter::new(self.kv.clone(), kind.as_str(), instance);
        let threshold = Arc::new(ThresholdChecker::new(
            store.clone(),
            self.config.worker.thresholds.flagged_users,
        ));
        let user_fetcher = Arc::new(UserFetcher::new(self.platform.clone()));

        match kind {
            WorkerKind::Friend => Box::new(FriendWorker::new(
                store,
                Arc::new(FriendFetcher::new(self.platform.clone())),
                user_fetcher,
                self.build_checker(),
                self.cache.clone(),
                threshold,
                reporter,
                bar,
                None,
                self.config.worker.batch_sizes.friend_users,
            )),
            WorkerKind::Group => Box::new(GroupWorker::new(
                store,
                Arc::new(GroupFetcher::new(self.platform.clone())),
                user_fetcher,
                self.build_checker(),
                self.cache.clone(),
                threshold,
                reporter,
                bar,
                self.config.worker.batch_sizes.friend_users,
            )),
            WorkerKind::Maintenance => Box::new(MaintenanceWorker::new(
                store,
                user_fetcher,
                Arc::new(GroupFetcher::new(self.platform.clone())),
                Arc::new(ThumbnailFetcher::new(self.platform.clone())),
                reporter,
                bar,
                MaintenanceConfig {
                    purge_users_batch: self.config.worker.batch_sizes.purge_users,
                    purge_groups_batch: self.config.worker.batch_sizes.purge_groups,
                    track_groups_batch: self.config.worker.batch_sizes.track_groups,
                    thumbnail_users_batch: self.config.worker.batch_sizes.thumbnail_users,
                    thumbnail_groups_batch: self.config.worker.batch_sizes.thumbnail_groups,
                    min_group_flagged_users: self
                        .config
                        .worker
                        .thresholds
                        .min_group_flagged_users,
                    max_group_members_track: self
                        .config
                        .worker
                        .thresholds
                        .max_group_members_track,
                    percentage_policy: self.percentage_policy(),
                },
            )),
            WorkerKind::Stats => Box::new(StatsWorker::new(
                store,
                self.queue.clone(),
                reporter,
                bar,
            )),
            WorkerKind::Queue => Box::new(QueueWorker::new(
                self.queue.clone(),
                user_fetcher,
                self.build_checker(),
                reporter,
                bar,
                self.config.worker.batch_sizes.queue_items,
            )),
            WorkerKind::Sync => Box::new(SyncWorker::new(store, None, reporter, bar)),
            WorkerKind::Reason => {
                let backend = Arc::new(AiBackend::new(self.chat.clone(), self.limits.clone()));
                let profile: Arc<dyn Analyzer> = Arc::new(ProfileAnalyzer::new(
                    backend,
                    self.translator.clone(),
                ));
                Box::new(ReasonWorker::new(store, profile, reporter, bar))
            }
        }
    }
}
