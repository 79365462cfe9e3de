//! Postgres persistence. One facade, one sub-store per concern.

mod activity;
mod appeals;
mod comments;
mod condo;
mod groups;
mod stats;
mod sync;
mod tracking;
mod users;

pub use activity::{ActivityCursor, ActivityFilter, ActivityStore};
pub use appeals::{Appeal, AppealMessage, AppealStatus, AppealStore};
pub use comments::{CommentPolicy, CommentStore, UserComment};
pub use condo::{CondoPlayer, CondoStore};
pub use groups::GroupStore;
pub use stats::{StatsSnapshot, StatsStore};
pub use sync::SyncStore;
pub use tracking::TrackingStore;
pub use users::UserStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Result;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to Postgres. Failure here is fatal to boot.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::StoreError::Database(e.into()))?;
        Ok(())
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    pub fn groups(&self) -> GroupStore {
        GroupStore::new(self.pool.clone())
    }

    pub fn tracking(&self) -> TrackingStore {
        TrackingStore::new(self.pool.clone())
    }

    pub fn activity(&self) -> ActivityStore {
        ActivityStore::new(self.pool.clone())
    }

    pub fn comments(&self) -> CommentStore {
        CommentStore::new(self.pool.clone())
    }

    pub fn appeals(&self) -> AppealStore {
        AppealStore::new(self.pool.clone())
    }

    pub fn sync(&self) -> SyncStore {
        SyncStore::new(self.pool.clone())
    }

    pub fn stats(&self) -> StatsStore {
        StatsStore::new(self.pool.clone())
    }

    pub fn condo(&self) -> CondoStore {
        CondoStore::new(self.pool.clone())
    }
}
