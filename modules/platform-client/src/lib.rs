//! Typed client for the external social platform API.
//!
//! Thin wrapper: every method is one endpoint, errors carry the upstream
//! status and body, pagination is explicit. Enrichment and batching policy
//! live in the worker fetchers, not here.

pub mod error;
pub mod types;

pub use error::{PlatformError, Result};
pub use types::{
    FriendEntry, FriendPage, GroupDetails, GroupMembership, GroupSummary, MemberEntry, MemberPage,
    Outfit, ThumbnailRequest, ThumbnailResponse, ThumbnailState, ThumbnailType, UserDetails,
};

use serde::de::DeserializeOwned;
use tracing::debug;

use types::unwrap_data;

pub struct PlatformClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PlatformClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn check<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }

    /// Fetch user records in bulk. Unknown ids are simply absent from the
    /// response.
    pub async fn get_users(&self, ids: &[u64]) -> Result<Vec<UserDetails>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/users", self.base_url);
        debug!(count = ids.len(), "Fetching user details");

        let resp = self
            .request(self.client.post(&url))
            .json(&serde_json::json!({ "userIds": ids }))
            .send()
            .await?;

        let body: serde_json::Value = self.check(resp).await?;
        Ok(unwrap_data(body)?)
    }

    /// One page of a user's friends. Pass the previous page's cursor to
    /// continue.
    pub async fn friends_page(&self, user_id: u64, cursor: Option<&str>) -> Result<FriendPage> {
        let mut url = format!("{}/users/{}/friends?limit=100", self.base_url, user_id);
        if let Some(cursor) = cursor {
            url.push_str("&cursor=");
            url.push_str(cursor);
        }

        let resp = self.request(self.client.get(&url)).send().await?;
        self.check(resp).await
    }

    /// All group memberships for a user.
    pub async fn user_groups(&self, user_id: u64) -> Result<Vec<GroupMembership>> {
        let url = format!("{}/users/{}/groups", self.base_url, user_id);
        let resp = self.request(self.client.get(&url)).send().await?;
        let body: serde_json::Value = self.check(resp).await?;
        Ok(unwrap_data(body)?)
    }

    /// All saved outfits for a user.
    pub async fn user_outfits(&self, user_id: u64) -> Result<Vec<Outfit>> {
        let url = format!("{}/users/{}/outfits", self.base_url, user_id);
        let resp = self.request(self.client.get(&url)).send().await?;
        let body: serde_json::Value = self.check(resp).await?;
        Ok(unwrap_data(body)?)
    }

    /// Which of the given users are currently banned on the platform.
    pub async fn are_banned(&self, ids: &[u64]) -> Result<Vec<u64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/users/are-banned", self.base_url);
        let resp = self
            .request(self.client.post(&url))
            .json(&serde_json::json!({ "userIds": ids }))
            .send()
            .await?;

        #[derive(serde::Deserialize)]
        struct BannedEntry {
            id: u64,
            banned: bool,
        }

        let body: serde_json::Value = self.check(resp).await?;
        let entries: Vec<BannedEntry> = unwrap_data(body)?;
        Ok(entries
            .into_iter()
            .filter(|e| e.banned)
            .map(|e| e.id)
            .collect())
    }

    /// Fetch group records in bulk.
    pub async fn get_groups(&self, ids: &[u64]) -> Result<Vec<GroupDetails>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/groups", self.base_url);
        let resp = self
            .request(self.client.post(&url))
            .json(&serde_json::json!({ "groupIds": ids }))
            .send()
            .await?;

        let body: serde_json::Value = self.check(resp).await?;
        Ok(unwrap_data(body)?)
    }

    /// One page of a group's members.
    pub async fn group_members_page(
        &self,
        group_id: u64,
        cursor: Option<&str>,
    ) -> Result<MemberPage> {
        let mut url = format!("{}/groups/{}/members?limit=100", self.base_url, group_id);
        if let Some(cursor) = cursor {
            url.push_str("&cursor=");
            url.push_str(cursor);
        }

        let resp = self.request(self.client.get(&url)).send().await?;
        self.check(resp).await
    }

    /// Resolve a batch of thumbnail requests (max 100 per call upstream).
    pub async fn batch_thumbnails(
        &self,
        requests: &[ThumbnailRequest],
    ) -> Result<Vec<ThumbnailResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/thumbnails/batch", self.base_url);
        let resp = self
            .request(self.client.post(&url))
            .json(requests)
            .send()
            .await?;

        let body: serde_json::Value = self.check(resp).await?;
        Ok(unwrap_data(body)?)
    }

    /// Download raw image bytes from a thumbnail URL.
    pub async fn download_image(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message: format!("image download failed for {url}"),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
