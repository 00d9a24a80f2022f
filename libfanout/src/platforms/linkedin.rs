//! LinkedIn adapter (UGC posts API)
//!
//! Media goes through register-upload, a raw `PUT` of the bytes to the
//! returned upload URL, and then the asset URN is referenced from the post.
//! LinkedIn shares carry either images or a single video, never both.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::http::{expect_success, read_json, ApiError, ApiResult};
use super::media::MediaFetcher;
use super::{expired_token_failure, PlatformAdapter, PublishResult};
use crate::config::LinkedInConfig;
use crate::error::Result;
use crate::types::{MediaDiagnostic, MediaItem, Platform, ScheduledPost, SocialAccount};

const RESTLI_HEADER: &str = "X-Restli-Protocol-Version";
const RESTLI_VERSION: &str = "2.0.0";
const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";

#[derive(Debug, Deserialize)]
struct RegisterUploadResponse {
    value: RegisterUploadValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUploadValue {
    asset: String,
    upload_mechanism: serde_json::Map<String, serde_json::Value>,
}

impl RegisterUploadValue {
    fn upload_url(&self) -> Option<&str> {
        self.upload_mechanism
            .get(UPLOAD_MECHANISM)?
            .get("uploadUrl")?
            .as_str()
    }
}

#[derive(Debug, Deserialize)]
struct UgcPostResponse {
    #[serde(default)]
    id: Option<String>,
}

pub struct LinkedInAdapter {
    client: reqwest::Client,
    api_base: String,
    media: MediaFetcher,
}

impl LinkedInAdapter {
    pub fn new(client: reqwest::Client, config: &LinkedInConfig, media: MediaFetcher) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            media,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    /// Register, fetch and upload one item; returns the asset URN
    async fn upload_asset(
        &self,
        account: &SocialAccount,
        owner: &str,
        item: &MediaItem,
    ) -> ApiResult<String> {
        let recipe = if item.is_video {
            "urn:li:digitalmediaRecipe:feedshare-video"
        } else {
            "urn:li:digitalmediaRecipe:feedshare-image"
        };
        let body = json!({
            "registerUploadRequest": {
                "recipes": [recipe],
                "owner": owner,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });

        let response = self
            .client
            .post(self.url("assets"))
            .query(&[("action", "registerUpload")])
            .bearer_auth(account.access_token.expose())
            .header(RESTLI_HEADER, RESTLI_VERSION)
            .json(&body)
            .send()
            .await?;
        let registered: RegisterUploadResponse = read_json(response).await?;
        let upload_url = registered.value.upload_url().ok_or_else(|| ApiError::Rejected {
            status: 200,
            message: "registerUpload returned no upload URL".to_string(),
            code: None,
            subcode: None,
            body: String::new(),
        })?;

        let media = self.media.fetch(&item.url).await.map_err(ApiError::Transient)?;
        let response = self
            .client
            .put(upload_url)
            .bearer_auth(account.access_token.expose())
            .header(reqwest::header::CONTENT_TYPE, media.content_type)
            .body(media.bytes)
            .send()
            .await?;
        expect_success(response).await?;

        Ok(registered.value.asset)
    }

    /// Upload what the share can carry; everything else is reported dropped
    async fn upload_media(
        &self,
        account: &SocialAccount,
        owner: &str,
        post: &ScheduledPost,
        dropped: &mut Vec<MediaDiagnostic>,
    ) -> (&'static str, Vec<String>) {
        let selected: Vec<&MediaItem> = match post.videos().next() {
            Some(video) => {
                for other in post.media.iter().filter(|m| !std::ptr::eq(*m, video)) {
                    dropped.push(MediaDiagnostic {
                        url: other.url.clone(),
                        reason: "a LinkedIn video share carries a single video".to_string(),
                    });
                }
                vec![video]
            }
            None => post.images().collect(),
        };

        let mut assets = Vec::new();
        for item in &selected {
            match self.upload_asset(account, owner, item).await {
                Ok(asset) => assets.push(asset),
                Err(e) => {
                    tracing::warn!(url = %item.url, error = %e, "Dropping media from LinkedIn post");
                    dropped.push(MediaDiagnostic {
                        url: item.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let category = match (assets.is_empty(), selected.first()) {
            (true, _) | (_, None) => "NONE",
            (false, Some(item)) if item.is_video => "VIDEO",
            (false, Some(_)) => "IMAGE",
        };
        (category, assets)
    }

    async fn create_share(
        &self,
        account: &SocialAccount,
        author: &str,
        text: &str,
        category: &str,
        assets: &[String],
    ) -> ApiResult<String> {
        let media: Vec<serde_json::Value> = assets
            .iter()
            .map(|asset| json!({ "status": "READY", "media": asset }))
            .collect();
        let mut share = json!({
            "shareCommentary": { "text": text },
            "shareMediaCategory": category,
        });
        if !media.is_empty() {
            share["media"] = serde_json::Value::Array(media);
        }
        let body = json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });

        let response = self
            .client
            .post(self.url("ugcPosts"))
            .bearer_auth(account.access_token.expose())
            .header(RESTLI_HEADER, RESTLI_VERSION)
            .json(&body)
            .send()
            .await?;

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let created: UgcPostResponse = read_json(response).await?;
        created.id.or(header_id).ok_or_else(|| {
            ApiError::Transient(crate::error::PlatformError::Posting(
                "LinkedIn returned no post id".to_string(),
            ))
        })
    }
}

#[async_trait]
impl PlatformAdapter for LinkedInAdapter {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    async fn publish(&self, account: &SocialAccount, post: &ScheduledPost) -> Result<PublishResult> {
        if let Some(expired) = expired_token_failure(account) {
            return Ok(expired);
        }

        let author = account.linkedin_author_urn();
        let mut dropped = Vec::new();
        let (category, assets) = self.upload_media(account, &author, post, &mut dropped).await;

        match self
            .create_share(account, &author, &post.body, category, &assets)
            .await
        {
            Ok(share_id) => {
                tracing::info!(post_id = %post.id, share_id = %share_id, "Published to LinkedIn");
                Ok(PublishResult::success(share_id).with_dropped_media(dropped))
            }
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(rejected) => {
                Ok(PublishResult::failure(rejected.to_string()).with_dropped_media(dropped))
            }
        }
    }

    async fn verify_account(&self, account: &SocialAccount) -> Result<bool> {
        let result = match self
            .client
            .get(self.url("me"))
            .bearer_auth(account.access_token.expose())
            .send()
            .await
        {
            Ok(response) => expect_success(response).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(_) => Ok(false),
        }
    }
}
