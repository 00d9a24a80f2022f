//! TikTok adapter (Content Posting API)
//!
//! Only video posts are supported. TikTok pulls the video from its public
//! URL asynchronously, so a successful publish returns the `publish_id`
//! and the final state is read later with
//! [`TikTokAdapter::check_publish_status`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::http::{read_json, ApiError, ApiResult};
use super::{expired_token_failure, PlatformAdapter, PublishResult};
use crate::config::TikTokConfig;
use crate::error::{PlatformError, Result};
use crate::types::{MediaDiagnostic, Platform, ScheduledPost, SocialAccount};

pub const VIDEO_REQUIRED: &str = "TikTok posts require a video";

/// TikTok caps titles at 2200 UTF-16 units; counting chars is close enough
const MAX_TITLE_CHARS: usize = 2200;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    code: String,
    #[serde(default)]
    message: String,
}

impl<T> Envelope<T> {
    /// TikTok answers 200 with `error.code != "ok"` for some rejections
    fn into_data(self) -> ApiResult<T> {
        if let Some(error) = self.error.filter(|e| e.code != "ok") {
            return Err(ApiError::Rejected {
                status: 200,
                message: format!("{}: {}", error.code, error.message),
                code: None,
                subcode: None,
                body: String::new(),
            });
        }
        self.data.ok_or_else(|| {
            ApiError::Transient(PlatformError::Posting(
                "TikTok response carried no data".to_string(),
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct InitData {
    publish_id: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoData {}

/// Processing state of an accepted TikTok upload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PublishStatus {
    pub status: String,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

impl PublishStatus {
    pub fn is_complete(&self) -> bool {
        self.status == "PUBLISH_COMPLETE"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "FAILED"
    }
}

pub struct TikTokAdapter {
    client: reqwest::Client,
    api_base: String,
    privacy_level: String,
}

impl TikTokAdapter {
    pub fn new(client: reqwest::Client, config: &TikTokConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            privacy_level: config.privacy_level.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn init_upload(&self, account: &SocialAccount, title: &str, video_url: &str) -> ApiResult<String> {
        let body = json!({
            "post_info": {
                "title": title,
                "privacy_level": self.privacy_level,
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "video_url": video_url,
            }
        });
        let response = self
            .client
            .post(self.url("post/publish/video/init/"))
            .bearer_auth(account.access_token.expose())
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<InitData> = read_json(response).await?;
        Ok(envelope.into_data()?.publish_id)
    }

    /// Read the processing state of an earlier publish
    pub async fn check_publish_status(
        &self,
        account: &SocialAccount,
        publish_id: &str,
    ) -> Result<PublishStatus> {
        let result = async {
            let response = self
                .client
                .post(self.url("post/publish/status/fetch/"))
                .bearer_auth(account.access_token.expose())
                .json(&json!({ "publish_id": publish_id }))
                .send()
                .await?;
            let envelope: Envelope<PublishStatus> = read_json(response).await?;
            envelope.into_data()
        }
        .await;
        result.map_err(|e| e.into_platform_error().into())
    }
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn publish(&self, account: &SocialAccount, post: &ScheduledPost) -> Result<PublishResult> {
        let Some(video) = post.videos().next() else {
            return Ok(PublishResult::failure(VIDEO_REQUIRED));
        };
        if let Some(expired) = expired_token_failure(account) {
            return Ok(expired);
        }

        let dropped: Vec<MediaDiagnostic> = post
            .media
            .iter()
            .filter(|m| !std::ptr::eq(*m, video))
            .map(|m| MediaDiagnostic {
                url: m.url.clone(),
                reason: "a TikTok post carries a single video".to_string(),
            })
            .collect();

        let source = if post.title.is_empty() { &post.body } else { &post.title };
        let title: String = source.chars().take(MAX_TITLE_CHARS).collect();

        match self.init_upload(account, &title, &video.url).await {
            Ok(publish_id) => {
                tracing::info!(post_id = %post.id, publish_id = %publish_id, "Submitted video to TikTok");
                Ok(PublishResult::success(publish_id).with_dropped_media(dropped))
            }
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(rejected) => {
                Ok(PublishResult::failure(rejected.to_string()).with_dropped_media(dropped))
            }
        }
    }

    async fn verify_account(&self, account: &SocialAccount) -> Result<bool> {
        let result = async {
            let response = self
                .client
                .get(self.url("user/info/"))
                .bearer_auth(account.access_token.expose())
                .query(&[("fields", "open_id")])
                .send()
                .await?;
            let envelope: Envelope<UserInfoData> = read_json(response).await?;
            envelope.into_data().map(|_| ())
        }
        .await;
        match result {
            Ok(()) => Ok(true),
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaItem;
    use mockito::Matcher;

    fn adapter(server: &mockito::Server) -> TikTokAdapter {
        TikTokAdapter::new(
            reqwest::Client::new(),
            &TikTokConfig {
                api_base: server.url(),
                privacy_level: "SELF_ONLY".to_string(),
            },
        )
    }

    fn account() -> SocialAccount {
        SocialAccount::new("org-1", Platform::TikTok, "open-1", "tt-token")
    }

    #[tokio::test]
    async fn test_image_post_is_business_failure() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", Matcher::Any).expect(0).create_async().await;

        let post = ScheduledPost::new("org-1", "a", "pic", [Platform::TikTok])
            .with_media(MediaItem::image("https://cdn.example.com/a.jpg"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert_eq!(result.error.as_deref(), Some(VIDEO_REQUIRED));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_video_publish_returns_publish_id() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/post/publish/video/init/")
            .match_header("authorization", "Bearer tt-token")
            .match_body(Matcher::PartialJson(json!({
                "post_info": {"title": "Dance", "privacy_level": "SELF_ONLY"},
                "source_info": {"source": "PULL_FROM_URL", "video_url": "https://cdn.example.com/v.mp4"}
            })))
            .with_status(200)
            .with_body(r#"{"data":{"publish_id":"v_pub_url~1"},"error":{"code":"ok","message":""}}"#)
            .create_async()
            .await;

        let post = ScheduledPost::new("org-1", "a", "Dance", [Platform::TikTok])
            .with_media(MediaItem::video("https://cdn.example.com/v.mp4"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert_eq!(result.remote_post_id.as_deref(), Some("v_pub_url~1"));
        init.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejection_carries_tiktok_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/post/publish/video/init/")
            .with_status(403)
            .with_body(r#"{"error":{"code":"spam_risk_too_many_posts","message":"daily limit reached"}}"#)
            .create_async()
            .await;

        let post = ScheduledPost::new("org-1", "a", "Dance", [Platform::TikTok])
            .with_media(MediaItem::video("https://cdn.example.com/v.mp4"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert!(result
            .error
            .unwrap()
            .contains("spam_risk_too_many_posts: daily limit reached"));
    }

    #[tokio::test]
    async fn test_check_publish_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/post/publish/status/fetch/")
            .match_body(Matcher::Json(json!({"publish_id": "v_pub_url~1"})))
            .with_status(200)
            .with_body(r#"{"data":{"status":"PUBLISH_COMPLETE"},"error":{"code":"ok","message":""}}"#)
            .create_async()
            .await;

        let status = adapter(&server)
            .check_publish_status(&account(), "v_pub_url~1")
            .await
            .unwrap();
        assert!(status.is_complete());
        assert!(!status.is_failed());
    }

    #[tokio::test]
    async fn test_verify_with_error_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/user/info/".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":{},"error":{"code":"access_token_invalid","message":"expired"}}"#)
            .create_async()
            .await;

        assert!(!adapter(&server).verify_account(&account()).await.unwrap());
    }
}
