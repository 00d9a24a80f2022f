//! Instagram business account adapter (Graph API)
//!
//! Instagram never takes raw bytes: every item becomes a media container
//! built from a public URL, and the container is then published.
//! Carousels publish one parent container holding up to ten children.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::graph::{self, GraphId, GraphList};
use super::http::{expect_success, read_json, ApiError, ApiResult};
use super::{expired_token_failure, PlatformAdapter, PublishResult, SendResult};
use crate::config::InstagramConfig;
use crate::error::{PlatformError, Result};
use crate::types::{MediaDiagnostic, MediaItem, Platform, RawMessage, ScheduledPost, SocialAccount};

/// Instagram's carousel limit
pub const MAX_CAROUSEL_ITEMS: usize = 10;

pub const NO_MEDIA_ERROR: &str = "Instagram posts require at least one image or video";

const MEDIA_FETCH_ERROR: &str = "Instagram could not fetch the media. Make sure the media URL is \
    publicly accessible and points to a supported image or video";

/// Graph error code and subcode Instagram uses when it cannot download media
const MEDIA_FETCH_CODE: i64 = 9004;
const MEDIA_FETCH_SUBCODE: i64 = 2207052;

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    status_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageWithInstagram {
    id: String,
    #[serde(default)]
    instagram_business_account: Option<GraphId>,
}

pub struct InstagramAdapter {
    client: reqwest::Client,
    api_base: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl InstagramAdapter {
    pub fn new(client: reqwest::Client, config: &InstagramConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval,
            max_polls: config.max_polls,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn create_container(
        &self,
        account: &SocialAccount,
        params: &[(&str, &str)],
    ) -> ApiResult<String> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("access_token", account.access_token.expose()));
        let response = self
            .client
            .post(self.url(&format!("{}/media", account.platform_user_id)))
            .form(&form)
            .send()
            .await?;
        let created: GraphId = read_json(response).await?;
        Ok(created.id)
    }

    async fn create_item_container(
        &self,
        account: &SocialAccount,
        item: &MediaItem,
        caption: Option<&str>,
        carousel_item: bool,
    ) -> ApiResult<String> {
        let mut params: Vec<(&str, &str)> = if item.is_video {
            // carousel children are plain videos, standalone ones are reels
            let media_type = if carousel_item { "VIDEO" } else { "REELS" };
            vec![("media_type", media_type), ("video_url", item.url.as_str())]
        } else {
            vec![("image_url", item.url.as_str())]
        };
        if let Some(caption) = caption {
            params.push(("caption", caption));
        }
        if carousel_item {
            params.push(("is_carousel_item", "true"));
        }

        let container_id = self.create_container(account, &params).await?;
        if item.is_video {
            self.wait_until_ready(account, &container_id).await?;
        }
        Ok(container_id)
    }

    /// Poll a video container until Instagram finished processing it
    async fn wait_until_ready(&self, account: &SocialAccount, container_id: &str) -> ApiResult<()> {
        for attempt in 0..self.max_polls {
            let response = self
                .client
                .get(self.url(container_id))
                .query(&[
                    ("fields", "status_code"),
                    ("access_token", account.access_token.expose()),
                ])
                .send()
                .await?;
            let status: ContainerStatus = read_json(response).await?;

            match status.status_code.as_deref() {
                Some("FINISHED") => return Ok(()),
                Some("ERROR") | Some("EXPIRED") => {
                    return Err(ApiError::Rejected {
                        status: 400,
                        message: format!("Instagram could not process media container {}", container_id),
                        code: None,
                        subcode: None,
                        body: String::new(),
                    });
                }
                other => {
                    tracing::debug!(
                        container_id,
                        attempt,
                        status = other.unwrap_or("unknown"),
                        "Waiting for Instagram container"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(ApiError::Transient(PlatformError::Timeout(format!(
            "media container {} not ready after {} checks",
            container_id, self.max_polls
        ))))
    }

    async fn publish_container(&self, account: &SocialAccount, creation_id: &str) -> ApiResult<String> {
        let response = self
            .client
            .post(self.url(&format!("{}/media_publish", account.platform_user_id)))
            .form(&[
                ("creation_id", creation_id),
                ("access_token", account.access_token.expose()),
            ])
            .send()
            .await?;
        let published: GraphId = read_json(response).await?;
        Ok(published.id)
    }

    async fn publish_media(
        &self,
        account: &SocialAccount,
        post: &ScheduledPost,
        dropped: &mut Vec<MediaDiagnostic>,
    ) -> ApiResult<String> {
        let creation_id = if let [item] = post.media.as_slice() {
            self.create_item_container(account, item, Some(&post.body), false)
                .await?
        } else {
            for extra in post.media.iter().skip(MAX_CAROUSEL_ITEMS) {
                dropped.push(MediaDiagnostic {
                    url: extra.url.clone(),
                    reason: format!("Instagram carousels hold at most {} items", MAX_CAROUSEL_ITEMS),
                });
            }

            let mut children = Vec::new();
            for item in post.media.iter().take(MAX_CAROUSEL_ITEMS) {
                children.push(self.create_item_container(account, item, None, true).await?);
            }
            let children = children.join(",");
            self.create_container(
                account,
                &[
                    ("media_type", "CAROUSEL"),
                    ("children", children.as_str()),
                    ("caption", post.body.as_str()),
                ],
            )
            .await?
        };

        self.publish_container(account, &creation_id).await
    }

    /// Facebook page linked to the Instagram account, from metadata or by
    /// scanning the token's pages
    async fn linked_page_id(&self, account: &SocialAccount) -> ApiResult<Option<String>> {
        if let Some(page_id) = account.instagram_page_id() {
            return Ok(Some(page_id.to_string()));
        }

        let response = self
            .client
            .get(self.url("me/accounts"))
            .query(&[
                ("fields", "id,instagram_business_account"),
                ("access_token", account.access_token.expose()),
            ])
            .send()
            .await?;
        let pages: GraphList<PageWithInstagram> = read_json(response).await?;
        Ok(pages
            .data
            .into_iter()
            .find(|page| {
                page.instagram_business_account
                    .as_ref()
                    .is_some_and(|ig| ig.id == account.platform_user_id)
            })
            .map(|page| page.id))
    }
}

/// Replace Instagram's media download failure with an actionable message
fn publish_error_message(error: &ApiError) -> String {
    match error {
        ApiError::Rejected { code, subcode, .. }
            if *code == Some(MEDIA_FETCH_CODE) || *subcode == Some(MEDIA_FETCH_SUBCODE) =>
        {
            MEDIA_FETCH_ERROR.to_string()
        }
        other => other.to_string(),
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn publish(&self, account: &SocialAccount, post: &ScheduledPost) -> Result<PublishResult> {
        if post.media.is_empty() {
            return Ok(PublishResult::failure(NO_MEDIA_ERROR));
        }
        if let Some(expired) = expired_token_failure(account) {
            return Ok(expired);
        }

        let mut dropped = Vec::new();
        match self.publish_media(account, post, &mut dropped).await {
            Ok(media_id) => {
                tracing::info!(post_id = %post.id, media_id = %media_id, "Published to Instagram");
                Ok(PublishResult::success(media_id).with_dropped_media(dropped))
            }
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(rejected) => {
                Ok(PublishResult::failure(publish_error_message(&rejected)).with_dropped_media(dropped))
            }
        }
    }

    async fn fetch_messages(
        &self,
        account: &SocialAccount,
        since: Option<i64>,
    ) -> Result<Vec<RawMessage>> {
        let page_id = self
            .linked_page_id(account)
            .await
            .map_err(ApiError::into_platform_error)?
            .ok_or_else(|| {
                PlatformError::Validation(format!(
                    "no Facebook page linked to Instagram account {}",
                    account.platform_user_id
                ))
            })?;

        graph::fetch_conversations(
            &self.client,
            &self.api_base,
            &page_id,
            account.access_token.expose(),
            Some("instagram"),
            Platform::Instagram,
            since,
        )
        .await
        .map_err(|e| e.into_platform_error().into())
    }

    async fn verify_account(&self, account: &SocialAccount) -> Result<bool> {
        let result = match self
            .client
            .get(self.url(&account.platform_user_id))
            .query(&[("fields", "id"), ("access_token", account.access_token.expose())])
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

    async fn send_message(
        &self,
        account: &SocialAccount,
        recipient_id: &str,
        text: &str,
    ) -> Result<SendResult> {
        let page_id = match self.linked_page_id(account).await {
            Ok(Some(page_id)) => page_id,
            Ok(None) => {
                return Ok(SendResult::failed(
                    "no Facebook page linked to this Instagram account",
                ))
            }
            Err(ApiError::Transient(e)) => return Err(e.into()),
            Err(rejected) => return Ok(SendResult::failed(rejected.to_string())),
        };

        match graph::send_page_message(
            &self.client,
            &self.api_base,
            &page_id,
            account.access_token.expose(),
            recipient_id,
            text,
        )
        .await
        {
            Ok(message_id) => Ok(SendResult::sent(message_id)),
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(rejected) => Ok(SendResult::failed(rejected.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountMetadata;
    use mockito::Matcher;

    fn adapter(server: &mockito::Server) -> InstagramAdapter {
        InstagramAdapter::new(
            reqwest::Client::new(),
            &InstagramConfig {
                api_base: server.url(),
                poll_interval: Duration::from_millis(1),
                max_polls: 3,
            },
        )
    }

    fn account() -> SocialAccount {
        SocialAccount::new("org-1", Platform::Instagram, "ig-1", "token")
    }

    fn post() -> ScheduledPost {
        ScheduledPost::new("org-1", "author", "Caption", [Platform::Instagram])
    }

    #[tokio::test]
    async fn test_text_only_post_is_rejected_without_requests() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", Matcher::Any).expect(0).create_async().await;

        let result = adapter(&server).publish(&account(), &post()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NO_MEDIA_ERROR));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_single_image_publish() {
        let mut server = mockito::Server::new_async().await;
        let container = server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("image_url".into(), "https://cdn.example.com/a.jpg".into()),
                Matcher::UrlEncoded("caption".into(), "Caption".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"c-1"}"#)
            .create_async()
            .await;
        let publish = server
            .mock("POST", "/ig-1/media_publish")
            .match_body(Matcher::UrlEncoded("creation_id".into(), "c-1".into()))
            .with_status(200)
            .with_body(r#"{"id":"media-9"}"#)
            .create_async()
            .await;

        let post = post().with_media(MediaItem::image("https://cdn.example.com/a.jpg"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert!(result.success);
        assert_eq!(result.remote_post_id.as_deref(), Some("media-9"));
        container.assert_async().await;
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn test_carousel_publish() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("image_url".into(), "https://cdn.example.com/1.jpg".into()),
                Matcher::UrlEncoded("is_carousel_item".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"child-1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("image_url".into(), "https://cdn.example.com/2.jpg".into()),
                Matcher::UrlEncoded("is_carousel_item".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"child-2"}"#)
            .create_async()
            .await;
        let parent = server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("media_type".into(), "CAROUSEL".into()),
                Matcher::UrlEncoded("children".into(), "child-1,child-2".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"parent-1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/ig-1/media_publish")
            .match_body(Matcher::UrlEncoded("creation_id".into(), "parent-1".into()))
            .with_status(200)
            .with_body(r#"{"id":"media-10"}"#)
            .create_async()
            .await;

        let post = post()
            .with_media(MediaItem::image("https://cdn.example.com/1.jpg"))
            .with_media(MediaItem::image("https://cdn.example.com/2.jpg"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert_eq!(result.remote_post_id.as_deref(), Some("media-10"));
        parent.assert_async().await;
    }

    #[tokio::test]
    async fn test_carousel_video_child_is_plain_video() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("image_url".into(), "https://cdn.example.com/1.jpg".into()),
                Matcher::UrlEncoded("is_carousel_item".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"child-1"}"#)
            .create_async()
            .await;
        let video_child = server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("media_type".into(), "VIDEO".into()),
                Matcher::UrlEncoded("video_url".into(), "https://cdn.example.com/v.mp4".into()),
                Matcher::UrlEncoded("is_carousel_item".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"child-2"}"#)
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/child-2".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status_code":"FINISHED","id":"child-2"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("media_type".into(), "CAROUSEL".into()),
                Matcher::UrlEncoded("children".into(), "child-1,child-2".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"parent-1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/ig-1/media_publish")
            .with_status(200)
            .with_body(r#"{"id":"media-12"}"#)
            .create_async()
            .await;

        let post = post()
            .with_media(MediaItem::image("https://cdn.example.com/1.jpg"))
            .with_media(MediaItem::video("https://cdn.example.com/v.mp4"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert_eq!(result.remote_post_id.as_deref(), Some("media-12"));
        video_child.assert_async().await;
    }

    #[tokio::test]
    async fn test_video_waits_for_container() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::UrlEncoded("media_type".into(), "REELS".into()))
            .with_status(200)
            .with_body(r#"{"id":"vid-1"}"#)
            .create_async()
            .await;
        let status = server
            .mock("GET", Matcher::Regex(r"^/vid-1".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status_code":"FINISHED","id":"vid-1"}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/ig-1/media_publish")
            .with_status(200)
            .with_body(r#"{"id":"media-11"}"#)
            .create_async()
            .await;

        let post = post().with_media(MediaItem::video("https://cdn.example.com/v.mp4"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert_eq!(result.remote_post_id.as_deref(), Some("media-11"));
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_video_processing_error_is_business_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ig-1/media")
            .with_status(200)
            .with_body(r#"{"id":"vid-2"}"#)
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/vid-2".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status_code":"ERROR"}"#)
            .create_async()
            .await;

        let post = post().with_media(MediaItem::video("https://cdn.example.com/v.mp4"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("could not process"));
    }

    #[tokio::test]
    async fn test_media_fetch_error_is_translated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ig-1/media")
            .with_status(400)
            .with_body(
                r#"{"error":{"message":"Media download has failed.","code":9004,"error_subcode":2207052}}"#,
            )
            .create_async()
            .await;

        let post = post().with_media(MediaItem::image("http://localhost/private.jpg"));
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert!(!result.success);
        assert!(result
            .error
            .unwrap()
            .starts_with("Instagram could not fetch the media"));
    }

    #[tokio::test]
    async fn test_carousel_drops_items_past_limit() {
        let mut server = mockito::Server::new_async().await;
        let children = server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::UrlEncoded("is_carousel_item".into(), "true".into()))
            .with_status(200)
            .with_body(r#"{"id":"child"}"#)
            .expect(MAX_CAROUSEL_ITEMS)
            .create_async()
            .await;
        server
            .mock("POST", "/ig-1/media")
            .match_body(Matcher::UrlEncoded("media_type".into(), "CAROUSEL".into()))
            .with_status(200)
            .with_body(r#"{"id":"parent"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/ig-1/media_publish")
            .with_status(200)
            .with_body(r#"{"id":"media-12"}"#)
            .create_async()
            .await;

        let mut post = post();
        for i in 0..12 {
            post = post.with_media(MediaItem::image(format!("https://cdn.example.com/{}.jpg", i)));
        }
        let result = adapter(&server).publish(&account(), &post).await.unwrap();
        assert!(result.success);
        assert_eq!(result.dropped_media.len(), 2);
        children.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_messages_finds_linked_page() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/me/accounts".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"data":[{"id":"other-page"},{"id":"page-7","instagram_business_account":{"id":"ig-1"}}]}"#,
            )
            .create_async()
            .await;
        let conversations = server
            .mock("GET", Matcher::Regex(r"^/page-7/conversations".to_string()))
            .match_query(Matcher::UrlEncoded("platform".into(), "instagram".into()))
            .with_status(200)
            .with_body(r#"{"data":[{"id":"c9"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex(r"^/c9/messages".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[{"id":"m1","message":"hey","from":{"id":"u5","username":"ada"}}]}"#)
            .create_async()
            .await;

        let messages = adapter(&server).fetch_messages(&account(), None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from.name.as_deref(), Some("ada"));
        assert!(matches!(
            messages[0].metadata,
            Some(crate::types::MessageMetadata::Instagram { .. })
        ));
        conversations.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_uses_metadata_page() {
        let mut server = mockito::Server::new_async().await;
        let send = server
            .mock("POST", Matcher::Regex(r"^/page-3/messages".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"message_id":"mid.7"}"#)
            .create_async()
            .await;

        let account = account().with_metadata(AccountMetadata::Instagram {
            page_id: Some("page-3".to_string()),
            username: None,
        });
        let result = adapter(&server).send_message(&account, "u5", "hello").await.unwrap();
        assert_eq!(result.remote_message_id.as_deref(), Some("mid.7"));
        send.assert_async().await;
    }
}
