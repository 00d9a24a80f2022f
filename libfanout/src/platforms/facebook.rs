//! Facebook page adapter (Graph API)
//!
//! Publishing sequence by media shape:
//!
//! - text only: `POST /{page}/feed`
//! - one image: multipart `POST /{page}/photos` with the raw bytes
//! - one video: `POST /{page}/videos` with `file_url`
//! - several images: each uploaded with `published=false`, then one
//!   `POST /{page}/feed` with `attached_media[i]={"media_fbid": id}`
//!
//! An image that cannot be fetched or uploaded is dropped and reported in
//! `dropped_media`. When every image is dropped the post goes out as text.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::graph::{self, GraphId};
use super::http::{expect_success, read_json, ApiError, ApiResult};
use super::media::MediaFetcher;
use super::{expired_token_failure, PlatformAdapter, PublishResult, SendResult};
use crate::config::FacebookConfig;
use crate::error::Result;
use crate::types::{MediaDiagnostic, MediaItem, Platform, RawMessage, ScheduledPost, SocialAccount};

pub struct FacebookAdapter {
    client: reqwest::Client,
    api_base: String,
    media: MediaFetcher,
}

impl FacebookAdapter {
    pub fn new(client: reqwest::Client, config: &FacebookConfig, media: MediaFetcher) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            media,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn post_feed(
        &self,
        account: &SocialAccount,
        message: &str,
        media_ids: &[String],
    ) -> ApiResult<String> {
        let mut form = vec![
            ("message".to_string(), message.to_string()),
            (
                "access_token".to_string(),
                account.access_token.expose().to_string(),
            ),
        ];
        for (i, media_id) in media_ids.iter().enumerate() {
            form.push((
                format!("attached_media[{}]", i),
                serde_json::json!({ "media_fbid": media_id }).to_string(),
            ));
        }

        let response = self
            .client
            .post(self.url(&format!("{}/feed", account.platform_user_id)))
            .form(&form)
            .send()
            .await?;
        let created: GraphId = read_json(response).await?;
        Ok(created.id)
    }

    /// Upload one image; `published=false` yields a media id for a later
    /// feed post, otherwise the photo is its own post
    async fn upload_photo(
        &self,
        account: &SocialAccount,
        image: &MediaItem,
        caption: Option<&str>,
        published: bool,
    ) -> ApiResult<String> {
        let media = self.media.fetch(&image.url).await.map_err(ApiError::Transient)?;
        let part = Part::bytes(media.bytes)
            .file_name(media.file_name)
            .mime_str(&media.content_type)?;

        let mut form = Form::new()
            .text("access_token", account.access_token.expose().to_string())
            .text("published", published.to_string())
            .part("source", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(self.url(&format!("{}/photos", account.platform_user_id)))
            .multipart(form)
            .send()
            .await?;
        let created: GraphId = read_json(response).await?;
        Ok(if published {
            created.post_id.unwrap_or(created.id)
        } else {
            created.id
        })
    }

    async fn post_video(
        &self,
        account: &SocialAccount,
        video: &MediaItem,
        description: &str,
    ) -> ApiResult<String> {
        let form = [
            ("file_url", video.url.as_str()),
            ("description", description),
            ("access_token", account.access_token.expose()),
        ];
        let response = self
            .client
            .post(self.url(&format!("{}/videos", account.platform_user_id)))
            .form(&form)
            .send()
            .await?;
        let created: GraphId = read_json(response).await?;
        Ok(created.id)
    }

    async fn publish_media(
        &self,
        account: &SocialAccount,
        post: &ScheduledPost,
        dropped: &mut Vec<MediaDiagnostic>,
    ) -> ApiResult<String> {
        if let Some(video_index) = post.media.iter().position(|m| m.is_video) {
            for (i, extra) in post.media.iter().enumerate() {
                if i != video_index {
                    dropped.push(MediaDiagnostic {
                        url: extra.url.clone(),
                        reason: "a Facebook video post carries no other media".to_string(),
                    });
                }
            }
            return self
                .post_video(account, &post.media[video_index], &post.body)
                .await;
        }

        let images: Vec<&MediaItem> = post.images().collect();
        match images.as_slice() {
            [] => self.post_feed(account, &post.body, &[]).await,
            [image] => {
                self.upload_photo(account, image, Some(&post.body), true)
                    .await
            }
            _ => {
                let mut media_ids = Vec::with_capacity(images.len());
                for image in images {
                    match self.upload_photo(account, image, None, false).await {
                        Ok(id) => media_ids.push(id),
                        Err(e) => drop_image(dropped, image, &e),
                    }
                }
                self.post_feed(account, &post.body, &media_ids).await
            }
        }
    }
}

fn drop_image(dropped: &mut Vec<MediaDiagnostic>, image: &MediaItem, error: &ApiError) {
    tracing::warn!(url = %image.url, error = %error, "Dropping image from Facebook post");
    dropped.push(MediaDiagnostic {
        url: image.url.clone(),
        reason: error.to_string(),
    });
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn publish(&self, account: &SocialAccount, post: &ScheduledPost) -> Result<PublishResult> {
        if let Some(expired) = expired_token_failure(account) {
            return Ok(expired);
        }

        let mut dropped = Vec::new();
        match self.publish_media(account, post, &mut dropped).await {
            Ok(remote_id) => {
                tracing::info!(post_id = %post.id, remote_id = %remote_id, "Published to Facebook");
                Ok(PublishResult::success(remote_id).with_dropped_media(dropped))
            }
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(rejected) => {
                Ok(PublishResult::failure(rejected.to_string()).with_dropped_media(dropped))
            }
        }
    }

    async fn fetch_messages(
        &self,
        account: &SocialAccount,
        since: Option<i64>,
    ) -> Result<Vec<RawMessage>> {
        graph::fetch_conversations(
            &self.client,
            &self.api_base,
            &account.platform_user_id,
            account.access_token.expose(),
            None,
            Platform::Facebook,
            since,
        )
        .await
        .map_err(|e| e.into_platform_error().into())
    }

    async fn verify_account(&self, account: &SocialAccount) -> Result<bool> {
        let response = self
            .client
            .get(self.url("me"))
            .query(&[("fields", "id"), ("access_token", account.access_token.expose())])
            .send()
            .await
            .map_err(ApiError::from);
        let result = match response {
            Ok(response) => expect_success(response).await,
            Err(e) => Err(e),
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
        match graph::send_page_message(
            &self.client,
            &self.api_base,
            &account.platform_user_id,
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
