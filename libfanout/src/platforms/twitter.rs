//! Twitter / X adapter
//!
//! Publishing is text only through `POST /2/tweets`; attached media is
//! reported as dropped. Direct messages come from the v2 `dm_events`
//! endpoint, falling back to the v1.1 events list for apps whose project
//! is not enrolled for v2 DM access.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use super::http::{expect_success, read_json, ApiError, ApiResult};
use super::{expired_token_failure, PlatformAdapter, PublishResult, SendResult};
use crate::config::TwitterConfig;
use crate::error::Result;
use crate::types::{ExternalUser, MediaDiagnostic, MessageMetadata, Platform, RawMessage, ScheduledPost, SocialAccount};

pub const MEDIA_NOT_SUPPORTED: &str = "media attachments are not supported for Twitter posts";

const DM_EVENT_FIELDS: &str = "id,text,event_type,dm_conversation_id,created_at,sender_id,participant_ids";

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DmEventsResponse {
    #[serde(default)]
    data: Vec<DmEvent>,
    #[serde(default)]
    includes: Option<DmIncludes>,
}

#[derive(Debug, Deserialize)]
struct DmEvent {
    id: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    dm_conversation_id: Option<String>,
    #[serde(default)]
    participant_ids: Vec<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DmIncludes {
    #[serde(default)]
    users: Vec<TwitterUser>,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyEventsResponse {
    #[serde(default)]
    events: Vec<LegacyEvent>,
}

#[derive(Debug, Deserialize)]
struct LegacyEvent {
    id: String,
    #[serde(default)]
    created_timestamp: Option<String>,
    #[serde(default)]
    message_create: Option<LegacyMessageCreate>,
}

#[derive(Debug, Deserialize)]
struct LegacyMessageCreate {
    sender_id: String,
    #[serde(default)]
    target: Option<LegacyTarget>,
    message_data: LegacyMessageData,
}

#[derive(Debug, Deserialize)]
struct LegacyTarget {
    recipient_id: String,
}

#[derive(Debug, Deserialize)]
struct LegacyMessageData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct DmSendResponse {
    data: DmSendData,
}

#[derive(Debug, Deserialize)]
struct DmSendData {
    dm_event_id: String,
}

pub struct TwitterAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl TwitterAdapter {
    pub fn new(client: reqwest::Client, config: &TwitterConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn post_tweet(&self, account: &SocialAccount, text: &str) -> ApiResult<String> {
        let response = self
            .client
            .post(self.url("2/tweets"))
            .bearer_auth(account.access_token.expose())
            .json(&json!({ "text": text }))
            .send()
            .await?;
        let created: TweetResponse = read_json(response).await?;
        Ok(created.data.id)
    }

    async fn fetch_v2(&self, account: &SocialAccount, since: Option<i64>) -> ApiResult<Vec<RawMessage>> {
        let response = self
            .client
            .get(self.url("2/dm_events"))
            .bearer_auth(account.access_token.expose())
            .query(&[
                ("dm_event.fields", DM_EVENT_FIELDS),
                ("expansions", "sender_id,participant_ids"),
                ("user.fields", "name,username"),
                ("max_results", "100"),
            ])
            .send()
            .await?;
        let page: DmEventsResponse = read_json(response).await?;

        let users: HashMap<String, Option<String>> = page
            .includes
            .unwrap_or_default()
            .users
            .into_iter()
            .map(|u| (u.id, u.name.or(u.username)))
            .collect();
        let user = |id: &str| ExternalUser::new(id, users.get(id).cloned().flatten());

        let mut messages = Vec::new();
        for event in page.data {
            if event.event_type.as_deref().is_some_and(|t| t != "MessageCreate") {
                continue;
            }
            let Some(sender_id) = event.sender_id else {
                continue;
            };
            let created_at = event
                .created_at
                .as_deref()
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.timestamp());
            if is_before(created_at, since) {
                continue;
            }

            let participant_ids = if event.participant_ids.is_empty() {
                event
                    .dm_conversation_id
                    .as_deref()
                    .map(conversation_participants)
                    .unwrap_or_default()
            } else {
                event.participant_ids
            };

            messages.push(RawMessage {
                platform_message_id: event.id,
                thread_id: event.dm_conversation_id,
                from: user(&sender_id),
                participants: participant_ids.iter().map(|id| user(id)).collect(),
                text: event.text,
                created_at,
                metadata: Some(MessageMetadata::Twitter {
                    api_version: "v2".to_string(),
                }),
            });
        }
        Ok(messages)
    }

    async fn fetch_legacy(
        &self,
        account: &SocialAccount,
        since: Option<i64>,
    ) -> ApiResult<Vec<RawMessage>> {
        let response = self
            .client
            .get(self.url("1.1/direct_messages/events/list.json"))
            .bearer_auth(account.access_token.expose())
            .query(&[("count", "50")])
            .send()
            .await?;
        let page: LegacyEventsResponse = read_json(response).await?;

        let mut messages = Vec::new();
        for event in page.events {
            let Some(create) = event.message_create else {
                continue;
            };
            let created_at = event
                .created_timestamp
                .as_deref()
                .and_then(|ms| ms.parse::<i64>().ok())
                .map(|ms| ms / 1000);
            if is_before(created_at, since) {
                continue;
            }

            let mut participants = vec![ExternalUser::new(create.sender_id.clone(), None)];
            if let Some(target) = create.target {
                participants.push(ExternalUser::new(target.recipient_id, None));
            }

            messages.push(RawMessage {
                platform_message_id: event.id,
                thread_id: None,
                from: ExternalUser::new(create.sender_id, None),
                participants,
                text: create.message_data.text,
                created_at,
                metadata: Some(MessageMetadata::Twitter {
                    api_version: "v1.1".to_string(),
                }),
            });
        }
        Ok(messages)
    }
}

/// v2 conversation ids for one-to-one DMs are `{low_id}-{high_id}`
fn conversation_participants(conversation_id: &str) -> Vec<String> {
    conversation_id
        .split('-')
        .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

fn is_before(created_at: Option<i64>, since: Option<i64>) -> bool {
    matches!((created_at, since), (Some(created), Some(since)) if created < since)
}

/// v2 DM access needs an enrolled project; those apps get a 403 naming it
fn needs_legacy_endpoint(error: &ApiError) -> bool {
    match error {
        ApiError::Rejected { status: 403, body, .. } => {
            body.contains("client-not-enrolled") || body.contains("Project")
        }
        _ => false,
    }
}

#[async_trait]
impl PlatformAdapter for TwitterAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    async fn publish(&self, account: &SocialAccount, post: &ScheduledPost) -> Result<PublishResult> {
        if let Some(expired) = expired_token_failure(account) {
            return Ok(expired);
        }

        let dropped: Vec<MediaDiagnostic> = post
            .media
            .iter()
            .map(|item| MediaDiagnostic {
                url: item.url.clone(),
                reason: MEDIA_NOT_SUPPORTED.to_string(),
            })
            .collect();
        if !dropped.is_empty() {
            tracing::warn!(
                post_id = %post.id,
                count = dropped.len(),
                "Publishing tweet without its media"
            );
        }

        match self.post_tweet(account, &post.body).await {
            Ok(tweet_id) => {
                tracing::info!(post_id = %post.id, tweet_id = %tweet_id, "Published to Twitter");
                Ok(PublishResult::success(tweet_id).with_dropped_media(dropped))
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
        match self.fetch_v2(account, since).await {
            Ok(messages) => Ok(messages),
            Err(e) if needs_legacy_endpoint(&e) => {
                tracing::info!(
                    account_id = account.id,
                    "Twitter v2 DM access unavailable, using v1.1 endpoint"
                );
                match self.fetch_legacy(account, since).await {
                    Ok(messages) => Ok(messages),
                    Err(legacy) => {
                        tracing::warn!(
                            account_id = account.id,
                            error = %legacy,
                            "Both Twitter DM endpoints failed"
                        );
                        Ok(Vec::new())
                    }
                }
            }
            Err(e) => Err(e.into_platform_error().into()),
        }
    }

    async fn verify_account(&self, account: &SocialAccount) -> Result<bool> {
        let result = match self
            .client
            .get(self.url("2/users/me"))
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

    async fn send_message(
        &self,
        account: &SocialAccount,
        recipient_id: &str,
        text: &str,
    ) -> Result<SendResult> {
        let result = async {
            let response = self
                .client
                .post(self.url(&format!("2/dm_conversations/with/{}/messages", recipient_id)))
                .bearer_auth(account.access_token.expose())
                .json(&json!({ "text": text }))
                .send()
                .await?;
            let sent: DmSendResponse = read_json(response).await?;
            Ok::<_, ApiError>(sent.data.dm_event_id)
        }
        .await;

        match result {
            Ok(event_id) => Ok(SendResult::sent(event_id)),
            Err(ApiError::Transient(e)) => Err(e.into()),
            Err(rejected) => Ok(SendResult::failed(rejected.to_string())),
        }
    }
}
