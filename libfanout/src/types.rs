//! Core types for Fanout

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::{FanoutError, Result};

// ============================================================================
// Platforms
// ============================================================================

/// The closed set of platforms Fanout publishes to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
    LinkedIn,
    Twitter,
    TikTok,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::LinkedIn,
        Platform::Twitter,
        Platform::TikTok,
    ];

    /// Platforms with an inbound message sync.
    pub const SYNC_CAPABLE: [Platform; 3] =
        [Platform::Facebook, Platform::Instagram, Platform::Twitter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::LinkedIn => "linkedin",
            Platform::Twitter => "twitter",
            Platform::TikTok => "tiktok",
        }
    }

    pub fn supports_sync(&self) -> bool {
        Self::SYNC_CAPABLE.contains(self)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = FanoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "facebook" | "fb" => Ok(Platform::Facebook),
            "instagram" | "ig" => Ok(Platform::Instagram),
            "linkedin" => Ok(Platform::LinkedIn),
            "twitter" | "x" => Ok(Platform::Twitter),
            "tiktok" => Ok(Platform::TikTok),
            other => Err(FanoutError::InvalidInput(format!(
                "Unknown platform '{}'. Valid platforms: facebook, instagram, linkedin, twitter, tiktok",
                other
            ))),
        }
    }
}

// ============================================================================
// Scheduled posts
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    Immediate,
    FixedTime,
    RandomInRange,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::Immediate => "immediate",
            PublishMode::FixedTime => "fixed_time",
            PublishMode::RandomInRange => "random_in_range",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "immediate" => Ok(PublishMode::Immediate),
            "fixed_time" => Ok(PublishMode::FixedTime),
            "random_in_range" => Ok(PublishMode::RandomInRange),
            other => Err(FanoutError::InvalidInput(format!(
                "Unknown publish mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Scheduled,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            other => Err(FanoutError::InvalidInput(format!(
                "Unknown post status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Published | PostStatus::Failed | PostStatus::Cancelled
        )
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media reference attached to a post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaItem {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub is_video: bool,
}

impl MediaItem {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            thumbnail_url: None,
            is_video: false,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            thumbnail_url: None,
            is_video: true,
        }
    }
}

/// A media item an adapter skipped while building a post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDiagnostic {
    pub url: String,
    pub reason: String,
}

/// Stored outcome of one platform's publish attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_media: Vec<MediaDiagnostic>,
}

impl PlatformOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            remote_post_id: None,
            error: Some(error.into()),
            dropped_media: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub org_id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub platforms: BTreeSet<Platform>,
    pub media: Vec<MediaItem>,
    pub mode: PublishMode,
    pub scheduled_at: Option<i64>,
    pub scheduled_from: Option<i64>,
    pub scheduled_to: Option<i64>,
    pub status: PostStatus,
    pub platform_results: BTreeMap<Platform, PlatformOutcome>,
    pub error_message: Option<String>,
    pub publishing_started_at: Option<i64>,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl ScheduledPost {
    /// Create an immediate post for the given platforms
    pub fn new(
        org_id: impl Into<String>,
        author_id: impl Into<String>,
        body: impl Into<String>,
        platforms: impl IntoIterator<Item = Platform>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            author_id: author_id.into(),
            title: String::new(),
            body: body.into(),
            platforms: platforms.into_iter().collect(),
            media: Vec::new(),
            mode: PublishMode::Immediate,
            scheduled_at: None,
            scheduled_from: None,
            scheduled_to: None,
            status: PostStatus::Scheduled,
            platform_results: BTreeMap::new(),
            error_message: None,
            publishing_started_at: None,
            published_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    /// Publish at a fixed instant
    pub fn at(mut self, scheduled_at: i64) -> Self {
        self.mode = PublishMode::FixedTime;
        self.scheduled_at = Some(scheduled_at);
        self.scheduled_from = None;
        self.scheduled_to = None;
        self
    }

    /// Publish at a random instant inside `[from, to]`, drawn lazily by the sweep
    pub fn between(mut self, from: i64, to: i64) -> Self {
        self.mode = PublishMode::RandomInRange;
        self.scheduled_at = None;
        self.scheduled_from = Some(from);
        self.scheduled_to = Some(to);
        self
    }

    /// Check the structural invariants of a post before it is stored
    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(FanoutError::InvalidInput(
                "A post must target at least one platform".to_string(),
            ));
        }

        match self.mode {
            PublishMode::Immediate => Ok(()),
            PublishMode::FixedTime => {
                if self.scheduled_at.is_none() {
                    return Err(FanoutError::InvalidInput(
                        "Fixed-time posts require scheduled_at".to_string(),
                    ));
                }
                Ok(())
            }
            PublishMode::RandomInRange => match (self.scheduled_from, self.scheduled_to) {
                (Some(from), Some(to)) if from <= to => Ok(()),
                (Some(_), Some(_)) => Err(FanoutError::InvalidInput(
                    "scheduled_from must not be after scheduled_to".to_string(),
                )),
                _ => Err(FanoutError::InvalidInput(
                    "Random-in-range posts require scheduled_from and scheduled_to".to_string(),
                )),
            },
        }
    }

    /// Remote ids of every platform that accepted the post
    pub fn platform_post_ids(&self) -> BTreeMap<Platform, String> {
        self.platform_results
            .iter()
            .filter(|(_, outcome)| outcome.success)
            .filter_map(|(platform, outcome)| {
                outcome
                    .remote_post_id
                    .clone()
                    .map(|remote_id| (*platform, remote_id))
            })
            .collect()
    }

    /// Error message of every platform that rejected the post
    pub fn platform_errors(&self) -> BTreeMap<Platform, String> {
        self.platform_results
            .iter()
            .filter(|(_, outcome)| !outcome.success)
            .map(|(platform, outcome)| {
                (
                    *platform,
                    outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                )
            })
            .collect()
    }

    pub fn images(&self) -> impl Iterator<Item = &MediaItem> {
        self.media.iter().filter(|m| !m.is_video)
    }

    pub fn videos(&self) -> impl Iterator<Item = &MediaItem> {
        self.media.iter().filter(|m| m.is_video)
    }
}

// ============================================================================
// Accounts
// ============================================================================

/// OAuth token that never shows up in `Debug` output or logs
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for AccessToken {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Platform-specific account data, one schema per platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum AccountMetadata {
    Facebook {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_name: Option<String>,
    },
    Instagram {
        /// Facebook page the Instagram business account is linked to
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    LinkedIn {
        /// Organization URN when posting as a company page
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author_urn: Option<String>,
    },
    Twitter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    TikTok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        open_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct SocialAccount {
    /// Row id; 0 for an account that has not been stored yet
    pub id: i64,
    pub org_id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    pub display_name: String,
    pub access_token: AccessToken,
    pub refresh_token: Option<AccessToken>,
    pub expires_at: Option<i64>,
    pub metadata: Option<AccountMetadata>,
    pub active: bool,
    pub last_used_at: Option<i64>,
    pub last_synced_at: Option<i64>,
}

impl SocialAccount {
    pub fn new(
        org_id: impl Into<String>,
        platform: Platform,
        platform_user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            org_id: org_id.into(),
            platform,
            platform_user_id: platform_user_id.into(),
            display_name: String::new(),
            access_token: AccessToken::new(access_token),
            refresh_token: None,
            expires_at: None,
            metadata: None,
            active: true,
            last_used_at: None,
            last_synced_at: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, metadata: AccountMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Linked Facebook page of an Instagram account, when known
    pub fn instagram_page_id(&self) -> Option<&str> {
        match &self.metadata {
            Some(AccountMetadata::Instagram { page_id, .. }) => page_id.as_deref(),
            _ => None,
        }
    }

    pub fn linkedin_author_urn(&self) -> String {
        match &self.metadata {
            Some(AccountMetadata::LinkedIn {
                author_urn: Some(urn),
            }) => urn.clone(),
            _ => format!("urn:li:person:{}", self.platform_user_id),
        }
    }
}

// ============================================================================
// Inbox
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(FanoutError::InvalidInput(format!(
                "Unknown message direction '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Received,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Received => "received",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "received" => Ok(DeliveryStatus::Received),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(FanoutError::InvalidInput(format!(
                "Unknown delivery status '{}'",
                other
            ))),
        }
    }
}

/// Platform-specific message data, one schema per platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum MessageMetadata {
    Facebook {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },
    Instagram {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },
    Twitter {
        /// Which DM endpoint produced the message ("v2" or "v1.1")
        api_version: String,
    },
}

/// Cross-platform identity of a remote user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub org_id: String,
    pub external_key: String,
    pub display_name: String,
    pub created_at: i64,
}

impl Contact {
    /// Namespaced natural key, e.g. `facebook_123456`
    pub fn external_key(platform: Platform, platform_user_id: &str) -> String {
        format!("{}_{}", platform.as_str(), platform_user_id)
    }

    /// Split a namespaced key back into platform and platform user id
    pub fn parse_external_key(key: &str) -> Result<(Platform, String)> {
        let (platform, user_id) = key.split_once('_').ok_or_else(|| {
            FanoutError::InvalidInput(format!("Malformed contact key '{}'", key))
        })?;
        if user_id.is_empty() {
            return Err(FanoutError::InvalidInput(format!(
                "Malformed contact key '{}'",
                key
            )));
        }
        Ok((platform.parse()?, user_id.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub id: String,
    pub org_id: String,
    pub contact_id: String,
    pub account_id: Option<i64>,
    pub platform: Platform,
    pub direction: Direction,
    pub platform_message_id: String,
    pub thread_id: Option<String>,
    pub body: String,
    pub metadata: Option<MessageMetadata>,
    pub delivery_status: DeliveryStatus,
    pub created_at: i64,
    pub ingested_at: i64,
}

/// A remote user as seen by a platform API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalUser {
    pub id: String,
    pub name: Option<String>,
}

impl ExternalUser {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// A message as returned by an adapter, before normalization
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub platform_message_id: String,
    pub thread_id: Option<String>,
    pub from: ExternalUser,
    /// Conversation participants, when the platform reports them
    pub participants: Vec<ExternalUser>,
    pub text: String,
    pub created_at: Option<i64>,
    pub metadata: Option<MessageMetadata>,
}
