//! Platform adapters
//!
//! Each adapter turns a generic publish / fetch / verify / send request into
//! the platform's HTTP calls, including its media upload sequence. The
//! orchestrators reach adapters only through [`AdapterTable`], which holds
//! exactly one adapter per [`Platform`].
//!
//! # Error contract
//!
//! Expected business failures (expired token, missing media, a 4xx
//! rejection) come back as `Ok(PublishResult::failure(..))`. `Err(..)` is
//! reserved for transient or unexpected trouble: timeouts, 5xx, 429 and
//! transport errors. The publish orchestrator turns both into the
//! platform's error slot.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{
    MediaDiagnostic, Platform, PlatformOutcome, RawMessage, ScheduledPost, SocialAccount,
};

pub mod facebook;
mod graph;
pub mod http;
pub mod instagram;
pub mod linkedin;
pub mod media;
pub mod tiktok;
pub mod twitter;

// Available outside tests so integration tests and dry runs can use it
pub mod mock;

/// Business error for an account whose token is past its expiry
pub const TOKEN_EXPIRED: &str = "access token expired";

/// Result of one platform publish attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub success: bool,
    pub remote_post_id: Option<String>,
    pub error: Option<String>,
    pub dropped_media: Vec<MediaDiagnostic>,
}

impl PublishResult {
    pub fn success(remote_post_id: impl Into<String>) -> Self {
        Self {
            success: true,
            remote_post_id: Some(remote_post_id.into()),
            error: None,
            dropped_media: Vec::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            remote_post_id: None,
            error: Some(error.into()),
            dropped_media: Vec::new(),
        }
    }

    pub fn with_dropped_media(mut self, dropped: Vec<MediaDiagnostic>) -> Self {
        self.dropped_media = dropped;
        self
    }

    pub fn into_outcome(self) -> PlatformOutcome {
        PlatformOutcome {
            success: self.success,
            remote_post_id: self.remote_post_id,
            error: self.error,
            dropped_media: self.dropped_media,
        }
    }
}

/// Result of sending a direct message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    pub success: bool,
    pub remote_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(remote_message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            remote_message_id: Some(remote_message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            remote_message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Unified interface to one social platform
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Publish a post through `account`.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for transient or unexpected failures; rejections
    /// the platform states clearly are `Ok(PublishResult::failure(..))`.
    async fn publish(&self, account: &SocialAccount, post: &ScheduledPost)
        -> Result<PublishResult>;

    /// Fetch direct messages newer than `since` (Unix seconds).
    ///
    /// Only sync-capable platforms override this.
    async fn fetch_messages(
        &self,
        _account: &SocialAccount,
        _since: Option<i64>,
    ) -> Result<Vec<RawMessage>> {
        Err(PlatformError::NotSupported(format!(
            "{} does not support message sync",
            self.platform()
        ))
        .into())
    }

    /// Check that the account's credentials still work.
    ///
    /// `Ok(false)` means the platform rejected them.
    async fn verify_account(&self, account: &SocialAccount) -> Result<bool>;

    /// Send a direct message to a platform user
    async fn send_message(
        &self,
        _account: &SocialAccount,
        _recipient_id: &str,
        _text: &str,
    ) -> Result<SendResult> {
        Err(PlatformError::NotSupported(format!(
            "{} does not support direct messages",
            self.platform()
        ))
        .into())
    }
}

/// Returns the expiry failure when `account`'s token can no longer be used
pub(crate) fn expired_token_failure(account: &SocialAccount) -> Option<PublishResult> {
    let now = chrono::Utc::now().timestamp();
    if account.is_expired(now) {
        tracing::warn!(
            account_id = account.id,
            platform = %account.platform,
            "Access token expired"
        );
        Some(PublishResult::failure(TOKEN_EXPIRED))
    } else {
        None
    }
}

/// One adapter per platform, looked up exhaustively
#[derive(Clone)]
pub struct AdapterTable {
    facebook: Arc<dyn PlatformAdapter>,
    instagram: Arc<dyn PlatformAdapter>,
    linkedin: Arc<dyn PlatformAdapter>,
    twitter: Arc<dyn PlatformAdapter>,
    tiktok: Arc<dyn PlatformAdapter>,
}

impl AdapterTable {
    pub fn new(
        facebook: Arc<dyn PlatformAdapter>,
        instagram: Arc<dyn PlatformAdapter>,
        linkedin: Arc<dyn PlatformAdapter>,
        twitter: Arc<dyn PlatformAdapter>,
        tiktok: Arc<dyn PlatformAdapter>,
    ) -> Self {
        Self {
            facebook,
            instagram,
            linkedin,
            twitter,
            tiktok,
        }
    }

    /// Build the real HTTP adapters from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client(config.scheduling.platform_timeout)?;
        let media = media::MediaFetcher::new(client.clone(), &config.media);

        Ok(Self::new(
            Arc::new(facebook::FacebookAdapter::new(
                client.clone(),
                &config.platforms.facebook,
                media.clone(),
            )),
            Arc::new(instagram::InstagramAdapter::new(
                client.clone(),
                &config.platforms.instagram,
            )),
            Arc::new(linkedin::LinkedInAdapter::new(
                client.clone(),
                &config.platforms.linkedin,
                media,
            )),
            Arc::new(twitter::TwitterAdapter::new(
                client.clone(),
                &config.platforms.twitter,
            )),
            Arc::new(tiktok::TikTokAdapter::new(client, &config.platforms.tiktok)),
        ))
    }

    /// Table where every platform is served by the same mock behavior
    pub fn mocked(config: mock::MockConfig) -> Self {
        let adapter = |platform| -> Arc<dyn PlatformAdapter> {
            Arc::new(mock::MockAdapter::new(platform, config.clone()))
        };
        Self::new(
            adapter(Platform::Facebook),
            adapter(Platform::Instagram),
            adapter(Platform::LinkedIn),
            adapter(Platform::Twitter),
            adapter(Platform::TikTok),
        )
    }

    /// Replace the adapter for one platform
    pub fn with(mut self, platform: Platform, adapter: Arc<dyn PlatformAdapter>) -> Self {
        match platform {
            Platform::Facebook => self.facebook = adapter,
            Platform::Instagram => self.instagram = adapter,
            Platform::LinkedIn => self.linkedin = adapter,
            Platform::Twitter => self.twitter = adapter,
            Platform::TikTok => self.tiktok = adapter,
        }
        self
    }

    pub fn get(&self, platform: Platform) -> &Arc<dyn PlatformAdapter> {
        match platform {
            Platform::Facebook => &self.facebook,
            Platform::Instagram => &self.instagram,
            Platform::LinkedIn => &self.linkedin,
            Platform::Twitter => &self.twitter,
            Platform::TikTok => &self.tiktok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{MockAdapter, MockConfig};

    #[test]
    fn test_publish_result_into_outcome() {
        let outcome = PublishResult::success("42")
            .with_dropped_media(vec![MediaDiagnostic {
                url: "https://cdn.example.com/x.png".to_string(),
                reason: "404".to_string(),
            }])
            .into_outcome();
        assert!(outcome.success);
        assert_eq!(outcome.remote_post_id.as_deref(), Some("42"));
        assert_eq!(outcome.dropped_media.len(), 1);

        let outcome = PublishResult::failure("nope").into_outcome();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("nope"));
    }

    #[test]
    fn test_table_lookup_is_per_platform() {
        let table = AdapterTable::mocked(MockConfig::default());
        for platform in Platform::ALL {
            assert_eq!(table.get(platform).platform(), platform);
        }
    }

    #[test]
    fn test_with_replaces_one_adapter() {
        let replacement = Arc::new(MockAdapter::new(
            Platform::Twitter,
            MockConfig::publish_failure("replaced"),
        ));
        let table = AdapterTable::mocked(MockConfig::default()).with(Platform::Twitter, replacement);
        assert_eq!(table.get(Platform::Twitter).platform(), Platform::Twitter);
        assert_eq!(table.get(Platform::Facebook).platform(), Platform::Facebook);
    }

    #[test]
    fn test_expired_token_failure() {
        let past = chrono::Utc::now().timestamp() - 1;
        let expired = SocialAccount::new("org", Platform::Facebook, "p", "t").with_expiry(past);
        let result = expired_token_failure(&expired).unwrap();
        assert_eq!(result.error.as_deref(), Some(TOKEN_EXPIRED));

        let fresh = SocialAccount::new("org", Platform::Facebook, "p", "t");
        assert!(expired_token_failure(&fresh).is_none());
    }

    #[tokio::test]
    async fn test_default_fetch_and_send_are_not_supported() {
        struct PublishOnly;

        #[async_trait]
        impl PlatformAdapter for PublishOnly {
            fn platform(&self) -> Platform {
                Platform::LinkedIn
            }

            async fn publish(
                &self,
                _account: &SocialAccount,
                _post: &ScheduledPost,
            ) -> Result<PublishResult> {
                Ok(PublishResult::success("1"))
            }

            async fn verify_account(&self, _account: &SocialAccount) -> Result<bool> {
                Ok(true)
            }
        }

        let account = SocialAccount::new("org", Platform::LinkedIn, "u", "t");
        let err = PublishOnly.fetch_messages(&account, None).await.unwrap_err();
        assert!(err.to_string().contains("linkedin does not support message sync"));
        assert!(PublishOnly.send_message(&account, "x", "hi").await.is_err());
    }
}
