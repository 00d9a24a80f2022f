//! Mock platform adapter for testing
//!
//! A configurable adapter that can simulate successes, business failures,
//! transient errors and delays, and that records every call. It backs the
//! orchestrator tests without credentials or network access.
//!
//! Clones of a [`MockConfig`] share their call logs, so a test can keep one
//! handle and inspect what every adapter built from it was asked to do.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use super::{PlatformAdapter, PublishResult, SendResult};
use crate::error::{PlatformError, Result};
use crate::types::{Platform, RawMessage, ScheduledPost, SocialAccount};

/// How a mock answers `publish`
#[derive(Debug, Clone)]
pub enum MockPublish {
    /// Succeed with this remote id, or a generated one
    Succeed(Option<String>),
    /// Return `PublishResult::failure`
    Fail(String),
    /// Return `Err`, as a transport failure would
    Error(PlatformError),
}

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub publish: MockPublish,

    /// Answer of `verify_account`
    pub verify_succeeds: bool,

    /// Whether `send_message` is accepted
    pub send_succeeds: bool,

    /// Error returned by `fetch_messages` instead of messages
    pub fetch_error: Option<PlatformError>,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    /// Messages handed out by `fetch_messages`
    pub messages: Arc<Mutex<Vec<RawMessage>>>,

    /// `(platform, post id)` for every publish call
    pub publish_calls: Arc<Mutex<Vec<(Platform, String)>>>,

    /// `(platform, recipient, text)` for every send call
    pub sent_messages: Arc<Mutex<Vec<(Platform, String, String)>>>,

    /// Number of times `fetch_messages` has been called
    pub fetch_call_count: Arc<Mutex<usize>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            publish: MockPublish::Succeed(None),
            verify_succeeds: true,
            send_succeeds: true,
            fetch_error: None,
            delay: Duration::from_millis(0),
            messages: Arc::new(Mutex::new(Vec::new())),
            publish_calls: Arc::new(Mutex::new(Vec::new())),
            sent_messages: Arc::new(Mutex::new(Vec::new())),
            fetch_call_count: Arc::new(Mutex::new(0)),
        }
    }
}

impl MockConfig {
    /// Publishes succeed with a fixed remote id
    pub fn publish_success(remote_id: &str) -> Self {
        Self {
            publish: MockPublish::Succeed(Some(remote_id.to_string())),
            ..Default::default()
        }
    }

    /// Publishes come back as business failures
    pub fn publish_failure(error: &str) -> Self {
        Self {
            publish: MockPublish::Fail(error.to_string()),
            ..Default::default()
        }
    }

    /// Publishes return `Err`
    pub fn publish_error(error: PlatformError) -> Self {
        Self {
            publish: MockPublish::Error(error),
            ..Default::default()
        }
    }

    /// Fetches return these messages
    pub fn with_messages(messages: Vec<RawMessage>) -> Self {
        Self {
            messages: Arc::new(Mutex::new(messages)),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_fetch(mut self, error: PlatformError) -> Self {
        self.fetch_error = Some(error);
        self
    }

    pub fn rejecting_sends(mut self) -> Self {
        self.send_succeeds = false;
        self
    }

    pub fn rejecting_credentials(mut self) -> Self {
        self.verify_succeeds = false;
        self
    }

    /// Replace the messages every sharing adapter hands out
    pub fn set_messages(&self, messages: Vec<RawMessage>) {
        *lock(&self.messages) = messages;
    }

    pub fn publish_calls(&self) -> Vec<(Platform, String)> {
        lock(&self.publish_calls).clone()
    }

    pub fn publish_count(&self, platform: Platform) -> usize {
        lock(&self.publish_calls)
            .iter()
            .filter(|(p, _)| *p == platform)
            .count()
    }

    pub fn sent_messages(&self) -> Vec<(Platform, String, String)> {
        lock(&self.sent_messages).clone()
    }

    pub fn fetch_call_count(&self) -> usize {
        *lock(&self.fetch_call_count)
    }
}

/// Call logs stay usable after a panicking test thread
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock adapter for one platform
pub struct MockAdapter {
    platform: Platform,
    config: MockConfig,
}

impl MockAdapter {
    pub fn new(platform: Platform, config: MockConfig) -> Self {
        Self { platform, config }
    }

    /// Adapter that always succeeds
    pub fn success(platform: Platform) -> Self {
        Self::new(platform, MockConfig::default())
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    async fn simulate_latency(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, _account: &SocialAccount, post: &ScheduledPost) -> Result<PublishResult> {
        lock(&self.config.publish_calls).push((self.platform, post.id.clone()));
        self.simulate_latency().await;

        match &self.config.publish {
            MockPublish::Succeed(Some(remote_id)) => Ok(PublishResult::success(remote_id.clone())),
            MockPublish::Succeed(None) => Ok(PublishResult::success(format!(
                "{}:mock-{}",
                self.platform,
                uuid::Uuid::new_v4()
            ))),
            MockPublish::Fail(error) => Ok(PublishResult::failure(error.clone())),
            MockPublish::Error(error) => Err(error.clone().into()),
        }
    }

    async fn fetch_messages(
        &self,
        _account: &SocialAccount,
        since: Option<i64>,
    ) -> Result<Vec<RawMessage>> {
        *lock(&self.config.fetch_call_count) += 1;
        self.simulate_latency().await;

        if !self.platform.supports_sync() {
            return Err(PlatformError::NotSupported(format!(
                "{} does not support message sync",
                self.platform
            ))
            .into());
        }
        if let Some(error) = &self.config.fetch_error {
            return Err(error.clone().into());
        }

        Ok(lock(&self.config.messages)
            .iter()
            .filter(|m| match (m.created_at, since) {
                (Some(created), Some(since)) => created >= since,
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn verify_account(&self, _account: &SocialAccount) -> Result<bool> {
        self.simulate_latency().await;
        Ok(self.config.verify_succeeds)
    }

    async fn send_message(
        &self,
        _account: &SocialAccount,
        recipient_id: &str,
        text: &str,
    ) -> Result<SendResult> {
        lock(&self.config.sent_messages).push((
            self.platform,
            recipient_id.to_string(),
            text.to_string(),
        ));
        self.simulate_latency().await;

        if self.config.send_succeeds {
            Ok(SendResult::sent(format!("{}:msg-{}", self.platform, uuid::Uuid::new_v4())))
        } else {
            Ok(SendResult::failed("Mock send failed"))
        }
    }
}
