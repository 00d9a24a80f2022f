//! Publish orchestration
//!
//! A sweep fails stale claims, draws instants for random-window posts,
//! selects the due posts and dispatches them concurrently. Dispatching one
//! post follows a fixed protocol:
//!
//! 1. claim it with a `scheduled → publishing` compare-and-set
//! 2. fan out to every target platform at once, each under its own timeout
//! 3. aggregate the per-platform outcomes into the post status
//! 4. store the aggregate in one write
//!
//! Claiming and storing are retried with exponential backoff on transient
//! failures. The fan-out itself runs once per claim, so a platform that
//! accepted the post is never asked again.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::accounts::AccountResolver;
use crate::config::SchedulingConfig;
use crate::db::Database;
use crate::error::{FanoutError, Result};
use crate::platforms::{AdapterTable, PublishResult};
use crate::rate_limiter::{RateLimiter, RequestKind};
use crate::scheduling;
use crate::service::events::{Event, EventBus};
use crate::types::{Platform, PlatformOutcome, PostStatus, ScheduledPost};

/// Error slot of a platform the org has no usable account for
pub const NO_ACTIVE_ACCOUNT: &str = "no active account";

/// Marker of a post whose worker disappeared mid-publish
pub const INTERRUPTED: &str = "interrupted while publishing";

/// Failure of an orchestrator-level step (loading, claiming, storing)
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Worth retrying after a backoff
    #[error("{0}")]
    Transient(FanoutError),
    /// Retrying cannot help
    #[error("{0}")]
    Terminal(FanoutError),
}

impl From<FanoutError> for DispatchError {
    fn from(e: FanoutError) -> Self {
        if e.is_transient() {
            DispatchError::Transient(e)
        } else {
            DispatchError::Terminal(e)
        }
    }
}

/// Aggregated result of one dispatched post
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub post_id: String,
    pub status: PostStatus,
    pub results: BTreeMap<Platform, PlatformOutcome>,
    pub error_message: Option<String>,
    pub published_at: Option<i64>,
}

impl PublishOutcome {
    fn from_results(post_id: String, results: BTreeMap<Platform, PlatformOutcome>, now: i64) -> Self {
        let (status, error_message) = aggregate(&results);
        Self {
            post_id,
            status,
            published_at: (status == PostStatus::Published).then_some(now),
            results,
            error_message,
        }
    }
}

/// Final status and error summary for a set of platform outcomes.
///
/// Any success publishes the post. The error summary is a JSON object of
/// the failing platforms, absent when every platform succeeded.
pub fn aggregate(results: &BTreeMap<Platform, PlatformOutcome>) -> (PostStatus, Option<String>) {
    let failures: BTreeMap<&str, &str> = results
        .iter()
        .filter(|(_, outcome)| !outcome.success)
        .map(|(platform, outcome)| {
            (
                platform.as_str(),
                outcome.error.as_deref().unwrap_or("unknown error"),
            )
        })
        .collect();

    let status = if results.values().any(|outcome| outcome.success) {
        PostStatus::Published
    } else {
        PostStatus::Failed
    };
    let error_message = if failures.is_empty() {
        None
    } else {
        serde_json::to_string(&failures).ok()
    };
    (status, error_message)
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

/// What happened to one post in a sweep
#[derive(Debug, Clone)]
pub enum JobResult {
    /// Another worker claimed it, or it left `scheduled` meanwhile
    Skipped,
    Completed(PublishOutcome),
    /// The job-level marker stored on the post
    Failed(String),
}

/// Counters of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub stale_failed: usize,
    pub materialized: usize,
    pub dispatched: usize,
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct PublishOrchestrator {
    db: Database,
    resolver: AccountResolver,
    adapters: AdapterTable,
    limiter: Arc<RateLimiter>,
    scheduling: SchedulingConfig,
    events: EventBus,
}

impl PublishOrchestrator {
    pub fn new(
        db: Database,
        resolver: AccountResolver,
        adapters: AdapterTable,
        limiter: Arc<RateLimiter>,
        scheduling: SchedulingConfig,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            resolver,
            adapters,
            limiter,
            scheduling,
            events,
        }
    }

    /// Publish every due post of every org.
    ///
    /// # Errors
    ///
    /// Returns an error only when the due posts cannot be selected. Failures
    /// of individual posts are stored on the posts and counted in the report.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let now = chrono::Utc::now().timestamp();
        let mut report = SweepReport::default();

        let cutoff = now - self.scheduling.stale_after.as_secs() as i64;
        let stale = self.db.fail_stale_publishing(cutoff, INTERRUPTED).await?;
        for post_id in &stale {
            warn!(post_id = %post_id, "Post was stuck in publishing, marked failed");
            self.events.emit(Event::PublishFailed {
                post_id: post_id.clone(),
                error: INTERRUPTED.to_string(),
            });
        }
        report.stale_failed = stale.len();

        report.materialized = self.materialize_random_posts().await?;

        let due = self.db.due_posts(now).await?;
        report.dispatched = due.len();
        if due.is_empty() {
            debug!("No posts due");
            return Ok(report);
        }
        info!(count = due.len(), "Dispatching due posts");

        let results: Vec<JobResult> = stream::iter(due.into_iter().map(|post| post.id))
            .map(|post_id| async move { self.run_job(&post_id).await })
            .buffer_unordered(self.scheduling.max_concurrent_posts.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                JobResult::Skipped => report.skipped += 1,
                JobResult::Completed(outcome) if outcome.status == PostStatus::Published => {
                    report.published += 1
                }
                JobResult::Completed(_) | JobResult::Failed(_) => report.failed += 1,
            }
        }

        info!(
            published = report.published,
            failed = report.failed,
            skipped = report.skipped,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Publish one post right away, whatever its schedule.
    ///
    /// Runs the same claim / fan-out / store protocol as a sweep and returns
    /// the stored post.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown post and `InvalidInput` for a post that is
    /// no longer scheduled.
    pub async fn publish_now(&self, post_id: &str) -> Result<ScheduledPost> {
        let post = self.db.require_post(post_id).await?;
        if post.status != PostStatus::Scheduled || post.deleted_at.is_some() {
            return Err(FanoutError::InvalidInput(format!(
                "Post {} is {} and cannot be published",
                post_id, post.status
            )));
        }

        match self.run_job(post_id).await {
            JobResult::Skipped => Err(FanoutError::InvalidInput(format!(
                "Post {} was claimed by another worker",
                post_id
            ))),
            JobResult::Completed(_) | JobResult::Failed(_) => self.db.require_post(post_id).await,
        }
    }

    /// Draw and store an instant for every random-window post lacking one.
    ///
    /// Returns how many posts got an instant in this call.
    pub async fn materialize_random_posts(&self) -> Result<usize> {
        let mut count = 0;
        for post in self.db.unmaterialized_random_posts().await? {
            let (Some(from), Some(to)) = (post.scheduled_from, post.scheduled_to) else {
                warn!(post_id = %post.id, "Random-window post without a window");
                continue;
            };
            let drawn = scheduling::draw_instant(from, to);
            let stored = self.db.materialize_scheduled_at(&post.id, drawn).await?;
            if stored == Some(drawn) {
                count += 1;
            }
            info!(
                post_id = %post.id,
                from,
                to,
                drawn,
                stored = ?stored,
                "Materialized random publish instant"
            );
        }
        Ok(count)
    }

    /// Run one post under the job timeout and store a marker on failure
    async fn run_job(&self, post_id: &str) -> JobResult {
        let job_timeout = self.scheduling.job_timeout;
        let marker = match timeout(job_timeout, self.dispatch(post_id)).await {
            Ok(Ok(Some(outcome))) => return JobResult::Completed(outcome),
            Ok(Ok(None)) => return JobResult::Skipped,
            Ok(Err(DispatchError::Transient(e))) => {
                format!("job failed after maximum retries: {}", e)
            }
            Ok(Err(DispatchError::Terminal(e))) => format!("critical error: {}", e),
            Err(_) => format!("job timed out after {}s", job_timeout.as_secs()),
        };

        error!(post_id, error = %marker, "Publish job failed");
        if let Err(e) = self.db.mark_post_failed(post_id, &marker).await {
            error!(post_id, error = %e, "Failed to store job failure");
        }
        self.events.emit(Event::PublishFailed {
            post_id: post_id.to_string(),
            error: marker.clone(),
        });
        JobResult::Failed(marker)
    }

    async fn dispatch(&self, post_id: &str) -> std::result::Result<Option<PublishOutcome>, DispatchError> {
        let claimed = self
            .retrying("claim", post_id, move || async move {
                let post = self.db.require_post(post_id).await?;
                if post.status != PostStatus::Scheduled {
                    return Ok(None);
                }
                let now = chrono::Utc::now().timestamp();
                if !self.db.claim_post(post_id, now).await? {
                    return Ok(None);
                }
                Ok::<_, DispatchError>(Some(post))
            })
            .await?;
        let Some(post) = claimed else {
            debug!(post_id, "Post already claimed, skipping");
            return Ok(None);
        };

        self.events.emit(Event::PublishStarted {
            post_id: post.id.clone(),
            org_id: post.org_id.clone(),
            platforms: post.platforms.iter().map(|p| p.as_str().to_string()).collect(),
        });

        let results = self.fan_out(&post).await;
        let now = chrono::Utc::now().timestamp();
        let outcome = PublishOutcome::from_results(post.id.clone(), results, now);

        let stored = &outcome;
        self.retrying("store", post_id, move || async move {
            self.db
                .save_publish_outcome(
                    &stored.post_id,
                    stored.status,
                    &stored.results,
                    stored.error_message.as_deref(),
                    stored.published_at,
                )
                .await?;
            Ok::<_, DispatchError>(())
        })
        .await?;

        info!(
            post_id,
            status = %outcome.status,
            errors = outcome.error_message.as_deref().unwrap_or(""),
            "Post dispatched"
        );
        self.events.emit(Event::PublishCompleted {
            post_id: post_id.to_string(),
            status: outcome.status.as_str().to_string(),
        });
        Ok(Some(outcome))
    }

    /// Run `op`, retrying transient failures with exponential backoff.
    ///
    /// A transient error returned from here has exhausted the budget.
    async fn retrying<T, F, Fut>(
        &self,
        step: &'static str,
        post_id: &str,
        mut op: F,
    ) -> std::result::Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, DispatchError>>,
    {
        let attempts = self.scheduling.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(DispatchError::Transient(e)) if attempt < attempts => {
                    let delay = backoff_delay(self.scheduling.retry_base_delay, attempt);
                    warn!(
                        post_id,
                        step,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fan_out(&self, post: &ScheduledPost) -> BTreeMap<Platform, PlatformOutcome> {
        let attempts = post.platforms.iter().map(|&platform| async move {
            let outcome = self.publish_to_platform(post, platform).await;
            self.events.emit(Event::PlatformPublished {
                post_id: post.id.clone(),
                platform: platform.as_str().to_string(),
                success: outcome.success,
                remote_post_id: outcome.remote_post_id.clone(),
                error: outcome.error.clone(),
            });
            (platform, outcome)
        });
        join_all(attempts).await.into_iter().collect()
    }

    /// One platform's attempt; every failure ends up in the outcome
    async fn publish_to_platform(&self, post: &ScheduledPost, platform: Platform) -> PlatformOutcome {
        let account = match self.resolver.resolve(&post.org_id, platform).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(post_id = %post.id, platform = %platform, "No active account");
                return PlatformOutcome::failure(NO_ACTIVE_ACCOUNT);
            }
            Err(e) => {
                warn!(post_id = %post.id, platform = %platform, error = %e, "Account lookup failed");
                return PlatformOutcome::failure(format!("account lookup failed: {}", e));
            }
        };

        if let Err(e) = self
            .limiter
            .acquire(&post.org_id, account.id, RequestKind::Publish)
            .await
        {
            warn!(post_id = %post.id, platform = %platform, error = %e, "Rate limited locally");
            return PlatformOutcome::failure(e.to_string());
        }

        let adapter = self.adapters.get(platform);
        let call_timeout = self.scheduling.platform_timeout;
        let result = match timeout(call_timeout, adapter.publish(&account, post)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(post_id = %post.id, platform = %platform, error = %e, "Publish errored");
                PublishResult::failure(e.to_string())
            }
            Err(_) => {
                warn!(post_id = %post.id, platform = %platform, "Publish timed out");
                PublishResult::failure(format!(
                    "publish timed out after {}",
                    humantime::format_duration(call_timeout)
                ))
            }
        };

        if result.success {
            info!(
                post_id = %post.id,
                platform = %platform,
                remote_post_id = result.remote_post_id.as_deref().unwrap_or(""),
                "Published"
            );
            if let Err(e) = self.resolver.mark_used(&account).await {
                warn!(account_id = account.id, error = %e, "Failed to record account use");
            }
        } else {
            warn!(
                post_id = %post.id,
                platform = %platform,
                error = result.error.as_deref().unwrap_or(""),
                "Platform rejected post"
            );
        }
        for dropped in &result.dropped_media {
            warn!(
                post_id = %post.id,
                platform = %platform,
                url = %dropped.url,
                reason = %dropped.reason,
                "Media dropped"
            );
        }

        result.into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::db::test_support::setup_db;
    use crate::error::PlatformError;
    use crate::platforms::mock::{MockAdapter, MockConfig};
    use crate::types::SocialAccount;
    use tempfile::TempDir;

    fn scheduling() -> SchedulingConfig {
        SchedulingConfig {
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn orchestrator_with(
        db: &Database,
        adapters: AdapterTable,
        scheduling: SchedulingConfig,
        limits: RateLimitConfig,
    ) -> PublishOrchestrator {
        PublishOrchestrator::new(
            db.clone(),
            AccountResolver::new(Arc::new(db.clone())),
            adapters,
            Arc::new(RateLimiter::new(&limits)),
            scheduling,
            EventBus::new(100),
        )
    }

    fn orchestrator(db: &Database, adapters: AdapterTable) -> PublishOrchestrator {
        orchestrator_with(db, adapters, scheduling(), RateLimitConfig::default())
    }

    async fn connect(db: &Database, platform: Platform) -> i64 {
        db.upsert_account(&SocialAccount::new("org-1", platform, "me", "token"))
            .await
            .unwrap()
    }

    async fn setup() -> (Database, TempDir) {
        setup_db().await
    }

    fn outcome(success: bool, value: &str) -> PlatformOutcome {
        if success {
            PlatformOutcome {
                success: true,
                remote_post_id: Some(value.to_string()),
                error: None,
                dropped_media: Vec::new(),
            }
        } else {
            PlatformOutcome::failure(value)
        }
    }

    #[test]
    fn test_aggregate() {
        let all_ok = BTreeMap::from([(Platform::Facebook, outcome(true, "1"))]);
        assert_eq!(aggregate(&all_ok), (PostStatus::Published, None));

        let mixed = BTreeMap::from([
            (Platform::Facebook, outcome(true, "1")),
            (Platform::Twitter, outcome(false, "no active account")),
        ]);
        assert_eq!(
            aggregate(&mixed),
            (
                PostStatus::Published,
                Some(r#"{"twitter":"no active account"}"#.to_string())
            )
        );

        let all_failed = BTreeMap::from([
            (Platform::Instagram, outcome(false, "a")),
            (Platform::Facebook, outcome(false, "b")),
        ]);
        assert_eq!(
            aggregate(&all_failed),
            (
                PostStatus::Failed,
                Some(r#"{"facebook":"b","instagram":"a"}"#.to_string())
            )
        );

        assert_eq!(aggregate(&BTreeMap::new()).0, PostStatus::Failed);
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    }

    #[test]
    fn test_dispatch_error_classification() {
        let transient: DispatchError =
            FanoutError::Platform(PlatformError::Network("reset".to_string())).into();
        assert!(matches!(transient, DispatchError::Transient(_)));

        let terminal: DispatchError = FanoutError::NotFound("post".to_string()).into();
        assert!(matches!(terminal, DispatchError::Terminal(_)));
    }

    #[tokio::test]
    async fn test_partial_success_with_missing_account() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        let adapters = AdapterTable::mocked(MockConfig::default()).with(
            Platform::Facebook,
            Arc::new(MockAdapter::new(
                Platform::Facebook,
                MockConfig::publish_success("999"),
            )),
        );

        let post = ScheduledPost::new("org-1", "author", "Hello", [Platform::Facebook, Platform::Twitter]);
        db.create_post(&post).await.unwrap();

        let stored = orchestrator(&db, adapters).publish_now(&post.id).await.unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert!(stored.published_at.is_some());
        assert_eq!(
            stored.platform_post_ids(),
            BTreeMap::from([(Platform::Facebook, "999".to_string())])
        );
        assert!(stored
            .error_message
            .unwrap()
            .contains(r#"{"twitter":"no active account"}"#));
    }

    #[tokio::test]
    async fn test_erroring_adapter_does_not_stop_siblings() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        connect(&db, Platform::LinkedIn).await;

        let shared = MockConfig::default();
        let adapters = AdapterTable::mocked(shared.clone()).with(
            Platform::Facebook,
            Arc::new(MockAdapter::new(
                Platform::Facebook,
                MockConfig::publish_error(PlatformError::Network("connection reset".to_string())),
            )),
        );

        let post = ScheduledPost::new("org-1", "a", "Hello", [Platform::Facebook, Platform::LinkedIn]);
        db.create_post(&post).await.unwrap();

        let stored = orchestrator(&db, adapters).publish_now(&post.id).await.unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(shared.publish_count(Platform::LinkedIn), 1);
        assert!(stored.platform_results[&Platform::LinkedIn].success);
        let facebook = &stored.platform_results[&Platform::Facebook];
        assert!(!facebook.success);
        assert!(facebook.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_all_platforms_failing_marks_failed() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        let adapters = AdapterTable::mocked(MockConfig::publish_failure("rejected (HTTP 400): nope"));

        let post = ScheduledPost::new("org-1", "a", "Hello", [Platform::Facebook, Platform::TikTok]);
        db.create_post(&post).await.unwrap();

        let stored = orchestrator(&db, adapters).publish_now(&post.id).await.unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.published_at.is_none());
        let errors = stored.platform_errors();
        assert_eq!(errors[&Platform::Facebook], "rejected (HTTP 400): nope");
        assert_eq!(errors[&Platform::TikTok], NO_ACTIVE_ACCOUNT);
    }

    #[tokio::test]
    async fn test_success_touches_account() {
        let (db, _temp_dir) = setup().await;
        let account_id = connect(&db, Platform::LinkedIn).await;
        let post = ScheduledPost::new("org-1", "a", "Hello", [Platform::LinkedIn]);
        db.create_post(&post).await.unwrap();

        orchestrator(&db, AdapterTable::mocked(MockConfig::default()))
            .publish_now(&post.id)
            .await
            .unwrap();

        let account = db.get_account(account_id).await.unwrap().unwrap();
        assert!(account.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_publish_now_rejects_non_scheduled_post() {
        let (db, _temp_dir) = setup().await;
        let post = ScheduledPost::new("org-1", "a", "Hello", [Platform::Facebook]);
        db.create_post(&post).await.unwrap();
        db.cancel_post(&post.id).await.unwrap();

        let config = MockConfig::default();
        let result = orchestrator(&db, AdapterTable::mocked(config.clone()))
            .publish_now(&post.id)
            .await;
        assert!(matches!(result, Err(FanoutError::InvalidInput(_))));
        assert!(config.publish_calls().is_empty());

        let missing = orchestrator(&db, AdapterTable::mocked(config))
            .publish_now("no-such-post")
            .await;
        assert!(matches!(missing, Err(FanoutError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sweep_dispatches_only_due_posts() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        let now = chrono::Utc::now().timestamp();

        let due = ScheduledPost::new("org-1", "a", "due", [Platform::Facebook]).at(now - 10);
        let future = ScheduledPost::new("org-1", "a", "later", [Platform::Facebook]).at(now + 3600);
        let immediate = ScheduledPost::new("org-1", "a", "now", [Platform::Facebook]);
        for post in [&due, &future, &immediate] {
            db.create_post(post).await.unwrap();
        }

        let config = MockConfig::default();
        let report = orchestrator(&db, AdapterTable::mocked(config.clone()))
            .run_sweep()
            .await
            .unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.published, 2);

        let published: Vec<String> = config.publish_calls().into_iter().map(|(_, id)| id).collect();
        assert!(published.contains(&due.id));
        assert!(published.contains(&immediate.id));
        assert!(!published.contains(&future.id));

        let future = db.require_post(&future.id).await.unwrap();
        assert_eq!(future.status, PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_sweep_never_dispatches_twice() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        let post = ScheduledPost::new("org-1", "a", "once", [Platform::Facebook]);
        db.create_post(&post).await.unwrap();

        let config = MockConfig::default();
        let orchestrator = orchestrator(&db, AdapterTable::mocked(config.clone()));
        orchestrator.run_sweep().await.unwrap();
        let second = orchestrator.run_sweep().await.unwrap();

        assert_eq!(second.dispatched, 0);
        assert_eq!(config.publish_count(Platform::Facebook), 1);
    }

    #[tokio::test]
    async fn test_sweep_materializes_random_windows() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        let now = chrono::Utc::now().timestamp();

        let open = ScheduledPost::new("org-1", "a", "open", [Platform::Facebook]).between(now - 100, now - 50);
        let upcoming =
            ScheduledPost::new("org-1", "a", "upcoming", [Platform::Facebook]).between(now + 1000, now + 2000);
        db.create_post(&open).await.unwrap();
        db.create_post(&upcoming).await.unwrap();

        let report = orchestrator(&db, AdapterTable::mocked(MockConfig::default()))
            .run_sweep()
            .await
            .unwrap();
        assert_eq!(report.materialized, 2);
        assert_eq!(report.published, 1);

        let open = db.require_post(&open.id).await.unwrap();
        assert_eq!(open.status, PostStatus::Published);
        let upcoming = db.require_post(&upcoming.id).await.unwrap();
        assert_eq!(upcoming.status, PostStatus::Scheduled);
        let drawn = upcoming.scheduled_at.unwrap();
        assert!((now + 1000..=now + 2000).contains(&drawn));
    }

    #[tokio::test]
    async fn test_sweep_fails_stale_claims() {
        let (db, _temp_dir) = setup().await;
        let post = ScheduledPost::new("org-1", "a", "stuck", [Platform::Facebook]);
        db.create_post(&post).await.unwrap();
        let long_ago = chrono::Utc::now().timestamp() - 3600;
        assert!(db.claim_post(&post.id, long_ago).await.unwrap());

        let config = MockConfig::default();
        let report = orchestrator(&db, AdapterTable::mocked(config.clone()))
            .run_sweep()
            .await
            .unwrap();
        assert_eq!(report.stale_failed, 1);

        let stored = db.require_post(&post.id).await.unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some(INTERRUPTED));
        assert!(config.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn test_platform_timeout_fills_error_slot() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Twitter).await;
        let adapters = AdapterTable::mocked(MockConfig::default().with_delay(Duration::from_millis(500)));
        let scheduling = SchedulingConfig {
            platform_timeout: Duration::from_millis(50),
            ..scheduling()
        };

        let post = ScheduledPost::new("org-1", "a", "slow", [Platform::Twitter]);
        db.create_post(&post).await.unwrap();

        let stored = orchestrator_with(&db, adapters, scheduling, RateLimitConfig::default())
            .publish_now(&post.id)
            .await
            .unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(
            stored.platform_errors()[&Platform::Twitter],
            "publish timed out after 50ms"
        );
    }

    #[tokio::test]
    async fn test_job_timeout_marks_post_failed() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Twitter).await;
        let adapters = AdapterTable::mocked(MockConfig::default().with_delay(Duration::from_secs(3)));
        let scheduling = SchedulingConfig {
            job_timeout: Duration::from_secs(1),
            ..scheduling()
        };

        let post = ScheduledPost::new("org-1", "a", "slow", [Platform::Twitter]);
        db.create_post(&post).await.unwrap();

        let stored = orchestrator_with(&db, adapters, scheduling, RateLimitConfig::default())
            .publish_now(&post.id)
            .await
            .unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("job timed out after 1s"));
    }

    #[tokio::test]
    async fn test_local_rate_limit_fails_platform() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        let limits = RateLimitConfig {
            per_minute: 0,
            per_hour: 10,
            max_wait: Duration::from_secs(0),
        };

        let config = MockConfig::default();
        let post = ScheduledPost::new("org-1", "a", "limited", [Platform::Facebook]);
        db.create_post(&post).await.unwrap();

        let stored = orchestrator_with(&db, AdapterTable::mocked(config.clone()), scheduling(), limits)
            .publish_now(&post.id)
            .await
            .unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert!(stored.platform_errors()[&Platform::Facebook].contains("limit"));
        assert!(config.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn test_events_follow_dispatch() {
        let (db, _temp_dir) = setup().await;
        connect(&db, Platform::Facebook).await;
        let post = ScheduledPost::new("org-1", "a", "Hello", [Platform::Facebook]);
        db.create_post(&post).await.unwrap();

        let orchestrator = orchestrator(&db, AdapterTable::mocked(MockConfig::default()));
        let mut events = orchestrator.events.subscribe();
        orchestrator.publish_now(&post.id).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), Event::PublishStarted { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::PlatformPublished { success: true, .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            Event::PublishCompleted {
                post_id: post.id.clone(),
                status: "published".to_string(),
            }
        );
    }
}
