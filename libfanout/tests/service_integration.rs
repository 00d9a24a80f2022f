//! Integration tests for FanoutService
//!
//! Drive publishing and sync through the public service facade with mock
//! and mockito-backed adapters.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use libfanout::config::TwitterConfig;
use libfanout::error::PlatformError;
use libfanout::platforms::mock::{MockAdapter, MockConfig};
use libfanout::platforms::twitter::TwitterAdapter;
use libfanout::platforms::{AdapterTable, PlatformAdapter, PublishResult};
use libfanout::types::{Direction, ExternalUser, RawMessage};
use libfanout::{
    Config, Database, FanoutService, Platform, PostStatus, ScheduledPost, SocialAccount,
};
use tempfile::TempDir;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    (db, temp_dir)
}

fn service(db: &Database, adapters: AdapterTable) -> FanoutService {
    let mut config = Config::default();
    config.scheduling.retry_base_delay = std::time::Duration::from_millis(1);
    FanoutService::with_adapters(db.clone(), config, adapters)
}

async fn connect(db: &Database, platform: Platform, user_id: &str) -> i64 {
    db.upsert_account(&SocialAccount::new("org-1", platform, user_id, "token"))
        .await
        .unwrap()
}

/// Adapter whose publish always returns `Err`
struct Exploding;

#[async_trait]
impl PlatformAdapter for Exploding {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn publish(
        &self,
        _account: &SocialAccount,
        _post: &ScheduledPost,
    ) -> libfanout::Result<PublishResult> {
        Err(PlatformError::Network("connection reset by peer".to_string()).into())
    }

    async fn verify_account(&self, _account: &SocialAccount) -> libfanout::Result<bool> {
        Ok(true)
    }
}

#[tokio::test]
async fn test_partial_publish_with_missing_account() {
    let (db, _temp_dir) = setup_db().await;
    connect(&db, Platform::Facebook, "page-1").await;
    let adapters = AdapterTable::mocked(MockConfig::default()).with(
        Platform::Facebook,
        Arc::new(MockAdapter::new(
            Platform::Facebook,
            MockConfig::publish_success("999"),
        )),
    );
    let service = service(&db, adapters);

    let post = ScheduledPost::new(
        "org-1",
        "author-1",
        "Launch day",
        [Platform::Facebook, Platform::Twitter],
    );
    db.create_post(&post).await.unwrap();

    let stored = service.publisher().publish_now(&post.id).await.unwrap();
    assert_eq!(stored.status, PostStatus::Published);
    assert_eq!(
        stored.platform_post_ids(),
        BTreeMap::from([(Platform::Facebook, "999".to_string())])
    );
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains(r#"{"twitter":"no active account"}"#));
}

#[tokio::test]
async fn test_erroring_adapter_is_isolated() {
    let (db, _temp_dir) = setup_db().await;
    connect(&db, Platform::Instagram, "ig-1").await;
    connect(&db, Platform::LinkedIn, "li-1").await;

    let shared = MockConfig::default();
    let adapters =
        AdapterTable::mocked(shared.clone()).with(Platform::Instagram, Arc::new(Exploding));
    let service = service(&db, adapters);

    let post = ScheduledPost::new("org-1", "a", "Hello", [Platform::Instagram, Platform::LinkedIn]);
    db.create_post(&post).await.unwrap();

    let report = service.publisher().run_sweep().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(shared.publish_count(Platform::LinkedIn), 1);

    let stored = db.require_post(&post.id).await.unwrap();
    assert_eq!(stored.status, PostStatus::Published);
    let errors = stored.platform_errors();
    assert!(errors[&Platform::Instagram].contains("connection reset by peer"));
    assert!(!errors.contains_key(&Platform::LinkedIn));
}

#[tokio::test]
async fn test_random_window_is_materialized_once() {
    let (db, _temp_dir) = setup_db().await;
    let service = service(&db, AdapterTable::mocked(MockConfig::default()));
    let now = chrono::Utc::now().timestamp();

    let post = ScheduledPost::new("org-1", "a", "Sometime", [Platform::LinkedIn])
        .between(now + 600, now + 1200);
    db.create_post(&post).await.unwrap();

    assert_eq!(service.publisher().materialize_random_posts().await.unwrap(), 1);
    let drawn = db.require_post(&post.id).await.unwrap().scheduled_at.unwrap();
    assert!((now + 600..=now + 1200).contains(&drawn));

    assert_eq!(service.publisher().materialize_random_posts().await.unwrap(), 0);
    assert_eq!(db.materialize_scheduled_at(&post.id, now + 700).await.unwrap(), Some(drawn));
    assert_eq!(db.require_post(&post.id).await.unwrap().scheduled_at, Some(drawn));
}

#[tokio::test]
async fn test_sync_twice_stores_each_message_once() {
    let (db, _temp_dir) = setup_db().await;
    connect(&db, Platform::Facebook, "page-1").await;
    connect(&db, Platform::Instagram, "ig-1").await;

    let message = |id: &str, from: &str| RawMessage {
        platform_message_id: id.to_string(),
        thread_id: Some("conv-1".to_string()),
        from: ExternalUser::new(from, Some("Ada".to_string())),
        participants: Vec::new(),
        text: format!("message {}", id),
        created_at: None,
        metadata: None,
    };
    let config = MockConfig::with_messages(vec![message("m1", "user-1"), message("m2", "user-1")]);
    let service = service(&db, AdapterTable::mocked(config));

    let first = service.sync().sync(None).await.unwrap();
    assert_eq!(first.results.facebook, 2);
    assert_eq!(first.results.instagram, 2);
    assert_eq!(first.results.total, 4);

    let second = service.sync().sync(None).await.unwrap();
    assert_eq!(second.results.total, 0);

    let conversations = service.inbox().conversations("org-1", 10).await.unwrap();
    let keys: Vec<&str> = conversations
        .iter()
        .map(|c| c.contact.external_key.as_str())
        .collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&"facebook_user-1"));
    assert!(keys.contains(&"instagram_user-1"));
}

#[tokio::test]
async fn test_twitter_sync_falls_back_to_legacy_endpoint() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", mockito::Matcher::Regex(r"^/2/dm_events".to_string()))
        .match_query(mockito::Matcher::Any)
        .with_status(403)
        .with_body(r#"{"reason":"client-not-enrolled","detail":"Project required"}"#)
        .create_async()
        .await;
    server
        .mock(
            "GET",
            mockito::Matcher::Regex(r"^/1\.1/direct_messages/events/list\.json".to_string()),
        )
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"events":[{"id":"e1","type":"message_create","created_timestamp":"1704067200000","message_create":{"sender_id":"300","target":{"recipient_id":"100"},"message_data":{"text":"hello from v1.1"}}}]}"#,
        )
        .create_async()
        .await;

    let (db, _temp_dir) = setup_db().await;
    connect(&db, Platform::Twitter, "100").await;
    let twitter = TwitterAdapter::new(
        reqwest::Client::new(),
        &TwitterConfig {
            api_base: server.url(),
        },
    );
    let adapters =
        AdapterTable::mocked(MockConfig::default()).with(Platform::Twitter, Arc::new(twitter));
    let service = service(&db, adapters);

    let report = service.sync().sync(Some("org-1")).await.unwrap();
    assert_eq!(report.results.twitter, 1);

    let conversations = service.inbox().conversations("org-1", 10).await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].contact.external_key, "twitter_300");
    let message = &conversations[0].last_message;
    assert_eq!(message.direction, Direction::Inbound);
    assert_eq!(message.body, "hello from v1.1");
    assert_eq!(message.created_at, 1_704_067_200);
}

#[tokio::test]
async fn test_expired_twitter_token_never_reaches_the_api() {
    let mut server = mockito::Server::new_async().await;
    let dm_events = server
        .mock("GET", mockito::Matcher::Regex(r"^/2/dm_events".to_string()))
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"{"data":[]}"#)
        .expect(0)
        .create_async()
        .await;

    let (db, _temp_dir) = setup_db().await;
    let expired = chrono::Utc::now().timestamp() - 3600;
    db.upsert_account(
        &SocialAccount::new("org-1", Platform::Twitter, "100", "token").with_expiry(expired),
    )
    .await
    .unwrap();
    let twitter = TwitterAdapter::new(
        reqwest::Client::new(),
        &TwitterConfig {
            api_base: server.url(),
        },
    );
    let adapters =
        AdapterTable::mocked(MockConfig::default()).with(Platform::Twitter, Arc::new(twitter));
    let service = service(&db, adapters);

    let report = service.sync().sync(None).await.unwrap();
    assert_eq!(report.results.twitter, 0);
    dm_events.assert_async().await;
}

#[tokio::test]
async fn test_reply_through_service() {
    let (db, _temp_dir) = setup_db().await;
    connect(&db, Platform::Facebook, "page-1").await;
    let config = MockConfig::default();
    let service = service(&db, AdapterTable::mocked(config.clone()));

    let contact = db
        .upsert_contact("org-1", Platform::Facebook, "user-7", "Grace")
        .await
        .unwrap();
    let outcome = service
        .inbox()
        .send_reply("org-1", &contact.id, "On our way")
        .await
        .unwrap();

    assert!(outcome.error.is_none());
    assert_eq!(config.sent_messages().len(), 1);
    let hits = service.inbox().search("org-1", "our way", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].direction, Direction::Outbound);
}
