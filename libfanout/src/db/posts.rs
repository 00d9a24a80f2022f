//! Scheduled post storage

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::{BTreeMap, BTreeSet};

use super::{decode_json, Database};
use crate::error::{DbError, FanoutError, Result};
use crate::scheduling;
use crate::types::{MediaItem, Platform, PlatformOutcome, PostStatus, PublishMode, ScheduledPost};

const POST_COLUMNS: &str = r#"
    id, org_id, author_id, title, body, platforms, media, publish_mode,
    scheduled_at, scheduled_from, scheduled_to, status, platform_results,
    error_message, publishing_started_at, published_at, created_at,
    updated_at, deleted_at
"#;

/// Filter for listing posts
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub org_id: Option<String>,
    pub status: Option<PostStatus>,
    pub include_deleted: bool,
    pub limit: Option<u32>,
}

/// Counts by status plus the next due instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub scheduled: i64,
    pub publishing: i64,
    pub published: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub next_due: Option<i64>,
}

fn post_from_row(row: &SqliteRow) -> Result<ScheduledPost> {
    let platforms: BTreeSet<Platform> = serde_json::from_str(&row.get::<String, _>("platforms"))?;
    let media: Vec<MediaItem> = serde_json::from_str(&row.get::<String, _>("media"))?;
    let platform_results: BTreeMap<Platform, PlatformOutcome> =
        decode_json(row.get("platform_results"))?.unwrap_or_default();

    Ok(ScheduledPost {
        id: row.get("id"),
        org_id: row.get("org_id"),
        author_id: row.get("author_id"),
        title: row.get("title"),
        body: row.get("body"),
        platforms,
        media,
        mode: PublishMode::parse(&row.get::<String, _>("publish_mode"))?,
        scheduled_at: row.get("scheduled_at"),
        scheduled_from: row.get("scheduled_from"),
        scheduled_to: row.get("scheduled_to"),
        status: PostStatus::parse(&row.get::<String, _>("status"))?,
        platform_results,
        error_message: row.get("error_message"),
        publishing_started_at: row.get("publishing_started_at"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    })
}

impl Database {
    /// Store a new post after checking its invariants
    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        post.validate()?;

        let platforms = serde_json::to_string(&post.platforms)?;
        let media = serde_json::to_string(&post.media)?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (
                id, org_id, author_id, title, body, platforms, media, publish_mode,
                scheduled_at, scheduled_from, scheduled_to, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.org_id)
        .bind(&post.author_id)
        .bind(&post.title)
        .bind(&post.body)
        .bind(platforms)
        .bind(media)
        .bind(post.mode.as_str())
        .bind(post.scheduled_at)
        .bind(post.scheduled_from)
        .bind(post.scheduled_to)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let sql = format!("SELECT {} FROM scheduled_posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Like [`Database::get_post`] but a missing post is an error
    pub async fn require_post(&self, post_id: &str) -> Result<ScheduledPost> {
        self.get_post(post_id)
            .await?
            .ok_or_else(|| FanoutError::NotFound(format!("post {}", post_id)))
    }

    /// List posts, soonest first; unscheduled immediate posts sort first
    pub async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<ScheduledPost>> {
        let sql = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE (? IS NULL OR org_id = ?)
              AND (? IS NULL OR status = ?)
              AND (? OR deleted_at IS NULL)
            ORDER BY COALESCE(scheduled_at, scheduled_from, created_at) ASC, created_at ASC
            LIMIT ?
            "#,
            POST_COLUMNS
        );
        let status = filter.status.map(|s| s.as_str());
        let limit = filter.limit.map(i64::from).unwrap_or(-1);

        let rows = sqlx::query(&sql)
            .bind(&filter.org_id)
            .bind(&filter.org_id)
            .bind(status)
            .bind(status)
            .bind(filter.include_deleted)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Scheduled random-window posts whose instant has not been drawn yet
    pub async fn unmaterialized_random_posts(&self) -> Result<Vec<ScheduledPost>> {
        let sql = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE status = 'scheduled'
              AND deleted_at IS NULL
              AND publish_mode = 'random_in_range'
              AND scheduled_at IS NULL
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Write `drawn` as the post's instant unless one is already stored.
    ///
    /// Returns the stored instant, which is the first value ever written.
    pub async fn materialize_scheduled_at(&self, post_id: &str, drawn: i64) -> Result<Option<i64>> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET scheduled_at = ?, updated_at = ?
            WHERE id = ? AND scheduled_at IS NULL AND publish_mode = 'random_in_range'
            "#,
        )
        .bind(drawn)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let stored: Option<Option<i64>> =
            sqlx::query_scalar("SELECT scheduled_at FROM scheduled_posts WHERE id = ?")
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        Ok(stored.flatten())
    }

    /// Posts ready for dispatch at `now`, oldest instant first
    pub async fn due_posts(&self, now: i64) -> Result<Vec<ScheduledPost>> {
        let sql = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE status = 'scheduled'
              AND deleted_at IS NULL
              AND (publish_mode = 'immediate' OR (scheduled_at IS NOT NULL AND scheduled_at <= ?))
            ORDER BY COALESCE(scheduled_at, created_at) ASC
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let posts = rows
            .iter()
            .map(post_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(posts
            .into_iter()
            .filter(|post| scheduling::is_due(post, now))
            .collect())
    }

    /// Move a post from `scheduled` to `publishing`.
    ///
    /// Returns false when another worker claimed it first or the post is no
    /// longer scheduled.
    pub async fn claim_post(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'publishing', publishing_started_at = ?, updated_at = ?
            WHERE id = ? AND status = 'scheduled' AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist the aggregated result of a dispatch in one write
    pub async fn save_publish_outcome(
        &self,
        post_id: &str,
        status: PostStatus,
        results: &BTreeMap<Platform, PlatformOutcome>,
        error_message: Option<&str>,
        published_at: Option<i64>,
    ) -> Result<()> {
        let results = serde_json::to_string(results)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = ?, platform_results = ?, error_message = ?, published_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(results)
        .bind(error_message)
        .bind(published_at)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Mark a post failed with a job-level marker, keeping any stored results
    pub async fn mark_post_failed(&self, post_id: &str, message: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Fail posts stuck in `publishing` since before `cutoff`
    pub async fn fail_stale_publishing(&self, cutoff: i64, message: &str) -> Result<Vec<String>> {
        let now = chrono::Utc::now().timestamp();
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE scheduled_posts
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE status = 'publishing' AND publishing_started_at < ?
            RETURNING id
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(ids)
    }

    /// Cancel a post that has not started publishing
    pub async fn cancel_post(&self, post_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET status = 'cancelled', updated_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancel every scheduled post, optionally for one org
    pub async fn cancel_all_posts(&self, org_id: Option<&str>) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET status = 'cancelled', updated_at = ?
            WHERE status = 'scheduled' AND deleted_at IS NULL AND (? IS NULL OR org_id = ?)
            "#,
        )
        .bind(now)
        .bind(org_id)
        .bind(org_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Turn a scheduled post into a fixed-time post at `at`
    pub async fn reschedule_post(&self, post_id: &str, at: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET publish_mode = 'fixed_time', scheduled_at = ?, scheduled_from = NULL,
                scheduled_to = NULL, updated_at = ?
            WHERE id = ? AND status = 'scheduled' AND deleted_at IS NULL
            "#,
        )
        .bind(at)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn soft_delete_post(&self, post_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET deleted_at = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn queue_stats(&self, org_id: Option<&str>) -> Result<QueueStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count FROM scheduled_posts
            WHERE deleted_at IS NULL AND (? IS NULL OR org_id = ?)
            GROUP BY status
            "#,
        )
        .bind(org_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let count: i64 = row.get("count");
            match PostStatus::parse(&row.get::<String, _>("status"))? {
                PostStatus::Scheduled => stats.scheduled = count,
                PostStatus::Publishing => stats.publishing = count,
                PostStatus::Published => stats.published = count,
                PostStatus::Failed => stats.failed = count,
                PostStatus::Cancelled => stats.cancelled = count,
            }
        }

        stats.next_due = sqlx::query_scalar(
            r#"
            SELECT MIN(COALESCE(scheduled_at, scheduled_from)) FROM scheduled_posts
            WHERE status = 'scheduled' AND deleted_at IS NULL AND (? IS NULL OR org_id = ?)
            "#,
        )
        .bind(org_id)
        .bind(org_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(stats)
    }
}
