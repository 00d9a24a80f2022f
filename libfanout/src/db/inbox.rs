//! Contacts and normalized messages

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{decode_json, Database};
use crate::error::{DbError, Result};
use crate::types::{Contact, DeliveryStatus, Direction, NormalizedMessage, Platform};

const MESSAGE_COLUMNS: &str = r#"
    m.id, m.org_id, m.contact_id, m.account_id, m.platform, m.direction,
    m.platform_message_id, m.thread_id, m.body, m.metadata, m.delivery_status,
    m.created_at, m.ingested_at
"#;

/// A contact with its most recent message
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub contact: Contact,
    pub last_message: NormalizedMessage,
    pub message_count: i64,
}

fn contact_from_row(row: &SqliteRow) -> Contact {
    Contact {
        id: row.get("id"),
        org_id: row.get("org_id"),
        external_key: row.get("external_key"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<NormalizedMessage> {
    Ok(NormalizedMessage {
        id: row.get("id"),
        org_id: row.get("org_id"),
        contact_id: row.get("contact_id"),
        account_id: row.get("account_id"),
        platform: row.get::<String, _>("platform").parse()?,
        direction: Direction::parse(&row.get::<String, _>("direction"))?,
        platform_message_id: row.get("platform_message_id"),
        thread_id: row.get("thread_id"),
        body: row.get("body"),
        metadata: decode_json(row.get("metadata"))?,
        delivery_status: DeliveryStatus::parse(&row.get::<String, _>("delivery_status"))?,
        created_at: row.get("created_at"),
        ingested_at: row.get("ingested_at"),
    })
}

impl Database {
    /// Find or create the contact for a platform user.
    ///
    /// The first name seen for a key is kept; later names are ignored.
    pub async fn upsert_contact(
        &self,
        org_id: &str,
        platform: Platform,
        platform_user_id: &str,
        display_name: &str,
    ) -> Result<Contact> {
        let external_key = Contact::external_key(platform, platform_user_id);
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO contacts (id, org_id, external_key, display_name, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (org_id, external_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(org_id)
        .bind(&external_key)
        .bind(display_name)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let row = sqlx::query(
            r#"
            SELECT id, org_id, external_key, display_name, created_at
            FROM contacts WHERE org_id = ? AND external_key = ?
            "#,
        )
        .bind(org_id)
        .bind(&external_key)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(contact_from_row(&row))
    }

    pub async fn get_contact(&self, org_id: &str, contact_id: &str) -> Result<Option<Contact>> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, external_key, display_name, created_at
            FROM contacts WHERE org_id = ? AND id = ?
            "#,
        )
        .bind(org_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.as_ref().map(contact_from_row))
    }

    /// Insert a message unless its dedup key is already stored.
    ///
    /// Returns true only when a row was actually written.
    pub async fn insert_message(&self, message: &NormalizedMessage) -> Result<bool> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                id, org_id, contact_id, account_id, platform, direction,
                platform_message_id, thread_id, body, metadata, delivery_status,
                created_at, ingested_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (platform, platform_message_id, contact_id) DO NOTHING
            "#,
        )
        .bind(&message.id)
        .bind(&message.org_id)
        .bind(&message.contact_id)
        .bind(message.account_id)
        .bind(message.platform.as_str())
        .bind(message.direction.as_str())
        .bind(&message.platform_message_id)
        .bind(&message.thread_id)
        .bind(&message.body)
        .bind(metadata)
        .bind(message.delivery_status.as_str())
        .bind(message.created_at)
        .bind(message.ingested_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// The latest `limit` messages of a contact, oldest first
    pub async fn contact_timeline(
        &self,
        org_id: &str,
        contact_id: &str,
        limit: u32,
    ) -> Result<Vec<NormalizedMessage>> {
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT {} FROM messages m
                WHERE m.org_id = ? AND m.contact_id = ? AND m.deleted_at IS NULL
                ORDER BY m.created_at DESC, m.ingested_at DESC
                LIMIT ?
            )
            ORDER BY created_at ASC, ingested_at ASC
            "#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .bind(contact_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(message_from_row).collect()
    }

    /// Contacts ordered by their latest message, newest first
    pub async fn conversations(&self, org_id: &str, limit: u32) -> Result<Vec<ConversationSummary>> {
        let sql = format!(
            r#"
            WITH ranked AS (
                SELECT {},
                    ROW_NUMBER() OVER (
                        PARTITION BY m.contact_id
                        ORDER BY m.created_at DESC, m.ingested_at DESC, m.id DESC
                    ) AS rn,
                    COUNT(*) OVER (PARTITION BY m.contact_id) AS message_count
                FROM messages m
                WHERE m.org_id = ? AND m.deleted_at IS NULL
            )
            SELECT r.*, c.external_key, c.display_name AS contact_name,
                   c.created_at AS contact_created_at
            FROM ranked r
            JOIN contacts c ON c.id = r.contact_id
            WHERE r.rn = 1
            ORDER BY r.created_at DESC
            LIMIT ?
            "#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|row| {
                let last_message = message_from_row(row)?;
                Ok(ConversationSummary {
                    contact: Contact {
                        id: last_message.contact_id.clone(),
                        org_id: last_message.org_id.clone(),
                        external_key: row.get("external_key"),
                        display_name: row.get("contact_name"),
                        created_at: row.get("contact_created_at"),
                    },
                    message_count: row.get("message_count"),
                    last_message,
                })
            })
            .collect()
    }

    /// Messages whose body contains `term`, newest first
    pub async fn search_messages(
        &self,
        org_id: &str,
        term: &str,
        limit: u32,
    ) -> Result<Vec<NormalizedMessage>> {
        let pattern = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
        let sql = format!(
            r#"
            SELECT {} FROM messages m
            WHERE m.org_id = ? AND m.deleted_at IS NULL AND m.body LIKE ? ESCAPE '\'
            ORDER BY m.created_at DESC
            LIMIT ?
            "#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .bind(pattern)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(message_from_row).collect()
    }

    pub async fn count_messages(&self, org_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE org_id = ? AND deleted_at IS NULL",
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count)
    }
}
