//! Connected account storage

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_json, Database};
use crate::error::{DbError, Result};
use crate::types::{AccessToken, Platform, SocialAccount};

const ACCOUNT_COLUMNS: &str = r#"
    id, org_id, platform, platform_user_id, display_name, access_token,
    refresh_token, expires_at, metadata, active, last_used_at, last_synced_at
"#;

fn account_from_row(row: &SqliteRow) -> Result<SocialAccount> {
    Ok(SocialAccount {
        id: row.get("id"),
        org_id: row.get("org_id"),
        platform: row.get::<String, _>("platform").parse()?,
        platform_user_id: row.get("platform_user_id"),
        display_name: row.get("display_name"),
        access_token: AccessToken::new(row.get::<String, _>("access_token")),
        refresh_token: row
            .get::<Option<String>, _>("refresh_token")
            .map(AccessToken::new),
        expires_at: row.get("expires_at"),
        metadata: decode_json(row.get("metadata"))?,
        active: row.get("active"),
        last_used_at: row.get("last_used_at"),
        last_synced_at: row.get("last_synced_at"),
    })
}

impl Database {
    /// Insert an account, or refresh the existing row for the same
    /// `(org, platform, platform_user_id)`. Returns the row id.
    pub async fn upsert_account(&self, account: &SocialAccount) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let metadata = account
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO social_accounts (
                org_id, platform, platform_user_id, display_name, access_token,
                refresh_token, expires_at, metadata, active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (org_id, platform, platform_user_id) DO UPDATE SET
                display_name = excluded.display_name,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                metadata = excluded.metadata,
                active = excluded.active,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&account.org_id)
        .bind(account.platform.as_str())
        .bind(&account.platform_user_id)
        .bind(&account.display_name)
        .bind(account.access_token.expose())
        .bind(account.refresh_token.as_ref().map(|t| t.expose()))
        .bind(account.expires_at)
        .bind(metadata)
        .bind(account.active)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(id)
    }

    pub async fn get_account(&self, account_id: i64) -> Result<Option<SocialAccount>> {
        let sql = format!("SELECT {} FROM social_accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    /// The usable account for an org and platform at `now`.
    ///
    /// Active and unexpired; most recently used wins, then the highest id.
    pub async fn find_active_account(
        &self,
        org_id: &str,
        platform: Platform,
        now: i64,
    ) -> Result<Option<SocialAccount>> {
        let sql = format!(
            r#"
            SELECT {} FROM social_accounts
            WHERE org_id = ? AND platform = ? AND active = 1
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY last_used_at IS NULL, last_used_at DESC, id DESC
            LIMIT 1
            "#,
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(org_id)
            .bind(platform.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    /// Every active account of a platform, across orgs unless one is given
    pub async fn list_active_accounts(
        &self,
        platform: Platform,
        org_id: Option<&str>,
    ) -> Result<Vec<SocialAccount>> {
        let sql = format!(
            r#"
            SELECT {} FROM social_accounts
            WHERE platform = ? AND active = 1 AND (? IS NULL OR org_id = ?)
            ORDER BY org_id, id
            "#,
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(platform.as_str())
            .bind(org_id)
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    pub async fn touch_account_used(&self, account_id: i64, at: i64) -> Result<()> {
        sqlx::query("UPDATE social_accounts SET last_used_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn touch_account_synced(&self, account_id: i64, at: i64) -> Result<()> {
        sqlx::query("UPDATE social_accounts SET last_synced_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn deactivate_account(&self, account_id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE social_accounts SET active = 0, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}
