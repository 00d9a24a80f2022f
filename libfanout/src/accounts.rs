//! Account resolution
//!
//! The orchestrators only see accounts through [`AccountStore`], so the
//! OAuth flow that creates them stays outside this crate.

use async_trait::async_trait;
use std::sync::Arc;

use crate::db::Database;
use crate::error::Result;
use crate::types::{Platform, SocialAccount};

/// Token/account store used by the publish and sync paths
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The usable account for `org_id` on `platform` at `now`, if any
    async fn find_active(
        &self,
        org_id: &str,
        platform: Platform,
        now: i64,
    ) -> Result<Option<SocialAccount>>;

    /// Record that the account was just used to publish
    async fn touch_used(&self, account_id: i64, at: i64) -> Result<()>;

    /// Stop using an account whose credentials no longer verify
    async fn deactivate(&self, account_id: i64) -> Result<()>;
}

#[async_trait]
impl AccountStore for Database {
    async fn find_active(
        &self,
        org_id: &str,
        platform: Platform,
        now: i64,
    ) -> Result<Option<SocialAccount>> {
        self.find_active_account(org_id, platform, now).await
    }

    async fn touch_used(&self, account_id: i64, at: i64) -> Result<()> {
        self.touch_account_used(account_id, at).await
    }

    async fn deactivate(&self, account_id: i64) -> Result<()> {
        self.deactivate_account(account_id).await
    }
}

/// Picks the account a publish goes out through
#[derive(Clone)]
pub struct AccountResolver {
    store: Arc<dyn AccountStore>,
}

impl AccountResolver {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Active, unexpired account for the org and platform.
    ///
    /// With several candidates the most recently used wins, then the
    /// highest id.
    pub async fn resolve(&self, org_id: &str, platform: Platform) -> Result<Option<SocialAccount>> {
        let now = chrono::Utc::now().timestamp();
        let account = self.store.find_active(org_id, platform, now).await?;
        if account.is_none() {
            tracing::debug!(org_id, platform = %platform, "No active account");
        }
        Ok(account)
    }

    pub async fn mark_used(&self, account: &SocialAccount) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.store.touch_used(account.id, now).await
    }

    pub async fn deactivate(&self, account: &SocialAccount) -> Result<()> {
        tracing::warn!(
            account_id = account.id,
            platform = %account.platform,
            "Deactivating account that failed verification"
        );
        self.store.deactivate(account.id).await
    }
}
