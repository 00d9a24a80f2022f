//! Inbox sync
//!
//! Pulls direct messages from every sync-capable platform into the unified
//! inbox. Each message is attributed to a [`Contact`](crate::types::Contact)
//! for the remote party and stored under its dedup key, so syncing the same
//! remote data twice stores nothing the second time.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::AccountResolver;
use crate::db::Database;
use crate::error::{PlatformError, Result};
use crate::platforms::{AdapterTable, TOKEN_EXPIRED};
use crate::rate_limiter::{RateLimiter, RequestKind};
use crate::service::events::{Event, EventBus};
use crate::types::{
    DeliveryStatus, Direction, ExternalUser, NormalizedMessage, Platform, RawMessage, SocialAccount,
};

/// New messages per platform in one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub facebook: u64,
    pub instagram: u64,
    pub twitter: u64,
    pub total: u64,
}

impl SyncCounts {
    fn add(&mut self, platform: Platform, count: u64) {
        match platform {
            Platform::Facebook => self.facebook += count,
            Platform::Instagram => self.instagram += count,
            Platform::Twitter => self.twitter += count,
            Platform::LinkedIn | Platform::TikTok => {}
        }
        self.total += count;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub results: SyncCounts,
}

/// Outcome of checking one account's credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyStatus {
    Valid,
    Deactivated,
    /// The check itself failed; the account is left alone
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountCheck {
    pub account_id: i64,
    pub org_id: String,
    pub platform: Platform,
    pub display_name: String,
    #[serde(flatten)]
    pub status: VerifyStatus,
}

/// The remote party of a message as seen from `account`.
///
/// A participant other than the account wins; otherwise the sender when it
/// is not the account. Messages the account sent to itself have none.
pub fn external_party<'a>(account: &SocialAccount, raw: &'a RawMessage) -> Option<&'a ExternalUser> {
    raw.participants
        .iter()
        .find(|p| p.id != account.platform_user_id)
        .or_else(|| (raw.from.id != account.platform_user_id).then_some(&raw.from))
}

pub struct SyncOrchestrator {
    db: Database,
    resolver: AccountResolver,
    adapters: AdapterTable,
    limiter: Arc<RateLimiter>,
    fetch_timeout: Duration,
    events: EventBus,
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        resolver: AccountResolver,
        adapters: AdapterTable,
        limiter: Arc<RateLimiter>,
        fetch_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            resolver,
            adapters,
            limiter,
            fetch_timeout,
            events,
        }
    }

    /// Sync every active account of the sync-capable platforms.
    ///
    /// Failures are logged per account and per platform and never abort
    /// the run, so the report is always a success.
    pub async fn sync(&self, org_id: Option<&str>) -> Result<SyncReport> {
        let mut results = SyncCounts::default();

        for platform in Platform::SYNC_CAPABLE {
            match self.sync_platform(platform, org_id).await {
                Ok(count) => results.add(platform, count),
                Err(e) => warn!(platform = %platform, error = %e, "Platform sync failed"),
            }
        }

        info!(
            facebook = results.facebook,
            instagram = results.instagram,
            twitter = results.twitter,
            total = results.total,
            "Sync finished"
        );
        self.events.emit(Event::SyncCompleted {
            total: results.total,
        });
        Ok(SyncReport {
            success: true,
            results,
        })
    }

    async fn sync_platform(&self, platform: Platform, org_id: Option<&str>) -> Result<u64> {
        let accounts = self.db.list_active_accounts(platform, org_id).await?;
        debug!(platform = %platform, accounts = accounts.len(), "Syncing platform");

        let now = chrono::Utc::now().timestamp();
        let mut new_messages = 0;
        for account in &accounts {
            if account.is_expired(now) {
                warn!(
                    account_id = account.id,
                    platform = %platform,
                    "Skipping account sync, access token expired"
                );
                continue;
            }
            match self.sync_account(account).await {
                Ok(count) => new_messages += count,
                Err(e) => warn!(
                    account_id = account.id,
                    platform = %platform,
                    error = %e,
                    "Account sync failed"
                ),
            }
        }
        Ok(new_messages)
    }

    async fn sync_account(&self, account: &SocialAccount) -> Result<u64> {
        self.limiter
            .acquire(&account.org_id, account.id, RequestKind::Fetch)
            .await?;

        let started = chrono::Utc::now().timestamp();
        let adapter = self.adapters.get(account.platform);
        let raw = timeout(
            self.fetch_timeout,
            adapter.fetch_messages(account, account.last_synced_at),
        )
        .await
        .map_err(|_| {
            PlatformError::Timeout(format!(
                "fetch timed out after {}",
                humantime::format_duration(self.fetch_timeout)
            ))
        })??;

        let fetched = raw.len();
        let mut new_messages = 0;
        for message in raw {
            if self.ingest(account, message).await? {
                new_messages += 1;
            }
        }

        self.db.touch_account_synced(account.id, started).await?;
        debug!(
            account_id = account.id,
            platform = %account.platform,
            fetched,
            new_messages,
            "Account synced"
        );
        Ok(new_messages)
    }

    /// Store one message; true when it was not stored before
    async fn ingest(&self, account: &SocialAccount, raw: RawMessage) -> Result<bool> {
        let Some(party) = external_party(account, &raw) else {
            debug!(
                account_id = account.id,
                message_id = %raw.platform_message_id,
                "No remote party for message, skipping"
            );
            return Ok(false);
        };

        let name = party
            .name
            .as_deref()
            .or_else(|| (raw.from.id == party.id).then_some(raw.from.name.as_deref()).flatten())
            .unwrap_or(party.id.as_str());
        let contact = self
            .db
            .upsert_contact(&account.org_id, account.platform, &party.id, name)
            .await?;

        let direction = if raw.from.id == account.platform_user_id {
            Direction::Outbound
        } else {
            Direction::Inbound
        };
        let now = chrono::Utc::now().timestamp();
        let message = NormalizedMessage {
            id: Uuid::new_v4().to_string(),
            org_id: account.org_id.clone(),
            contact_id: contact.id.clone(),
            account_id: Some(account.id),
            platform: account.platform,
            direction,
            platform_message_id: raw.platform_message_id,
            thread_id: raw.thread_id,
            body: raw.text,
            metadata: raw.metadata,
            delivery_status: match direction {
                Direction::Inbound => DeliveryStatus::Received,
                Direction::Outbound => DeliveryStatus::Sent,
            },
            created_at: raw.created_at.unwrap_or(now),
            ingested_at: now,
        };

        let inserted = self.db.insert_message(&message).await?;
        if inserted && direction == Direction::Inbound {
            self.events.emit(Event::MessageReceived {
                org_id: message.org_id.clone(),
                contact_id: message.contact_id.clone(),
                message_id: message.id.clone(),
                platform: message.platform.as_str().to_string(),
            });
        }
        Ok(inserted)
    }

    /// Check the credentials of every active account.
    ///
    /// Accounts the platform rejects are deactivated. A check that errors
    /// (network, rate limit) leaves the account as it is.
    pub async fn verify_accounts(&self, org_id: Option<&str>) -> Result<Vec<AccountCheck>> {
        let mut checks = Vec::new();
        for platform in Platform::ALL {
            for account in self.db.list_active_accounts(platform, org_id).await? {
                let status = self.verify_account(&account).await;
                checks.push(AccountCheck {
                    account_id: account.id,
                    org_id: account.org_id.clone(),
                    platform,
                    display_name: account.display_name.clone(),
                    status,
                });
            }
        }
        Ok(checks)
    }

    async fn verify_account(&self, account: &SocialAccount) -> VerifyStatus {
        if account.is_expired(chrono::Utc::now().timestamp()) {
            return VerifyStatus::Error {
                message: TOKEN_EXPIRED.to_string(),
            };
        }

        if let Err(e) = self
            .limiter
            .acquire(&account.org_id, account.id, RequestKind::Verify)
            .await
        {
            return VerifyStatus::Error {
                message: e.to_string(),
            };
        }

        let adapter = self.adapters.get(account.platform);
        let verified = match timeout(self.fetch_timeout, adapter.verify_account(account)).await {
            Ok(result) => result,
            Err(_) => {
                return VerifyStatus::Error {
                    message: "verification timed out".to_string(),
                }
            }
        };

        match verified {
            Ok(true) => VerifyStatus::Valid,
            Ok(false) => match self.resolver.deactivate(account).await {
                Ok(()) => VerifyStatus::Deactivated,
                Err(e) => VerifyStatus::Error {
                    message: e.to_string(),
                },
            },
            Err(e) => {
                warn!(account_id = account.id, platform = %account.platform, error = %e, "Verification errored");
                VerifyStatus::Error {
                    message: e.to_string(),
                }
            }
        }
    }
}
