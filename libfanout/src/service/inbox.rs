//! Unified inbox service
//!
//! Read access to the synced conversations and the one write the inbox
//! supports: replying to a contact on the platform it wrote from.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::accounts::AccountResolver;
use crate::db::{ConversationSummary, Database};
use crate::error::{FanoutError, Result};
use crate::platforms::AdapterTable;
use crate::rate_limiter::{RateLimiter, RequestKind};
use crate::types::{Contact, DeliveryStatus, Direction, NormalizedMessage};

/// A stored reply and, when delivery failed, why
#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub message: NormalizedMessage,
    pub error: Option<String>,
}

pub struct InboxService {
    db: Database,
    resolver: AccountResolver,
    adapters: AdapterTable,
    limiter: Arc<RateLimiter>,
}

impl InboxService {
    pub fn new(
        db: Database,
        resolver: AccountResolver,
        adapters: AdapterTable,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            db,
            resolver,
            adapters,
            limiter,
        }
    }

    /// Messages of a contact, oldest first
    pub async fn timeline(
        &self,
        org_id: &str,
        contact_id: &str,
        limit: u32,
    ) -> Result<Vec<NormalizedMessage>> {
        self.db.contact_timeline(org_id, contact_id, limit).await
    }

    /// Contacts with their latest message, most recent conversation first
    pub async fn conversations(&self, org_id: &str, limit: u32) -> Result<Vec<ConversationSummary>> {
        self.db.conversations(org_id, limit).await
    }

    pub async fn search(&self, org_id: &str, term: &str, limit: u32) -> Result<Vec<NormalizedMessage>> {
        if term.trim().is_empty() {
            return Err(FanoutError::InvalidInput(
                "Search term cannot be empty".to_string(),
            ));
        }
        self.db.search_messages(org_id, term, limit).await
    }

    /// Send `text` to a contact and store it as an outbound message.
    ///
    /// The message is stored whether or not the platform accepted it; a
    /// rejected or errored send is stored as `failed` and its reason is
    /// returned alongside.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown contact and `InvalidInput` for empty text
    /// or an org without an active account on the contact's platform.
    pub async fn send_reply(&self, org_id: &str, contact_id: &str, text: &str) -> Result<ReplyOutcome> {
        if text.trim().is_empty() {
            return Err(FanoutError::InvalidInput(
                "Reply text cannot be empty".to_string(),
            ));
        }
        let contact = self
            .db
            .get_contact(org_id, contact_id)
            .await?
            .ok_or_else(|| FanoutError::NotFound(format!("contact {}", contact_id)))?;
        let (platform, recipient_id) = Contact::parse_external_key(&contact.external_key)?;

        let account = self.resolver.resolve(org_id, platform).await?.ok_or_else(|| {
            FanoutError::InvalidInput(format!("No active {} account for org {}", platform, org_id))
        })?;

        let sent = match self
            .limiter
            .acquire(org_id, account.id, RequestKind::Send)
            .await
        {
            Ok(()) => self
                .adapters
                .get(platform)
                .send_message(&account, &recipient_id, text)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let (status, remote_id, error) = match sent {
            Ok(result) if result.success => (DeliveryStatus::Sent, result.remote_message_id, None),
            Ok(result) => (
                DeliveryStatus::Failed,
                None,
                Some(result.error.unwrap_or_else(|| "send rejected".to_string())),
            ),
            Err(e) => (DeliveryStatus::Failed, None, Some(e)),
        };
        if let Some(error) = &error {
            tracing::warn!(contact_id, platform = %platform, error = %error, "Reply not delivered");
        }

        let now = chrono::Utc::now().timestamp();
        let id = Uuid::new_v4().to_string();
        let message = NormalizedMessage {
            platform_message_id: remote_id.unwrap_or_else(|| format!("local-{}", id)),
            id,
            org_id: org_id.to_string(),
            contact_id: contact.id.clone(),
            account_id: Some(account.id),
            platform,
            direction: Direction::Outbound,
            thread_id: None,
            body: text.to_string(),
            metadata: None,
            delivery_status: status,
            created_at: now,
            ingested_at: now,
        };
        self.db.insert_message(&message).await?;

        Ok(ReplyOutcome { message, error })
    }
}
