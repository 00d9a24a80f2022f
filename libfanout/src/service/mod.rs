//! Service layer for Fanout
//!
//! `FanoutService` wires the shared resources (database, adapters, rate
//! limiter, event bus) once and hands out the orchestrators built on them:
//!
//! - [`PublishOrchestrator`]: due-post sweeps and immediate publishing
//! - [`SyncOrchestrator`]: inbound message sync and account verification
//! - [`InboxService`]: unified inbox queries and replies
//! - [`EventBus`]: progress events
//!
//! # Example
//!
//! ```no_run
//! use libfanout::service::FanoutService;
//!
//! # async fn example() -> libfanout::Result<()> {
//! let service = FanoutService::new().await?;
//!
//! let report = service.publisher().run_sweep().await?;
//! println!("Published {} posts", report.published);
//!
//! let sync = service.sync().sync(None).await?;
//! println!("{} new messages", sync.results.total);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod inbox;

use std::sync::Arc;

use self::events::{EventBus, EventReceiver};
use self::inbox::InboxService;
use crate::accounts::AccountResolver;
use crate::error::{ConfigError, FanoutError};
use crate::platforms::AdapterTable;
use crate::publisher::PublishOrchestrator;
use crate::rate_limiter::RateLimiter;
use crate::sync::SyncOrchestrator;
use crate::{Config, Database, Result};

/// Main service facade
///
/// All orchestrators share one database pool, one adapter table and one
/// rate limiter, so local limits hold across publishing, sync and replies.
pub struct FanoutService {
    db: Database,
    config: Config,
    publisher: PublishOrchestrator,
    sync: SyncOrchestrator,
    inbox: InboxService,
    event_bus: EventBus,
}

impl FanoutService {
    /// Create a service from the configuration at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded, or the
    /// database cannot be opened or migrated.
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service talking to the real platform APIs
    pub async fn from_config(config: Config) -> Result<Self> {
        let db_path = config.db_path()?;
        let db_path = db_path.to_str().ok_or_else(|| {
            FanoutError::Config(ConfigError::InvalidValue {
                field: "database.path".to_string(),
                reason: "path is not valid UTF-8".to_string(),
            })
        })?;
        let db = Database::new(db_path).await?;
        let adapters = AdapterTable::from_config(&config)?;
        Ok(Self::with_adapters(db, config, adapters))
    }

    /// Assemble a service around an open database and a given adapter table
    pub fn with_adapters(db: Database, config: Config, adapters: AdapterTable) -> Self {
        let event_bus = EventBus::new(100);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let resolver = AccountResolver::new(Arc::new(db.clone()));

        let publisher = PublishOrchestrator::new(
            db.clone(),
            resolver.clone(),
            adapters.clone(),
            Arc::clone(&limiter),
            config.scheduling.clone(),
            event_bus.clone(),
        );
        let sync = SyncOrchestrator::new(
            db.clone(),
            resolver.clone(),
            adapters.clone(),
            Arc::clone(&limiter),
            config.scheduling.platform_timeout,
            event_bus.clone(),
        );
        let inbox = InboxService::new(db.clone(), resolver, adapters, limiter);

        Self {
            db,
            config,
            publisher,
            sync,
            inbox,
            event_bus,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn publisher(&self) -> &PublishOrchestrator {
        &self.publisher
    }

    pub fn sync(&self) -> &SyncOrchestrator {
        &self.sync
    }

    pub fn inbox(&self) -> &InboxService {
        &self.inbox
    }

    /// Subscribe to progress events of every orchestrator
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}
