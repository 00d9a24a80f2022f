//! Fanout - publish once, deliver everywhere
//!
//! This library schedules posts and fans them out to Facebook, Instagram,
//! LinkedIn, Twitter and TikTok, and syncs direct messages from the
//! platforms that expose them into one unified inbox.

pub mod accounts;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod publisher;
pub mod rate_limiter;
pub mod scheduling;
pub mod service;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{FanoutError, Result};
pub use publisher::{PublishOrchestrator, SweepReport};
pub use service::FanoutService;
pub use sync::{SyncOrchestrator, SyncReport};
pub use types::{
    Contact, MediaItem, NormalizedMessage, Platform, PostStatus, PublishMode, ScheduledPost,
    SocialAccount,
};
