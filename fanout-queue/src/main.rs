//! fanout-queue - Manage the post queue
//!
//! Unix-style tool for adding, inspecting and steering scheduled posts.

use clap::{Parser, Subcommand};
use libfanout::db::PostFilter;
use libfanout::logging::{LoggingConfig, LOG_LEVEL_ENV};
use libfanout::scheduling::{self, Schedule};
use libfanout::{
    Config, Database, FanoutError, FanoutService, MediaItem, Platform, PostStatus, Result,
    ScheduledPost,
};

#[derive(Parser, Debug)]
#[command(name = "fanout-queue")]
#[command(version)]
#[command(about = "Manage the Fanout post queue")]
#[command(long_about = "\
fanout-queue - Manage the Fanout post queue

DESCRIPTION:
    fanout-queue adds posts to the queue and lets you list, cancel,
    reschedule, delete or immediately publish them. fanout-send picks up
    whatever is due.

COMMANDS:
    list        List posts (scheduled ones by default)
    add         Queue a new post
    cancel      Cancel a scheduled post
    reschedule  Move a scheduled post to a different time
    delete      Remove a post from listings
    now         Publish a scheduled post immediately
    stats       Show queue statistics

USAGE EXAMPLES:
    # Queue a post for right now
    fanout-queue add \"Hello world\" --org acme --platform facebook,linkedin

    # Queue a post for later
    fanout-queue add \"Launch!\" --org acme -p twitter --at \"tomorrow 9am\"

    # Somewhere between 10 minutes and 2 hours from now
    fanout-queue add \"Tip of the day\" --org acme -p linkedin --at random:10m-2h

    # List posts in JSON format
    fanout-queue list --format json

    # Reschedule a post
    fanout-queue reschedule <POST_ID> 2h

    # Publish a scheduled post immediately
    fanout-queue now <POST_ID>

CONFIGURATION:
    Configuration file: ~/.config/fanout/config.toml
    Database location: ~/.local/share/fanout/fanout.db

    Override with environment variables:
        FANOUT_CONFIG    - Path to config file
        FANOUT_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Configuration or authentication error
    3 - Invalid input (bad post ID, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List posts
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Only posts of this organization
        #[arg(long)]
        org: Option<String>,

        /// Only posts with this status (default: scheduled)
        #[arg(short, long)]
        status: Option<String>,

        /// Posts of every status
        #[arg(long, conflicts_with = "status")]
        all: bool,
    },

    /// Queue a new post
    Add {
        /// Post text
        body: String,

        /// Organization the post belongs to
        #[arg(long)]
        org: String,

        /// Target platforms (repeatable or comma-separated)
        #[arg(short, long = "platform", value_delimiter = ',', required = true)]
        platforms: Vec<String>,

        /// Author recorded on the post
        #[arg(long, default_value = "cli")]
        author: String,

        /// Title (used by TikTok)
        #[arg(long)]
        title: Option<String>,

        /// Public image URL (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,

        /// Public video URL (repeatable)
        #[arg(long = "video")]
        videos: Vec<String>,

        /// When to publish: "30m", "tomorrow 3pm" or "random:10m-2h"
        #[arg(long)]
        at: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel a scheduled post
    Cancel {
        /// Post ID to cancel
        post_id: Option<String>,

        /// Cancel all scheduled posts
        #[arg(long, conflicts_with = "post_id")]
        all: bool,

        /// With --all, only posts of this organization
        #[arg(long, requires = "all")]
        org: Option<String>,
    },

    /// Reschedule a post
    Reschedule {
        /// Post ID to reschedule
        post_id: String,

        /// New time (e.g., "tomorrow 3pm", "2h")
        time: String,
    },

    /// Remove a post from listings
    Delete {
        /// Post ID to delete
        post_id: String,
    },

    /// Publish immediately
    Now {
        /// Post ID to publish now
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Only posts of this organization
        #[arg(long)]
        org: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if std::env::var(LOG_LEVEL_ENV).is_err() {
        logging.level = "error".to_string();
    }
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let service = FanoutService::from_config(config).await?;
    let db = service.database();

    match cli.command {
        Commands::List {
            format,
            org,
            status,
            all,
        } => {
            let status = match (all, status) {
                (true, _) => None,
                (false, Some(status)) => Some(PostStatus::parse(&status)?),
                (false, None) => Some(PostStatus::Scheduled),
            };
            let filter = PostFilter {
                org_id: org,
                status,
                include_deleted: false,
                limit: None,
            };
            cmd_list(db, &filter, OutputFormat::parse(&format)?).await
        }
        Commands::Add {
            body,
            org,
            platforms,
            author,
            title,
            images,
            videos,
            at,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let platforms = platforms
                .iter()
                .map(|p| p.trim().parse::<Platform>())
                .collect::<Result<Vec<_>>>()?;

            let mut post = ScheduledPost::new(org, author, body, platforms);
            if let Some(title) = title {
                post = post.with_title(title);
            }
            for url in images {
                post = post.with_media(MediaItem::image(url));
            }
            for url in videos {
                post = post.with_media(MediaItem::video(url));
            }
            if let Some(at) = at {
                post = scheduling::parse_schedule(&at, chrono::Utc::now())?.apply(post);
            }
            cmd_add(db, post, format).await
        }
        Commands::Cancel { post_id, all, org } => {
            cmd_cancel(db, post_id.as_deref(), all, org.as_deref()).await
        }
        Commands::Reschedule { post_id, time } => cmd_reschedule(db, &post_id, &time).await,
        Commands::Delete { post_id } => cmd_delete(db, &post_id).await,
        Commands::Stats { format, org } => {
            cmd_stats(db, OutputFormat::parse(&format)?, org.as_deref()).await
        }
        Commands::Now { post_id, format } => {
            cmd_now(&service, &post_id, OutputFormat::parse(&format)?).await
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(format: &str) -> Result<Self> {
        match format {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(FanoutError::InvalidInput(format!(
                "Invalid format '{}'. Must be 'text' or 'json'",
                other
            ))),
        }
    }
}

async fn cmd_list(db: &Database, filter: &PostFilter, format: OutputFormat) -> Result<()> {
    let posts = db.list_posts(filter).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&posts)?),
        OutputFormat::Text => {
            let now = chrono::Utc::now().timestamp();
            for post in &posts {
                println!(
                    "{} | {} | {} | {} | {}",
                    post.id,
                    post.status,
                    platform_list(post),
                    truncate_content(&post.body, 50),
                    describe_schedule(post, now)
                );
            }
        }
    }
    Ok(())
}

async fn cmd_add(db: &Database, post: ScheduledPost, format: OutputFormat) -> Result<()> {
    db.create_post(&post).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&post)?),
        OutputFormat::Text => {
            let now = chrono::Utc::now().timestamp();
            println!("Queued post {} ({})", post.id, describe_schedule(&post, now));
        }
    }
    Ok(())
}

async fn cmd_cancel(db: &Database, post_id: Option<&str>, all: bool, org: Option<&str>) -> Result<()> {
    if all {
        let count = db.cancel_all_posts(org).await?;
        println!("Cancelled {} post(s)", count);
        return Ok(());
    }

    let post_id = post_id
        .ok_or_else(|| FanoutError::InvalidInput("Specify a post ID or --all".to_string()))?;
    let post = db.require_post(post_id).await?;
    if !db.cancel_post(post_id).await? {
        return Err(FanoutError::InvalidInput(format!(
            "Post {} is {} and cannot be cancelled",
            post_id, post.status
        )));
    }
    println!("Cancelled post {}", post_id);
    Ok(())
}

async fn cmd_reschedule(db: &Database, post_id: &str, time: &str) -> Result<()> {
    let post = db.require_post(post_id).await?;
    let at = match scheduling::parse_schedule(time, chrono::Utc::now())? {
        Schedule::At(at) => at,
        Schedule::Window { .. } => {
            return Err(FanoutError::InvalidInput(
                "Reschedule takes a fixed time, not a random window".to_string(),
            ))
        }
    };

    if !db.reschedule_post(post_id, at).await? {
        return Err(FanoutError::InvalidInput(format!(
            "Post {} is {} and cannot be rescheduled",
            post_id, post.status
        )));
    }
    println!("Rescheduled post {} to {}", post_id, format_timestamp(at));
    Ok(())
}

async fn cmd_delete(db: &Database, post_id: &str) -> Result<()> {
    db.require_post(post_id).await?;
    if !db.soft_delete_post(post_id).await? {
        return Err(FanoutError::InvalidInput(format!(
            "Post {} is already deleted",
            post_id
        )));
    }
    println!("Deleted post {}", post_id);
    Ok(())
}

async fn cmd_now(service: &FanoutService, post_id: &str, format: OutputFormat) -> Result<()> {
    let post = service.publisher().publish_now(post_id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&post)?),
        OutputFormat::Text => {
            println!("Post {} {}", post.id, post.status);
            for (platform, outcome) in &post.platform_results {
                match (&outcome.remote_post_id, &outcome.error) {
                    (Some(remote_id), _) if outcome.success => {
                        println!("  {}: {}", platform, remote_id)
                    }
                    (_, Some(error)) => println!("  {}: failed: {}", platform, error),
                    _ => println!("  {}: failed", platform),
                }
            }
        }
    }

    if post.status == PostStatus::Published {
        Ok(())
    } else {
        // Exit non-zero when nothing went out
        std::process::exit(1);
    }
}

async fn cmd_stats(db: &Database, format: OutputFormat, org: Option<&str>) -> Result<()> {
    let stats = db.queue_stats(org).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("Scheduled:  {}", stats.scheduled);
            println!("Publishing: {}", stats.publishing);
            println!("Published:  {}", stats.published);
            println!("Failed:     {}", stats.failed);
            println!("Cancelled:  {}", stats.cancelled);
            match stats.next_due {
                Some(at) => println!("Next due:   {}", format_timestamp(at)),
                None => println!("Next due:   none"),
            }
        }
    }
    Ok(())
}

fn platform_list(post: &ScheduledPost) -> String {
    post.platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Truncate content to max characters with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let head: String = single_line.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

fn describe_schedule(post: &ScheduledPost, now: i64) -> String {
    match (post.scheduled_at, post.scheduled_from, post.scheduled_to) {
        (Some(at), _, _) => format_time_until(now, at),
        (None, Some(from), Some(to)) => format!(
            "between {} and {}",
            format_timestamp(from),
            format_timestamp(to)
        ),
        _ => "immediately".to_string(),
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 50), "short");
        assert_eq!(truncate_content("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_content("two\nlines", 50), "two lines");
    }

    #[test]
    fn test_format_time_until() {
        assert_eq!(format_time_until(1000, 900), "overdue");
        assert_eq!(format_time_until(0, 30), "in <1 minute");
        assert_eq!(format_time_until(0, 120), "in 2 minutes");
        assert_eq!(format_time_until(0, 3600), "in 1 hour");
        assert_eq!(format_time_until(0, 3 * 86400), "in 3 days");
    }

    #[test]
    fn test_output_format() {
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::parse("yaml").is_err());
    }
}
