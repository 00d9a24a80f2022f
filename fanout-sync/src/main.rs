//! fanout-sync - Pull direct messages into the inbox and check accounts

use clap::{Parser, Subcommand};
use libfanout::sync::{AccountCheck, VerifyStatus};
use libfanout::{Config, FanoutError, FanoutService, Result, SyncReport};

#[derive(Parser, Debug)]
#[command(name = "fanout-sync")]
#[command(version)]
#[command(about = "Sync direct messages into the Fanout inbox and verify accounts")]
#[command(long_about = "\
fanout-sync - Sync direct messages into the Fanout inbox

DESCRIPTION:
    fanout-sync runs one inbound sync on demand: it fetches direct messages
    from Facebook, Instagram and Twitter for every active account and stores
    the new ones in the unified inbox. Messages already stored are skipped,
    so running it repeatedly is safe.

    The verify command checks the credentials of every active account and
    deactivates the ones the platform rejects.

USAGE EXAMPLES:
    # Sync every organization
    fanout-sync run

    # Sync one organization and print a JSON report
    fanout-sync run --org acme --format json

    # Check all connected accounts
    fanout-sync verify

CONFIGURATION:
    Configuration file: ~/.config/fanout/config.toml
    Database location: ~/.local/share/fanout/fanout.db

    Override with environment variables:
        FANOUT_CONFIG    - Path to config file
        FANOUT_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Sync failed or an account check errored
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one inbound sync
    Run {
        /// Only accounts of this organization
        #[arg(long)]
        org: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify account credentials
    Verify {
        /// Only accounts of this organization
        #[arg(long)]
        org: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libfanout::logging::init(cli.verbose);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Returns whether everything went through cleanly
async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load()?;

    match cli.command {
        Commands::Run { org, format } => {
            let json = parse_format(&format)?;
            let service = FanoutService::from_config(config).await?;
            let report = service.sync().sync(org.as_deref()).await?;
            print_report(&report, json)?;
            Ok(report.success)
        }
        Commands::Verify { org, format } => {
            let json = parse_format(&format)?;
            let service = FanoutService::from_config(config).await?;
            let checks = service.sync().verify_accounts(org.as_deref()).await?;
            print_checks(&checks, json)?;
            Ok(!checks
                .iter()
                .any(|c| matches!(c.status, VerifyStatus::Error { .. })))
        }
    }
}

/// `true` for json
fn parse_format(format: &str) -> Result<bool> {
    match format {
        "text" => Ok(false),
        "json" => Ok(true),
        other => Err(FanoutError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            other
        ))),
    }
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let counts = &report.results;
    println!("Facebook:  {} new message(s)", counts.facebook);
    println!("Instagram: {} new message(s)", counts.instagram);
    println!("Twitter:   {} new message(s)", counts.twitter);
    println!("Total:     {}", counts.total);
    Ok(())
}

fn print_checks(checks: &[AccountCheck], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(checks)?);
        return Ok(());
    }

    if checks.is_empty() {
        println!("No active accounts");
        return Ok(());
    }
    for check in checks {
        let status = match &check.status {
            VerifyStatus::Valid => "valid".to_string(),
            VerifyStatus::Deactivated => "deactivated".to_string(),
            VerifyStatus::Error { message } => format!("error: {}", message),
        };
        println!(
            "{} | {} | {} | {} | {}",
            check.account_id, check.org_id, check.platform, check.display_name, status
        );
    }
    Ok(())
}
