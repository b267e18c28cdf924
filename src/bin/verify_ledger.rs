//! Ledger audit tool
//!
//! Replays the review hash chain and reports every divergence. Exits with
//! status 1 when the ledger is invalid or the head does not match the
//! expected checkpoint.

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::sync::Arc;
use tracing::{error, info};

use review_ledger::chain::{ChainVerifier, VerificationReport, VerifyMode};
use review_ledger::config::AppConfig;
use review_ledger::database::Database;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-ledger")
        .version("0.1.0")
        .about("Verify review ledger hash chain integrity")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Ledger database URL (defaults to DATABASE_URL)"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("fail_fast or exhaustive"),
        )
        .arg(
            Arg::new("from")
                .short('f')
                .long("from")
                .value_name("SEQUENCE")
                .value_parser(clap::value_parser!(u64))
                .help("Start verification at this block"),
        )
        .arg(
            Arg::new("expected-head")
                .short('e')
                .long("expected-head")
                .value_name("HASH")
                .help("Content hash the last block must carry"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the full report as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = AppConfig::load()?;
    if let Some(url) = matches.get_one::<String>("database-url") {
        config.database_url = url.clone();
    }
    let mode = match matches.get_one::<String>("mode") {
        Some(raw) => raw.parse::<VerifyMode>()?,
        None => config.default_verify_mode,
    };
    let from = matches.get_one::<u64>("from").copied().unwrap_or(0);
    let expected_head = matches.get_one::<String>("expected-head");

    let database = Database::open_existing(&config.database_url, config.busy_timeout()).await?;

    info!("Verifying ledger at {} ({})", config.database_url, mode);
    let verifier = ChainVerifier::new(Arc::new(database));
    let report = verifier.verify_from(from, mode).await?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report, verbose);
    }

    if !report.valid {
        error!("Ledger verification failed: {}", report.summary());
        std::process::exit(1);
    }

    if let Some(expected) = expected_head {
        check_head(&report, expected)?;
        if !quiet {
            println!("✓ Head matches expected checkpoint");
        }
    }

    Ok(())
}

fn check_head(report: &VerificationReport, expected: &str) -> Result<()> {
    match report.head_hash.as_deref() {
        Some(head) if head == expected => Ok(()),
        Some(head) => {
            error!("Head mismatch. Expected: {}, Got: {}", expected, head);
            std::process::exit(1);
        }
        None => Err(anyhow!("Ledger is empty; no head to compare against {}", expected)),
    }
}

fn print_report(report: &VerificationReport, verbose: bool) {
    if report.valid {
        println!("✓ {}", report.summary());
    } else {
        println!("✗ {}", report.summary());
        for b in &report.breaks {
            println!("  {}", b);
        }
    }

    if verbose {
        println!("\nLedger Summary:");
        println!("  Mode: {}", report.mode);
        println!("  Start sequence: {}", report.start_sequence);
        println!("  Blocks examined: {}", report.examined);
        println!("  Valid blocks: {}", report.valid_sequences.len());
        println!(
            "  Head hash: {}",
            report.head_hash.as_deref().unwrap_or("<empty ledger>")
        );
    }
}
