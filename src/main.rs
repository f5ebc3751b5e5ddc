//! SATMAKER: automated listing and bid repricing for Bitcoin ordinals and runes
//!
//! Entry point. Loads configuration, initialises structured logging,
//! derives the wallet, and runs the pricing cycle on a fixed interval
//! with graceful shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use satmaker::config;
use satmaker::engine::cycle::{CycleReport, CycleRunner};
use satmaker::engine::manager::Services;
use satmaker::engine::snapshot::SnapshotBuilder;
use satmaker::platforms::magiceden::MagicEdenFeed;
use satmaker::platforms::satflow::SatflowClient;
use satmaker::platforms::MarketFeed;
use satmaker::wallet::Wallet;

const BANNER: &str = r#"
 ____    _  _____ __  __    _    _  _______ ____
/ ___|  / \|_   _|  \/  |  / \  | |/ / ____|  _ \
\___ \ / _ \ | | | |\/| | / _ \ | ' /|  _| | |_) |
 ___) / ___ \| | | |  | |/ ___ \| . \| |___|  _ <
|____/_/   \_\_| |_|  |_/_/   \_\_|\_\_____|_| \_\

  Ordinals & Runes market maker
  v0.1.0
"#;

#[derive(Parser)]
#[command(name = "satmaker")]
#[command(about = "Reprices listings and bids for Bitcoin ordinals and runes")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Allow groups configured to list below the reference price
    #[arg(long)]
    confirm_below_floor: bool,

    /// Log write operations instead of submitting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    // Load configuration from TOML
    let cfg = config::AppConfig::load(&cli.config)?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    let dry_run = cfg.agent.dry_run || cli.dry_run;
    info!(
        agent_name = %cfg.agent.name,
        loop_seconds = cfg.agent.loop_seconds,
        groups = cfg.groups.len(),
        dry_run,
        "SATMAKER starting up"
    );

    let settings = cfg.validate()?;

    // -- Initialise components -------------------------------------------

    let seed = cfg.wallet.load_seed()?;
    let wallet = Wallet::from_mnemonic(&seed, &cfg.wallet.derivation_path)
        .context("Failed to derive wallet from seed")?;
    drop(seed);

    let api_key = config::AppConfig::resolve_env(&cfg.marketplace.api_key_env)?;
    let marketplace = SatflowClient::new(
        &cfg.marketplace.base_url,
        &cfg.marketplace.balance_url,
        SecretString::new(api_key),
        cfg.agent.http_timeout_secs,
    )?;

    let feeds: Vec<Arc<dyn MarketFeed>> = vec![Arc::new(MagicEdenFeed::new(
        &cfg.market_data.base_url,
        cfg.market_data.fee_multiplier,
        cfg.agent.http_timeout_secs,
    )?)];

    let services = Services {
        marketplace: Arc::new(marketplace),
        feeds,
        wallet: Arc::new(wallet),
        snapshots: SnapshotBuilder::new(&cfg.market_data.exclude_addresses),
        dry_run,
        bid_expiry_days: cfg.marketplace.bid_expiry_days,
    };

    let mut runner = CycleRunner::init(settings, services, cli.confirm_below_floor).await?;

    if cli.once {
        let report = runner.run_cycle().await?;
        log_cycle_report(&report);
        return Ok(());
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.loop_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.loop_seconds,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match runner.run_cycle().await {
                    Ok(report) => log_cycle_report(&report),
                    Err(e) if e.is_cycle_fatal() => {
                        error!(error = %e, "Cycle failed, retrying next interval");
                    }
                    Err(e) => {
                        warn!(error = %e, "Cycle failed, continuing to next");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("SATMAKER shut down cleanly.");
    Ok(())
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    for (group, reason) in &report.skipped {
        info!(group = %group, reason = %reason, "No action");
    }
    info!(
        cycle = report.cycle,
        groups = report.groups.len(),
        skipped = report.skipped.len(),
        balance = %report.bidding_balance,
        cancelled = report.bids_cancelled(),
        created = report.bids_created(),
        listed = report.listings_submitted(),
        errors = report.error_count(),
        elapsed_ms = report.elapsed_ms,
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("satmaker=info"));

    let json_logging = std::env::var("SATMAKER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
