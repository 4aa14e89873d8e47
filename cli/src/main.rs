use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sentix_alert_agents::{HttpWebhookClient, TelegramChannel};
use sentix_alert_core::agent::ChatChannel;
use sentix_alert_core::config::AlertConfig;
use sentix_alert_core::snapshot::JsonFileSnapshots;
use sentix_alert_core::{AlertEngine, LoadReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentix-alerts")]
#[command(about = "Sentiment alert rule engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring loop until interrupted
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "alerts.yaml")]
        config: PathBuf,
    },
    /// Validate the configuration file and its seed rules
    Validate {
        #[arg(short, long, default_value = "alerts.yaml")]
        config: PathBuf,
    },
    /// Run a single evaluation tick and print the report
    Once {
        #[arg(short, long, default_value = "alerts.yaml")]
        config: PathBuf,

        /// Snapshot file to read instead of the configured one
        #[arg(short, long)]
        snapshots: Option<PathBuf>,
    },
    /// Print rule, webhook and delivery statistics
    Stats {
        #[arg(short, long, default_value = "alerts.yaml")]
        config: PathBuf,
    },
    /// Print recent trigger records
    History {
        #[arg(short, long, default_value = "alerts.yaml")]
        config: PathBuf,

        /// Only records for this rule id
        #[arg(short, long)]
        rule: Option<String>,

        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
}

async fn build_engine(config: &AlertConfig) -> Result<(AlertEngine, LoadReport)> {
    let timeout = Duration::from_secs(config.delivery.timeout_secs);
    let webhooks = Arc::new(HttpWebhookClient::new(timeout).context("building HTTP client")?);

    let chat: Option<Arc<dyn ChatChannel>> = match (&config.telegram.token, &config.telegram.chat_id) {
        (Some(token), Some(chat_id)) if config.telegram.enabled => Some(Arc::new(
            TelegramChannel::new(token.clone(), chat_id.clone(), timeout)
                .context("building Telegram client")?
                .with_parse_mode(config.telegram.parse_mode.clone()),
        )),
        _ => None,
    };

    let (engine, report) = AlertEngine::from_config(config, webhooks, chat).await?;
    for rejected in &report.rejected {
        warn!(key = %rejected.key, reason = %rejected.reason, "Persisted entry excluded");
    }
    Ok((engine, report))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();

    match args.command {
        Commands::Validate { config } => {
            let config = AlertConfig::from_file(&config)?;
            println!(
                "✅ Configuration valid: {} rules, {} webhooks",
                config.rules.len(),
                config.webhooks.len()
            );
        }
        Commands::Once { config, snapshots } => {
            let config = AlertConfig::from_file(&config)?;
            let (engine, _) = build_engine(&config).await?;
            let source = JsonFileSnapshots::new(snapshots.unwrap_or(config.engine.snapshot_path));
            let report = engine.process_once(&source).await;
            print_json(&report)?;
        }
        Commands::Stats { config } => {
            let config = AlertConfig::from_file(&config)?;
            let (engine, _) = build_engine(&config).await?;
            print_json(&engine.stats().await)?;
        }
        Commands::History { config, rule, days } => {
            let config = AlertConfig::from_file(&config)?;
            let (engine, _) = build_engine(&config).await?;
            print_json(&engine.history(rule.as_deref(), days).await)?;
        }
        Commands::Run { config } => {
            let config = AlertConfig::from_file(&config)?;
            let (engine, report) = build_engine(&config).await?;
            let engine = Arc::new(engine);
            info!(
                rules_loaded = report.rules_loaded,
                webhooks_loaded = report.webhooks_loaded,
                "Starting alert daemon"
            );

            let source = Arc::new(JsonFileSnapshots::new(config.engine.snapshot_path.clone()));
            engine
                .start_monitoring(source, Duration::from_secs(config.engine.monitoring_interval_secs))
                .await?;
            let retention = engine.start_retention_task(
                config.engine.history_retention_days,
                Duration::from_secs(config.engine.retention_sweep_secs),
            );

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("Shutdown signal received");

            engine.stop_monitoring().await;
            retention.abort();
            print_json(&engine.metrics().snapshot())?;
        }
    }

    Ok(())
}
