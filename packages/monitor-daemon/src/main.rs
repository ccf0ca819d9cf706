// Main entry point for the site monitor daemon and operator CLI

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use monitor_daemon::Config;
use site_monitor::{
    LogNotifier, Monitor, Notifier, PluginRegistry, SiteId, SqliteStore, TrackingMode,
    WebhookNotifier,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "site-monitor")]
#[command(about = "Watch web pages for new links or content changes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,

    /// Run a single scheduler tick and exit
    CheckDue,

    /// Check one site now
    Check { id: SiteId },

    /// List monitored sites
    List,

    /// Add a site (hash sites get a generated plugin unit)
    Add {
        name: String,
        url: String,
        #[arg(long, default_value = "hash")]
        mode: TrackingMode,
    },

    /// Set a site's scrape interval (never, 5min, 30min, 1hour, 2hours, 12hours, 1day, 1week)
    Interval { id: SiteId, label: String },

    /// Delete a site and its records
    Delete { id: SiteId },

    /// Create a site from a plugin unit placed in the plugin directory
    Import { plugin_id: String },

    /// List loaded plugin units
    Plugins,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,site_monitor=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    let store = SqliteStore::new(&config.database_url)
        .await
        .context("Failed to open database")?;
    tracing::info!("Database ready");

    // Load plugin units
    let registry = PluginRegistry::new(&config.plugin_dir);
    registry
        .seed_defaults(&config.default_plugin_dir)
        .context("Failed to seed default plugin units")?;
    let report = registry.load_all().context("Failed to scan plugin directory")?;
    tracing::info!(
        loaded = report.loaded.len(),
        rejected = report.rejected.len(),
        "Plugin registry ready"
    );

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::with_timeout(
            url.clone(),
            Duration::from_secs(config.notify_timeout_seconds.max(1)),
        )),
        None => Arc::new(LogNotifier),
    };

    let monitor = Monitor::new(
        Arc::new(store),
        Arc::new(registry),
        notifier,
        config.monitor_config(),
    );

    let seeded = monitor
        .seed_sites_from_plugins()
        .await
        .context("Failed to seed sites")?;
    if seeded > 0 {
        tracing::info!(sites = seeded, "Initial sites created from plugin units");
    }

    match cli.command {
        Commands::Run => run(&monitor).await,
        Commands::CheckDue => {
            let report = monitor
                .scheduler()
                .tick(chrono::Utc::now())
                .await
                .context("Failed to list sites")?;
            println!(
                "dispatched {}, skipped {}, succeeded {}, failed {}",
                report.dispatched, report.skipped_in_flight, report.succeeded, report.failed
            );
            Ok(())
        }
        Commands::Check { id } => {
            println!("{}", monitor.trigger_check(id).await);
            Ok(())
        }
        Commands::List => list_sites(&monitor).await,
        Commands::Add { name, url, mode } => {
            println!("{}", monitor.add_site(&name, &url, mode).await);
            Ok(())
        }
        Commands::Interval { id, label } => {
            println!("{}", monitor.set_interval(id, label.as_str()).await);
            Ok(())
        }
        Commands::Delete { id } => {
            println!("{}", monitor.delete_site(id).await);
            Ok(())
        }
        Commands::Import { plugin_id } => {
            println!("{}", monitor.import_plugin(&plugin_id).await);
            Ok(())
        }
        Commands::Plugins => {
            for unit in monitor.checker().registry().units() {
                println!(
                    "{:<24} {:<6} {}{}  {}",
                    unit.id,
                    unit.mode,
                    unit.name,
                    if unit.generated { " (generated)" } else { "" },
                    unit.url
                );
            }
            for (path, err) in &report.rejected {
                println!("rejected {}: {}", path.display(), err);
            }
            Ok(())
        }
    }
}

async fn run(monitor: &Monitor<SqliteStore>) -> Result<()> {
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        token.cancel();
    });

    monitor.scheduler().run(shutdown).await;
    tracing::info!("Scheduler stopped");
    Ok(())
}

async fn list_sites(monitor: &Monitor<SqliteStore>) -> Result<()> {
    let sites = monitor.list_sites().await.context("Failed to list sites")?;
    if sites.is_empty() {
        println!("No sites");
        return Ok(());
    }

    for site in sites {
        let last_checked = site
            .last_checked_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  {:<6} {:<8} {:<20} {}{}  {}",
            site.id,
            site.tracking_mode,
            site.interval,
            last_checked,
            site.name,
            if site.enabled { "" } else { " (disabled)" },
            site.url
        );
    }
    Ok(())
}
