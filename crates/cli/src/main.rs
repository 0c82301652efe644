use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use vigie_api::{InProcApi, VigieApi};
use vigie_core::Notification;
use vigie_engine::{poll_period, spawn_poller, Engine};
use vigie_feed::{HttpFeed, OrderFeed, StaticFeed};
use vigie_persist::{MemStore, SqliteStore, Store};

#[derive(Parser, Debug)]
#[command(name = "vigiectl", version, about = "Vigie order-notification CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Order feed endpoint (default: VIGIE_FEED_URL)
    #[arg(long = "feed-url", global = true)]
    feed_url: Option<String>,

    /// Keep state in memory only (no SQLite)
    #[arg(long = "ephemeral", global = true, action = ArgAction::SetTrue)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the order feed once and print the shaped records
    Orders,
    /// Run one reconciliation pass and print the resulting notifications
    Reconcile,
    /// Print the persisted notification list without fetching
    List,
    /// Print the unread count and the "new" indicator
    Unread,
    /// Mark one notification as read
    MarkRead {
        /// Notification id
        id: String,
    },
    /// Mark every notification as read
    MarkAllRead,
    /// Poll the feed until ctrl-c, printing notifications as they surface
    Watch,
}

fn init_tracing() {
    let env = std::env::var("VIGIE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VIGIE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VIGIE_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_store(ephemeral: bool) -> Result<Arc<dyn Store>> {
    if ephemeral {
        return Ok(Arc::new(MemStore::new()));
    }
    Ok(Arc::new(SqliteStore::open_default()?))
}

fn open_feed(cli: &Cli) -> Result<Arc<dyn OrderFeed>> {
    match &cli.feed_url {
        Some(url) => Ok(Arc::new(HttpFeed::new(url.clone(), std::env::var("VIGIE_FEED_TOKEN").ok()))),
        None => Ok(Arc::new(HttpFeed::from_env()?)),
    }
}

fn print_notifications(items: &[Notification], output: Output) -> Result<()> {
    match output {
        Output::Human => {
            if items.is_empty() {
                println!("(no notifications)");
            }
            for n in items {
                let marker = if n.is_read { " " } else { "•" };
                println!(
                    "{} {} [{}] {}",
                    marker,
                    n.timestamp.format("%Y-%m-%d %H:%M"),
                    n.id,
                    n.message
                );
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Orders => {
            let feed = open_feed(&cli)?;
            let orders = feed.fetch_orders().await?;
            match cli.output {
                Output::Human => {
                    for o in &orders {
                        println!(
                            "{} • {} • {}",
                            o.reference(),
                            o.status_text(),
                            o.customer_name.as_deref().unwrap_or("-")
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&orders)?),
            }
        }
        Commands::Reconcile => {
            let engine = Arc::new(Engine::new(open_feed(&cli)?, open_store(cli.ephemeral)?));
            let api = InProcApi::new(Arc::clone(&engine));
            let summary = match api.refresh_notifications().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "reconcile pass failed; previous state kept");
                    return Ok(());
                }
            };
            info!(
                synthesized = summary.synthesized,
                upgraded = summary.upgraded,
                out_of_scope = summary.out_of_scope,
                "reconcile done"
            );
            print_notifications(&api.notifications().await?, cli.output)?;
        }
        Commands::List => {
            let engine = Arc::new(Engine::new(Arc::new(StaticFeed::new(vec![])), open_store(cli.ephemeral)?));
            let api = InProcApi::new(engine);
            print_notifications(&api.notifications().await?, cli.output)?;
        }
        Commands::Unread => {
            let engine = Arc::new(Engine::new(Arc::new(StaticFeed::new(vec![])), open_store(cli.ephemeral)?));
            let api = InProcApi::new(engine);
            let count = api.unread_count().await?;
            let has_new = api.has_new_notifications().await?;
            match cli.output {
                Output::Human => println!("{} unread{}", count, if has_new { " (new)" } else { "" }),
                Output::Json => println!(
                    "{}",
                    serde_json::json!({ "unread_count": count, "has_new_notifications": has_new })
                ),
            }
        }
        Commands::MarkRead { id } => {
            let engine = Arc::new(Engine::new(Arc::new(StaticFeed::new(vec![])), open_store(cli.ephemeral)?));
            let api = InProcApi::new(engine);
            match api.mark_as_read(id).await {
                Ok(()) => println!("marked {} as read", id),
                Err(e) => eprintln!("mark-read error: {}", e),
            }
        }
        Commands::MarkAllRead => {
            let engine = Arc::new(Engine::new(Arc::new(StaticFeed::new(vec![])), open_store(cli.ephemeral)?));
            let api = InProcApi::new(engine);
            api.mark_all_as_read().await?;
            println!("all notifications marked as read");
        }
        Commands::Watch => {
            let engine = Arc::new(Engine::new(open_feed(&cli)?, open_store(cli.ephemeral)?));
            let handle = engine.handle();
            let (_refresh, task) = spawn_poller(Arc::clone(&engine), poll_period());
            let mut epochs = handle.subscribe_epoch();
            info!(period_secs = poll_period().as_secs(), "watching order feed (ctrl-c to stop)");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("stopping watch");
                        break;
                    }
                    changed = epochs.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snap = handle.current();
                        match cli.output {
                            Output::Human => {
                                println!("-- epoch {} · {} unread --", snap.epoch, snap.unread_count);
                                for n in snap.notifications.iter().filter(|n| !n.is_read) {
                                    println!("• {}", n.message);
                                }
                            }
                            Output::Json => println!("{}", serde_json::to_string_pretty(&snap.notifications)?),
                        }
                    }
                }
            }
            task.abort();
        }
    }

    Ok(())
}
