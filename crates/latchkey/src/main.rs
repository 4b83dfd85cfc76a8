mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use latchkey::config::loader::load_config;
use latchkey::{AppConfig, Backend, open_store};
use latchkey_store::RequestContext;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let cfg = load_config(cli.config.as_deref())
        .map_err(anyhow::Error::msg)
        .context("Configuration error")?;

    latchkey::observability::init_tracing(&cfg.logging.level, cfg.logging.format);
    tracing::debug!(backend = %cfg.redacted().database.url, "Configuration loaded");

    match cli.command {
        Commands::Migrate => migrate(&cfg).await,
        Commands::Check { timeout } => check(&cfg, Duration::from_secs(timeout)).await,
        Commands::Sweep { watch } => sweep(&cfg, watch).await,
        Commands::Config => {
            let rendered = toml::to_string_pretty(&cfg.redacted())
                .context("failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

async fn migrate(cfg: &AppConfig) -> Result<()> {
    let mut database = cfg.database.clone();
    database.run_migrations = false;

    let backend = Backend::connect(&database).await?;
    if backend.migrate().await? {
        println!("migrations applied");
    } else {
        println!("memory backend has no schema, nothing to migrate");
    }
    Ok(())
}

async fn check(cfg: &AppConfig, timeout: Duration) -> Result<()> {
    let ctx = RequestContext::background().with_timeout(timeout);
    let store = ctx
        .run(open_store(&cfg.database))
        .await
        .context("backend unreachable")?;
    store.ping(&ctx).await.context("backend ping failed")?;

    let descriptor = cfg.database.descriptor()?;
    println!("ok: {descriptor} reachable");
    Ok(())
}

async fn sweep(cfg: &AppConfig, watch: bool) -> Result<()> {
    let store = open_store(&cfg.database).await?;

    if !watch {
        let purged = store.purge_expired(&RequestContext::background()).await?;
        println!("purged {purged} expired session(s)");
        return Ok(());
    }

    if !cfg.sweep.enabled {
        anyhow::bail!("sweeping is disabled (sweep.enabled = false)");
    }

    let shutdown = CancellationToken::new();
    let handle = store.spawn_sweeper(cfg.sweep.interval, shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    shutdown.cancel();
    handle.await.context("sweeper task failed")?;
    Ok(())
}
