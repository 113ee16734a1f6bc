//! GitVault CLI - keep a local vault in sync with a GitHub repository.
//!
//! `init` writes per-vault settings, `sync` runs one pass, `watch` records
//! local edits and syncs on a schedule, and `status` shows what is pending.

mod prompt;
mod settings;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gitvault_storage::{GitHubClient, GitHubConfig, LocalFs, VaultFs, VaultWatcher};
use gitvault_sync::{
    conflict_channel, ChangeListener, ConflictStrategy, MetadataStore, SyncConfig, SyncEngine,
    SyncMode, SyncOutcome, SyncReport, SyncScheduler,
};

use settings::Settings;

#[derive(Parser)]
#[command(name = "gitvault")]
#[command(about = "GitVault - Sync a local vault with a GitHub repository")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Vault root directory.
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Vault-relative config directory holding settings and the manifest.
    #[arg(long, global = true, default_value = ".vault")]
    config_dir: String,

    /// GitHub token with contents read/write access.
    #[arg(long, global = true, env = "GITVAULT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write sync settings for a vault.
    Init {
        /// Repository owner (user or organization).
        #[arg(long)]
        owner: String,

        /// Repository name.
        #[arg(long)]
        repo: String,

        /// Branch to sync.
        #[arg(long, default_value = "main")]
        branch: String,

        /// Also sync files inside the config directory.
        #[arg(long)]
        sync_config_dir: bool,

        /// What to do when both sides changed a file.
        #[arg(long, value_enum, default_value = "ask")]
        conflicts: ConflictArg,

        /// Sync every N seconds while watching.
        #[arg(long)]
        interval: Option<u64>,

        /// Sync as soon as `watch` starts.
        #[arg(long)]
        sync_on_startup: bool,

        /// Replace existing settings.
        #[arg(long)]
        force: bool,
    },

    /// Run one sync pass.
    Sync,

    /// Record local edits and sync on a schedule until Ctrl-C.
    Watch {
        /// Override the configured interval in seconds.
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show the last sync time and pending local changes.
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConflictArg {
    /// Prompt on the terminal.
    Ask,
    /// Remote content wins.
    Remote,
    /// Local content wins.
    Local,
}

impl From<ConflictArg> for ConflictStrategy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Ask => ConflictStrategy::Ask,
            ConflictArg::Remote => ConflictStrategy::OverwriteLocal,
            ConflictArg::Local => ConflictStrategy::OverwriteRemote,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init {
            ref owner,
            ref repo,
            ref branch,
            sync_config_dir,
            conflicts,
            interval,
            sync_on_startup,
            force,
        } => {
            let mut github = GitHubConfig::new(owner, repo, "");
            github.branch = branch.clone();
            let settings = Settings {
                github,
                sync: SyncConfig {
                    config_dir: cli.config_dir.clone(),
                    sync_config_dir,
                    conflict_strategy: conflicts.into(),
                    ..SyncConfig::default()
                },
                sync_mode: interval_mode(interval),
                sync_on_startup,
            };
            cmd_init(&cli.vault, settings, force)
        }

        Commands::Sync => cmd_sync(&cli).await,

        Commands::Watch { interval } => cmd_watch(&cli, interval).await,

        Commands::Status => cmd_status(&cli).await,
    }
}

fn interval_mode(seconds: Option<u64>) -> SyncMode {
    match seconds {
        Some(secs) if secs > 0 => SyncMode::Interval {
            interval: Duration::from_secs(secs),
        },
        _ => SyncMode::Manual,
    }
}

/// Write settings for a vault.
fn cmd_init(vault: &Path, settings: Settings, force: bool) -> Result<()> {
    if !vault.is_dir() {
        bail!("Vault directory not found: {}", vault.display());
    }
    settings.sync.policy().context("Invalid config directory")?;

    let path = Settings::path(vault, &settings.sync.config_dir);
    if path.exists() && !force {
        bail!("Settings already exist at {} (use --force to replace)", path.display());
    }

    let path = settings.save(vault)?;
    println!("Settings written to {}", path.display());
    println!(
        "  Repository: {}/{} ({})",
        settings.github.owner, settings.github.repo, settings.github.branch
    );
    println!("  Conflicts: {:?}", settings.sync.conflict_strategy);
    println!("Provide a token with --token or GITVAULT_TOKEN to sync.");

    Ok(())
}

/// Everything needed to sync one vault.
struct Session {
    settings: Settings,
    store: MetadataStore,
    listener: ChangeListener,
    engine: Arc<SyncEngine>,
}

/// Load settings and the store, and wire up the engine.
async fn open_session(cli: &Cli) -> Result<Session> {
    let mut settings = Settings::load(&cli.vault, &cli.config_dir)?;
    if let Some(token) = &cli.token {
        settings.github.token = token.clone();
    }
    if settings.github.token.is_empty() {
        bail!("No GitHub token; pass --token or set GITVAULT_TOKEN");
    }

    let sync = settings.sync_config();
    let policy = sync.policy().context("Invalid sync settings")?;
    let fs: Arc<dyn VaultFs> = Arc::new(LocalFs::new(&cli.vault).context("Failed to open vault")?);
    let store = MetadataStore::load(fs.clone(), policy.manifest_path().clone())
        .await
        .context("Failed to load sync metadata")?;
    let listener = ChangeListener::new(store.clone(), fs.clone(), policy);

    let remote = GitHubClient::new(settings.github.clone()).context("Failed to create GitHub client")?;
    let mut engine = SyncEngine::new(Arc::new(remote), fs, store.clone(), sync)?;
    if settings.sync.conflict_strategy == ConflictStrategy::Ask {
        let (tx, rx) = conflict_channel();
        engine = engine.with_conflict_channel(tx);
        tokio::spawn(prompt::answer_conflicts(rx));
    }

    Ok(Session {
        settings,
        store,
        listener,
        engine: Arc::new(engine),
    })
}

/// Run one pass.
async fn cmd_sync(cli: &Cli) -> Result<()> {
    let session = open_session(cli).await?;

    let changed = session.listener.scan().await.context("Failed to scan vault")?;
    info!("Found {} local changes since last run", changed);

    match session.engine.run_sync().await.context("Sync failed")? {
        SyncOutcome::Completed(report) => print_report(&report),
        SyncOutcome::Skipped => println!("Another sync is already running."),
    }

    // Flush pending manifest writes before exiting.
    session.store.save().await?;
    Ok(())
}

/// Watch the vault and sync on a schedule.
async fn cmd_watch(cli: &Cli, interval: Option<u64>) -> Result<()> {
    let session = open_session(cli).await?;

    let mode = match interval {
        Some(_) => interval_mode(interval),
        None => session.settings.sync_mode.clone(),
    };
    if mode == SyncMode::Manual && !session.settings.sync_on_startup {
        bail!("Nothing to schedule; pass --interval or configure one with `gitvault init`");
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let watcher = VaultWatcher::new(&cli.vault, event_tx).context("Failed to watch vault")?;
    let changed = session.listener.scan().await.context("Failed to scan vault")?;
    info!("Found {} local changes since last run", changed);

    let listener_task = tokio::spawn(session.listener.run(event_rx));

    let (scheduler, handle) = SyncScheduler::new(mode.clone(), session.settings.sync_on_startup);
    let engine = session.engine.clone();
    let scheduler_task = tokio::spawn(handle.run(move |_trigger| {
        let engine = engine.clone();
        async move { engine.run_sync().await }
    }));

    match &mode {
        SyncMode::Interval { interval } => {
            println!("Watching {} (sync every {:?}), Ctrl-C to stop", watcher.root().display(), interval)
        }
        SyncMode::Manual => println!("Watching {}, Ctrl-C to stop", watcher.root().display()),
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Stopping");

    scheduler.shutdown().await;
    if let Err(e) = scheduler_task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }

    // Dropping the watcher closes the event channel and ends the listener.
    drop(watcher);
    if let Err(e) = listener_task.await {
        warn!("Listener task ended abnormally: {}", e);
    }

    session.store.save().await?;
    Ok(())
}

/// Show the last sync time and pending local changes.
async fn cmd_status(cli: &Cli) -> Result<()> {
    let settings = Settings::load(&cli.vault, &cli.config_dir)?;
    let policy = settings.sync_config().policy().context("Invalid sync settings")?;
    let fs: Arc<dyn VaultFs> = Arc::new(LocalFs::new(&cli.vault).context("Failed to open vault")?);
    let store = MetadataStore::load(fs.clone(), policy.manifest_path().clone())
        .await
        .context("Failed to load sync metadata")?;

    let metadata = store.snapshot().await;

    println!(
        "Repository: {}/{} ({})",
        settings.github.owner, settings.github.repo, settings.github.branch
    );
    match chrono::DateTime::from_timestamp_millis(metadata.last_sync) {
        Some(at) if metadata.last_sync > 0 => println!("Last sync: {}", at.with_timezone(&chrono::Local)),
        _ => println!("Last sync: never"),
    }

    let dirty: Vec<_> = metadata.dirty().filter(|m| !m.is_deleted()).collect();
    let deleted: Vec<_> = metadata
        .deleted()
        .filter(|m| m.deleted_at().is_some_and(|at| at > metadata.last_sync))
        .collect();
    let tracked = metadata
        .active_paths()
        .filter(|p| !policy.is_manifest(p))
        .count();
    println!("Tracked files: {}", tracked);

    if dirty.is_empty() && deleted.is_empty() {
        println!("No pending local changes.");
        return Ok(());
    }
    for entry in dirty {
        println!("  modified  {}", entry.path);
    }
    for entry in deleted {
        println!("  deleted   {}", entry.path);
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    match &report.commit {
        Some(sha) => println!("Sync complete ({:?}), commit {}", report.kind, sha),
        None if report.is_noop() => println!("Already up to date."),
        None => println!("Sync complete ({:?})", report.kind),
    }
    println!("  Uploaded: {}", report.uploaded);
    println!("  Downloaded: {}", report.downloaded);
    println!("  Deleted locally: {}", report.deleted_local);
    println!("  Deleted remotely: {}", report.deleted_remote);
    if report.conflicts > 0 {
        println!("  Conflicts resolved: {}", report.conflicts);
    }
    for (path, err) in &report.failed {
        println!("  Failed: {} ({})", path, err);
    }
}
