//! clipvault: durable, resumable archiver for short-video feeds.

mod daemon;
mod pool;
mod redact;
mod runner;
mod settings;
mod targets;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use clipvault_api::{
    cancel_pair, AddrRotator, Api, CancelToken, RateLimiter, Transport, Upstream,
    DEFAULT_EXHAUSTION_TTL,
};
use clipvault_core::Archiver;
use clipvault_fetch::{Downloader, MediaClient};
use clipvault_fs::SysProbe;
use clipvault_store::HistoryStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::daemon::{DaemonConfig, TargetManager};
use crate::redact::{RedactingWriter, SharedWriter};
use crate::runner::ArchiveRunner;
use crate::settings::Settings;
use crate::targets::extract_username;

#[derive(Parser)]
#[command(
    name = "clipvault",
    version,
    about = "Archive short-video posts and profiles, durably and resumably",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Targets (usernames or post URLs); omit to use the targets file.
    targets: Vec<String>,

    /// Path to the config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also log to stderr.
    #[arg(long, global = true)]
    debug: bool,

    /// Redact usernames, ids, and paths from the log file.
    #[arg(long, global = true)]
    clean_logs: bool,

    /// Re-download even when history says an asset is archived.
    #[arg(short, long, global = true)]
    force: bool,

    /// Download directory (overrides config).
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Targets file path (overrides config).
    #[arg(long, global = true)]
    targets_file: Option<PathBuf>,

    /// Skip posts created before this instant (YYYY-MM-DD HH:MM:SS).
    #[arg(long, global = true)]
    since: Option<String>,

    /// Video quality: "source", "hd", "sd", or "all".
    #[arg(short, long, global = true)]
    quality: Option<String>,

    /// Concurrent workers (default: CPU count).
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Outbound bind IPs or interface names, comma separated.
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Back off and retry on upstream rate limits.
    #[arg(long, global = true)]
    retry_on_429: bool,

    /// Also archive post covers.
    #[arg(long, global = true)]
    download_covers: bool,

    /// Cover variant: "cover"/"medium", "origin"/"small", "dynamic".
    #[arg(long, global = true)]
    cover_type: Option<String>,

    /// Also archive author avatars.
    #[arg(long, global = true)]
    download_avatars: bool,

    /// Save post titles to side .txt files.
    #[arg(long, global = true)]
    save_post_title: bool,

    /// Cache user feeds on disk.
    #[arg(long, global = true)]
    feed_cache: bool,

    /// Feed cache freshness window in seconds.
    #[arg(long, global = true)]
    feed_cache_ttl_secs: Option<u64>,

    /// Keep running and watch the targets file for edits.
    #[arg(long, global = true)]
    daemon: bool,

    /// Idle poll interval for daemon mode, in seconds.
    #[arg(long, global = true)]
    daemon_poll_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Archive posts or whole profiles (the default command).
    #[command(alias = "dl")]
    Download {
        /// Targets (usernames or post URLs); omit to use the targets file.
        targets: Vec<String>,
    },
    /// Backfill covers for posts already in history.
    Covers { user: String },
    /// Re-fetch wanted qualities that history records as missing.
    Fix { user: String },
    /// Show profile details.
    Info { user: String },
    /// Debugging aids.
    #[command(subcommand)]
    Debug(DebugCommand),
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Dump the raw JSON of the first page of a user's feed.
    Feed { user: String },
}

fn apply_overrides(cli: &Cli, settings: &mut Settings) {
    if let Some(dir) = &cli.dir {
        settings.download_path = dir.clone();
    }
    if let Some(path) = &cli.targets_file {
        settings.targets_file = path.clone();
    }
    if let Some(since) = &cli.since {
        settings.since = since.clone();
    }
    if let Some(quality) = &cli.quality {
        settings.quality = quality.clone();
    }
    if let Some(workers) = cli.workers {
        settings.max_workers = workers;
    }
    if let Some(bind) = &cli.bind {
        settings.bind_address = bind.clone();
    }
    if cli.retry_on_429 {
        settings.retry_on_429 = true;
    }
    if cli.download_covers {
        settings.download_covers = true;
    }
    if let Some(cover_type) = &cli.cover_type {
        settings.cover_type = cover_type.clone();
    }
    if cli.download_avatars {
        settings.download_avatars = true;
    }
    if cli.save_post_title {
        settings.save_post_title = true;
    }
    if cli.feed_cache {
        settings.feed_cache = true;
    }
    if let Some(ttl) = cli.feed_cache_ttl_secs {
        settings.feed_cache_ttl_secs = ttl;
    }
    if cli.daemon {
        settings.daemon = true;
    }
    if let Some(poll) = cli.daemon_poll_secs {
        settings.daemon_poll_secs = poll;
    }
}

fn init_logging(settings: &Settings, debug: bool, clean: bool, targets: &[String]) -> anyhow::Result<()> {
    if let Some(dir) = settings.log_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&settings.log_path)
        .with_context(|| format!("opening log file {}", settings.log_path.display()))?;

    let sink: Box<dyn std::io::Write + Send> = if clean {
        Box::new(RedactingWriter::new(file, &settings.download_path, targets))
    } else {
        Box::new(file)
    };
    let file_writer = SharedWriter::new(sink);

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || file_writer.clone()),
        )
        .with(debug.then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
    Ok(())
}

fn spawn_signal_handler(canceller: clipvault_api::Canceller) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not register SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("shutdown signal received");
        canceller.cancel();
    });
}

/// Cancellation unwinds silently; it is not a failure.
fn finished(result: clipvault_core::Result<()>) -> anyhow::Result<()> {
    match result {
        Err(e) if e.is_cancelled() => Ok(()),
        other => other.map_err(Into::into),
    }
}

fn progress_logger(user: &str) -> clipvault_core::ProgressFn {
    let user = user.to_string();
    Arc::new(move |current, total, message| {
        tracing::debug!(%user, current, total, message, "progress");
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let detail = format!("{e:#}");
            tracing::error!(error = %detail, "fatal");
            eprintln!("clipvault: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    apply_overrides(&cli, &mut settings);

    // Targets from args take precedence; otherwise the targets file is
    // the source (and daemon mode becomes possible).
    let arg_targets: Vec<String> = match &cli.command {
        Some(Command::Download { targets }) => targets.clone(),
        None => cli.targets.clone(),
        _ => Vec::new(),
    };
    let from_file = arg_targets.is_empty();
    let file_targets = if from_file {
        match targets::read_lines(&settings.targets_file) {
            Ok(lines) => targets::all_targets(&lines),
            Err(_) => Vec::new(),
        }
    } else {
        Vec::new()
    };

    let redaction_scope: Vec<String> = if from_file {
        file_targets.clone()
    } else {
        arg_targets.clone()
    };
    init_logging(&settings, cli.debug, cli.clean_logs, &redaction_scope)?;

    let (root_canceller, root_token) = cancel_pair();
    spawn_signal_handler(root_canceller);

    let limiter = Arc::new(RateLimiter::new(
        Duration::from_millis(settings.request_spacing_ms),
        root_token.clone(),
    ));
    let transport = if settings.bind_address.trim().is_empty() {
        Arc::new(Transport::plain()?)
    } else {
        let rotator = Arc::new(AddrRotator::new(
            &settings.bind_address,
            DEFAULT_EXHAUSTION_TTL,
        )?);
        Arc::new(Transport::rotating(rotator)?)
    };
    if settings.probe_bind_addresses {
        transport
            .probe("https://api.github.com")
            .await
            .context("bind address probe failed")?;
    }
    let api = Arc::new(Api::new(
        settings.base_url.clone(),
        limiter,
        Arc::clone(&transport),
    ));

    let store = HistoryStore::open(&settings.database_path)
        .await
        .context("opening history database")?;
    let downloader = Downloader::new(MediaClient::new(transport), Arc::new(SysProbe));
    let archiver = Arc::new(Archiver::new(
        Arc::clone(&api),
        store.clone(),
        downloader,
        settings.archive_config(),
    ));

    let outcome = match &cli.command {
        Some(Command::Info { user }) => {
            let user = extract_username(user);
            let detail = api.user_info(&user).await.map_err(anyhow::Error::from)?;
            println!("{} (@{})", detail.user.nickname, detail.user.unique_id);
            if !detail.user.signature.is_empty() {
                println!("{}", detail.user.signature);
            }
            println!(
                "verified: {}  private: {}",
                detail.user.verified, detail.user.private_account
            );
            println!(
                "followers: {}  following: {}  videos: {}  hearts: {}",
                detail.stats.follower_count,
                detail.stats.following_count,
                detail.stats.video_count,
                detail.stats.heart_count
            );
            Ok(())
        }
        Some(Command::Covers { user }) => {
            let user = extract_username(user);
            finished(
                archiver
                    .covers_for_user(&user, progress_logger(&user), &root_token)
                    .await,
            )
        }
        Some(Command::Fix { user }) => {
            let user = extract_username(user);
            finished(
                archiver
                    .fix_profile(&user, progress_logger(&user), &root_token)
                    .await,
            )
        }
        Some(Command::Debug(DebugCommand::Feed { user })) => {
            let user = extract_username(user);
            let query = [
                ("unique_id", user.clone()),
                ("count", "5".to_string()),
                ("cursor", "0".to_string()),
            ];
            let body = api
                .raw("user/posts", &query)
                .await
                .map_err(anyhow::Error::from)?;
            println!("{body}");
            Ok(())
        }
        Some(Command::Download { .. }) | None => {
            run_download(
                &settings,
                archiver,
                arg_targets,
                file_targets,
                from_file,
                cli.force,
                root_token,
            )
            .await
        }
    };

    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "error closing history database");
    }
    outcome
}

async fn run_download(
    settings: &Settings,
    archiver: Arc<runner::AppArchiver>,
    arg_targets: Vec<String>,
    file_targets: Vec<String>,
    from_file: bool,
    force: bool,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    let runner = Arc::new(ArchiveRunner::new(archiver, force));

    if from_file && settings.daemon {
        let manager = TargetManager::new(
            DaemonConfig {
                targets_file: settings.targets_file.clone(),
                max_workers: settings.worker_count(),
                poll_interval: Duration::from_secs(settings.daemon_poll_secs.max(1)),
            },
            runner,
            cancel,
        );
        return manager.run().await;
    }

    let static_targets = if from_file { file_targets } else { arg_targets };
    if static_targets.is_empty() {
        println!("No targets specified. Run 'clipvault --help' for usage.");
        return Ok(());
    }
    pool::run_static(
        runner,
        static_targets,
        from_file.then(|| settings.targets_file.clone()),
        settings.worker_count(),
        cancel,
    )
    .await
}
