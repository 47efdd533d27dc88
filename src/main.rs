use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use podder::{
    Action, ActionOutcome, Config, DownloadOutcome, Episode, NoopNotifier, Notification, Notifier,
    NullEngine, Origin, Podder, ReqwestClient, SharedNotifier, Store, SyncReport,
    store::now_millis,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static SPARKLES: Emoji<'_, '_> = Emoji("✨ ", "[*] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Subscribe to podcasts, keep them in sync and manage downloads
#[derive(Parser, Debug)]
#[command(name = "podder")]
#[command(about = "Subscribe to podcasts, keep them in sync and manage downloads")]
#[command(version)]
struct Args {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - suppress progress output and logs below errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed URL or local RSS file and fetch it
    Subscribe {
        url: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove a subscription together with its episodes
    Unsubscribe { url: String },
    /// Import subscriptions from an OPML file
    Import { opml: PathBuf },
    /// Refresh subscribed feeds
    Sync {
        /// Only refresh this feed
        #[arg(long)]
        feed: Option<String>,
    },
    /// List subscriptions
    Subscriptions,
    /// List stored episodes
    Episodes {
        /// Only episodes of this feed
        #[arg(long)]
        feed: Option<String>,
    },
    /// Download the audio of one or more episodes
    Download {
        #[arg(required = true)]
        guids: Vec<String>,
    },
    /// Delete the downloaded audio of an episode
    DeleteDownload { guid: String },
    /// Mark an episode as finished
    MarkFinished { guid: String },
    /// Delete downloads of episodes finished longer ago than the retention
    Expire,
    /// Keep running and refresh feeds on the configured schedule
    Watch,
    /// Show the saved playback session
    Session,
}

/// Notifier drawing download progress with indicatif
struct TerminalNotifier {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl TerminalNotifier {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, guid: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bars.get(guid) {
            return bar.clone();
        }

        let style = ProgressStyle::with_template(&format!(
            "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(guid.to_string(), bar.clone());
        bar
    }

    fn remove_bar(&self, guid: &str) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(guid)
    }
}

impl Notifier for TerminalNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::NewEpisodes { episodes } => {
                for episode in &episodes {
                    let _ = self.multi.println(format!(
                        "{SPARKLES}New: {} {}",
                        truncate_title(&episode.title, 60).bold(),
                        format_date(episode.pub_date).dimmed()
                    ));
                }
            }

            Notification::DownloadStarted {
                guid,
                title,
                content_length,
            } => {
                let bar = self.bar(&guid);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(truncate_title(&title, 40));
            }

            Notification::DownloadProgress {
                guid,
                bytes_downloaded,
                total_bytes,
            } => {
                let bar = self.bar(&guid);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            Notification::DownloadCompleted { guid, title, .. } => {
                if let Some(bar) = self.remove_bar(&guid) {
                    bar.finish_with_message(format!(
                        "{SUCCESS}{}",
                        truncate_title(&title, 40).green()
                    ));
                }
            }

            Notification::DownloadFailed { guid, title, error } => {
                let message = format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&title, 30).red(),
                    error.red()
                );
                match self.remove_bar(&guid) {
                    Some(bar) => bar.abandon_with_message(message),
                    None => {
                        let _ = self.multi.println(message);
                    }
                }
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let cut: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn format_date(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn format_position(millis: i64) -> String {
    let seconds = millis.max(0) / 1000;
    format!("{}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60)
}

fn init_tracing(args: &Args) {
    // RUST_LOG wins over the flags
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "podder=info",
            1 => "podder=debug",
            _ => "podder=trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_podder(config: &Config, quiet: bool) -> Result<Podder<ReqwestClient>> {
    std::fs::create_dir_all(&config.paths.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.paths.data_dir.display()
        )
    })?;

    let database = config.database_path();
    let store = Store::open(&database)
        .await
        .with_context(|| format!("Failed to open database {}", database.display()))?;

    let client = ReqwestClient::with_timeouts(config.connect_timeout(), config.read_timeout())
        .context("Failed to build HTTP client")?;

    let notifier: SharedNotifier = if quiet {
        NoopNotifier::shared()
    } else {
        Arc::new(TerminalNotifier::new())
    };

    // No audio output from the command line
    Ok(Podder::new(
        client,
        store,
        notifier,
        Box::new(NullEngine::default()),
        config,
    ))
}

fn cli() -> Origin {
    Origin::user("cli")
}

fn print_report(report: &SyncReport) {
    println!(
        "\n{HEADPHONES}{} {} refreshed, {} new, {} failed",
        "Sync complete:".bold().green(),
        report.refreshed.len().to_string().green().bold(),
        report.new_episodes.len().to_string().yellow(),
        if report.failed.is_empty() {
            "0".green()
        } else {
            report.failed.len().to_string().red().bold()
        }
    );

    if !report.failed.is_empty() {
        println!("\n{}", "Failed feeds:".red().bold());
        for failure in &report.failed {
            println!(
                "  {}{} - {}",
                CROSS,
                failure.url.yellow(),
                failure.error.dimmed()
            );
        }
    }
}

fn print_episode(episode: &Episode) {
    let mut flags = Vec::new();
    if episode.is_finished() {
        flags.push("finished".green().to_string());
    } else if episode.progress_in_millis > 0 {
        flags.push(format!(
            "at {}",
            format_position(episode.progress_in_millis).cyan()
        ));
    }
    if episode.is_downloaded() {
        flags.push("downloaded".blue().to_string());
    }

    println!(
        "  {} {} {} {}",
        format_date(episode.pub_date).dimmed(),
        truncate_title(&episode.title, 60).bold(),
        episode.guid.dimmed(),
        flags.join(", ")
    );
}

/// Returns `false` when the command ran but did not fully succeed
async fn run_sync(podder: &Podder<ReqwestClient>, feed: Option<&str>, quiet: bool) -> Result<bool> {
    let action = match feed {
        Some(url) => {
            if !quiet {
                println!("{SEARCH}Fetching feed: {}", url.cyan());
            }
            Action::RefreshFeed {
                url: url.to_string(),
                origin: cli(),
            }
        }
        None => {
            if !podder.sync().has_subscriptions().await? {
                println!("No subscriptions yet. Add one with `podder subscribe <url>`.");
                return Ok(true);
            }
            if !quiet {
                println!("{SEARCH}Refreshing subscriptions");
            }
            Action::RefreshAll { origin: cli() }
        }
    };

    let outcome = podder
        .dispatch(action)
        .await
        .context("Failed to refresh feeds")?;
    let ActionOutcome::Synced(report) = outcome else {
        return Ok(true);
    };
    if !quiet {
        print_report(&report);
    }
    Ok(!report.is_complete_failure())
}

async fn download(podder: &Podder<ReqwestClient>, guids: &[String]) -> Result<bool> {
    let mut handles = Vec::with_capacity(guids.len());
    for guid in guids {
        let outcome = podder
            .dispatch(Action::Download {
                guid: guid.clone(),
                origin: cli(),
            })
            .await
            .with_context(|| format!("Failed to start download of {guid}"))?;
        if let ActionOutcome::DownloadStarted(handle) = outcome {
            handles.push(handle);
        }
    }

    let mut failed = 0;
    for handle in handles {
        let guid = handle.guid().to_string();
        match handle.wait().await {
            DownloadOutcome::Completed(path) => debug!(%guid, path = %path.display(), "Downloaded"),
            DownloadOutcome::Failed(error) => {
                debug!(%guid, %error, "Download failed");
                failed += 1;
            }
        }
    }
    Ok(failed == 0)
}

async fn watch(podder: &Podder<ReqwestClient>) {
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping");
            }
            shutdown.cancel();
        }
    });

    podder.scheduler().run(shutdown).await;
}

async fn run(podder: &Podder<ReqwestClient>, command: &Command, quiet: bool) -> Result<bool> {
    match command {
        Command::Subscribe { url, title } => {
            let outcome = podder
                .dispatch(Action::Subscribe {
                    url: url.clone(),
                    title: title.clone(),
                    origin: cli(),
                })
                .await
                .context("Failed to subscribe")?;
            match outcome {
                ActionOutcome::Subscribed(Some(report)) => {
                    println!("{SUCCESS}Subscribed to {}", url.cyan());
                    if !quiet {
                        print_report(&report);
                    }
                    return Ok(!report.is_complete_failure());
                }
                _ => println!("Already subscribed to {}", url.cyan()),
            }
        }

        Command::Unsubscribe { url } => {
            let outcome = podder
                .dispatch(Action::Unsubscribe {
                    url: url.clone(),
                    origin: cli(),
                })
                .await?;
            if matches!(outcome, ActionOutcome::Unsubscribed(true)) {
                println!("{SUCCESS}Unsubscribed from {}", url.cyan());
            } else {
                println!("Not subscribed to {}", url.cyan());
            }
        }

        Command::Import { opml } => {
            let document = std::fs::read(opml)
                .with_context(|| format!("Failed to read {}", opml.display()))?;
            let outcome = podder
                .dispatch(Action::ImportOpml {
                    document,
                    origin: cli(),
                })
                .await
                .context("Failed to import OPML")?;
            if let ActionOutcome::Imported(added) = outcome {
                println!("{SUCCESS}Imported {} new subscriptions", added.to_string().green());
            }
        }

        Command::Sync { feed } => return run_sync(podder, feed.as_deref(), quiet).await,

        Command::Subscriptions => {
            for subscription in podder.store().subscriptions().await? {
                let title = match podder.store().podcast(&subscription.url).await? {
                    Some(podcast) => podcast.title,
                    None => subscription.title.unwrap_or_default(),
                };
                println!(
                    "  {} {} {}",
                    format_date(subscription.date_added).dimmed(),
                    title.bold(),
                    subscription.url.cyan()
                );
            }
        }

        Command::Episodes { feed } => {
            let episodes = match feed {
                Some(url) => podder.store().episodes_for_podcast(url).await?,
                None => podder.store().episodes().await?,
            };
            for episode in &episodes {
                print_episode(episode);
            }
        }

        Command::Download { guids } => return download(podder, guids).await,

        Command::DeleteDownload { guid } => {
            let outcome = podder
                .dispatch(Action::DeleteDownload {
                    guid: guid.clone(),
                    origin: cli(),
                })
                .await?;
            if matches!(outcome, ActionOutcome::DownloadDeleted(true)) {
                println!("{SUCCESS}Deleted download of {}", guid.cyan());
            } else {
                println!("{} has no download", guid.cyan());
            }
        }

        Command::MarkFinished { guid } => {
            let outcome = podder
                .dispatch(Action::MarkAsFinished {
                    guid: guid.clone(),
                    origin: cli(),
                })
                .await?;
            if let ActionOutcome::Finished(episode) = outcome {
                println!("{SUCCESS}Marked {} as finished", episode.title.bold());
            }
        }

        Command::Expire => {
            let removed = podder.downloads().expire_stale(now_millis()).await?;
            println!("{SUCCESS}Removed {} expired downloads", removed.to_string().green());
        }

        Command::Watch => watch(podder).await,

        Command::Session => match podder.store().load_session().await? {
            Some(session) => {
                let title = podder
                    .store()
                    .episode(&session.last_guid)
                    .await?
                    .map(|episode| episode.title)
                    .unwrap_or_else(|| session.last_guid.clone());
                println!(
                    "{HEADPHONES}{} at {} ({})",
                    title.bold(),
                    format_position(session.last_position_millis).cyan(),
                    if session.last_is_playing {
                        "playing".green()
                    } else {
                        "paused".yellow()
                    }
                );
            }
            None => println!("No saved playback session"),
        },
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(&args);
    debug!(?args, "CLI arguments parsed");

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podder".bold().magenta(),
            "- Podcast Client".dimmed()
        );
    }

    let podder = open_podder(&config, args.quiet).await?;
    let result = run(&podder, &args.command, args.quiet).await;

    // Settle downloads and queued writes before the database closes
    podder.shutdown().await;
    podder.store().clone().close().await;

    if !result? {
        std::process::exit(1);
    }
    Ok(())
}
