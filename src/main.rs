use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reelbot::chat::{ChatEvent, ConsoleChat};
use reelbot::config::ConfigLoader;
use reelbot::coordinator::Pipeline;
use reelbot::fetch::HttpFetcher;
use reelbot::stats::{StatsSnapshot, StatsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

#[derive(Parser)]
#[command(name = "reelbot")]
#[command(version = "0.1.0")]
#[command(about = "Rate-limited Instagram media fetcher driven by chat messages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process chat events (JSON lines) and fetch the media they link to
    Run {
        /// Path to the configuration file (JSON/YAML/TOML); defaults plus REELBOT_* env when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// File with one chat event per line, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        events: String,

        /// Disable the live statistics spinner and route logs straight to stderr
        #[arg(long)]
        no_progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the persisted statistics
    Stats {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> reelbot::Result<reelbot::config::PipelineConfig> {
    ConfigLoader::load(path)
}

async fn open_events(source: &str) -> anyhow::Result<Box<dyn AsyncRead + Unpin + Send>> {
    if source == "-" {
        Ok(Box::new(tokio::io::stdin()))
    } else {
        Ok(Box::new(tokio::fs::File::open(source).await?))
    }
}

fn stats_line(snapshot: &StatsSnapshot) -> String {
    format!(
        "Total: {} | OK: {} | Failed: {} | Limited: {} | In flight: {}",
        snapshot.total,
        snapshot.succeeded,
        snapshot.failed,
        snapshot.rate_limited,
        snapshot.pending
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let level = logger.filter();
    let multi = Arc::new(indicatif::MultiProgress::new());

    match cli.command {
        Commands::Run {
            config,
            events,
            no_progress,
        } => {
            let progress = !no_progress;
            if progress {
                indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger).try_init()?;
            } else {
                log::set_boxed_logger(Box::new(logger))?;
            }
            log::set_max_level(level);

            let config_data = load_config(config.as_deref())?;
            log::info!(
                "Limits: {}/hour, {}/day, {}s apart, {} workers",
                config_data.hourly_cap,
                config_data.daily_cap,
                config_data.min_delay_secs,
                config_data.concurrency
            );

            let printer = progress.then(|| multi.clone());
            let observers = ConfigLoader::create_observers(&config_data, printer.clone()).await?;
            let fetcher = Arc::new(HttpFetcher::new(&config_data.user_agent)?);
            let chat = Arc::new(ConsoleChat::new(printer));
            let pipeline = Pipeline::from_config(&config_data, fetcher, observers, chat).await;

            let mut progress_bar: Option<ProgressBar> = None;
            let mut _progress_task = None;
            if progress {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
                pb.enable_steady_tick(Duration::from_millis(200));
                pb.set_message(stats_line(&pipeline.stats().await));

                let mut stats_rx = pipeline.watch_stats();
                let pb_clone = pb.clone();
                progress_bar = Some(pb);
                _progress_task = Some(tokio::spawn(async move {
                    while stats_rx.changed().await.is_ok() {
                        let snapshot = stats_rx.borrow().clone();
                        pb_clone.set_message(stats_line(&snapshot));
                    }
                }));
            }

            let reader = BufReader::new(open_events(&events).await?);
            let stream = LinesStream::new(reader.lines()).filter_map(|line| match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => match serde_json::from_str::<ChatEvent>(&line) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        log::warn!("Skipping malformed event: {}", e);
                        None
                    }
                },
                Err(e) => {
                    log::error!("Reading events failed: {}", e);
                    None
                }
            });

            log::info!("Watching for Instagram links...");
            pipeline.run(stream).await;

            if let Some(task) = _progress_task {
                task.abort();
            }
            let final_stats = pipeline.stats().await;
            if let Some(pb) = progress_bar {
                pb.finish_with_message(format!("{} - Stopped", stats_line(&final_stats)));
            }

            println!("\n✅ Session Completed:");
            println!("   Requests: {}", final_stats.total);
            println!("   Succeeded: {}", final_stats.succeeded);
            println!("   Failed: {}", final_stats.failed);
            println!("   Rate Limited: {}", final_stats.rate_limited);
            println!("   Success Rate: {:.1}%", final_stats.success_rate());
        }
        Commands::Check { config } => {
            match load_config(Some(&config)) {
                Ok(cfg) => {
                    println!("✅ Config is valid:");
                    println!("   Hourly cap: {}", cfg.hourly_cap);
                    println!("   Daily cap: {}", cfg.daily_cap);
                    println!("   Min delay: {}s", cfg.min_delay_secs);
                    println!("   Workers: {}", cfg.concurrency);
                    println!("   Stats file: {}", cfg.stats_path.display());
                    println!("   Observers: {}", cfg.observers.len());
                }
                Err(e) => {
                    eprintln!("❌ Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Stats { config } => {
            log::set_boxed_logger(Box::new(logger))?;
            log::set_max_level(level);

            let cfg = load_config(config.as_deref())?;
            let snapshot = match StatsStore::read(&cfg.stats_path).await {
                Ok(snapshot) => snapshot.unwrap_or_default(),
                Err(e) => {
                    eprintln!("❌ {}", e);
                    std::process::exit(1);
                }
            };

            println!("📊 Statistics ({})", cfg.stats_path.display());
            println!("   {}", stats_line(&snapshot));
            println!("   Success Rate: {:.1}%", snapshot.success_rate());

            let mut users: Vec<_> = snapshot.user_activity.iter().collect();
            users.sort_by(|a, b| b.1.requests.cmp(&a.1.requests));
            for (user, entry) in users.into_iter().take(10) {
                println!(
                    "   {}: {} requests ({} ok, {} failed, {} limited)",
                    user, entry.requests, entry.succeeded, entry.failed, entry.rate_limited
                );
            }
            println!("   Guilds: {}", snapshot.guild_activity.len());
            for record in snapshot.recent.iter().rev().take(5) {
                println!("   {} {:?} {}", record.at.to_rfc3339(), record.status, record.url);
            }
        }
    }

    Ok(())
}
