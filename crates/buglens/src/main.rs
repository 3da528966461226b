mod watch;

use anyhow::Context;
use buglens_engine::config::ConfigLoader;
use buglens_engine::formatter::format_report;
use buglens_engine::sink::KvReportSink;
use buglens_engine::store::{FileKvStore, KvStore};
use buglens_engine::triage::PauseState;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "buglens", version, about = "Per-tab bug capture and triage")]
struct Args {
    /// Config file (defaults to ./buglens.yaml, then ~/.buglens/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a page in Chromium and capture its console, network and errors
    Watch {
        url: String,

        /// Launch browser in visible mode (not headless)
        #[arg(long)]
        visible: bool,
    },
    /// Print stored bug reports and mark them read
    Reports {
        /// Delete all stored reports instead of printing them
        #[arg(long)]
        clear: bool,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Lift a triage pause set after upstream quota or overload errors
    Unpause,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries reports.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ConfigLoader::load(args.config.as_deref())
        .await
        .context("failed to load configuration")?;
    let store_path = config.persistence.store_path.clone();
    let kv: Arc<dyn KvStore> = Arc::new(
        FileKvStore::open(&store_path)
            .await
            .with_context(|| format!("failed to open store {}", store_path.display()))?,
    );

    match args.command {
        Command::Watch { url, visible } => watch::run(config, kv, &url, visible).await,
        Command::Reports { clear, json } => reports(kv, clear, json).await,
        Command::Unpause => unpause(kv).await,
    }
}

async fn reports(kv: Arc<dyn KvStore>, clear: bool, json: bool) -> anyhow::Result<()> {
    let sink = KvReportSink::new(kv);
    if clear {
        sink.clear().await?;
        println!("Cleared stored reports.");
        return Ok(());
    }

    let reports = sink.reports().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if reports.is_empty() {
        println!("No reports stored.");
    } else {
        let unread = sink.unread_count().await?;
        println!("{} report(s), {} unread\n", reports.len(), unread);
        for report in reports.iter().rev() {
            println!("{}", format_report(report));
        }
    }
    sink.mark_all_read().await?;
    Ok(())
}

async fn unpause(kv: Arc<dyn KvStore>) -> anyhow::Result<()> {
    let pause = PauseState::new(kv);
    match pause.pause_until().await? {
        Some(until) => {
            pause.clear().await?;
            println!("Cleared triage pause (was until {}).", until.to_rfc3339());
        }
        None => println!("Triage is not paused."),
    }
    Ok(())
}
