//! spooler CLI: spool work items and deliver them to the analysis service.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use spooler_core::{
    AnalysisOutcome, ImageAttachment, RecordId, ResultSink, Spooler, SpoolerBuilder,
    SpoolerConfig, WorkPayload,
};

#[derive(Debug, Parser)]
#[command(name = "spooler", version, about = "Durable delivery of work items to an analysis service")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true, env = "SPOOLER_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `spool.root_dir`.
    #[arg(long, global = true, env = "SPOOLER_SPOOL_DIR")]
    spool_dir: Option<PathBuf>,

    /// Overrides `remote.base_url`.
    #[arg(long, global = true, env = "SPOOLER_ENDPOINT")]
    endpoint: Option<String>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Persist one work item for later delivery.
    Enqueue(PayloadArgs),
    /// Send one work item right away, without spooling or retries.
    Send(PayloadArgs),
    /// Run the delivery worker until Ctrl-C.
    Run,
    /// Deliver pending items now, stopping at the first failure.
    Flush {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Show pending and dead-letter counts.
    Status,
    /// Probe the analysis service.
    Health,
    /// Move dead-letter records back to pending.
    Replay {
        #[arg(required_unless_present = "all")]
        record_id: Option<String>,
        #[arg(long, conflicts_with = "record_id")]
        all: bool,
    },
    /// Delete pending records (or dead-letter records with --dead).
    Clear {
        #[arg(long)]
        dead: bool,
    },
}

#[derive(Debug, Args)]
struct PayloadArgs {
    /// Name of the application the text came from.
    #[arg(long)]
    app: String,
    #[arg(long)]
    bundle_id: Option<String>,
    #[arg(long)]
    window: Option<String>,
    /// Image file to attach (base64-encoded into the record).
    #[arg(long)]
    screenshot: Option<PathBuf>,
    /// Extra context, repeatable: `--context key=value`.
    #[arg(long = "context", value_parser = parse_key_value)]
    context: Vec<(String, String)>,
    text: String,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

impl PayloadArgs {
    fn into_payload(self) -> Result<WorkPayload> {
        let mut payload = WorkPayload::new(self.app, self.text);
        if let Some(bundle_id) = self.bundle_id {
            payload = payload.with_bundle_id(bundle_id);
        }
        if let Some(window) = self.window {
            payload = payload.with_window_title(window);
        }
        if let Some(path) = self.screenshot {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read screenshot {}", path.display()))?;
            payload = payload.with_screenshot(ImageAttachment::from_bytes(mime_for(&path), &bytes));
        }
        for (key, value) in self.context {
            payload = payload.with_context(key, value);
        }
        Ok(payload)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Prints each delivered outcome as one JSON line on stdout.
struct PrintingSink;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeLine<'a> {
    record_id: &'a str,
    replacement_chunk: Option<&'a str>,
}

#[async_trait]
impl ResultSink for PrintingSink {
    async fn apply(&self, id: &RecordId, outcome: Option<AnalysisOutcome>) {
        let line = OutcomeLine {
            record_id: id.as_str(),
            replacement_chunk: outcome.as_ref().map(|o| o.replacement_chunk.as_str()),
        };
        if let Ok(json) = serde_json::to_string(&line) {
            println!("{json}");
        }
    }
}

#[derive(Serialize)]
struct StatusView {
    pending: usize,
    dead: usize,
    dead_ids: Vec<String>,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<SpoolerConfig> {
    let mut config = SpoolerConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = &cli.spool_dir {
        config.spool.root_dir = dir.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.remote.base_url = endpoint.clone();
    }
    Ok(config)
}

async fn build(config: SpoolerConfig, sink: Weak<dyn ResultSink>) -> Result<Spooler> {
    SpoolerBuilder::new(config)
        .with_sink(sink)
        .build()
        .await
        .context("failed to start spooler")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli)?;
    info!(spool_dir = %config.spool.root_dir.display(), endpoint = %config.remote.base_url, "configuration loaded");

    // sink は spooler より長生きさせる（worker は Weak で持つ）
    let sink: Arc<dyn ResultSink> = Arc::new(PrintingSink);
    let spooler = build(config, Arc::downgrade(&sink)).await?;

    match cli.command {
        Command::Enqueue(args) => {
            let receipt = spooler.submit(args.into_payload()?).await?;
            println!("{}", receipt.record_id);
            if receipt.dropped > 0 {
                eprintln!("spool full: dropped {} oldest record(s)", receipt.dropped);
            }
        }
        Command::Send(args) => {
            let meta = spooler.send_direct(args.into_payload()?).await?;
            println!("HTTP {} in {} ms", meta.status, meta.elapsed.as_millis());
        }
        Command::Run => {
            spooler.start();
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("shutdown requested");
            spooler.stop().await;
            print_json(&spooler.stats())?;
        }
        Command::Flush { limit } => {
            let report = spooler.flush(limit).await;
            print_json(&report)?;
            if report.stopped_on_failure {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Status => {
            let counts = spooler.counts().await?;
            let dead_ids = spooler
                .dead_letters()
                .await?
                .into_iter()
                .map(|id| id.to_string())
                .collect();
            print_json(&StatusView {
                pending: counts.pending,
                dead: counts.dead,
                dead_ids,
            })?;
        }
        Command::Health => {
            let healthy = spooler.health_check().await;
            println!("{}", if healthy { "healthy" } else { "unreachable" });
            if !healthy {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Replay { record_id, all } => {
            let replayed = if all {
                spooler.replay_all().await?
            } else {
                let Some(raw) = record_id else {
                    bail!("record id or --all is required");
                };
                let record_id: RecordId = raw.parse()?;
                usize::from(spooler.replay(&record_id).await?)
            };
            println!("replayed {replayed} record(s)");
        }
        Command::Clear { dead } => {
            let removed = if dead {
                spooler.clear_dead().await?
            } else {
                spooler.clear_pending().await?
            };
            println!("removed {removed} record(s)");
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn key_value_pairs_are_parsed() {
        assert_eq!(
            parse_key_value("lang=en=US").unwrap(),
            ("lang".to_string(), "en=US".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn replay_requires_an_id_or_all() {
        assert!(Cli::try_parse_from(["spooler", "replay"]).is_err());
        assert!(Cli::try_parse_from(["spooler", "replay", "--all"]).is_ok());
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(mime_for(Path::new("shot.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("shot.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("shot")), "application/octet-stream");
    }
}
