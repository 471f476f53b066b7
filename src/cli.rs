use crate::engine::api::{HttpApi, RunApi};
use crate::engine::replay::ReplayOptions;
use crate::model::{RunAggregate, RunStatus, WatchConfig};
use crate::orchestrator::{
    process_session, run_controller, Command, ControllerSettings, Mode, OutputTargets,
    ReplaySource, RunController, SessionRecord,
};
use crate::progress::DEFAULT_BASELINE;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "arena-watch",
    version,
    about = "Watch multi-variant prompt runs live, or replay them from their event log"
)]
pub struct Cli {
    /// Base URL of the run server
    #[arg(long, env = "ARENA_API_URL", default_value = "http://localhost:8000", global = true)]
    pub base_url: String,

    /// Print the final state as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Print progress lines and a text summary (default)
    #[arg(long, global = true)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for scripted usage)
    #[arg(long, global = true)]
    pub silent: bool,

    /// More logging on stderr (-v debug for this crate, -vv everything)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Replay speed multiplier
    #[arg(long, default_value_t = crate::engine::replay::DEFAULT_SPEED, global = true)]
    pub speed: f64,

    /// Delay before the first replayed event
    #[arg(long, default_value = "500ms", global = true)]
    pub lead_in: humantime::Duration,

    /// Minimum delay between replayed events
    #[arg(long, default_value = "50ms", global = true)]
    pub floor: humantime::Duration,

    /// Fail a live run whose channel stays silent this long (off by default)
    #[arg(long, global = true)]
    pub stall_timeout: Option<humantime::Duration>,

    /// Write the captured event log to this file
    #[arg(long, global = true)]
    pub export_log: Option<PathBuf>,

    /// Save the captured event log under the user data directory
    #[arg(long, global = true)]
    pub save: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CliCommand {
    /// Start a run and watch it live
    Run {
        /// Input text for the run; read from stdin when omitted
        input: Option<String>,

        /// Read the input text from a file
        #[arg(long, conflicts_with = "input")]
        input_file: Option<PathBuf>,

        /// Replay the run from the server log once it completes
        #[arg(long)]
        then_replay: bool,
    },
    /// Replay a finished run from the server or from an exported log
    Replay {
        /// Run id to fetch the log for
        run_id: Option<String>,

        /// Replay a previously exported log file instead
        #[arg(long, conflicts_with = "run_id")]
        file: Option<PathBuf>,
    },
    /// Show client settings and the server's configuration
    Config,
}

/// Install the stderr tracing subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,arena_watch=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }
    init_tracing(args.verbose);

    let cfg = build_config(&args);
    let api: Arc<dyn RunApi> = Arc::new(
        HttpApi::new(&cfg.base_url, &cfg.user_agent).context("invalid --base-url")?,
    );

    match args.command.clone() {
        CliCommand::Run {
            input,
            input_file,
            then_replay,
        } => {
            let input = read_input(input, input_file)?;
            watch(&args, &cfg, api, Command::Start(input), then_replay).await
        }
        CliCommand::Replay { run_id, file } => {
            let source = match (run_id, file) {
                (_, Some(path)) => {
                    let events = crate::storage::load_log(&path)
                        .with_context(|| format!("failed to load {}", path.display()))?;
                    ReplaySource::Log(events)
                }
                (Some(id), None) => {
                    match api.get_run(&id).await {
                        Ok(info) => debug!(
                            run_id = %info.run_id,
                            status = ?info.status,
                            winner = ?info.winner_variant_id,
                            "replaying stored run"
                        ),
                        Err(e) => debug!(run_id = %id, error = %e, "run metadata unavailable"),
                    }
                    ReplaySource::Run(id)
                }
                (None, None) => return Err(anyhow!("give a run id or --file to replay")),
            };
            watch(&args, &cfg, api, Command::Replay(source), false).await
        }
        CliCommand::Config => show_config(&args, &cfg, api).await,
    }
}

/// Build a `WatchConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> WatchConfig {
    WatchConfig {
        base_url: args.base_url.clone(),
        speed: args.speed,
        lead_in: Duration::from(args.lead_in),
        floor: Duration::from(args.floor),
        stall_timeout: args.stall_timeout.map(Duration::from),
        user_agent: format!("arena-watch/{}", env!("CARGO_PKG_VERSION")),
    }
}

pub fn build_settings(cfg: &WatchConfig) -> ControllerSettings {
    ControllerSettings {
        replay: ReplayOptions {
            speed: cfg.speed,
            lead_in: cfg.lead_in,
            floor: cfg.floor,
        },
        stall_timeout: cfg.stall_timeout,
        baseline: DEFAULT_BASELINE,
    }
}

fn read_input(input: Option<String>, input_file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = input {
        return Ok(text);
    }
    if let Some(path) = input_file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read input from stdin")?;
    Ok(buf)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    mode: Mode,
    run_id: Option<&'a str>,
    progress: f64,
    error: Option<&'a str>,
    aggregate: &'a RunAggregate,
}

/// Drive one controller session to completion and print its outcome.
async fn watch(
    args: &Cli,
    cfg: &WatchConfig,
    api: Arc<dyn RunApi>,
    first: Command,
    then_replay: bool,
) -> Result<()> {
    let text_mode = !args.silent && (args.text || !args.json);
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let (mut ctl, consumer_rx) = RunController::new(api, build_settings(cfg), update_tx);
    if matches!(first, Command::Start(_)) {
        if let Err(e) = ctl.load_server_config().await {
            debug!(error = %e, "server config unavailable; using defaults");
        }
    }

    let mut replay_requested = matches!(first, Command::Replay(_));
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(run_controller(ctl, cmd_rx, consumer_rx));
    cmd_tx
        .send(first)
        .map_err(|_| anyhow!("controller stopped before the first command"))?;

    let (out_tx, out_handle) = spawn_output_writer();
    let mut replay_pending = then_replay;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            update = update_rx.recv() => {
                let Some(update) = update else { break };
                if text_mode {
                    if let Some(line) = crate::text_summary::progress_line(&update) {
                        let _ = out_tx.send(OutputLine::Stderr(line));
                    }
                }
                let rejected = update.mode == Mode::Idle && update.error.is_some();
                if !update.is_settled() && !rejected {
                    continue;
                }
                if replay_pending
                    && update.mode == Mode::Live
                    && update.aggregate.status == RunStatus::Complete
                {
                    replay_pending = false;
                    replay_requested = true;
                    if text_mode {
                        let _ = out_tx.send(OutputLine::Stderr("== replay ==".into()));
                    }
                    let _ = cmd_tx.send(Command::Replay(ReplaySource::LastRun));
                    continue;
                }
                let _ = cmd_tx.send(Command::Quit);
                break;
            }
            _ = &mut ctrl_c => {
                info!("interrupted");
                let _ = cmd_tx.send(Command::Quit);
                break;
            }
        }
    }

    let record = driver.await.context("controller task failed")?;
    let processed = process_session(
        &OutputTargets {
            export_log: args.export_log.clone(),
            save: args.save,
        },
        &record,
    );

    if !args.silent {
        if args.json {
            let report = JsonReport {
                mode: record.mode,
                run_id: record.run_id.as_deref(),
                progress: record.progress,
                error: record.error.as_deref(),
                aggregate: &record.aggregate,
            };
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&report)?));
        } else {
            for line in crate::text_summary::build_text_summary(&record).lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        for msg in &processed.messages {
            let _ = out_tx.send(OutputLine::Stderr(msg.clone()));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    if processed.failed {
        return Err(anyhow!(processed.messages.join("; ")));
    }
    session_outcome(&record, replay_requested)
}

/// A session fails when its run ended in error, it never got going, or a
/// requested replay could not be loaded.
fn session_outcome(record: &SessionRecord, replay_requested: bool) -> Result<()> {
    if record.aggregate.status == RunStatus::Error {
        let msg = record
            .aggregate
            .error
            .as_deref()
            .unwrap_or("run failed");
        return Err(anyhow!("run failed: {msg}"));
    }
    if let Some(err) = record.error.as_deref() {
        if replay_requested
            || record.mode == Mode::Idle
            || !record.aggregate.status.is_terminal()
        {
            return Err(anyhow!("{err}"));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ConfigReport<'a> {
    client: &'a WatchConfig,
    server: Option<crate::model::ServerConfig>,
    health: Option<crate::model::Health>,
}

async fn show_config(args: &Cli, cfg: &WatchConfig, api: Arc<dyn RunApi>) -> Result<()> {
    let health = api.health().await;
    let server = api.fetch_config().await;
    if let Err(e) = &health {
        debug!(error = %e, "health check failed");
    }

    let (out_tx, out_handle) = spawn_output_writer();
    if args.json {
        let report = ConfigReport {
            client: cfg,
            server: server.as_ref().ok().cloned(),
            health: health.as_ref().ok().cloned(),
        };
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&report)?));
    } else if !args.silent {
        let _ = out_tx.send(OutputLine::Stdout(format!("Server: {}", cfg.base_url)));
        let _ = out_tx.send(OutputLine::Stdout(format!(
            "Replay: speed {} lead-in {} floor {}",
            cfg.speed,
            humantime::format_duration(cfg.lead_in),
            humantime::format_duration(cfg.floor)
        )));
        if let Some(stall) = cfg.stall_timeout {
            let _ = out_tx.send(OutputLine::Stdout(format!(
                "Stall timeout: {}",
                humantime::format_duration(stall)
            )));
        }
        match &health {
            Ok(h) => {
                let _ = out_tx.send(OutputLine::Stdout(format!("Health: {} {}", h.status, h.message)));
            }
            Err(e) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Health: unreachable ({e})")));
            }
        }
        if let Ok(sc) = &server {
            if let Some(n) = sc.variant_count {
                let _ = out_tx.send(OutputLine::Stdout(format!("Variants per run: {n}")));
            }
            if let Some(max) = sc.max_input_chars {
                let _ = out_tx.send(OutputLine::Stdout(format!("Max input: {max} chars")));
            }
            if !sc.labels.is_empty() {
                let _ = out_tx.send(OutputLine::Stdout(format!("Labels: {}", sc.labels.join(", "))));
            }
            for (i, example) in sc.demo_examples.iter().enumerate() {
                let _ = out_tx.send(OutputLine::Stdout(format!("Example {}: {example}", i + 1)));
            }
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    server.map(|_| ()).context("failed to fetch server config")
}
