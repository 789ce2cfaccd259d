use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use qidian_core::{
    AgentClient, Config, Framing, HistoryEntry, Mode, Orchestrator, SessionConfig, SessionOutcome,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod events;
mod transcript;

use events::{EventHandler, InputEvent};
use transcript::Transcript;

#[derive(Parser)]
#[command(name = "qidian")]
#[command(about = "Ask the Qidian agent service and watch the answer stream in")]
struct Cli {
    /// Agent service URL (overrides the config file and QIDIAN_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Wire framing of the stream: line-json or field-framed
    #[arg(long, global = true)]
    framing: Option<String>,
    /// Print text as soon as it arrives instead of pacing it
    #[arg(long, global = true)]
    no_smooth: bool,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the answer
    Ask {
        /// Your question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// Answer mode: default, research or fortune
        #[arg(short, long)]
        mode: Option<String>,
    },
    /// Interactive conversation (/mode <m>, /clear, /quit; Ctrl-C stops an answer)
    Chat {
        /// Answer mode: default, research or fortune
        #[arg(short, long)]
        mode: Option<String>,
        /// JSON file with earlier turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Check that the agent service is up and list its agents
    Health,
    /// Show the effective configuration
    Config {
        /// Persist --base-url, --framing and --no-smooth to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = effective_config(&cli)?;
    let base_url = cli.base_url.clone().unwrap_or_else(|| config.base_url());
    let client = AgentClient::with_endpoints(&base_url, config.endpoints.clone());
    let session_config = SessionConfig::from_config(&config);

    match cli.command {
        Commands::Ask { question, mode } => {
            let mode = parse_mode(mode.as_deref(), &config)?;
            ask(client, session_config, &question.join(" "), mode).await
        }
        Commands::Chat { mode, history } => {
            let mode = parse_mode(mode.as_deref(), &config)?;
            chat(client, session_config, mode, history.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => health(&client).await,
        Commands::Config { save } => {
            show_config(&config, &base_url, save)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    // stdout carries only answer text
    let default_filter = if verbose {
        "qidian=debug,qidian_core=debug"
    } else {
        "qidian=warn,qidian_core=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();
}

fn effective_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().unwrap_or_else(|err| {
        warn!(error = %err, "could not read config file, using defaults");
        Config::new()
    });

    if let Some(url) = &cli.base_url {
        config.base_url = Some(url.clone());
    }
    if let Some(framing) = &cli.framing {
        let framing = Framing::from_str(framing).ok_or_else(|| {
            anyhow!("Unknown framing '{}'. Use one of: line-json, field-framed", framing)
        })?;
        config.framing = Some(framing);
    }
    if cli.no_smooth {
        config.smooth = Some(false);
    }

    Ok(config)
}

fn parse_mode(mode: Option<&str>, config: &Config) -> Result<Mode> {
    match mode {
        None => Ok(config.mode()),
        Some(name) => Mode::from_str(name).ok_or_else(|| {
            let known: Vec<&str> = Mode::all().iter().map(|m| m.as_str()).collect();
            anyhow!("Unknown mode '{}'. Use one of: {}", name, known.join(", "))
        }),
    }
}

async fn ask(
    client: AgentClient,
    session_config: SessionConfig,
    question: &str,
    mode: Mode,
) -> Result<ExitCode> {
    let mut orchestrator = Orchestrator::new(client, session_config);
    let id = orchestrator.send(question, mode);
    let mut transcript = Transcript::new();

    let outcome = loop {
        tokio::select! {
            update = orchestrator.next_update() => {
                let Some(update) = update else { break None };
                let outcome = orchestrator.apply(update);
                if let Some(message) = orchestrator.conversation().message(id) {
                    transcript.show(&message.content)?;
                }
                if outcome.is_some() {
                    break outcome;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel();
                break Some(SessionOutcome::Cancelled);
            }
        }
    };
    transcript.finish()?;

    match outcome {
        Some(SessionOutcome::Streamed) | Some(SessionOutcome::Fallback) => Ok(ExitCode::SUCCESS),
        Some(SessionOutcome::Cancelled) => {
            eprintln!("(cancelled)");
            Ok(ExitCode::from(130))
        }
        Some(SessionOutcome::Failed(_)) | None => Ok(ExitCode::FAILURE),
    }
}

async fn chat(
    client: AgentClient,
    session_config: SessionConfig,
    mut mode: Mode,
    history: Option<&Path>,
) -> Result<()> {
    let mut orchestrator = Orchestrator::new(client, session_config);

    if let Some(path) = history {
        let entries = load_history(path)?;
        orchestrator.load_history(&entries);
        println!("Loaded {} earlier messages from {}", entries.len(), path.display());
    }

    println!("Mode: {}. Type a question, /mode <name>, /clear or /quit.", mode.display_name());
    prompt()?;

    let mut events = EventHandler::new();
    let mut transcript = Transcript::new();
    let mut current: Option<u64> = None;

    loop {
        tokio::select! {
            update = orchestrator.next_update() => {
                let Some(update) = update else { break };
                let finished = orchestrator.apply(update);
                if let Some(message) = current.and_then(|id| orchestrator.conversation().message(id)) {
                    transcript.show(&message.content)?;
                }
                if let Some(outcome) = finished {
                    debug!(?outcome, "answer complete");
                    transcript.finish()?;
                    current = None;
                    prompt()?;
                }
            }
            event = events.next() => match event {
                Some(InputEvent::Line(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        if current.is_none() {
                            prompt()?;
                        }
                        continue;
                    }

                    if line == "/quit" || line == "/exit" {
                        break;
                    } else if line == "/clear" {
                        orchestrator.clear();
                        transcript.finish()?;
                        current = None;
                        println!("Conversation cleared.");
                        prompt()?;
                    } else if let Some(name) = line.strip_prefix("/mode") {
                        match Mode::from_str(name.trim()) {
                            Some(new_mode) => {
                                mode = new_mode;
                                println!("Mode: {}", mode.display_name());
                            }
                            None => {
                                let known: Vec<&str> = Mode::all().iter().map(|m| m.as_str()).collect();
                                println!("Unknown mode '{}'. Use one of: {}", name.trim(), known.join(", "));
                            }
                        }
                        if current.is_none() {
                            prompt()?;
                        }
                    } else {
                        // A new question replaces an answer still in progress
                        transcript.finish()?;
                        current = Some(orchestrator.send(line, mode));
                    }
                }
                Some(InputEvent::Interrupt) => {
                    if orchestrator.cancel() {
                        transcript.finish()?;
                        current = None;
                        println!("(cancelled)");
                        prompt()?;
                    } else {
                        break;
                    }
                }
                Some(InputEvent::Eof) | None => break,
            }
        }
    }

    orchestrator.cancel();
    transcript.finish()?;
    Ok(())
}

fn load_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading history file {}", path.display()))?;
    let entries: Vec<HistoryEntry> = serde_json::from_str(&content)
        .with_context(|| format!("parsing history file {}", path.display()))?;
    Ok(entries)
}

fn prompt() -> Result<()> {
    let mut out = io::stdout().lock();
    write!(out, "\n> ")?;
    out.flush()?;
    Ok(())
}

async fn health(client: &AgentClient) -> Result<ExitCode> {
    match client.health().await {
        Ok(health) => {
            println!("Agent service at {}: {}", client.base_url(), health.status);
            if let Some(default_agent) = &health.default_agent {
                println!("Default agent: {}", default_agent);
            }
            if health.agents.is_empty() {
                println!("No agents registered.");
            } else {
                println!("Agents:");
                for agent in &health.agents {
                    println!("  • {}", agent);
                }
            }
            if let Some(modes) = &health.graph_modes {
                println!("Graph modes: {}", modes.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("Error connecting to the agent service at {}: {:#}", client.base_url(), err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn show_config(config: &Config, base_url: &str, save: bool) -> Result<()> {
    if save {
        config.save()?;
        println!("Saved to {}", Config::get_config_path()?.display());
    }

    println!("base_url:  {}", base_url);
    println!("framing:   {}", config.framing().as_str());
    println!("mode:      {}", config.mode().as_str());
    println!("smooth:    {}", config.smooth());
    println!("tick:      {:?}", config.tick());
    println!("endpoints: {}", serde_json::to_string(&config.endpoints)?);
    Ok(())
}
