//! scribe - terminal chat over the turn orchestrator

mod config;
mod store;
mod tools;

use clap::Parser;
use scribe_agent::{
    Orchestrator, OrchestratorConfig, RerunOverrides, RoundHandle, ToolRegistry, TurnEvent,
};
use scribe_ai::{HttpTransport, ModelSpec, Turn, Usage, UserInput};
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_MODEL};
use crate::store::FileHistoryStore;
use crate::tools::ReadFileTool;

const RESULT_PREVIEW_CHARS: usize = 200;

/// scribe - chat with an LLM that can read your files
#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model as <provider>/<model-id> (default: anthropic/claude-sonnet-4-5)
    #[arg(short, long)]
    model: Option<String>,

    /// Ask the model for reasoning output
    #[arg(short, long)]
    thinking: bool,

    /// Inference passes allowed per turn (1-10)
    #[arg(long)]
    max_steps: Option<usize>,

    /// Run a single prompt and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Continue a saved conversation by id
    #[arg(long)]
    history: Option<String>,

    /// List saved conversations
    #[arg(long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("scribe=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        let path = Config::init()?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let store = Arc::new(FileHistoryStore::new(FileHistoryStore::default_dir()));

    if args.list {
        return list_histories(&store);
    }

    let cfg = Config::load();

    // CLI takes precedence over the config file
    let model = ModelSpec::parse(
        args.model
            .as_deref()
            .or(cfg.model.as_deref())
            .unwrap_or(DEFAULT_MODEL),
    )?;

    let mut orchestrator_config = OrchestratorConfig::new(model.clone());
    orchestrator_config.thinking = args.thinking || cfg.thinking.unwrap_or(false);
    orchestrator_config.max_tokens = cfg.max_tokens;
    if let Some(max_steps) = args.max_steps.or(cfg.max_steps) {
        orchestrator_config.max_steps = max_steps;
    }
    orchestrator_config.system_prompt = cfg.system_prompt()?;
    orchestrator_config.credentials = cfg.credentials(model.provider);

    let tools = ToolRegistry::new().with_tool(Arc::new(ReadFileTool));

    let history_id = args
        .history
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut orchestrator = Orchestrator::new(
        orchestrator_config,
        Arc::new(HttpTransport::new()),
        Arc::new(tools),
    )
    .with_history_store(store, history_id.clone());

    if args.history.is_some() {
        orchestrator.load()?;
    }

    let mut events = orchestrator.subscribe();

    if let Some(prompt) = args.command {
        let handle = orchestrator.begin_round(UserInput::chat(&prompt))?;
        return drive_round(&mut orchestrator, &mut events, handle).await;
    }

    if io::stderr().is_terminal() {
        let short_id = history_id.get(..8).unwrap_or(&history_id);
        eprintln!("scribe ({}) history: {}", model, short_id);
        if !orchestrator.turns().is_empty() {
            eprintln!("{} earlier turns loaded", orchestrator.turns().len());
        }
        eprintln!("Type /help for commands.\n");
    }

    run_interactive(&mut orchestrator, &mut events).await
}

async fn run_interactive(
    orchestrator: &mut Orchestrator,
    events: &mut broadcast::Receiver<TurnEvent>,
) -> anyhow::Result<()> {
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let handle = match input.split_once(' ').unwrap_or((input, "")) {
            ("/exit" | "/quit", _) => break,
            ("/help", _) => {
                println!("{}", help_text());
                continue;
            }
            ("/rerun", prompt) => {
                let Some(last) = orchestrator.turns().last().map(|t| t.id.clone()) else {
                    println!("Nothing to rerun.");
                    continue;
                };
                let overrides = RerunOverrides {
                    prompt: Some(prompt.trim())
                        .filter(|p| !p.is_empty())
                        .map(str::to_string),
                    files: None,
                };
                orchestrator.begin_rerun(&last, overrides)
            }
            (command, _) if command.starts_with('/') => {
                println!("Unknown command: {}", command);
                println!("Type /help for available commands.");
                continue;
            }
            _ => orchestrator.begin_round(UserInput::chat(input)),
        };

        match handle {
            Ok(handle) => drive_round(orchestrator, events, handle).await?,
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

/// Run an accepted round, printing events as they arrive. Ctrl-C cancels it.
async fn drive_round(
    orchestrator: &mut Orchestrator,
    events: &mut broadcast::Receiver<TurnEvent>,
    handle: RoundHandle,
) -> anyhow::Result<()> {
    let mut printer = Printer::default();
    let mut cancelled = false;

    {
        let run = orchestrator.run(&handle.turn_id);
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => {
                    result?;
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => printer.print(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Display fell behind, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => {}
                },
                _ = tokio::signal::ctrl_c(), if !cancelled => {
                    handle.cancel.cancel();
                    cancelled = true;
                }
            }
        }
    }

    // Events published after the last poll
    loop {
        match events.try_recv() {
            Ok(event) => printer.print(&event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    Ok(())
}

/// Writes round events to the terminal
#[derive(Default)]
struct Printer {
    in_thinking: bool,
}

impl Printer {
    fn print(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::Thinking { content, .. } => {
                if !self.in_thinking {
                    print!("[thinking] ");
                    self.in_thinking = true;
                }
                print!("{}", content);
            }
            TurnEvent::Content { content, .. } => {
                self.end_thinking();
                print!("{}", content);
            }
            TurnEvent::ToolCall { tool_call, .. } => {
                self.end_thinking();
                println!("\n[Running {}...]", tool_call.name);
            }
            TurnEvent::ToolCallResult { id, result, .. } => {
                println!("[{}: {}]", id, preview(result));
            }
            TurnEvent::TurnComplete { turn } => {
                self.end_thinking();
                let usage = total_usage(turn);
                println!(
                    "\n[Steps: {} | Tokens: {} in, {} out]",
                    turn.steps.len(),
                    usage.input,
                    usage.output
                );
            }
            TurnEvent::Error { message, .. } => {
                self.end_thinking();
                eprintln!("\nError: {}", message);
            }
            TurnEvent::TurnStart { .. }
            | TurnEvent::StepStart { .. }
            | TurnEvent::StepComplete { .. } => {}
        }
        let _ = io::stdout().flush();
    }

    fn end_thinking(&mut self) {
        if self.in_thinking {
            println!("\n");
            self.in_thinking = false;
        }
    }
}

fn total_usage(turn: &Turn) -> Usage {
    turn.steps
        .iter()
        .filter_map(|s| s.usage.as_ref())
        .fold(Usage::default(), |mut total, step| {
            total.input = total.input.saturating_add(step.input);
            total.output = total.output.saturating_add(step.output);
            total.cache_read = total.cache_read.saturating_add(step.cache_read);
            total.cache_write = total.cache_write.saturating_add(step.cache_write);
            total
        })
}

fn preview(result: &serde_json::Value) -> String {
    let text = match result {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() > RESULT_PREVIEW_CHARS || text.lines().nth(1).is_some() {
        let cut: String = first_line.chars().take(RESULT_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        first_line.to_string()
    }
}

fn help_text() -> &'static str {
    "Commands:\n  /rerun [prompt]  Run the last turn again, optionally with a new prompt\n  /help            Show this help\n  /exit            Quit\n\nCtrl-C cancels a running turn."
}

fn list_histories(store: &FileHistoryStore) -> anyhow::Result<()> {
    let histories = store.list()?;
    if histories.is_empty() {
        println!("No saved conversations found.");
        println!("Conversations are stored in: {}", store.dir().display());
        return Ok(());
    }

    println!("Saved conversations:\n");
    println!("{:<38} {:<18} {:<6} Title", "ID", "Updated", "Turns");
    println!("{}", "-".repeat(90));
    for h in histories {
        println!(
            "{:<38} {:<18} {:<6} {}",
            h.id,
            h.updated_at_display(),
            h.turn_count,
            h.title
        );
    }
    println!("\nContinue with: scribe --history <id>");
    Ok(())
}
