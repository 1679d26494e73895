//! Quill - natural-language edits streamed straight into your files.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use quill_adapters::config::{Config, KEYS};
use quill_adapters::{logging, FileDocument, WorkspaceContext};
use quill_core::{DocumentHandle, EditEvent, EditRequest, LineIndex, TextRange};
use quill_engine::{EditOutcome, EditSession, HttpModelClient};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "quill",
    about = "Edit code with natural-language instructions",
    long_about = "Q U I L L\n\n\
                  Picks the part of a file an instruction is about, streams the\n\
                  model's rewrite into it, and keeps a checkpoint for undo.",
    version
)]
struct Args {
    /// Log debug output to stderr (QUILL_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply an instruction to a file
    Edit(EditArgs),
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct EditArgs {
    /// File to edit
    file: PathBuf,

    /// What to change
    #[arg(short, long)]
    instruction: String,

    /// Restrict the edit to lines START:END (1-based, inclusive)
    #[arg(long, value_name = "START:END")]
    lines: Option<String>,

    /// Editor language id when the extension is ambiguous
    #[arg(long)]
    language: Option<String>,

    /// Model to use for this run
    #[arg(long)]
    model: Option<String>,

    /// Workspace scanned for related files
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Write the result once at the end instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Print the edited file instead of saving it
    #[arg(long)]
    dry_run: bool,

    /// Ask before keeping the edit
    #[arg(long)]
    review: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print every setting
    Show,
    /// Print one setting
    Get { key: String },
    /// Change one setting and save
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match args.command {
        Command::Edit(edit) => run_edit(edit).await,
        Command::Config { action } => run_config(action),
    }
}

async fn run_edit(args: EditArgs) -> Result<()> {
    let config = Config::load().with_env();
    if !config.has_api_key() {
        bail!(
            "No API key configured. Set QUILL_API_KEY or run `quill config set api_key <KEY>` ({})",
            Config::config_location()
        );
    }

    let document = Arc::new(FileDocument::open(&args.file)?);
    let mut request = EditRequest::new(args.instruction.trim());
    if let Some(lines) = args.lines.as_deref() {
        let text = document.text();
        request = request.with_selection(parse_line_range(lines, &text)?);
    }
    if let Some(language) = args.language {
        request = request.with_language(language);
    }

    let mut settings = config.engine_settings();
    if args.no_stream {
        settings.streaming = false;
    }
    let client = HttpModelClient::new(config.client_settings())?;
    let workspace = WorkspaceContext::new(&args.root).excluding(&args.file);
    let mut session = EditSession::new(Arc::new(client), settings)
        .with_context_provider(Arc::new(workspace));
    session.set_model_override(args.model);

    let (events, mut event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let handle: Arc<dyn DocumentHandle> = document.clone();
    let result = session.run_edit(handle, &request, &events, cancel).await;
    drop(events);
    let _ = printer.await;

    let outcome = result.map_err(|err| anyhow!(err.user_message()))?;
    report(&outcome);

    if args.dry_run {
        print!("{}", document.text());
        io::stdout().flush()?;
        session.discard_checkpoint(outcome.checkpoint_id).await?;
        return Ok(());
    }

    if args.review && !confirm("  Keep this edit? [y/N] ")? {
        session.discard_checkpoint(outcome.checkpoint_id).await?;
        eprintln!("  Edit discarded; {} unchanged.", args.file.display());
        return Ok(());
    }

    session.keep_checkpoint(outcome.checkpoint_id).await?;
    if document.is_dirty() {
        document.save()?;
        eprintln!("  + Saved {}", args.file.display());
    }
    Ok(())
}

fn run_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load().with_env();
            println!("# {}", Config::config_location());
            for key in KEYS {
                println!("{key} = {}", config.get(key).unwrap_or_default());
            }
        }
        ConfigAction::Get { key } => {
            let config = Config::load().with_env();
            let value = config
                .get(&key)
                .ok_or_else(|| anyhow!("Unknown config key '{}'", key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load();
            config.set(&key, &value)?;
            config.save()?;
            eprintln!("  + {key} saved to {}", Config::config_location());
        }
    }
    Ok(())
}

/// `START:END`, 1-based and inclusive, to a byte range covering whole lines.
fn parse_line_range(range_arg: &str, text: &str) -> Result<TextRange> {
    let (start, end) = range_arg
        .split_once(':')
        .ok_or_else(|| anyhow!("--lines expects START:END, got '{}'", range_arg))?;
    let start: usize = start.trim().parse().context("invalid start line")?;
    let end: usize = end.trim().parse().context("invalid end line")?;
    let index = LineIndex::new(text);
    let last_line = index.line_count();
    if start == 0 || end < start || start > last_line {
        bail!("--lines {} is outside the file (1-{})", range_arg, last_line);
    }
    let range = TextRange::new(index.line_start(start - 1), index.line_start(end.min(last_line)));
    if range.is_empty() {
        bail!("--lines {} selects no text", range_arg);
    }
    Ok(range)
}

fn print_event(event: &EditEvent) {
    match event {
        EditEvent::Started { mode, .. } => eprintln!("  Editing {}...", mode.label()),
        EditEvent::Progress { chars_written } => {
            eprint!("\r  {chars_written} chars written");
            let _ = io::stderr().flush();
        }
        EditEvent::Completed { summary, .. } => eprintln!("\r  Done: {}", summary.label()),
        EditEvent::Failed { message } => eprintln!("\r  Failed: {message}"),
    }
}

fn report(outcome: &EditOutcome) {
    if !outcome.complete {
        eprintln!(
            "  ! Output may be incomplete after {} rounds; review before keeping.",
            outcome.rounds
        );
    }
    if let Some(usage) = &outcome.usage {
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "token usage"
        );
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
