use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inkframe_contracts::{parse_prompt_list, ComicError};
use inkframe_engine::config::default_storage_root;
use inkframe_engine::{ArtifactStore, ComicPipeline, PipelineConfig, PromptGenerator, StoryBrief};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "INKFRAME_LOG";
const EXIT_NOT_FOUND: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "inkframe", version, about = "Comic panel generation and assembly")]
struct Cli {
    /// Emit diagnostics as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask the language model for a panel list and print it as JSON.
    Prompts(PromptsArgs),
    /// Render a panel list into a comic bundle.
    Generate(GenerateArgs),
    /// Resolve a finished deliverable by file name.
    Fetch(FetchArgs),
    /// Remove request scopes older than a given age.
    Sweep(SweepArgs),
}

#[derive(Debug, Parser)]
struct PromptsArgs {
    #[arg(long)]
    genre: String,
    #[arg(long)]
    setting: String,
    #[arg(long)]
    characters: String,
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// JSON panel list: an array of {description, dialogue} objects.
    #[arg(long)]
    prompts: PathBuf,
    #[arg(long)]
    engine: Option<String>,
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    storage_root: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Stay alive until the scheduled cleanup has removed the working directory.
    #[arg(long)]
    hold: bool,
}

#[derive(Debug, Parser)]
struct FetchArgs {
    name: String,
    #[arg(long)]
    storage_root: Option<PathBuf>,
    /// Copy the deliverable here instead of printing its path.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SweepArgs {
    #[arg(long, default_value_t = 3600)]
    older_than_secs: u64,
    #[arg(long)]
    storage_root: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("inkframe error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    match cli.command {
        Command::Prompts(args) => {
            run_prompts(args)?;
            Ok(0)
        }
        Command::Generate(args) => {
            run_generate(args)?;
            Ok(0)
        }
        Command::Fetch(args) => run_fetch(args),
        Command::Sweep(args) => {
            run_sweep(args)?;
            Ok(0)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("inkframe: tracing already initialized: {err}");
    }
}

/// Environment lookup with CLI flags taking precedence.
fn resolve_config(overrides: &[(&str, Option<String>)]) -> Result<PipelineConfig, ComicError> {
    PipelineConfig::from_lookup(|key| {
        overrides
            .iter()
            .find(|(name, _)| *name == key)
            .and_then(|(_, value)| value.clone())
            .or_else(|| std::env::var(key).ok())
    })
}

fn storage_root(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| {
        std::env::var("COMIC_STORAGE_ROOT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    })
    .unwrap_or_else(default_storage_root)
}

fn run_prompts(args: PromptsArgs) -> Result<()> {
    // Prompt generation never renders; an unset engine defaults to placeholder.
    let engine = std::env::var("RENDERING_ENGINE").unwrap_or_else(|_| "placeholder".to_string());
    let config = resolve_config(&[
        ("RENDERING_ENGINE", Some(engine)),
        ("COMIC_PANEL_MODE", args.mode),
    ])?;
    let generator = PromptGenerator::from_config(&config)?;
    let brief = StoryBrief {
        genre: args.genre,
        setting: args.setting,
        characters: args.characters,
    };
    let prompts = generator.generate(&brief, config.mode)?;
    let rendered = serde_json::to_string_pretty(&prompts)?;
    match args.out {
        Some(path) => {
            fs::write(&path, format!("{rendered}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(
                path = %path.display(),
                panels = prompts.len(),
                "panel list written"
            );
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.prompts)
        .with_context(|| format!("failed to read {}", args.prompts.display()))?;
    let prompts = parse_prompt_list(&raw)?;
    let config = resolve_config(&[
        ("RENDERING_ENGINE", args.engine),
        ("COMIC_PANEL_MODE", args.mode),
        (
            "COMIC_STORAGE_ROOT",
            args.storage_root.map(|path| path.display().to_string()),
        ),
    ])?;
    let cleanup_delay = config.cleanup_delay;

    let mut pipeline = ComicPipeline::new(config)?;
    if let Some(events) = args.events {
        pipeline = pipeline.with_events_path(events);
    }
    let run = pipeline.generate(prompts)?;

    let summary = json!({
        "request_id": run.request_id,
        "working_dir": run.working_dir.display().to_string(),
        "archive": run.bundle.archive_path.display().to_string(),
        "document": run.bundle.document_path.display().to_string(),
        "document_degraded": run.bundle.document_degraded,
        "fallback_panels": run.fallback_count(),
        "panels": run.results,
        "cleanup_after_s": cleanup_delay.as_secs(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if args.hold {
        if let Some(handle) = run.cleanup {
            info!(
                delay_s = cleanup_delay.as_secs(),
                "holding until cleanup completes"
            );
            if handle.join().is_err() {
                anyhow::bail!("cleanup thread panicked");
            }
        }
    }
    Ok(())
}

fn run_fetch(args: FetchArgs) -> Result<i32> {
    let store = ArtifactStore::new(storage_root(args.storage_root));
    let path = match store.find(&args.name) {
        Ok(path) => path,
        Err(ComicError::NotFound(name)) => {
            eprintln!("inkframe: no deliverable named '{name}'");
            return Ok(EXIT_NOT_FOUND);
        }
        Err(err) => return Err(err.into()),
    };
    match args.out {
        Some(out) => {
            fs::copy(&path, &out).with_context(|| {
                format!("failed to copy {} to {}", path.display(), out.display())
            })?;
            println!("{}", out.display());
        }
        None => println!("{}", path.display()),
    }
    Ok(0)
}

fn run_sweep(args: SweepArgs) -> Result<()> {
    let store = ArtifactStore::new(storage_root(args.storage_root));
    let removed = store.sweep_expired(Duration::from_secs(args.older_than_secs))?;
    for path in &removed {
        println!("{}", path.display());
    }
    info!(
        removed = removed.len(),
        root = %store.root().display(),
        "sweep finished"
    );
    Ok(())
}
