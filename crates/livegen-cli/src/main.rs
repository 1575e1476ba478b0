//! `livegen`: validate, guard and replay code generations from a terminal.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use livegen_core::guard::check_suspicious;
use livegen_core::{
    Artifact, FailureKind, GuardrailEngine, PipelineConfig, Validator, init_observability,
    unwrap_envelope,
};
use livegen_stream::prelude::*;
use livegen_stream::vendors::http::HttpSource;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const CLI_PROJECT: &str = "cli";

#[derive(Parser)]
#[command(name = "livegen")]
#[command(about = "Consume, validate and guard streamed code generations", long_about = None)]
struct Cli {
    /// Pipeline config (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the structural validator over a source file or a files envelope
    Validate { file: PathBuf },
    /// Compare two versions through the rewrite guards
    Guard {
        #[arg(long)]
        old: PathBuf,
        #[arg(long)]
        new: PathBuf,
        #[arg(long)]
        instruction: String,
        /// Producer confidence, 0-100
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// Replay a recorded stream through the pipeline
    Replay {
        stream: PathBuf,
        #[arg(long)]
        baseline: Option<PathBuf>,
        #[arg(long, default_value = "replay recorded stream")]
        instruction: String,
        #[arg(long, default_value_t = 64)]
        chunk_size: usize,
    },
    /// Run one generation against the HTTP producer (LIVEGEN_ENDPOINT)
    Fetch {
        #[arg(long)]
        instruction: String,
        #[arg(long)]
        baseline: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

/// Ok(false) means the command ran but the result was negative.
async fn run(cli: Cli) -> CliResult<bool> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Validate { file } => validate_file(&file, &config),
        Commands::Guard {
            old,
            new,
            instruction,
            confidence,
        } => guard_files(&old, &new, &instruction, confidence, &config),
        Commands::Replay {
            stream,
            baseline,
            instruction,
            chunk_size,
        } => {
            let text = std::fs::read_to_string(&stream)?;
            let source = Arc::new(ReplaySource::from_text(&text, chunk_size));
            run_pipeline(source, config, baseline.as_deref(), &instruction).await
        }
        Commands::Fetch {
            instruction,
            baseline,
        } => {
            let source = Arc::new(HttpSource::from_env()?);
            run_pipeline(source, config, baseline.as_deref(), &instruction).await
        }
    }
}

fn load_config(path: Option<&Path>) -> CliResult<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// A files envelope (`{"files": {...}}`) or a plain single source.
fn load_artifact(path: &Path) -> CliResult<Artifact> {
    let text = std::fs::read_to_string(path)?;
    Ok(unwrap_envelope(&text).unwrap_or_else(|| Artifact::single(text)))
}

fn validate_file(path: &Path, config: &PipelineConfig) -> CliResult<bool> {
    let artifact = load_artifact(path)?;
    let result = Validator::with_layout_policy(config.layout_policy).validate_artifact(&artifact);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.valid)
}

fn guard_files(
    old: &Path,
    new: &Path,
    instruction: &str,
    confidence: Option<f64>,
    config: &PipelineConfig,
) -> CliResult<bool> {
    let old = std::fs::read_to_string(old)?;
    let new = std::fs::read_to_string(new)?;
    let engine = GuardrailEngine::new(config.guard.clone());
    let decision = engine.safe_apply(&old, &new, instruction, confidence);

    match decision.profile {
        None => println!("guards bypassed: baseline shorter than {} chars", config.guard.activation_chars),
        Some(profile) => println!("profile: {profile:?}"),
    }
    for result in &decision.results {
        let mark = if result.passed { "pass" } else { "FAIL" };
        println!("[{mark}] {}: {}", result.guard, result.message);
    }
    if !decision.accepted {
        println!("rejected: {}", decision.rejection_message());
        return Ok(false);
    }
    if !decision.bypassed()
        && let Some(message) = check_suspicious(&old, &new)
    {
        println!("suspicious: {message}");
        return Ok(false);
    }
    println!("accepted");
    Ok(true)
}

async fn run_pipeline(
    source: Arc<dyn GenerationSource>,
    config: PipelineConfig,
    baseline: Option<&Path>,
    instruction: &str,
) -> CliResult<bool> {
    let baseline = baseline.map(load_artifact).transpose()?;
    let pipeline = Pipeline::builder()
        .source(source)
        .collaborators(Arc::new(ConsoleCollaborators))
        .config(config)
        .build()?;
    pipeline.open_project(CLI_PROJECT, baseline);

    let run = pipeline.start(instruction).await?;
    let abort = run.abort_handle();
    let finish = run.finish();
    tokio::pin!(finish);
    let outcome = tokio::select! {
        outcome = &mut finish => outcome?,
        _ = tokio::signal::ctrl_c() => {
            abort.abort();
            finish.await?
        }
    };
    Ok(report(&outcome))
}

fn report(outcome: &SessionOutcome) -> bool {
    match outcome {
        SessionOutcome::Applied {
            artifact, summary, ..
        } => {
            if let Some(summary) = summary {
                eprintln!("summary: {summary}");
            }
            println!("{}", artifact.combined_source());
            true
        }
        SessionOutcome::Chat { text } => {
            println!("{text}");
            true
        }
        SessionOutcome::Plan { items } => {
            for (i, item) in items.iter().enumerate() {
                println!("{}. {item}", i + 1);
            }
            true
        }
        SessionOutcome::Rejected { failure } => {
            eprintln!("rejected ({}): {}", failure.kind, failure.message);
            false
        }
        SessionOutcome::Aborted | SessionOutcome::Superseded => {
            eprintln!("{}", outcome.label());
            false
        }
    }
}

/// Prints notifications to stderr; results go to stdout.
struct ConsoleCollaborators;

#[async_trait::async_trait]
impl Collaborators for ConsoleCollaborators {
    async fn persist_artifact(&self, project: &ProjectId, artifact: &Artifact, attribution_id: uuid::Uuid) {
        tracing::info!(project = %project, artifact = %artifact, attribution_id = %attribution_id, "artifact accepted");
    }

    async fn append_history_entry(
        &self,
        _project: &ProjectId,
        _role: HistoryRole,
        _text: &str,
        _artifact: Option<&Artifact>,
    ) {
    }

    async fn notify_phase(&self, phase: &str) {
        eprintln!("· {phase}");
    }

    async fn notify_preview(&self, artifact: &Artifact) {
        eprintln!("· preview {artifact}");
    }

    async fn notify_error(&self, kind: FailureKind, message: &str) {
        eprintln!("· error {kind}: {message}");
    }

    async fn notify_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Confidence { score, .. } => eprintln!("· confidence {score}"),
            StreamEvent::Suggestions { suggestions } => {
                for suggestion in suggestions {
                    eprintln!("· suggestion: {}", suggestion.label);
                }
            }
            StreamEvent::Questions { questions, .. } => {
                for question in questions {
                    eprintln!("· question: {}", question.label);
                }
            }
            _ => {}
        }
    }
}
