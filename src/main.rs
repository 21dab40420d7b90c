use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scribe_core::config::AppConfig;
use scribe_core::event::EventBus;
use scribe_core::traits::GenerationWorker;
use scribe_core::types::{ContentRequest, PipelineEvent};

use scribe_agent::{ArtifactWriter, ContentPipeline, StageContext};
use scribe_memory::{HttpEmbeddingProvider, SqliteVectorStore};

#[derive(Parser)]
#[command(name = "scribe", version, about = "Multi-stage content generation pipeline")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "scribe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one content request
    Run {
        /// Caller setting passed to the planner (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_setting)]
        settings: Vec<(String, serde_json::Value)>,
        /// Print the final output as JSON
        #[arg(long)]
        json: bool,
        /// Do not write artifacts to the output directory
        #[arg(long)]
        no_save: bool,
        /// The content request (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        request: Vec<String>,
    },
    /// Chunk, embed and store files in a collection (research, style, seo)
    Ingest {
        collection: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show current configuration
    Config,
}

/// `key=value`; the value is parsed as JSON when it can be, else kept as a string.
fn parse_setting(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("setting key is empty".to_string());
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scribe=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file found, using defaults");
    }

    match cli.command {
        Commands::Config => {
            let mut shown = config.clone();
            if shown.model.api_key.is_some() {
                shown.model.api_key = Some("***".to_string());
            }
            if let Some(embedding) = shown.retrieval.embedding.as_mut() {
                if embedding.api_key.is_some() {
                    embedding.api_key = Some("***".to_string());
                }
            }
            println!("{}", toml::to_string_pretty(&shown)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ingest { collection, files } => {
            let store = open_store(&config)?;
            let mut total = 0;
            for file in &files {
                let text = tokio::fs::read_to_string(file).await?;
                let source = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string());
                let n = store
                    .ingest_text(
                        &collection,
                        &source,
                        &text,
                        config.retrieval.chunk_size,
                        config.retrieval.chunk_overlap,
                    )
                    .await?;
                println!("{}: {} chunks", file.display(), n);
                total += n;
            }
            println!(
                "Ingested {} chunks into '{}' ({} total)",
                total,
                collection,
                store.count(&collection)?
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            settings,
            json,
            no_save,
            request,
        } => {
            let text = if request.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                request.join(" ")
            };
            if text.trim().is_empty() {
                anyhow::bail!("Content request is empty");
            }

            let mut content_request = ContentRequest::new(text.trim());
            for (key, value) in settings {
                content_request = content_request.with_setting(key, value);
            }

            run(&config, content_request, json, no_save).await
        }
    }
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteVectorStore>> {
    let embedding = config.retrieval.embedding.clone().unwrap_or_default();
    let fallback_key = std::env::var("OPENAI_API_KEY").ok();
    let embedder = Arc::new(HttpEmbeddingProvider::from_config(
        &embedding,
        fallback_key.as_deref(),
    )?);
    Ok(Arc::new(SqliteVectorStore::open(&config.db_path(), embedder)?))
}

async fn run(
    config: &AppConfig,
    request: ContentRequest,
    json: bool,
    no_save: bool,
) -> anyhow::Result<ExitCode> {
    if config.model.api_key.is_none() && config.model.base_url.is_none() {
        warn!(
            env = config.model.api_key_env(),
            "No API key configured; generation calls will fail and stages will fall back"
        );
    }

    let worker: Arc<dyn GenerationWorker> = Arc::from(scribe_llm::create_worker(&config.model)?);
    let store = open_store(config)?;
    let context = StageContext::new(worker, store)
        .with_tuning(config.stages.clone())
        .with_retrieval(config.retrieval.clone());

    let event_bus = Arc::new(EventBus::default());
    let progress = tokio::spawn(print_progress(event_bus.subscribe()));

    let pipeline = ContentPipeline::new(context, &config.pipeline).with_event_bus(event_bus);
    let result = pipeline.run(request).await;
    drop(pipeline);
    finish_progress(progress).await;

    if !no_save {
        let writer = ArtifactWriter::new(config.output_dir());
        let files = writer.write(&result.state).await?;
        for path in &files {
            eprintln!("saved {}", path.display());
        }
    }

    let output = result.state.output();
    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&output, &config.output_dir());
    }

    Ok(if result.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Wait for the progress printer; a panic in it is logged, not swallowed.
async fn finish_progress(handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Progress printer task failed");
            false
        }
    }
}

async fn print_progress(mut rx: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::StageStarted { stage, visit }) => {
                if visit > 1 {
                    eprintln!("▸ {} (attempt {})", stage, visit);
                } else {
                    eprintln!("▸ {}", stage);
                }
            }
            Ok(PipelineEvent::StageFinished {
                stage,
                elapsed_ms,
                errors_added,
            }) => {
                if errors_added > 0 {
                    eprintln!("  {} finished in {}ms with {} error(s)", stage, elapsed_ms, errors_added);
                } else {
                    eprintln!("  {} finished in {}ms", stage, elapsed_ms);
                }
            }
            Ok(PipelineEvent::Routed { from, route, to }) => {
                eprintln!("  {} → {} ({})", from, to, route);
            }
            Ok(PipelineEvent::RunComplete { stages_run, errors, .. }) => {
                eprintln!("done: {} stage run(s), {} error(s)", stages_run, errors);
                break;
            }
            Ok(PipelineEvent::RunStarted { run_id }) => {
                eprintln!("run {}", run_id);
            }
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "Progress printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(output: &scribe_core::PipelineOutput, output_dir: &Path) {
    if let Some(seo) = &output.seo_metadata {
        println!("Title:       {}", seo.title);
        println!("Description: {}", seo.meta_description);
        println!("Slug:        {}", seo.url_slug);
        println!("Confidence:  {:.2}", seo.confidence);
        println!();
    }
    match &output.final_content {
        Some(content) => println!("{}", content),
        None => println!("(no final content produced; partial artifacts in {})", output_dir.display()),
    }
    if !output.errors.is_empty() {
        eprintln!();
        eprintln!("Errors:");
        for error in &output.errors {
            eprintln!("  - {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting() {
        assert_eq!(
            parse_setting("tone=playful").unwrap(),
            ("tone".to_string(), serde_json::json!("playful"))
        );
        assert_eq!(
            parse_setting("word_count=800").unwrap(),
            ("word_count".to_string(), serde_json::json!(800))
        );
        assert_eq!(
            parse_setting("note=a=b").unwrap(),
            ("note".to_string(), serde_json::json!("a=b"))
        );
        assert!(parse_setting("missing").is_err());
        assert!(parse_setting("=x").is_err());
    }

    #[tokio::test]
    async fn test_progress_task_failure_is_reported() {
        assert!(finish_progress(tokio::spawn(async {})).await);
        let crashed = tokio::spawn(async { panic!("printer crashed") });
        assert!(!finish_progress(crashed).await);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "scribe", "run", "--set", "tone=dry", "--json", "Write", "about", "tea",
        ]);
        match cli.command {
            Commands::Run {
                settings,
                json,
                no_save,
                request,
            } => {
                assert_eq!(settings.len(), 1);
                assert!(json);
                assert!(!no_save);
                assert_eq!(request.join(" "), "Write about tea");
            }
            _ => panic!("expected run"),
        }
    }
}
