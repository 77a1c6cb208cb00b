//! CLI command definitions for insight-worker.
//!
//! `worker` runs the consumer until Ctrl-C. The other commands are
//! operator tools over the same queue, job store and cache.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{RedisCacheStore, ResponseCache};
use crate::lint::NoopLinter;
use crate::llm::OpenRouterClient;
use crate::metrics::{export_metrics, init_metrics};
use crate::notify::NotificationHub;
use crate::pipeline::{PipelineOrchestrator, PipelineServices, PromptLibrary, WorkerConfig};
use crate::safety::PatternSafetyChecker;
use crate::scheduler::{
    JobInput, JobKind, JobStatus, Producer, RedisStreamQueue, StreamQueue, WorkerPool,
};
use crate::storage::{JobStore, PgJobStore};

/// Asynchronous analysis job worker.
#[derive(Parser)]
#[command(name = "insight-worker")]
#[command(about = "Process code review, debug and architecture jobs from a Redis stream")]
#[command(version)]
#[command(
    long_about = "insight-worker consumes analysis jobs from a Redis stream, runs them against an OpenAI-compatible reasoning service and records results in PostgreSQL.\n\nConfiguration is read from the environment (REDIS_URL, DATABASE_URL, OPENROUTER_API_KEY, INSIGHT_*).\n\nExample usage:\n  insight-worker worker --concurrency 5\n  insight-worker enqueue --user u1 --kind review --file src/app.py"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the consumer loop until interrupted.
    Worker(WorkerArgs),

    /// Create a job from a file and enqueue it.
    Enqueue(EnqueueArgs),

    /// Print stream and consumer group state as JSON.
    Queue,

    /// Print one job record as JSON.
    Job(JobArgs),

    /// List a user's jobs, newest first.
    Jobs(JobsArgs),

    /// Response cache administration.
    Cache(CacheArgs),
}

/// Arguments for `insight-worker worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Consumer name within the group (overrides INSIGHT_CONSUMER).
    #[arg(long)]
    pub consumer: Option<String>,

    /// Maximum concurrent jobs (overrides INSIGHT_CONCURRENCY).
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// YAML prompt library (overrides INSIGHT_PROMPTS_FILE).
    #[arg(long)]
    pub prompts: Option<String>,

    /// Write Prometheus metrics to stdout on shutdown.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `insight-worker enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Owning user id.
    #[arg(short, long)]
    pub user: String,

    /// Job kind (review, debug, architecture).
    #[arg(short, long, default_value = "review")]
    pub kind: String,

    /// File to analyse.
    #[arg(short, long)]
    pub file: String,

    /// Language of the file; inferred from the extension when omitted.
    #[arg(long)]
    pub language: Option<String>,

    /// File holding the error output, for debug jobs.
    #[arg(long)]
    pub error_log: Option<String>,

    /// Text around the cursor, for focused reviews.
    #[arg(long)]
    pub cursor_context: Option<String>,

    /// Repository id.
    #[arg(long)]
    pub repo_id: Option<String>,
}

/// Arguments for `insight-worker job`.
#[derive(Parser, Debug)]
pub struct JobArgs {
    /// Job id.
    pub job_id: String,
}

/// Arguments for `insight-worker jobs`.
#[derive(Parser, Debug)]
pub struct JobsArgs {
    /// Owning user id.
    #[arg(short, long)]
    pub user: String,

    /// Maximum number of jobs to list.
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Only list jobs in this status.
    #[arg(short, long)]
    pub status: Option<String>,
}

/// Arguments for `insight-worker cache`.
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

/// Cache subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum CacheSubcommand {
    /// Remove every cached response.
    Clear,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// This is a convenience function that parses CLI args and runs the command.
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;

    match cli.command {
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::Enqueue(args) => run_enqueue_command(config, args).await,
        Commands::Queue => run_queue_command(config).await,
        Commands::Job(args) => run_job_command(config, args).await,
        Commands::Jobs(args) => run_jobs_command(config, args).await,
        Commands::Cache(args) => match args.command {
            CacheSubcommand::Clear => run_cache_clear_command(config).await,
        },
    }
}

// ============================================================================
// Worker
// ============================================================================

async fn run_worker_command(mut config: WorkerConfig, args: WorkerArgs) -> anyhow::Result<()> {
    if let Some(consumer) = args.consumer {
        config = config.with_consumer(consumer);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(prompts) = args.prompts {
        config = config.with_prompts_file(prompts);
    }
    config.validate()?;

    init_metrics().map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {}", e))?;

    let prompts = match &config.prompts_file {
        Some(path) => {
            info!(path = %path.display(), "Loading prompt library");
            PromptLibrary::load(path)?
        }
        None => PromptLibrary::default(),
    };
    let safety = PatternSafetyChecker::from_settings(&prompts.security)
        .map_err(|e| anyhow::anyhow!("Invalid security pattern: {}", e))?;

    let store = connect_store(&config).await?;
    store.run_migrations().await?;

    let queue = RedisStreamQueue::connect(&config.redis_url, config.queue.clone()).await?;
    let cache = ResponseCache::new(Arc::new(RedisCacheStore::connect(&config.redis_url).await?));
    let reasoner = OpenRouterClient::new(
        config.api_key.clone().unwrap_or_default(),
        config.api_base.clone(),
        config.pipeline.model.clone(),
    )?;
    info!(
        api_key = %reasoner.api_key_masked(),
        base_url = %reasoner.base_url(),
        model = %config.pipeline.model,
        "Reasoning service configured"
    );

    let hub = NotificationHub::new();
    let mut events = hub.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(
                job_id = %event.job_id,
                user_id = %event.user_id,
                status = %event.status,
                "Job status changed"
            );
        }
    });

    let services = PipelineServices {
        reasoner: Arc::new(reasoner),
        store: Arc::new(store),
        cache: Arc::new(cache),
        notifier: Arc::new(hub.clone()),
        safety: Arc::new(safety),
        linter: Arc::new(NoopLinter),
        prompts: Arc::new(prompts),
    };
    let orchestrator = Arc::new(PipelineOrchestrator::new(config.pipeline.clone(), services));

    let mut pool = WorkerPool::new(config.pool.clone(), Arc::new(queue), Arc::clone(&orchestrator));
    pool.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, finishing in-flight jobs");

    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "Worker pool did not shut down cleanly");
    }
    event_logger.abort();

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        deferred = stats.jobs_deferred,
        dead_lettered = stats.dead_lettered,
        "Worker stopped"
    );

    if args.print_metrics {
        println!("{}", export_metrics());
    }

    Ok(())
}

// ============================================================================
// Operator commands
// ============================================================================

async fn run_enqueue_command(config: WorkerConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let kind: JobKind = args.kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let content = std::fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.file, e))?;
    let language = args
        .language
        .unwrap_or_else(|| language_for_path(&args.file).to_string());

    let mut input = JobInput::new(language, &args.file, content);
    if let Some(path) = &args.error_log {
        let log = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
        input = input.with_error_log(log);
    }
    if let Some(context) = args.cursor_context {
        input = input.with_cursor_context(context);
    }
    if let Some(repo_id) = args.repo_id {
        input = input.with_repo_id(repo_id);
    }

    let store = connect_store(&config).await?;
    store.run_migrations().await?;
    let queue = RedisStreamQueue::connect(&config.redis_url, config.queue.clone()).await?;

    let producer = Producer::new(Arc::new(queue), Arc::new(store));
    let job = producer.submit(args.user, kind, input).await?;

    print_json(&serde_json::json!({
        "job_id": job.job_id,
        "status": job.status,
        "type": job.kind,
    }))
}

async fn run_queue_command(config: WorkerConfig) -> anyhow::Result<()> {
    let queue = RedisStreamQueue::connect(&config.redis_url, config.queue.clone()).await?;
    let info = queue.inspect().await?;
    print_json(&info)
}

async fn run_job_command(config: WorkerConfig, args: JobArgs) -> anyhow::Result<()> {
    let store = connect_store(&config).await?;
    match store.get(&args.job_id).await? {
        Some(job) => print_json(&job),
        None => Err(anyhow::anyhow!("Job not found: {}", args.job_id)),
    }
}

async fn run_jobs_command(config: WorkerConfig, args: JobsArgs) -> anyhow::Result<()> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let store = connect_store(&config).await?;
    let jobs = store.list_by_user(&args.user, args.limit, status).await?;
    print_json(&jobs)
}

async fn run_cache_clear_command(config: WorkerConfig) -> anyhow::Result<()> {
    let cache = ResponseCache::new(Arc::new(RedisCacheStore::connect(&config.redis_url).await?));
    let removed = cache.evict_all().await?;
    print_json(&serde_json::json!({ "removed": removed }))
}

// ============================================================================
// Helpers
// ============================================================================

async fn connect_store(config: &WorkerConfig) -> anyhow::Result<PgJobStore> {
    let url = config.require_database_url()?;
    Ok(PgJobStore::connect(url).await?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Guesses the language of a file from its extension.
fn language_for_path(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match extension.as_str() {
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "md" => "markdown",
        _ => "text",
    }
}
