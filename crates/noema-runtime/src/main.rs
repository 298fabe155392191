//! Composition root for the Noema reasoning engine.
//!
//! Resolves configuration (CLI flags over an optional TOML file over
//! built-in defaults), initializes structured logging, wires every
//! `noema-core` collaborator to its in-memory reference implementation,
//! and either serves the HTTP surface or runs a single reasoning query
//! and exits.

mod http;
mod reference;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use noema_core::{
    BackgroundTrainer, CausalHypergraph, EngineConfig, GnnEnhancer, LearnerHandle, Mode,
    ReasoningOrchestrator, ReasoningRequest, TrainingHistory, TrajectoryTracker,
};
use tracing_subscriber::EnvFilter;

use reference::{
    HashEmbedder, HypergraphAsGraphStore, InMemoryKV, InMemoryOnlineLearner, InMemoryPatternStore,
    InMemoryVectorIndex, TracingActivityStream,
};

#[derive(Debug, Parser)]
#[command(name = "noema", version, about = "Self-improving reasoning engine")]
struct Cli {
    /// Path to a TOML config file overriding the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for durable state (training history). Defaults to the
    /// platform data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit JSON logs instead of the default human-readable format.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP surface (reason/provide_feedback/get_trajectory/train).
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8099)]
        port: u16,
    },
    /// Run one reasoning query against an empty in-memory engine and print
    /// the response as JSON. Useful for smoke-testing a config file.
    Reason {
        /// Free text to embed with the built-in reference embedder.
        text: String,
        #[arg(long)]
        mode: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
            let config: EngineConfig = toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        directories::ProjectDirs::from("dev", "noema", "noema")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

struct Engine {
    orchestrator: Arc<ReasoningOrchestrator>,
    tracker: Arc<TrajectoryTracker>,
    embedder: Arc<HashEmbedder>,
    background_trainer: Arc<BackgroundTrainer>,
    history: Arc<TrainingHistory>,
    config: EngineConfig,
}

fn build_engine(config: EngineConfig, history: TrainingHistory) -> Engine {
    let hypergraph = Arc::new(CausalHypergraph::new());
    let vector_index: Arc<InMemoryVectorIndex> = Arc::new(InMemoryVectorIndex::new());
    let pattern_store: Arc<InMemoryPatternStore> = Arc::new(InMemoryPatternStore::new());
    let gnn = Arc::new(GnnEnhancer::new(config.gnn.num_layers));
    let kv = Arc::new(InMemoryKV::new());
    let learner_impl = Arc::new(InMemoryOnlineLearner::new());
    let learner = LearnerHandle::unbound();
    learner.bind(learner_impl);

    let tracker = Arc::new(TrajectoryTracker::new(
        config.trajectory.clone(),
        learner,
        hypergraph.clone(),
        Some(kv.clone()),
    ));

    let orchestrator = Arc::new(ReasoningOrchestrator::new(
        config.orchestrator.clone(),
        hypergraph.clone(),
        vector_index.clone(),
        pattern_store.clone(),
        gnn.clone(),
        tracker.clone(),
    ));

    // Exercised by the advanced modes (temporal/activity), not by the core
    // reasoning path above — kept alive for parity with SPEC_FULL.md §6.
    let _graph_store = Arc::new(HypergraphAsGraphStore::new(hypergraph.clone()));
    let _activity_stream = Arc::new(TracingActivityStream);

    Engine {
        orchestrator,
        tracker,
        embedder: Arc::new(HashEmbedder),
        background_trainer: Arc::new(BackgroundTrainer::new(config.training.clone())),
        history: Arc::new(history),
        config,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.config.as_ref())?;
    let data_dir = resolve_data_dir(cli.data_dir);

    let history = if data_dir == PathBuf::from(".") {
        TrainingHistory::in_memory()?
    } else {
        std::fs::create_dir_all(&data_dir)?;
        TrainingHistory::open(data_dir.join("training_history.sqlite3"))?
    };

    let engine = build_engine(config, history);

    match cli.command.unwrap_or(Command::Serve {
        host: "127.0.0.1".to_string(),
        port: 8099,
    }) {
        Command::Serve { host, port } => serve(engine, &host, port).await,
        Command::Reason { text, mode } => run_reason(engine, &text, mode).await,
    }
}

async fn serve(engine: Engine, host: &str, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(http::AppState {
        orchestrator: engine.orchestrator,
        tracker: engine.tracker,
        embedder: engine.embedder,
        background_trainer: engine.background_trainer,
        history: engine.history,
        training_dim: noema_core::D,
        training_layers: engine.config.gnn.num_layers,
    });
    let app = http::router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "noema runtime listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_reason(engine: Engine, text: &str, mode: Option<String>) -> anyhow::Result<()> {
    use noema_core::Embedder;

    let query_embedding = engine.embedder.embed(text).await?;
    let mode = match mode.as_deref() {
        Some("pattern") => Some(Mode::Pattern),
        Some("causal") => Some(Mode::Causal),
        Some("contextual") => Some(Mode::Contextual),
        Some("hybrid") | None => None,
        Some(other) => anyhow::bail!("unknown mode: {other}"),
    };

    let request = ReasoningRequest {
        query_embedding,
        mode,
        max_results: None,
        confidence_threshold: None,
        min_l_score: None,
        enhance_with_gnn: None,
        task_type: None,
    };

    let response = engine.orchestrator.reason(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
