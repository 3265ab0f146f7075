use anyhow::Context;
use capture::ReplaySource;
use clap::Parser;
use dwellcore::detection::ModelInfo;
use dwellcore::recorder::{MemorySink, RecordSink, RestSink, SqliteSink};
use dwellcore::telemetry::PipelineMetrics;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use viewer_bridge::bridge::spawn_server;
use viewer_bridge::hub::ViewerHub;
use viewer_bridge::model::StatusBoard;
use workflow::config::{CliOverrides, RelayConfig, SinkKind};
use workflow::pipeline::Pipeline;

mod capture;
mod viewer_bridge;
mod workflow;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Records sustained object presence and streams detections to viewers"
)]
struct Args {
    /// Model metadata file (JSON) describing the deployed classifier
    model: PathBuf,
    /// Load relay settings from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address for the viewer and ingest HTTP server
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Base URL of the REST event store
    #[arg(long, env = "SINK_URL")]
    sink_url: Option<String>,
    /// API key for the REST event store
    #[arg(long, env = "SINK_KEY", hide_env_values = true)]
    sink_key: Option<String>,
    /// Record into a local SQLite database instead of the REST store
    #[arg(long)]
    sqlite: Option<PathBuf>,
    /// Replay a JSON-lines capture instead of waiting for pushed frames
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Keep records in memory only
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = if let Some(path) = &args.config {
        RelayConfig::load(path)?
    } else {
        RelayConfig::default()
    };
    config.apply(CliOverrides {
        bind: args.bind,
        sink_url: args.sink_url,
        sink_key: args.sink_key,
        sqlite: args.sqlite,
        dry_run: args.dry_run,
    });
    config.validate()?;

    let model = ModelInfo::load(&args.model).context("loading model metadata")?;
    for label in &config.dwell.tracked_labels {
        if !model.knows_label(label) {
            warn!(
                "tracked label {} is not produced by model {}",
                label, model.project_name
            );
        }
    }

    let replay = args.replay.map(ReplaySource::open).transpose()?;
    if let Some(source) = &replay {
        info!("loaded {} replay frame(s)", source.frame_count());
    }

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating runtime")?;
    runtime.block_on(start(config, model, replay))
}

async fn start(
    config: RelayConfig,
    model: ModelInfo,
    replay: Option<ReplaySource>,
) -> anyhow::Result<()> {
    match config.sink.kind {
        SinkKind::Rest => {
            let sink = RestSink::new(&config.rest_config()?)?;
            serve(config, model, replay, sink).await
        }
        SinkKind::Sqlite => {
            let path = config
                .sink
                .path
                .clone()
                .context("sqlite sink requires a database path")?;
            let sink = SqliteSink::open(&path)?;
            serve(config, model, replay, sink).await
        }
        SinkKind::Memory => serve(config, model, replay, MemorySink::new()).await,
    }
}

async fn serve<S: RecordSink>(
    config: RelayConfig,
    model: ModelInfo,
    replay: Option<ReplaySource>,
    sink: S,
) -> anyhow::Result<()> {
    info!(
        "relaying {} into {}",
        model.project_name,
        sink.describe()
    );
    let metrics = Arc::new(PipelineMetrics::new());
    let hub = ViewerHub::new(config.channel_capacity, &model, metrics.clone());
    let status = Arc::new(StatusBoard::new(metrics.clone(), sink.describe()));
    let (frames_tx, frames_rx) = mpsc::channel(config.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = Pipeline::new(
        &config.dwell,
        sink,
        hub.clone(),
        metrics.clone(),
        status.clone(),
    );
    let pipeline_task = tokio::spawn(pipeline.run(frames_rx, shutdown_rx.clone()));

    let (addr, server_task) = spawn_server(
        hub.clone(),
        frames_tx.clone(),
        status,
        config.bind,
        shutdown_rx,
    )?;
    info!("viewer bridge listening on http://{} (Ctrl+C to stop)", addr);

    let replay_task = replay.map(|source| tokio::spawn(source.run(hub.clone(), frames_tx.clone())));
    drop(frames_tx);

    signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(task) = replay_task {
        task.abort();
    }
    server_task.await.context("joining viewer bridge")?;
    pipeline_task.await.context("joining pipeline")?;
    Ok(())
}
