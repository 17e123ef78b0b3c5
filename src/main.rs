use anyhow::{Context, Result};
use clap::Parser;
use lucidia_realtime::generation::{ChatCompletionsPromptBuilder, HttpJobSubmitter, HttpStatusFetcher};
use lucidia_realtime::transport::{LoopbackBackend, RealtimeBackend};
use lucidia_realtime::{
    create_router, AppState, Collaborators, Config, OrchestratorConfig, SessionMinter,
    SessionOrchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lucidia-realtime")]
#[command(about = "Voice conversation and dream generation service")]
struct Args {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/lucidia")]
    config: String,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    if cfg.openai.api_key.is_none() {
        cfg.openai.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Lucidia Realtime v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    if cfg.openai.api_key.is_none() {
        warn!("No OpenAI API key configured; credential minting and prompt derivation will fail");
    }

    // No platform media stack is linked in; the loopback agent is the only runnable backend
    let backend: Arc<dyn RealtimeBackend> = Arc::new(LoopbackBackend::default());
    let timeout = cfg.service.request_timeout();
    let signaling = cfg
        .realtime
        .signaling_for(backend.as_ref(), timeout)
        .context("Unsupported realtime transport")?;
    info!("Using {:?} transport with the {} backend", cfg.realtime.transport, backend.name());

    let collaborators = Collaborators {
        backend,
        signaling,
        prompts: Arc::new(
            ChatCompletionsPromptBuilder::new(
                cfg.openai.api_base.clone(),
                cfg.openai.api_key.clone(),
                cfg.generation.prompt_model.clone(),
                cfg.generation.prompt_instructions.clone(),
            )
            .with_timeout(timeout),
        ),
        jobs: Arc::new(HttpJobSubmitter::new(cfg.generation.job_url.clone()).with_timeout(timeout)),
        status: Arc::new(HttpStatusFetcher::new().with_timeout(timeout)),
    };

    let orchestrator =
        SessionOrchestrator::new(OrchestratorConfig::from_config(&cfg), collaborators);
    let minter = SessionMinter::new(&cfg.openai).with_timeout(timeout);
    let state = AppState::new(orchestrator.clone(), minter);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    orchestrator.shutdown().await;
    Ok(())
}
