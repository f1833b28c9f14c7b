use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use llama_engine::{ContextParams, LoadOptions};
use llama_runtime::MockEngine;
use llama_server::{run_server, AppState, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "llama-server", version, about = "llama.rs model server")]
struct Cli {
    #[arg(long, env = "LLAMA_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "LLAMA_PORT", default_value_t = 50051)]
    port: u16,

    /// Layers to offload to the GPU.
    #[arg(long, env = "LLAMA_NGPU", default_value_t = 99)]
    ngpu: i32,

    /// Map model files instead of reading them.
    #[arg(long, env = "LLAMA_MMAP")]
    mmap: bool,

    #[arg(long, env = "LLAMA_CTX_SIZE", default_value_t = 4096)]
    ctx_size: usize,

    #[arg(long, env = "LLAMA_BATCH_SIZE", default_value_t = 2048)]
    batch_size: usize,

    #[arg(long, env = "LLAMA_SHUTDOWN_TIMEOUT_SECS", default_value_t = 25)]
    shutdown_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("llama_server=info,llama_runtime=info")),
        )
        .init();

    let cli = Cli::parse();

    let engine = MockEngine::new(
        LoadOptions::default()
            .with_n_gpu_layers(cli.ngpu)
            .with_mmap(cli.mmap),
    );
    let config = ServerConfig::default()
        .with_context(
            ContextParams::default()
                .with_n_ctx(cli.ctx_size)
                .with_n_batch(cli.batch_size),
        )
        .with_shutdown_timeout(Duration::from_secs(cli.shutdown_timeout_secs));
    let state = AppState::new(engine, config);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    tracing::info!(%addr, ngpu = cli.ngpu, mmap = cli.mmap, "starting llama-server");
    run_server(state, addr, shutdown).await
}

#[cfg(unix)]
async fn cancel_on_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM, using ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
    }
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn cancel_on_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c");
    shutdown.cancel();
}
