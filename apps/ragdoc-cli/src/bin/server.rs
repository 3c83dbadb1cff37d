use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use ragdoc_core::config::Settings;
use ragdoc_pipeline::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ragdoc_cli::init_tracing();
    let settings = Settings::load().context("loading settings")?;
    let bind: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("server.host/server.port")?;

    // Nothing is served until the first ingest has succeeded.
    let pipeline = Arc::new(Pipeline::initialize(settings).await.context("initializing pipeline")?);
    ragdoc_cli::http::serve(pipeline, bind, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
