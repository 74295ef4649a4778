use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use bentorun::config::Options;
use bentorun::registry::Registry;
use bentorun::server::Server;
use bentorun::store::FsFunctionStore;
use clap::Parser;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Options::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&opts.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    opts.setup().context("failed to create working directories")?;
    opts.log_config();

    let store = Arc::new(FsFunctionStore::new(opts.functions_dir()?));
    let registry = Arc::new(Registry::new(opts.launcher().context("invalid function command")?));

    let server = Server::bind(opts.addr(), registry, store)
        .await
        .with_context(|| format!("failed to bind {}", opts.addr()))?;
    info!("bento server running at {}", server.local_addr()?);

    server
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
