use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::io::stdio;

use args::Args;
use config::Config;
use proxy::ProxyServer;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_level);

    let config = Config::load(&args.config)?;
    let server = ProxyServer::new(config);

    server.initialize_upstreams().await;

    log::info!("rlm-proxy serving on stdio");

    let service = server.clone().serve(stdio()).await?;
    service.waiting().await?;

    server.shutdown().await;

    Ok(())
}
