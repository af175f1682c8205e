use clap::Parser;
use tyrpc::{Server, ServerConfig};
use tyrpc_demo::chat_router;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,

    /// JSON config file.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> tyrpc::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    let router = chat_router();
    let server = Server::create(router, &config)?;
    let addr = server.listen(args.addr).await?;
    tracing::info!(
        "Serving {:?} and {:?} on {addr}...",
        server.router().request_names().collect::<Vec<_>>(),
        server.router().subscription_names().collect::<Vec<_>>(),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("wait for ctrl-c failed: {e}");
    }
    server.stop();
    server.join().await;
    Ok(())
}
