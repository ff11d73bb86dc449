use anyhow::Result;
use chain_core::Ledger;
use chain_node::routes::{self, AppState};
use clap::Parser;
use std::net::SocketAddr;
use tracing::{info, Level};

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Public base URL peers use to reach this node; defaults to
    /// http://<listen>
    #[arg(long)]
    node_url: Option<String>,

    /// Peer base URL to register at startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let node_url = args
        .node_url
        .unwrap_or_else(|| format!("http://{}", args.listen));

    let mut ledger = Ledger::new(node_url.clone());
    for peer in &args.peers {
        ledger.register_peer(peer);
    }

    let app = routes::router(AppState::new(ledger));

    let addr: SocketAddr = args.listen.parse()?;
    info!("chain-node listening on http://{addr} (advertised as {node_url})");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
