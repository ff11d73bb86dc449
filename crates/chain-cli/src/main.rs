use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chain-cli")]
#[command(about = "CLI client for the proof-of-work ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a transaction and broadcast it to the network
    Submit {
        /// Sender address
        #[arg(long)]
        sender: String,
        /// Recipient address
        #[arg(long)]
        recipient: String,
        /// Amount
        #[arg(long)]
        amount: u64,
    },
    /// Mine the next block from the pending pool
    Mine,
    /// Run a longest-chain consensus pass against all known peers
    Consensus,
    /// Register a peer with the node and broadcast it to the network
    Register {
        /// Peer base URL to add
        #[arg(long)]
        peer: String,
    },
    /// Print the node's full chain snapshot
    Chain,
}

#[derive(Serialize)]
struct TransactionRequest {
    amount: u64,
    sender: String,
    recipient: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let node = &cli.node;

    let res = match cli.cmd {
        Command::Submit {
            sender,
            recipient,
            amount,
        } => {
            client
                .post(format!("{node}/transaction/broadcast"))
                .json(&TransactionRequest {
                    amount,
                    sender,
                    recipient,
                })
                .send()
                .await?
        }
        Command::Mine => client.get(format!("{node}/mine")).send().await?,
        Command::Consensus => client.get(format!("{node}/consensus")).send().await?,
        Command::Register { peer } => {
            client
                .post(format!("{node}/register-and-broadcast-node"))
                .json(&serde_json::json!({ "newNodeUrl": peer }))
                .send()
                .await?
        }
        Command::Chain => client.get(format!("{node}/blockchain")).send().await?,
    };

    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    println!("{body}");
    Ok(())
}
