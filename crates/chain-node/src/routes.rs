use crate::constants::PEER_TIMEOUT;
use crate::peers::{self, PeerFailure};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chain_core::constants::{MINING_REWARD, MINING_REWARD_SENDER};
use chain_core::consensus::{self, ConsensusOutcome};
use chain_core::miner::{find_nonce_cancellable, CancelToken};
use chain_core::{block_hash, Block, Ledger, NodeSnapshot, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared node state. The ledger is owned by one mutex; every handler takes
/// it for its full critical section and never holds it across an await.
#[derive(Clone)]
pub struct AppState {
    ledger: Arc<Mutex<Ledger>>,
    http: reqwest::Client,
    /// Reward address for blocks mined by this node.
    node_id: String,
    mining: Arc<Mutex<Option<MiningJob>>>,
}

struct MiningJob {
    target_index: u64,
    cancel: CancelToken,
}

impl AppState {
    pub fn new(ledger: Ledger) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            http,
            node_id: Uuid::new_v4().simple().to_string(),
            mining: Arc::new(Mutex::new(None)),
        }
    }

    /// Aborts an in-flight nonce search whose height the chain has reached.
    fn cancel_stale_mining(&self, chain_len: u64) {
        let mining = self.mining.lock().unwrap();
        if let Some(job) = mining.as_ref() {
            if job.target_index <= chain_len {
                job.cancel.cancel();
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/blockchain", get(get_blockchain))
        .route("/transaction", post(post_transaction))
        .route("/transaction/broadcast", post(post_transaction_broadcast))
        .route("/mine", get(get_mine))
        .route("/receive-new-block", post(post_receive_new_block))
        .route(
            "/register-and-broadcast-node",
            post(post_register_and_broadcast_node),
        )
        .route("/register-node", post(post_register_node))
        .route("/register-nodes-bulk", post(post_register_nodes_bulk))
        .route("/consensus", get(get_consensus))
        .route("/block/{block_hash}", get(get_block))
        .route("/transaction/{transaction_id}", get(get_transaction))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn get_blockchain(State(state): State<AppState>) -> Json<NodeSnapshot> {
    Json(state.ledger.lock().unwrap().snapshot())
}

/// Accepts an already-built transaction, e.g. one relayed by a peer.
async fn post_transaction(
    State(state): State<AppState>,
    Json(transaction): Json<Transaction>,
) -> Json<Value> {
    let block_index = state.ledger.lock().unwrap().add_to_pending(transaction);
    Json(json!({
        "note": format!("Transaction will be added in block {block_index}")
    }))
}

#[derive(Deserialize)]
struct TransactionRequest {
    amount: u64,
    sender: String,
    recipient: String,
}

async fn post_transaction_broadcast(
    State(state): State<AppState>,
    Json(request): Json<TransactionRequest>,
) -> Json<Value> {
    let transaction = Transaction::new(request.amount, request.sender, request.recipient);
    let network_nodes = {
        let mut ledger = state.ledger.lock().unwrap();
        ledger.add_to_pending(transaction.clone());
        ledger.network_nodes().to_vec()
    };

    let failed_peers =
        peers::broadcast_json(&state.http, &network_nodes, "/transaction", &transaction).await;

    Json(json!({
        "note": "Transaction created and broadcast successfully",
        "transaction": transaction,
        "failedPeers": failed_peers,
    }))
}

async fn get_mine(State(state): State<AppState>) -> Json<Value> {
    let (previous_block_hash, data) = {
        let ledger = state.ledger.lock().unwrap();
        (ledger.last_block().hash.clone(), ledger.next_block_data())
    };
    let target_index = data.index;

    let cancel = CancelToken::new();
    {
        let mut mining = state.mining.lock().unwrap();
        if mining.is_some() {
            return Json(json!({ "note": "Mining already in progress" }));
        }
        *mining = Some(MiningJob {
            target_index,
            cancel: cancel.clone(),
        });
    }

    info!(target_index, "starting nonce search");
    let search = {
        let previous_block_hash = previous_block_hash.clone();
        let data = data.clone();
        tokio::task::spawn_blocking(move || {
            find_nonce_cancellable(&previous_block_hash, &data, &cancel)
        })
    };
    let found = search.await.expect("mining worker panicked");
    state.mining.lock().unwrap().take();

    let Some(nonce) = found else {
        return Json(json!({ "note": "Mining superseded by a competing block" }));
    };

    let hash = block_hash(&previous_block_hash, nonce, &data);
    let (block, network_nodes) = {
        let mut ledger = state.ledger.lock().unwrap();
        // The tip may have moved while the search ran off the lock.
        if ledger.last_block().hash != previous_block_hash {
            warn!(target_index, "tip moved during nonce search, discarding candidate");
            return Json(json!({ "note": "Mining superseded by a competing block" }));
        }
        let block = ledger
            .create_block(nonce, previous_block_hash, hash)
            .clone();
        (block, ledger.network_nodes().to_vec())
    };

    let mut failed_peers = peers::broadcast_json(
        &state.http,
        &network_nodes,
        "/receive-new-block",
        &json!({ "newBlock": block }),
    )
    .await;

    // Pay the miner through the ordinary broadcast path; the reward lands in
    // whichever block gets mined next.
    let reward = Transaction::new(
        MINING_REWARD,
        MINING_REWARD_SENDER.to_string(),
        state.node_id.clone(),
    );
    {
        let mut ledger = state.ledger.lock().unwrap();
        ledger.add_to_pending(reward.clone());
    }
    failed_peers
        .extend(peers::broadcast_json(&state.http, &network_nodes, "/transaction", &reward).await);

    Json(json!({
        "note": "New block mined successfully",
        "block": block,
        "failedPeers": failed_peers,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveBlockRequest {
    new_block: Block,
}

async fn post_receive_new_block(
    State(state): State<AppState>,
    Json(request): Json<ReceiveBlockRequest>,
) -> Json<Value> {
    let result = {
        let mut ledger = state.ledger.lock().unwrap();
        ledger
            .receive_block(request.new_block.clone())
            .map(|block| block.clone())
    };

    match result {
        Ok(block) => {
            state.cancel_stale_mining(block.index);
            Json(json!({
                "note": "New block received and accepted",
                "newBlock": block,
            }))
        }
        Err(reason) => {
            warn!(%reason, "rejected externally mined block");
            Json(json!({
                "note": "New block rejected",
                "reason": reason.to_string(),
                "newBlock": request.new_block,
            }))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterNodeRequest {
    new_node_url: String,
}

async fn post_register_and_broadcast_node(
    State(state): State<AppState>,
    Json(request): Json<RegisterNodeRequest>,
) -> Json<Value> {
    let (network_nodes, roster) = {
        let mut ledger = state.ledger.lock().unwrap();
        ledger.register_peer(&request.new_node_url);
        let network_nodes = ledger.network_nodes().to_vec();
        let mut roster = network_nodes.clone();
        roster.push(ledger.current_node_url().to_string());
        (network_nodes, roster)
    };

    let mut failed_peers = peers::broadcast_json(
        &state.http,
        &network_nodes,
        "/register-node",
        &json!({ "newNodeUrl": request.new_node_url }),
    )
    .await;

    // Hand the newcomer the full roster, ourselves included.
    let bulk = state
        .http
        .post(format!("{}/register-nodes-bulk", request.new_node_url))
        .json(&json!({ "allNetworkNodes": roster }))
        .send()
        .await;
    if let Err(err) = bulk {
        warn!(peer = %request.new_node_url, %err, "bulk roster handoff failed");
        failed_peers.push(PeerFailure {
            peer: request.new_node_url.clone(),
            error: err.to_string(),
        });
    }

    Json(json!({
        "note": "New node registered with network successfully",
        "failedPeers": failed_peers,
    }))
}

async fn post_register_node(
    State(state): State<AppState>,
    Json(request): Json<RegisterNodeRequest>,
) -> Json<Value> {
    state
        .ledger
        .lock()
        .unwrap()
        .register_peer(&request.new_node_url);
    Json(json!({ "note": "New node registered successfully" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRegisterRequest {
    all_network_nodes: Vec<String>,
}

async fn post_register_nodes_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkRegisterRequest>,
) -> Json<Value> {
    state
        .ledger
        .lock()
        .unwrap()
        .register_peers_bulk(request.all_network_nodes);
    Json(json!({ "note": "Bulk registration successful" }))
}

async fn get_consensus(State(state): State<AppState>) -> Json<Value> {
    let network_nodes = state.ledger.lock().unwrap().network_nodes().to_vec();
    let (snapshots, failed_peers) = peers::fetch_snapshots(&state.http, &network_nodes).await;

    let (outcome, chain_len, chain) = {
        let mut ledger = state.ledger.lock().unwrap();
        let outcome = consensus::resolve(&mut ledger, snapshots);
        (
            outcome,
            ledger.chain().len() as u64,
            ledger.chain().to_vec(),
        )
    };

    let note = match outcome {
        ConsensusOutcome::Replaced => {
            // The adopted chain invalidates any search against the old tip.
            state.cancel_stale_mining(chain_len);
            "This chain has been replaced"
        }
        ConsensusOutcome::Retained => "Current chain has not been replaced",
    };

    Json(json!({
        "note": note,
        "chain": chain,
        "failedPeers": failed_peers,
    }))
}

async fn get_block(
    State(state): State<AppState>,
    Path(block_hash): Path<String>,
) -> Json<Value> {
    let ledger = state.ledger.lock().unwrap();
    Json(json!({ "block": ledger.get_block(&block_hash) }))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Json<Value> {
    let ledger = state.ledger.lock().unwrap();
    let found = ledger.get_transaction(&transaction_id);
    Json(json!({
        "transaction": found.map(|(transaction, _)| transaction),
        "block": found.map(|(_, block)| block),
    }))
}
