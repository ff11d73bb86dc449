use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use uuid::Uuid;

pub mod consensus;
pub mod constants;
pub mod error;
pub mod miner;
pub mod pow;
pub mod validate;

use constants::{GENESIS_HASH, GENESIS_NONCE, GENESIS_PREVIOUS_HASH};
use error::BlockRejected;

/// An unsigned transfer record. Created once, immutable thereafter; lives in
/// exactly one pending pool until it lands in exactly one block. Wire field
/// order is part of the hashing protocol and must not change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub amount: u64,
    pub sender: String,
    pub recipient: String,
    pub transaction_id: String,
}

impl Transaction {
    /// Builds a record with a fresh opaque id. No validation of the amount
    /// or the addresses happens here; records are unsigned by design.
    pub fn new(amount: u64, sender: String, recipient: String) -> Self {
        Self {
            amount,
            sender,
            recipient,
            transaction_id: Uuid::new_v4().simple().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub hash: String,
    pub previous_block_hash: String,
}

/// The payload hashed during mining and validation: the block's transaction
/// list followed by its index. The serialized field order is a protocol
/// contract shared by every peer; reordering it breaks cross-node chain
/// validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub transactions: Vec<Transaction>,
    pub index: u64,
}

impl BlockData {
    pub(crate) fn serialized(&self) -> String {
        serde_json::to_string(self).unwrap()
    }
}

/// State a node hands out to peers, and the shape consumed back during
/// consensus polling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub chain: Vec<Block>,
    pub pending_transactions: Vec<Transaction>,
    pub network_nodes: Vec<String>,
    pub current_node_url: String,
}

/// Digest over the exact concatenation of the previous block's hex hash, the
/// decimal form of the nonce, and the canonical [`BlockData`] JSON. Every
/// peer must produce this byte string identically for identical logical
/// content.
pub fn block_hash(previous_hash: &str, nonce: u64, data: &BlockData) -> String {
    hash_parts(previous_hash, nonce, &data.serialized())
}

pub(crate) fn hash_parts(previous_hash: &str, nonce: u64, serialized_data: &str) -> String {
    let nonce = nonce.to_string();
    let mut input =
        String::with_capacity(previous_hash.len() + nonce.len() + serialized_data.len());
    input.push_str(previous_hash);
    input.push_str(&nonce);
    input.push_str(serialized_data);
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as u64
}

/// A node's whole replicated state: the block chain, the pool of pending
/// transactions, and the set of known peers. Owned by one logical thread of
/// control per node; nothing here locks.
#[derive(Clone, Debug)]
pub struct Ledger {
    chain: Vec<Block>,
    pending_transactions: Vec<Transaction>,
    current_node_url: String,
    network_nodes: Vec<String>,
}

impl Ledger {
    /// A fresh ledger holding only the genesis block. The genesis carries
    /// sentinel values instead of real hash linkage and is never re-mined.
    pub fn new(current_node_url: impl Into<String>) -> Self {
        let mut ledger = Self {
            chain: Vec::new(),
            pending_transactions: Vec::new(),
            current_node_url: current_node_url.into(),
            network_nodes: Vec::new(),
        };
        ledger.create_block(
            GENESIS_NONCE,
            GENESIS_PREVIOUS_HASH.to_string(),
            GENESIS_HASH.to_string(),
        );
        ledger
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn current_node_url(&self) -> &str {
        &self.current_node_url
    }

    pub fn network_nodes(&self) -> &[String] {
        &self.network_nodes
    }

    pub fn last_block(&self) -> &Block {
        self.chain.last().expect("chain holds at least the genesis block")
    }

    /// Assembles the next block from the entire pending pool and appends it.
    /// The pool is drained in the process. Not idempotent: calling twice in
    /// a row produces two blocks with consecutive indices, the second one
    /// empty.
    pub fn create_block(
        &mut self,
        nonce: u64,
        previous_block_hash: String,
        hash: String,
    ) -> &Block {
        let block = Block {
            index: self.chain.len() as u64 + 1,
            timestamp: now_millis(),
            transactions: std::mem::take(&mut self.pending_transactions),
            nonce,
            hash,
            previous_block_hash,
        };
        info!(index = block.index, "block appended");
        self.chain.push(block);
        self.last_block()
    }

    /// Appends to the pending pool and returns the index of the block the
    /// transaction is expected to land in. Advisory only: a later consensus
    /// swap can replace the pool outright.
    pub fn add_to_pending(&mut self, transaction: Transaction) -> u64 {
        self.pending_transactions.push(transaction);
        self.chain.len() as u64 + 1
    }

    /// The hash payload a miner should search a nonce for right now.
    pub fn next_block_data(&self) -> BlockData {
        BlockData {
            transactions: self.pending_transactions.clone(),
            index: self.chain.len() as u64 + 1,
        }
    }

    /// Accepts an externally mined block iff it extends the current tip by
    /// exactly one height. Acceptance clears the pending pool (the accepted
    /// block is assumed to have swept the broadcast transactions); rejection
    /// mutates nothing.
    pub fn receive_block(&mut self, block: Block) -> Result<&Block, BlockRejected> {
        let tip = self.last_block();
        if block.previous_block_hash != tip.hash {
            return Err(BlockRejected::TipMismatch {
                expected: tip.hash.clone(),
                actual: block.previous_block_hash,
            });
        }
        if block.index != tip.index + 1 {
            return Err(BlockRejected::IndexMismatch {
                expected: tip.index + 1,
                actual: block.index,
            });
        }
        info!(index = block.index, "accepted externally mined block");
        self.pending_transactions.clear();
        self.chain.push(block);
        Ok(self.last_block())
    }

    /// Inserts a peer address iff it is new and not this node itself.
    /// Returns whether the registry changed.
    pub fn register_peer(&mut self, url: &str) -> bool {
        if url == self.current_node_url || self.network_nodes.iter().any(|n| n == url) {
            return false;
        }
        info!(peer = url, "peer registered");
        self.network_nodes.push(url.to_string());
        true
    }

    /// Applies the single-peer registration rule to each address in a batch.
    pub fn register_peers_bulk(&mut self, urls: impl IntoIterator<Item = String>) {
        for url in urls {
            self.register_peer(&url);
        }
    }

    /// First block in chain order whose hash matches.
    pub fn get_block(&self, hash: &str) -> Option<&Block> {
        self.chain.iter().find(|block| block.hash == hash)
    }

    /// Scans every block's transaction list in chain order; the first match
    /// is returned together with its containing block.
    pub fn get_transaction(&self, transaction_id: &str) -> Option<(&Transaction, &Block)> {
        self.chain.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.transaction_id == transaction_id)
                .map(|tx| (tx, block))
        })
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            chain: self.chain.clone(),
            pending_transactions: self.pending_transactions.clone(),
            network_nodes: self.network_nodes.clone(),
            current_node_url: self.current_node_url.clone(),
        }
    }

    pub(crate) fn replace_chain(&mut self, chain: Vec<Block>, pending: Vec<Transaction>) {
        self.chain = chain;
        self.pending_transactions = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{self, ConsensusOutcome};
    use crate::miner::{find_nonce_cancellable, CancelToken};
    use crate::pow::{find_nonce, meets_target};
    use crate::validate::chain_is_valid;
    use std::collections::HashSet;

    fn tx(amount: u64, sender: &str, recipient: &str) -> Transaction {
        Transaction::new(amount, sender.to_string(), recipient.to_string())
    }

    /// Mines a real proof-of-work block over the current pending pool.
    fn mine_next(ledger: &mut Ledger) -> Block {
        let previous_hash = ledger.last_block().hash.clone();
        let data = ledger.next_block_data();
        let nonce = find_nonce(&previous_hash, &data);
        let hash = block_hash(&previous_hash, nonce, &data);
        ledger.create_block(nonce, previous_hash, hash).clone()
    }

    #[test]
    fn fresh_ledger_holds_only_the_genesis_sentinels() {
        let ledger = Ledger::new("http://localhost:3001");
        assert_eq!(ledger.chain().len(), 1);
        let genesis = &ledger.chain()[0];
        assert_eq!(genesis.index, 1);
        assert_eq!(genesis.nonce, 100);
        assert_eq!(genesis.hash, "0");
        assert_eq!(genesis.previous_block_hash, "0");
        assert!(genesis.transactions.is_empty());
        assert!(ledger.pending_transactions().is_empty());
        assert!(ledger.network_nodes().is_empty());
    }

    #[test]
    fn block_data_wire_format_is_pinned() {
        let tx = Transaction {
            amount: 5,
            sender: "00".to_string(),
            recipient: "X".to_string(),
            transaction_id: "d1b1".to_string(),
        };
        let data = BlockData {
            transactions: vec![tx],
            index: 2,
        };
        assert_eq!(
            serde_json::to_string(&data).unwrap(),
            r#"{"transactions":[{"amount":5,"sender":"00","recipient":"X","transactionId":"d1b1"}],"index":2}"#
        );
    }

    #[test]
    fn block_wire_names_are_camel_case() {
        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.add_to_pending(tx(3, "alice", "bob"));
        let block = mine_next(&mut ledger);
        let value = serde_json::to_value(&block).unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "index",
            "timestamp",
            "transactions",
            "nonce",
            "hash",
            "previousBlockHash",
        ] {
            assert!(object.contains_key(key), "missing wire field {key}");
        }
        let round_trip: Block = serde_json::from_value(value).unwrap();
        assert_eq!(round_trip, block);
    }

    #[test]
    fn snapshot_exposes_the_peer_exchange_shape() {
        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.register_peer("http://localhost:3002");
        let value = serde_json::to_value(ledger.snapshot()).unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "chain",
            "pendingTransactions",
            "networkNodes",
            "currentNodeUrl",
        ] {
            assert!(object.contains_key(key), "missing wire field {key}");
        }
    }

    #[test]
    fn block_hash_is_deterministic() {
        let data = BlockData {
            transactions: vec![tx(10, "alice", "bob")],
            index: 2,
        };
        let digest = block_hash("0", 42, &data);
        assert_eq!(digest, block_hash("0", 42, &data));
        assert_eq!(digest.len(), 64);
        assert_ne!(digest, block_hash("0", 43, &data));
        assert_ne!(digest, block_hash("1", 42, &data));
    }

    #[test]
    fn find_nonce_returns_the_smallest_satisfying_nonce() {
        let data = BlockData {
            transactions: vec![tx(5, "00", "X")],
            index: 2,
        };
        let nonce = find_nonce("0", &data);
        assert!(meets_target(&block_hash("0", nonce, &data)));
        for earlier in 0..nonce {
            assert!(!meets_target(&block_hash("0", earlier, &data)));
        }
    }

    #[test]
    fn find_nonce_is_deterministic() {
        let data = BlockData {
            transactions: vec![tx(7, "carol", "dave")],
            index: 3,
        };
        assert_eq!(find_nonce("0", &data), find_nonce("0", &data));
    }

    #[test]
    fn cancellable_search_matches_the_sequential_search() {
        let data = BlockData {
            transactions: vec![tx(5, "00", "X")],
            index: 2,
        };
        let token = CancelToken::new();
        assert_eq!(
            find_nonce_cancellable("0", &data, &token),
            Some(find_nonce("0", &data))
        );
    }

    #[test]
    fn cancelled_token_aborts_the_search() {
        let token = CancelToken::new();
        token.cancel();
        let data = BlockData {
            transactions: Vec::new(),
            index: 2,
        };
        assert_eq!(find_nonce_cancellable("0", &data, &token), None);
    }

    #[test]
    fn transaction_ids_are_opaque_and_unique() {
        let ids: HashSet<String> = (0..64).map(|_| tx(1, "a", "b").transaction_id).collect();
        assert_eq!(ids.len(), 64);
        for id in &ids {
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn add_to_pending_reports_the_expected_block_index() {
        let mut ledger = Ledger::new("http://localhost:3001");
        assert_eq!(ledger.add_to_pending(tx(1, "a", "b")), 2);
        assert_eq!(ledger.add_to_pending(tx(2, "b", "c")), 2);
        mine_next(&mut ledger);
        assert_eq!(ledger.add_to_pending(tx(3, "c", "d")), 3);
    }

    #[test]
    fn create_block_drains_the_pool_and_is_not_idempotent() {
        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.add_to_pending(tx(1, "a", "b"));
        assert!(!ledger.pending_transactions().is_empty());

        let first = ledger
            .create_block(7, "prev".to_string(), "hash-a".to_string())
            .clone();
        assert_eq!(first.index, 2);
        assert_eq!(first.transactions.len(), 1);
        assert!(ledger.pending_transactions().is_empty());

        let second = ledger
            .create_block(8, "hash-a".to_string(), "hash-b".to_string())
            .clone();
        assert_eq!(second.index, 3);
        assert!(second.transactions.is_empty());
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn factory_built_chains_validate() {
        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.add_to_pending(tx(9, "alice", "bob"));
        mine_next(&mut ledger);
        ledger.add_to_pending(tx(4, "bob", "carol"));
        ledger.add_to_pending(tx(2, "carol", "dave"));
        mine_next(&mut ledger);
        mine_next(&mut ledger);
        assert!(chain_is_valid(ledger.chain()));
    }

    #[test]
    fn validator_rejects_a_corrupted_link_at_any_position() {
        let mut ledger = Ledger::new("http://localhost:3001");
        for i in 0..3 {
            ledger.add_to_pending(tx(i + 1, "alice", "bob"));
            mine_next(&mut ledger);
        }
        let chain = ledger.chain().to_vec();
        assert!(chain_is_valid(&chain));

        for position in 1..chain.len() {
            let mut tampered = chain.clone();
            tampered[position].previous_block_hash = "deadbeef".to_string();
            assert!(
                !chain_is_valid(&tampered),
                "corruption at position {position} went undetected"
            );
        }
    }

    #[test]
    fn validator_rejects_a_tampered_transaction() {
        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.add_to_pending(tx(5, "alice", "bob"));
        mine_next(&mut ledger);

        let mut tampered = ledger.chain().to_vec();
        tampered[1].transactions[0].amount += 1;
        assert!(!chain_is_valid(&tampered));
    }

    #[test]
    fn validator_checks_every_genesis_sentinel() {
        let mut ledger = Ledger::new("http://localhost:3001");
        mine_next(&mut ledger);
        let chain = ledger.chain().to_vec();
        assert!(chain_is_valid(&chain));

        let mut wrong_nonce = chain.clone();
        wrong_nonce[0].nonce = 99;
        assert!(!chain_is_valid(&wrong_nonce));

        let mut wrong_prev = chain.clone();
        wrong_prev[0].previous_block_hash = "1".to_string();
        assert!(!chain_is_valid(&wrong_prev));

        let mut wrong_hash = chain.clone();
        wrong_hash[0].hash = "1".to_string();
        assert!(!chain_is_valid(&wrong_hash));

        let mut wrong_transactions = chain;
        wrong_transactions[0].transactions.push(tx(1, "a", "b"));
        assert!(!chain_is_valid(&wrong_transactions));
    }

    #[test]
    fn validator_rejects_an_empty_chain() {
        assert!(!chain_is_valid(&[]));
    }

    #[test]
    fn receive_block_extends_the_tip_and_clears_pending() {
        let mut producer = Ledger::new("http://localhost:3002");
        producer.add_to_pending(tx(6, "alice", "bob"));
        let block = mine_next(&mut producer);

        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.add_to_pending(tx(2, "local", "only"));
        let accepted = ledger.receive_block(block.clone()).unwrap().clone();
        assert_eq!(accepted, block);
        assert_eq!(ledger.chain().len(), 2);
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn receive_block_rejects_a_foreign_tip() {
        let mut producer = Ledger::new("http://localhost:3002");
        mine_next(&mut producer);
        let mut block = mine_next(&mut producer);
        block.previous_block_hash = "bogus".to_string();

        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.add_to_pending(tx(2, "local", "only"));
        match ledger.receive_block(block) {
            Err(BlockRejected::TipMismatch { .. }) => {}
            other => panic!("expected tip mismatch, got {other:?}"),
        }
        assert_eq!(ledger.chain().len(), 1);
        assert_eq!(ledger.pending_transactions().len(), 1);
    }

    #[test]
    fn receive_block_rejects_a_skipped_height() {
        let mut producer = Ledger::new("http://localhost:3002");
        let mut block = mine_next(&mut producer);
        block.index = 5;

        let mut ledger = Ledger::new("http://localhost:3001");
        match ledger.receive_block(block) {
            Err(BlockRejected::IndexMismatch {
                expected: 2,
                actual: 5,
            }) => {}
            other => panic!("expected index mismatch, got {other:?}"),
        }
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn consensus_adopts_a_strictly_longer_valid_chain() {
        let mut remote = Ledger::new("http://localhost:3002");
        remote.add_to_pending(tx(9, "alice", "bob"));
        mine_next(&mut remote);
        mine_next(&mut remote);
        let leftover = tx(3, "carol", "dave");
        remote.add_to_pending(leftover.clone());

        let mut local = Ledger::new("http://localhost:3001");
        local.add_to_pending(tx(1, "local", "only"));

        let outcome = consensus::resolve(&mut local, vec![remote.snapshot()]);
        assert_eq!(outcome, ConsensusOutcome::Replaced);
        assert_eq!(local.chain().len(), 3);
        // The pool is replaced outright; local pending work is discarded.
        assert_eq!(local.pending_transactions().to_vec(), vec![leftover]);
    }

    #[test]
    fn consensus_never_adopts_an_equal_length_chain() {
        let mut remote = Ledger::new("http://localhost:3002");
        mine_next(&mut remote);
        let mut local = Ledger::new("http://localhost:3001");
        mine_next(&mut local);
        let tip_before = local.last_block().hash.clone();

        let outcome = consensus::resolve(&mut local, vec![remote.snapshot()]);
        assert_eq!(outcome, ConsensusOutcome::Retained);
        assert_eq!(local.last_block().hash, tip_before);
    }

    #[test]
    fn consensus_never_adopts_an_invalid_longer_chain() {
        let mut remote = Ledger::new("http://localhost:3002");
        mine_next(&mut remote);
        mine_next(&mut remote);
        let mut snapshot = remote.snapshot();
        snapshot.chain[1].previous_block_hash = "tampered".to_string();

        let mut local = Ledger::new("http://localhost:3001");
        let outcome = consensus::resolve(&mut local, vec![snapshot]);
        assert_eq!(outcome, ConsensusOutcome::Retained);
        assert_eq!(local.chain().len(), 1);
    }

    #[test]
    fn consensus_considers_only_the_single_longest_candidate() {
        // An invalid longest candidate shadows a valid shorter one.
        let mut long_remote = Ledger::new("http://localhost:3002");
        mine_next(&mut long_remote);
        mine_next(&mut long_remote);
        let mut invalid_longest = long_remote.snapshot();
        invalid_longest.chain[2].previous_block_hash = "tampered".to_string();

        let mut short_remote = Ledger::new("http://localhost:3003");
        mine_next(&mut short_remote);

        let mut local = Ledger::new("http://localhost:3001");
        let outcome =
            consensus::resolve(&mut local, vec![short_remote.snapshot(), invalid_longest]);
        assert_eq!(outcome, ConsensusOutcome::Retained);
        assert_eq!(local.chain().len(), 1);
    }

    #[test]
    fn consensus_without_peers_retains_the_local_chain() {
        let mut local = Ledger::new("http://localhost:3001");
        assert_eq!(
            consensus::resolve(&mut local, Vec::new()),
            ConsensusOutcome::Retained
        );
    }

    #[test]
    fn peer_registry_excludes_self_and_duplicates() {
        let mut ledger = Ledger::new("http://localhost:3001");
        assert!(ledger.register_peer("http://localhost:3002"));
        assert!(!ledger.register_peer("http://localhost:3002"));
        assert!(!ledger.register_peer("http://localhost:3001"));
        ledger.register_peers_bulk(vec![
            "http://localhost:3002".to_string(),
            "http://localhost:3003".to_string(),
            "http://localhost:3001".to_string(),
        ]);
        assert_eq!(
            ledger.network_nodes().to_vec(),
            vec![
                "http://localhost:3002".to_string(),
                "http://localhost:3003".to_string(),
            ]
        );
    }

    #[test]
    fn lookups_find_the_first_match_in_chain_order() {
        let mut ledger = Ledger::new("http://localhost:3001");
        let wanted = tx(5, "alice", "bob");
        ledger.add_to_pending(wanted.clone());
        let block = mine_next(&mut ledger);
        mine_next(&mut ledger);

        let found = ledger.get_block(&block.hash).unwrap();
        assert_eq!(found.index, block.index);

        let (found_tx, containing) = ledger.get_transaction(&wanted.transaction_id).unwrap();
        assert_eq!(found_tx, &wanted);
        assert_eq!(containing.index, block.index);
    }

    #[test]
    fn lookups_miss_with_unknown_keys() {
        let mut ledger = Ledger::new("http://localhost:3001");
        ledger.add_to_pending(tx(5, "alice", "bob"));
        mine_next(&mut ledger);

        assert!(ledger.get_block("feedface").is_none());
        assert!(ledger.get_transaction("not-an-id").is_none());
        // A pending transaction is not in any block yet.
        let pending = tx(1, "x", "y");
        ledger.add_to_pending(pending.clone());
        assert!(ledger.get_transaction(&pending.transaction_id).is_none());
    }

    #[test]
    fn end_to_end_mining_scenario() {
        let mut ledger = Ledger::new("http://localhost:3001");
        let tx = Transaction::new(5, "00".to_string(), "X".to_string());
        let expected_index = ledger.add_to_pending(tx.clone());
        assert_eq!(expected_index, 2);
        assert_eq!(ledger.pending_transactions().len(), 1);

        let data = ledger.next_block_data();
        assert_eq!(data.index, 2);
        let nonce = find_nonce("0", &data);
        let hash = block_hash("0", nonce, &data);
        let block = ledger
            .create_block(nonce, "0".to_string(), hash)
            .clone();

        assert_eq!(block.index, 2);
        assert_eq!(block.previous_block_hash, "0");
        assert_eq!(block.transactions, vec![tx]);
        assert!(ledger.pending_transactions().is_empty());
        assert!(chain_is_valid(ledger.chain()));
    }
}
