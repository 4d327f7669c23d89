//! Core data model: outpoints, UTXOs, STXOs, transaction records and watched
//! scripts. See DATA MODEL in SPEC_FULL.md for the invariants these types
//! must uphold; enforcement lives in `ingest.rs` and `reorg.rs`, not here —
//! these are plain value types.

use std::time::SystemTime;

use bitcoin::{OutPoint, Script};
use bitcoin_hashes::sha256d;
use serde::{Deserialize, Serialize};

/// A 32-byte double-SHA256 hash, used for txids throughout this crate.
pub type Hash32 = sha256d::Hash;

/// `(txHash, index)`. We reuse `bitcoin::OutPoint` directly rather than
/// rolling our own, since it already has the right fields and trait impls.
pub type Outpoint = OutPoint;

/// Height sentinel: unconfirmed / in mempool.
pub const HEIGHT_UNCONFIRMED: i32 = 0;

/// Height sentinel used when marking a transaction (and everything it
/// spends or that spends it) as dead by a reorg or a lost double-spend race.
pub const HEIGHT_DEAD: i32 = -1;

pub fn is_dead(height: i32) -> bool {
    height < 0
}

pub fn is_confirmed(height: i32) -> bool {
    height > 0
}

/// An unspent output we are tracking, either because it pays one of our own
/// keys or because it matches a watched script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub op: Outpoint,
    pub at_height: i32,
    pub value: i64,
    pub script_pubkey: Script,
    pub watch_only: bool,
}

impl Utxo {
    pub fn confirmations(&self, chain_height: u32) -> u32 {
        if self.at_height > 0 {
            (chain_height as i64 - self.at_height as i64).max(0) as u32
        } else {
            0
        }
    }
}

/// A previously tracked output that has since been spent. Kept forever (even
/// after the spend confirms) so a reorg can reverse the spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stxo {
    pub utxo: Utxo,
    pub spend_height: i32,
    pub spend_txid: Hash32,
}

/// A transaction record as tracked by the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txn {
    pub txid: Hash32,
    pub bytes: Vec<u8>,
    pub value: i64,
    pub height: i32,
    pub timestamp: SystemTime,
    pub watch_only: bool,
}

/// Opaque watched script bytes; set semantics live in `WatchedScriptStore`.
pub type WatchedScript = Script;

/// One entry of a relevant transaction's outputs, surfaced to listeners.
#[derive(Debug, Clone)]
pub struct TransactionOutput {
    pub address: Option<bitcoin::Address>,
    pub value: i64,
    pub index: u32,
}

/// One entry of a relevant transaction's inputs, surfaced to listeners.
/// `value == -1` and `linked_address == None` mean the spent outpoint was
/// not one of ours (we only know we consumed it).
#[derive(Debug, Clone)]
pub struct TransactionInput {
    pub outpoint_hash: Hash32,
    pub outpoint_index: u32,
    pub linked_address: Option<bitcoin::Address>,
    pub value: i64,
}

/// Fired to listeners on every ingest attempt, relevant or not (see
/// `callbacks.rs` for the relevant-vs-verbose fan-out rule).
#[derive(Debug, Clone)]
pub struct TransactionCallback {
    pub txid: Hash32,
    pub height: i32,
    pub value: i64,
    pub block_time: SystemTime,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

impl TransactionCallback {
    pub fn new(txid: Hash32, height: i32, timestamp: SystemTime) -> Self {
        TransactionCallback {
            txid,
            height,
            value: 0,
            block_time: timestamp,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

pub fn outpoints_equal(a: &Outpoint, b: &Outpoint) -> bool {
    a.txid == b.txid && a.vout == b.vout
}
