//! Ingestor (SPEC_FULL.md §4.3): the heart of the wallet. `ingest` atomically
//! folds one candidate transaction into the Utxos/Stxos/Txns tables and
//! decides relevance; `mark_dead` is the reversal primitive used by both
//! double-spend resolution and `ReorgHandler`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::{Address, Network, OutPoint, Transaction};

use crate::addressset::AddressSet;
use crate::callbacks::Dispatcher;
use crate::datastore::Datastore;
use crate::error::{Error, Result};
use crate::keymanager::KeyManager;
use crate::types::{
    is_dead, Hash32, Stxo, TransactionCallback, TransactionInput, TransactionOutput, Utxo,
    HEIGHT_DEAD,
};

/// Largest amount of satoshis a single transaction's outputs may sum to;
/// mirrors the chain's maximum money supply as a sanity bound, not a
/// consensus check.
const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Generous standardness-style cap on serialized transaction size; the
/// purpose here is to reject obviously malformed input, not to enforce
/// relay policy.
const MAX_TX_SIZE: usize = 1_000_000;

fn script_hash_of(script: &bitcoin::Script) -> Option<Vec<u8>> {
    let bytes = script.as_bytes();
    if bytes.len() == 25 && bytes[0] == 0x76 && bytes[1] == 0xa9 && bytes[2] == 0x14 {
        Some(bytes[3..23].to_vec())
    } else {
        None
    }
}

fn validate_basic(tx: &Transaction) -> Result<()> {
    if tx.input.is_empty() || tx.output.is_empty() {
        return Err(Error::Validation("transaction has no inputs or no outputs".into()));
    }
    let size = serialize(tx).len();
    if size == 0 || size > MAX_TX_SIZE {
        return Err(Error::Validation("transaction size out of bounds".into()));
    }
    let mut total: i64 = 0;
    for out in &tx.output {
        if out.value < 0 {
            return Err(Error::Validation("negative output value".into()));
        }
        total = total
            .checked_add(out.value as i64)
            .filter(|v| *v <= MAX_MONEY)
            .ok_or_else(|| Error::Validation("output total out of money range".into()))?;
    }
    Ok(())
}

/// The coarse writer lock around Ingestor/ReorgHandler (SPEC_FULL.md §5):
/// held only across the storage-mutation sequence of a single `ingest` or
/// `mark_dead` call, released before the caller dispatches callbacks.
pub struct Ingestor {
    network: Network,
    datastore: Arc<dyn Datastore>,
    address_set: Arc<AddressSet>,
    key_manager: Arc<dyn KeyManager>,
    dispatcher: Arc<Dispatcher>,
    extra_seeds: Vec<Vec<u8>>,
    writer_lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        network: Network,
        datastore: Arc<dyn Datastore>,
        address_set: Arc<AddressSet>,
        key_manager: Arc<dyn KeyManager>,
        dispatcher: Arc<Dispatcher>,
        extra_seeds: Vec<Vec<u8>>,
    ) -> Self {
        Ingestor {
            network,
            datastore,
            address_set,
            key_manager,
            dispatcher,
            extra_seeds,
            writer_lock: Mutex::new(()),
        }
    }

    /// Resolves conflicting txids that also consume any of `tx`'s inputs,
    /// skipping malformed rows rather than aborting the scan (§7: per-row
    /// decode failures are swallowed).
    fn find_conflicts(&self, tx: &Transaction, txid: &Hash32) -> Vec<Hash32> {
        let our_outpoints: HashSet<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        let mut conflicts = Vec::new();
        let stored = self.datastore.txns().get_all(true).unwrap_or_default();
        for stored_txn in stored {
            if &stored_txn.txid == txid || is_dead(stored_txn.height) {
                continue;
            }
            let other: Transaction = match deserialize(&stored_txn.bytes) {
                Ok(t) => t,
                Err(_) => {
                    log::warn!("skipping undecodable stored tx {} during conflict scan", stored_txn.txid);
                    continue;
                }
            };
            if other.input.iter().any(|i| our_outpoints.contains(&i.previous_output)) {
                conflicts.push(stored_txn.txid);
            }
        }
        conflicts
    }

    /// Folds `tx` into the wallet's state (SPEC_FULL.md §4.3.1). Returns the
    /// hit count; zero means "not relevant" (a verbose-only callback still
    /// fires, but nothing is persisted).
    pub fn ingest(&self, tx: &Transaction, height: i32, timestamp: SystemTime) -> Result<u32> {
        validate_basic(tx)?;

        let txid: Hash32 = tx.txid();
        let _guard = self.writer_lock.lock().unwrap();

        // b. Dedup.
        if let Some(stored_height) = self.address_set.contains(&txid) {
            if stored_height > 0 || (stored_height == 0 && height == 0) {
                return Ok(0);
            }
        }

        // c. Double-spend scan.
        let conflicts = self.find_conflicts(tx, &txid);
        if !conflicts.is_empty() {
            if height == 0 {
                return Ok(0);
            }
            for conflict_txid in &conflicts {
                if let Err(e) = self.mark_dead_locked(conflict_txid) {
                    log::warn!("failed to mark conflicting tx {} dead: {}", conflict_txid, e);
                }
            }
        }

        let owned_scripts = self.address_set.owned_scripts();
        let watched_scripts = self.address_set.watched_scripts();

        let mut hits: u32 = 0;
        let mut matches_watch_only = false;
        let mut value: i64 = 0;
        let mut outputs = Vec::new();
        let mut inputs = Vec::new();

        // d. Owned-output scan.
        for (i, out) in tx.output.iter().enumerate() {
            if owned_scripts.iter().any(|s| s == &out.script_pubkey) {
                if let Some(hash) = script_hash_of(&out.script_pubkey) {
                    if let Err(e) = self.key_manager.mark_key_as_used(&hash) {
                        log::warn!("failed to mark key used: {}", e);
                    }
                }
                self.datastore.utxos().put(Utxo {
                    op: OutPoint { txid, vout: i as u32 },
                    at_height: height,
                    value: out.value as i64,
                    script_pubkey: out.script_pubkey.clone(),
                    watch_only: false,
                })?;
                value += out.value as i64;
                hits += 1;
                outputs.push(TransactionOutput {
                    address: Address::from_script(&out.script_pubkey, self.network),
                    value: out.value as i64,
                    index: i as u32,
                });
            } else if watched_scripts.iter().any(|s| s == &out.script_pubkey) {
                self.datastore.utxos().put(Utxo {
                    op: OutPoint { txid, vout: i as u32 },
                    at_height: height,
                    value: out.value as i64,
                    script_pubkey: out.script_pubkey.clone(),
                    watch_only: true,
                })?;
                matches_watch_only = true;
            } else if self
                .extra_seeds
                .iter()
                .any(|seed| contains_subslice(out.script_pubkey.as_bytes(), seed))
            {
                matches_watch_only = true;
            }
        }

        // e. Owned-input scan.
        let tracked_utxos = self.datastore.utxos().get_all()?;
        for input in &tx.input {
            if let Some(u) = tracked_utxos.iter().find(|u| u.op == input.previous_output) {
                self.datastore.stxos().put(Stxo {
                    utxo: u.clone(),
                    spend_height: height,
                    spend_txid: txid,
                })?;
                self.datastore.utxos().delete(u)?;
                if !u.watch_only {
                    value -= u.value;
                    hits += 1;
                } else {
                    matches_watch_only = true;
                }
                inputs.push(TransactionInput {
                    outpoint_hash: u.op.txid,
                    outpoint_index: u.op.vout,
                    linked_address: Address::from_script(&u.script_pubkey, self.network),
                    value: u.value,
                });
            } else {
                inputs.push(TransactionInput {
                    outpoint_hash: input.previous_output.txid,
                    outpoint_index: input.previous_output.vout,
                    linked_address: None,
                    value: -1,
                });
            }
        }

        // f. Confirmation promotion for prior spends.
        if height > 0 {
            let stxos = self.datastore.stxos().get_all()?;
            for s in stxos {
                if s.spend_txid == txid && s.spend_height == 0 {
                    let was_watch_only = s.utxo.watch_only;
                    self.datastore.stxos().put(Stxo {
                        spend_height: height,
                        ..s
                    })?;
                    if !was_watch_only {
                        hits += 1;
                    } else {
                        matches_watch_only = true;
                    }
                }
            }
        }

        let relevant = hits > 0 || matches_watch_only;
        let mut callback = TransactionCallback::new(txid, height, timestamp);
        callback.inputs = inputs;
        callback.outputs = outputs;

        if relevant {
            let existing = self.datastore.txns().get(&txid);
            let callback_value = match existing {
                Err(Error::NotFound(_)) => {
                    self.datastore.txns().put(
                        serialize(tx),
                        txid,
                        value,
                        height,
                        timestamp,
                        hits == 0,
                    )?;
                    self.address_set.note_txid_height(txid, height);
                    value
                }
                Err(e) => return Err(e),
                Ok(existing) => {
                    if existing.height <= 0 && height > 0 {
                        self.datastore.txns().update_height(&txid, height, timestamp)?;
                        self.address_set.note_txid_height(txid, height);
                    }
                    existing.value
                }
            };
            callback.value = callback_value;

            if let Err(e) = self.address_set.rebuild(self.key_manager.as_ref(), self.datastore.as_ref()) {
                log::warn!("address set rebuild after ingest failed: {}", e);
            }
        } else {
            callback.value = 0;
        }

        drop(_guard);
        self.dispatcher.dispatch(&callback, relevant);

        Ok(hits)
    }

    /// Public entry point for `mark_dead` (SPEC_FULL.md §4.3.2). Acquires the
    /// writer lock itself; callers invoking it as part of `ingest`'s
    /// conflict resolution use `mark_dead_locked` instead to avoid
    /// re-entering the mutex.
    pub fn mark_dead(&self, txid: &Hash32) -> Result<()> {
        let _guard = self.writer_lock.lock().unwrap();
        self.mark_dead_locked(txid)
    }

    /// Reversal primitive, re-entrant and recursion-bounded by the local
    /// spend chain (spends form a DAG, so no cycle can recurse forever).
    /// Already-dead rows yield no-op deletes, matching the note in
    /// SPEC_FULL.md §9.
    fn mark_dead_locked(&self, txid: &Hash32) -> Result<()> {
        let now = SystemTime::now();
        let stxos = self.datastore.stxos().get_all()?;
        for s in stxos {
            if s.spend_txid == *txid {
                self.datastore.stxos().delete(&s)?;
                self.datastore.utxos().put(s.utxo.clone())?;
            } else if s.utxo.op.txid == *txid {
                self.datastore.stxos().delete(&s)?;
                self.mark_dead_locked(&s.spend_txid)?;
            }
        }

        let utxos = self.datastore.utxos().get_all()?;
        for u in utxos {
            if u.op.txid == *txid {
                self.datastore.utxos().delete(&u)?;
            }
        }

        match self.datastore.txns().update_height(txid, HEIGHT_DEAD, now) {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.address_set.note_txid_height(*txid, HEIGHT_DEAD);
        Ok(())
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return needle.is_empty();
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
