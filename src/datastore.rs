//! External collaborator: the persistent storage engine (SPEC_FULL.md §6.1).
//! The core only ever talks to these traits; `MemoryDatastore` below is a
//! reference fixture used by the crate's own tests, not a production store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use bitcoin::Script;

use crate::error::{Error, Result};
use crate::types::{Hash32, Outpoint, Stxo, Txn, Utxo};

pub trait TxnStore: Send + Sync {
    fn put(
        &self,
        bytes: Vec<u8>,
        txid: Hash32,
        value: i64,
        height: i32,
        timestamp: SystemTime,
        watch_only: bool,
    ) -> Result<()>;
    fn get(&self, txid: &Hash32) -> Result<Txn>;
    fn get_all(&self, include_watch_only: bool) -> Result<Vec<Txn>>;
    fn delete(&self, txid: &Hash32) -> Result<()>;
    fn update_height(&self, txid: &Hash32, height: i32, timestamp: SystemTime) -> Result<()>;
}

pub trait UtxoStore: Send + Sync {
    /// Upsert by outpoint.
    fn put(&self, utxo: Utxo) -> Result<()>;
    fn get_all(&self) -> Result<Vec<Utxo>>;
    fn delete(&self, utxo: &Utxo) -> Result<()>;
}

pub trait StxoStore: Send + Sync {
    /// Upsert by the embedded UTXO's outpoint.
    fn put(&self, stxo: Stxo) -> Result<()>;
    fn get_all(&self) -> Result<Vec<Stxo>>;
    fn delete(&self, stxo: &Stxo) -> Result<()>;
}

pub trait WatchedScriptStore: Send + Sync {
    fn put(&self, script: Script) -> Result<()>;
    fn get_all(&self) -> Result<Vec<Script>>;
    fn delete(&self, script: &Script) -> Result<()>;
}

pub trait KeyStore: Send + Sync {
    /// Returns `(purpose, index)` of the next unused key for `purpose`.
    fn get_unused(&self, purpose: crate::keymanager::KeyPurpose) -> Result<u32>;
    fn mark_key_as_used(&self, script_hash: &[u8]) -> Result<()>;
    fn import_key(&self, script_hash: &[u8], priv_key: secp256k1::SecretKey) -> Result<()>;
}

/// Aggregate accessor, mirroring the Go source's embedded
/// `wallet.Datastore` interface: one handle exposing all five typed
/// sub-stores.
pub trait Datastore: Send + Sync {
    fn txns(&self) -> &dyn TxnStore;
    fn utxos(&self) -> &dyn UtxoStore;
    fn stxos(&self) -> &dyn StxoStore;
    fn watched_scripts(&self) -> &dyn WatchedScriptStore;
    fn keys(&self) -> &dyn KeyStore;
}

/// Reference in-memory implementation of every sub-store, used by this
/// crate's own tests. A real deployment backs these with whatever engine it
/// likes (sqlite, sled, ...); that choice lives entirely outside the core.
#[derive(Default)]
pub struct MemoryDatastore {
    txns: Mutex<HashMap<Hash32, Txn>>,
    utxos: Mutex<HashMap<Outpoint, Utxo>>,
    stxos: Mutex<HashMap<Outpoint, Stxo>>,
    watched_scripts: Mutex<Vec<Script>>,
    used_keys: Mutex<std::collections::HashSet<Vec<u8>>>,
    imported_keys: Mutex<HashMap<Vec<u8>, secp256k1::SecretKey>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        MemoryDatastore::default()
    }
}

impl TxnStore for MemoryDatastore {
    fn put(
        &self,
        bytes: Vec<u8>,
        txid: Hash32,
        value: i64,
        height: i32,
        timestamp: SystemTime,
        watch_only: bool,
    ) -> Result<()> {
        let txn = Txn {
            txid,
            bytes,
            value,
            height,
            timestamp,
            watch_only,
        };
        self.txns.lock().unwrap().insert(txid, txn);
        Ok(())
    }

    fn get(&self, txid: &Hash32) -> Result<Txn> {
        self.txns
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("txn {}", txid)))
    }

    fn get_all(&self, include_watch_only: bool) -> Result<Vec<Txn>> {
        Ok(self
            .txns
            .lock()
            .unwrap()
            .values()
            .filter(|t| include_watch_only || !t.watch_only)
            .cloned()
            .collect())
    }

    fn delete(&self, txid: &Hash32) -> Result<()> {
        self.txns.lock().unwrap().remove(txid);
        Ok(())
    }

    fn update_height(&self, txid: &Hash32, height: i32, timestamp: SystemTime) -> Result<()> {
        let mut txns = self.txns.lock().unwrap();
        let txn = txns
            .get_mut(txid)
            .ok_or_else(|| Error::NotFound(format!("txn {}", txid)))?;
        txn.height = height;
        txn.timestamp = timestamp;
        Ok(())
    }
}

impl UtxoStore for MemoryDatastore {
    fn put(&self, utxo: Utxo) -> Result<()> {
        self.utxos.lock().unwrap().insert(utxo.op, utxo);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Utxo>> {
        Ok(self.utxos.lock().unwrap().values().cloned().collect())
    }

    fn delete(&self, utxo: &Utxo) -> Result<()> {
        self.utxos.lock().unwrap().remove(&utxo.op);
        Ok(())
    }
}

impl StxoStore for MemoryDatastore {
    fn put(&self, stxo: Stxo) -> Result<()> {
        self.stxos.lock().unwrap().insert(stxo.utxo.op, stxo);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Stxo>> {
        Ok(self.stxos.lock().unwrap().values().cloned().collect())
    }

    fn delete(&self, stxo: &Stxo) -> Result<()> {
        self.stxos.lock().unwrap().remove(&stxo.utxo.op);
        Ok(())
    }
}

impl WatchedScriptStore for MemoryDatastore {
    fn put(&self, script: Script) -> Result<()> {
        let mut scripts = self.watched_scripts.lock().unwrap();
        if !scripts.contains(&script) {
            scripts.push(script);
        }
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Script>> {
        Ok(self.watched_scripts.lock().unwrap().clone())
    }

    fn delete(&self, script: &Script) -> Result<()> {
        self.watched_scripts.lock().unwrap().retain(|s| s != script);
        Ok(())
    }
}

impl KeyStore for MemoryDatastore {
    fn get_unused(&self, _purpose: crate::keymanager::KeyPurpose) -> Result<u32> {
        // The real index sequencing lives in the KeyManager; this reference
        // store only tracks which script hashes have been marked used.
        Ok(self.used_keys.lock().unwrap().len() as u32)
    }

    fn mark_key_as_used(&self, script_hash: &[u8]) -> Result<()> {
        self.used_keys.lock().unwrap().insert(script_hash.to_vec());
        Ok(())
    }

    fn import_key(&self, script_hash: &[u8], priv_key: secp256k1::SecretKey) -> Result<()> {
        self.imported_keys
            .lock()
            .unwrap()
            .insert(script_hash.to_vec(), priv_key);
        Ok(())
    }
}

impl Datastore for MemoryDatastore {
    fn txns(&self) -> &dyn TxnStore {
        self
    }
    fn utxos(&self) -> &dyn UtxoStore {
        self
    }
    fn stxos(&self) -> &dyn StxoStore {
        self
    }
    fn watched_scripts(&self) -> &dyn WatchedScriptStore {
        self
    }
    fn keys(&self) -> &dyn KeyStore {
        self
    }
}
