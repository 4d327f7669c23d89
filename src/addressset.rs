//! AddressSet (SPEC_FULL.md §4.1): an in-memory cache of the owned-address
//! set and its derived scriptPubkeys, plus a `txid -> height` mirror of the
//! Txns table used by the Ingestor for O(1) dedup checks. Rebuilt from the
//! KeyManager on demand; internally serialized so it can be shared across
//! threads.

use std::collections::HashMap;
use std::sync::RwLock;

use bitcoin::{Address, Network, Script};

use crate::datastore::Datastore;
use crate::keymanager::KeyManager;
use crate::types::Hash32;

struct Inner {
    addresses: Vec<Address>,
    owned_scripts: Vec<Script>,
    watched_scripts: Vec<Script>,
    txid_height: HashMap<Hash32, i32>,
}

pub struct AddressSet {
    network: Network,
    inner: RwLock<Inner>,
}

impl AddressSet {
    pub fn new(network: Network) -> Self {
        AddressSet {
            network,
            inner: RwLock::new(Inner {
                addresses: Vec::new(),
                owned_scripts: Vec::new(),
                watched_scripts: Vec::new(),
                txid_height: HashMap::new(),
            }),
        }
    }

    /// Consult the KeyManager for all derived keys, derive P2PKH addresses
    /// for the active network, and replace the in-memory list. Also reloads
    /// watched scripts and the txid->height map from the Datastore.
    pub fn rebuild(&self, key_manager: &dyn KeyManager, datastore: &dyn Datastore) -> crate::error::Result<()> {
        let keys = key_manager.get_keys();
        let mut addresses = Vec::with_capacity(keys.len());
        let mut owned_scripts = Vec::with_capacity(keys.len());
        for key in &keys {
            let addr = key.address(self.network);
            owned_scripts.push(addr.script_pubkey());
            addresses.push(addr);
        }

        let watched_scripts = datastore.watched_scripts().get_all()?;

        let txns = datastore.txns().get_all(true)?;
        let mut txid_height = HashMap::with_capacity(txns.len());
        for txn in txns {
            txid_height.insert(txn.txid, txn.height);
        }

        let mut inner = self.inner.write().unwrap();
        inner.addresses = addresses;
        inner.owned_scripts = owned_scripts;
        inner.watched_scripts = watched_scripts;
        inner.txid_height = txid_height;
        Ok(())
    }

    /// P2PKH scripts for every address in the set. Order is stable within
    /// one rebuild.
    pub fn owned_scripts(&self) -> Vec<Script> {
        self.inner.read().unwrap().owned_scripts.clone()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.inner.read().unwrap().addresses.clone()
    }

    pub fn watched_scripts(&self) -> Vec<Script> {
        self.inner.read().unwrap().watched_scripts.clone()
    }

    pub fn contains(&self, txid: &Hash32) -> Option<i32> {
        self.inner.read().unwrap().txid_height.get(txid).copied()
    }

    /// Direct mirror update used by the Ingestor right after it commits a
    /// new or re-heighted Txn, so a concurrent `contains` check observes the
    /// change without waiting for a full `rebuild`.
    pub fn note_txid_height(&self, txid: Hash32, height: i32) {
        self.inner.write().unwrap().txid_height.insert(txid, height);
    }

    pub fn is_owned_script(&self, script: &Script) -> bool {
        self.inner.read().unwrap().owned_scripts.iter().any(|s| s == script)
    }

    pub fn is_watched_script(&self, script: &Script) -> bool {
        self.inner.read().unwrap().watched_scripts.iter().any(|s| s == script)
    }
}
