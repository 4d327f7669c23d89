//! Broadcaster (SPEC_FULL.md §4.6): the only path by which a locally built
//! transaction enters the wallet's own books before a peer ever relays it
//! back. Self-ingests at height 0 so the new outputs/spends are visible
//! immediately, then hands the transaction to the wire service.

use std::sync::Arc;
use std::time::SystemTime;

use bitcoin::Transaction;

use crate::error::Result;
use crate::ingest::Ingestor;
use crate::wire::WireService;

pub struct Broadcaster {
    ingestor: Arc<Ingestor>,
    wire: Arc<dyn WireService>,
}

impl Broadcaster {
    pub fn new(ingestor: Arc<Ingestor>, wire: Arc<dyn WireService>) -> Self {
        Broadcaster { ingestor, wire }
    }

    /// Folds `tx` into the wallet at height 0, then announces it to peers
    /// and asks them to refresh their bloom filter for the new outputs.
    pub fn broadcast(&self, tx: &Transaction) -> Result<u32> {
        let hits = self.ingestor.ingest(tx, 0, SystemTime::now())?;
        self.wire.announce_transaction(tx);
        self.wire.notify_update_filters();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressset::AddressSet;
    use crate::callbacks::Dispatcher;
    use crate::datastore::{Datastore, MemoryDatastore};
    use crate::keymanager::{Bip32KeyManager, KeyPurpose};
    use bitcoin::util::bip32;
    use bitcoin::{Network, OutPoint, Script, TxIn, TxOut};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWire {
        announced: AtomicUsize,
        filter_updates: AtomicUsize,
    }

    impl WireService for CountingWire {
        fn notify_update_filters(&self) {
            self.filter_updates.fetch_add(1, Ordering::SeqCst);
        }
        fn announce_transaction(&self, _tx: &Transaction) {
            self.announced.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn broadcast_self_ingests_and_notifies_the_wire_service() {
        let master = bip32::ExtendedPrivKey::new_master(Network::Testnet, &[7u8; 32]).unwrap();
        let km = Arc::new(Bip32KeyManager::new(Network::Testnet, master));
        let key = km.generate_child_key(KeyPurpose::External, 0).unwrap();
        let addr = key.address(Network::Testnet);
        let ds: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let set = Arc::new(AddressSet::new(Network::Testnet));
        set.rebuild(km.as_ref(), ds.as_ref()).unwrap();
        let dispatcher = Arc::new(Dispatcher::new());
        let ingestor = Arc::new(Ingestor::new(Network::Testnet, ds.clone(), set, km, dispatcher, Vec::new()));
        let wire = Arc::new(CountingWire {
            announced: AtomicUsize::new(0),
            filter_updates: AtomicUsize::new(0),
        });
        let broadcaster = Broadcaster::new(ingestor, wire.clone());

        let tx = Transaction {
            version: 1,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence: 0xFFFF_FFFF,
                witness: vec![],
            }],
            output: vec![TxOut { value: 10_000, script_pubkey: addr.script_pubkey() }],
        };

        let hits = broadcaster.broadcast(&tx).unwrap();
        assert_eq!(hits, 1);
        assert_eq!(wire.announced.load(Ordering::SeqCst), 1);
        assert_eq!(wire.filter_updates.load(Ordering::SeqCst), 1);
        assert_eq!(ds.utxos().get_all().unwrap().len(), 1);
    }
}
