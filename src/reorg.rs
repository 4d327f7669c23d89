//! ReorgHandler (SPEC_FULL.md §4.4): reacts to a HeaderChain rollback by
//! killing every transaction confirmed past the new tip.

use std::sync::Arc;

use crate::datastore::Datastore;
use crate::ingest::Ingestor;

pub struct ReorgHandler {
    datastore: Arc<dyn Datastore>,
    ingestor: Arc<Ingestor>,
}

impl ReorgHandler {
    pub fn new(datastore: Arc<dyn Datastore>, ingestor: Arc<Ingestor>) -> Self {
        ReorgHandler { datastore, ingestor }
    }

    /// Walks every stored Txn (including watch-only) in reverse height order
    /// and marks dead everything confirmed above `last_good_height`. Errors
    /// on individual txs are logged and do not abort the loop (SPEC_FULL.md
    /// §7: "errors on individual sub-rows abort that sub-row only").
    pub fn process_reorg(&self, last_good_height: i32) {
        let mut txns = match self.datastore.txns().get_all(true) {
            Ok(txns) => txns,
            Err(e) => {
                log::error!("process_reorg: failed to enumerate txns: {}", e);
                return;
            }
        };
        txns.sort_by(|a, b| b.height.cmp(&a.height));

        for txn in txns {
            if txn.height > last_good_height {
                if let Err(e) = self.ingestor.mark_dead(&txn.txid) {
                    log::warn!("process_reorg: failed to mark {} dead: {}", txn.txid, e);
                }
            }
        }
    }
}
