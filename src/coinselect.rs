//! CoinSelector (SPEC_FULL.md §4.5.1-4.5.2): gathers spendable UTXOs and runs
//! the "max value-age" greedy selection used by `TxBuilder`'s fixed point.

use std::sync::Arc;

use bitcoin::Script;

use crate::config::MAX_SELECTION_INPUTS;
use crate::datastore::Datastore;
use crate::error::{Error, Result};
use crate::types::Outpoint;

/// A spendable coin, carrying just enough to select and later re-find the
/// owning UTXO by outpoint (SPEC_FULL.md §9: index back into the UTXO table
/// by outpoint rather than relying on object identity).
#[derive(Debug, Clone)]
pub struct Coin {
    pub outpoint: Outpoint,
    pub value: i64,
    pub confirmations: u32,
    pub script_pubkey: Script,
}

pub struct CoinSelector {
    datastore: Arc<dyn Datastore>,
}

impl CoinSelector {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        CoinSelector { datastore }
    }

    /// Loads all non-watch-only UTXOs as spendable coins.
    pub fn gather_coins(&self, chain_height: u32) -> Result<Vec<Coin>> {
        let utxos = self.datastore.utxos().get_all()?;
        Ok(utxos
            .into_iter()
            .filter(|u| !u.watch_only)
            .map(|u| Coin {
                outpoint: u.op,
                value: u.value,
                confirmations: u.confirmations(chain_height),
                script_pubkey: u.script_pubkey,
            })
            .collect())
    }

    /// "Max value-age with cap": sort by `value * confirmations` descending,
    /// greedily add until the running total reaches `target`, capped at
    /// `MAX_SELECTION_INPUTS` inputs.
    pub fn select(&self, mut coins: Vec<Coin>, target: i64) -> Result<(i64, Vec<Coin>)> {
        coins.sort_by(|a, b| {
            let score_a = a.value as i128 * a.confirmations as i128;
            let score_b = b.value as i128 * b.confirmations as i128;
            score_b.cmp(&score_a)
        });

        let mut total: i64 = 0;
        let mut chosen = Vec::new();
        for coin in coins {
            if total >= target {
                break;
            }
            if chosen.len() >= MAX_SELECTION_INPUTS {
                break;
            }
            total += coin.value;
            chosen.push(coin);
        }

        if total < target {
            return Err(Error::InsufficientFunds);
        }
        Ok((total, chosen))
    }
}
