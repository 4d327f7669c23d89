//! External collaborator: the P2P wire service (SPEC_FULL.md §6.4). The core
//! never dispatches wire messages itself; it only notifies this channel that
//! the wallet's interest set changed and the peer-side bloom filter should
//! be refreshed.

use bitcoin::Transaction;

/// Opaque signal asking the wire service to rebuild and resend its bloom
/// filter to connected peers.
#[derive(Debug, Clone, Copy)]
pub struct UpdateFiltersMsg;

pub trait WireService: Send + Sync {
    fn notify_update_filters(&self);

    /// Announce (or send) a transaction to connected peers.
    fn announce_transaction(&self, tx: &Transaction);
}
