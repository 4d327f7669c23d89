use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Relay-level dust floor, expressed as satoshis per kilobyte, used by
/// `txbuilder::is_dust` the way `txrules.DefaultRelayFeePerKb` is used in
/// the original source.
pub const DEFAULT_RELAY_FEE_PER_KB: i64 = 1000;

/// Upper bound on inputs a single coin selection pass will gather, matching
/// the "cap at a high max-inputs bound" rule in SPEC_FULL.md §4.5.2.
pub const MAX_SELECTION_INPUTS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    pub network: Network,

    /// Extra opaque byte strings to seed into every bloom filter, matched
    /// against output scripts as a substring (§4.3.1.d).
    pub extra_filter_seeds: Vec<Vec<u8>>,

    /// Relay dust floor used when deciding whether a change output or a
    /// requested spend amount is worth creating.
    pub relay_fee_per_kb: i64,
}

impl WalletConfig {
    pub fn new(network: Network) -> Self {
        WalletConfig {
            network,
            extra_filter_seeds: Vec::new(),
            relay_fee_per_kb: DEFAULT_RELAY_FEE_PER_KB,
        }
    }
}
