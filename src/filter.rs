//! FilterBuilder (SPEC_FULL.md §4.2): derives the Bloom filter that expresses
//! the wallet's interest set to its peers. No bloom-filter crate exists in
//! the teacher's or the rest of the pack's dependency stacks, so the filter
//! itself is implemented here from the BIP-0037 algorithm (murmur3 rolling
//! hash over `k` seeded hash functions), the same algorithm the original
//! Go source's `bchutil/bloom` collaborator implements.

use bitcoin::Script;

use crate::datastore::Datastore;
use crate::types::{Outpoint, Utxo};

/// BIP-37 hard limits.
const MAX_BLOOM_FILTER_SIZE: usize = 36_000;
const MAX_HASH_FUNCS: u32 = 50;

const LN2_SQUARED: f64 = std::f64::consts::LN_2 * std::f64::consts::LN_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterUpdate {
    /// Match BIP-37 "update all": every matched output adds its outpoint to
    /// the filter server-side as well, so spends are caught too.
    UpdateAll,
}

/// A BIP-37 style Bloom filter. Returned by value; never shared after
/// construction (SPEC_FULL.md §5).
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_hash_funcs: u32,
    tweak: u32,
    pub update: FilterUpdate,
}

impl BloomFilter {
    pub fn new(num_elements: u32, false_positive_rate: f64, tweak: u32, update: FilterUpdate) -> Self {
        let n = num_elements.max(1) as f64;
        let fp_rate = if false_positive_rate > 0.0 {
            false_positive_rate
        } else {
            // "rate 0 means the library's minimum": clamp to the smallest
            // positive rate representable, which drives the filter to the
            // tightest (largest) size the hard cap allows.
            f64::MIN_POSITIVE
        };

        let num_bits = (-1.0 / LN2_SQUARED * n * fp_rate.ln())
            .max(8.0)
            .min((MAX_BLOOM_FILTER_SIZE * 8) as f64);
        let size_bytes = ((num_bits / 8.0).ceil() as usize).max(1);

        let num_hash_funcs = (((size_bytes * 8) as f64 / n) * std::f64::consts::LN_2)
            .max(1.0)
            .min(MAX_HASH_FUNCS as f64) as u32;

        BloomFilter {
            bits: vec![0u8; size_bytes],
            num_hash_funcs,
            tweak,
            update,
        }
    }

    fn hash(&self, hash_num: u32, data: &[u8]) -> u32 {
        let seed = hash_num.wrapping_mul(0xFBA4_C795).wrapping_add(self.tweak);
        murmur3_32(seed, data)
    }

    fn bit_index(&self, hash_num: u32, data: &[u8]) -> usize {
        let nbits = (self.bits.len() * 8) as u32;
        (self.hash(hash_num, data) % nbits) as usize
    }

    pub fn insert(&mut self, data: &[u8]) {
        for i in 0..self.num_hash_funcs {
            let idx = self.bit_index(i, data);
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.num_hash_funcs).all(|i| {
            let idx = self.bit_index(i, data);
            self.bits[idx / 8] & (1 << (idx % 8)) != 0
        })
    }

    pub fn insert_outpoint(&mut self, op: &Outpoint) {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(op.txid.as_ref());
        buf.extend_from_slice(&op.vout.to_le_bytes());
        self.insert(&buf);
    }

    pub fn contains_outpoint(&self, op: &Outpoint) -> bool {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(op.txid.as_ref());
        buf.extend_from_slice(&op.vout.to_le_bytes());
        self.contains(&buf)
    }

    pub fn num_hash_funcs(&self) -> u32 {
        self.num_hash_funcs
    }

    pub fn size_bytes(&self) -> usize {
        self.bits.len()
    }
}

/// Extracts the 20-byte pubkey-hash ("scriptAddress") from a standard P2PKH
/// script, accepting the false-positive risk the spec calls out explicitly
/// (we never look at opcodes, only the embedded hash).
fn script_address(script: &Script) -> Option<Vec<u8>> {
    let bytes = script.as_bytes();
    if bytes.len() == 25 && bytes[0] == 0x76 && bytes[1] == 0xa9 && bytes[2] == 0x14 {
        Some(bytes[3..23].to_vec())
    } else if bytes.len() == 23 && bytes[0] == 0xa9 && bytes[1] == 0x14 {
        // P2SH: still a 20-byte hash, just at a different offset.
        Some(bytes[2..22].to_vec())
    } else {
        None
    }
}

/// Builds the Bloom filter over the wallet's interest set (SPEC_FULL.md
/// §4.2). Storage errors during enumeration degrade the filter (fewer
/// elements inserted) rather than abort, per the spec's explicit "never
/// returns an error" rule.
pub struct FilterBuilder<'a> {
    pub datastore: &'a dyn Datastore,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(datastore: &'a dyn Datastore) -> Self {
        FilterBuilder { datastore }
    }

    pub fn build_filter(
        &self,
        owned_scripts: &[Script],
        watched_scripts: &[Script],
        extra_seeds: &[Vec<u8>],
        tweak: u32,
    ) -> BloomFilter {
        let utxos = self.datastore.utxos().get_all().unwrap_or_default();
        let stxos = self.datastore.stxos().get_all().unwrap_or_default();

        let element_count = owned_scripts.len()
            + utxos.len()
            + stxos.len()
            + watched_scripts.len()
            + extra_seeds.len();

        let mut filter = BloomFilter::new(element_count.max(1) as u32, 0.0, tweak, FilterUpdate::UpdateAll);

        for script in owned_scripts {
            if let Some(addr) = script_address(script) {
                filter.insert(&addr);
            }
        }
        for utxo in &utxos {
            filter.insert_outpoint(&utxo.op);
        }
        for stxo in &stxos {
            filter.insert_outpoint(&stxo.utxo.op);
        }
        for script in watched_scripts {
            if let Some(addr) = script_address(script) {
                filter.insert(&addr);
            }
        }
        for seed in extra_seeds {
            filter.insert(seed);
        }

        filter
    }
}

/// Returns true iff `utxo`'s outpoint and owning script are both covered by
/// `filter` — used by the "bloom coverage" property test (SPEC_FULL.md §8.8).
pub fn covers_utxo(filter: &BloomFilter, utxo: &Utxo) -> bool {
    filter.contains_outpoint(&utxo.op)
}

/// 32-bit murmur3 (x86), as used by BIP-0037 bloom filters.
fn murmur3_32(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let nblocks = data.len() / 4;

    for block in data[..nblocks * 4].chunks_exact(4) {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1: u32 = 0;
    match tail.len() {
        3 => {
            k1 ^= (tail[2] as u32) << 16;
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
            h1 ^= k1;
        }
        2 => {
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
            h1 ^= k1;
        }
        1 => {
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
            h1 ^= k1;
        }
        _ => {}
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}
