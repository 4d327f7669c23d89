//! External collaborator: HD key derivation (SPEC_FULL.md §6.2). Out of
//! scope for the core per the original spec's Non-goals; `Bip32KeyManager`
//! below is a reference implementation grounded on the teacher's own
//! `extended_pubkey` / `base_derivation_path` / `next_address_child`
//! derivation logic in `wallet.rs`, just enough to drive this crate's own
//! tests end to end.

use std::collections::HashMap;
use std::sync::Mutex;

use bitcoin::util::bip32;
use bitcoin::{Address, Network, PrivateKey, PublicKey};

use crate::error::{Error, Result};
use crate::SECP;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    External,
    Internal,
}

/// A single derived key: enough to produce an address, a scriptPubkey, and
/// (if we hold the private extended key) a signing key.
#[derive(Clone)]
pub struct ExtKey {
    pub purpose: KeyPurpose,
    pub index: u32,
    pub xpub: bip32::ExtendedPubKey,
    xpriv: Option<bip32::ExtendedPrivKey>,
}

impl ExtKey {
    pub fn public_key(&self) -> PublicKey {
        self.xpub.public_key
    }

    pub fn address(&self, network: Network) -> Address {
        Address::p2pkh(&self.xpub.public_key, network)
    }

    pub fn script_hash(&self, network: Network) -> Vec<u8> {
        self.address(network).script_pubkey().as_bytes()[3..23].to_vec()
    }

    pub fn ec_privkey(&self) -> Result<PrivateKey> {
        let xpriv = self
            .xpriv
            .ok_or_else(|| Error::NotFound("private key not available for this ExtKey".into()))?;
        Ok(PrivateKey {
            compressed: true,
            network: xpriv.network,
            key: xpriv.private_key.key,
        })
    }
}

pub trait KeyManager: Send + Sync {
    fn get_keys(&self) -> Vec<ExtKey>;
    fn generate_child_key(&self, purpose: KeyPurpose, index: u32) -> Result<ExtKey>;
    fn mark_key_as_used(&self, script_hash: &[u8]) -> Result<()>;
    fn get_key_for_script(&self, script_hash: &[u8]) -> Result<ExtKey>;
    fn get_current_key(&self, purpose: KeyPurpose) -> Result<ExtKey>;
}

struct Bip32KeyManagerState {
    next_index: HashMap<KeyPurpose, u32>,
    derived: HashMap<Vec<u8>, ExtKey>,
    used: std::collections::HashSet<Vec<u8>>,
}

/// Non-hardened `m / purpose' / index` derivation from a single master
/// extended private key, where `purpose'` is a fixed hardened child per
/// `KeyPurpose` (0' for external, 1' for internal), matching the teacher's
/// single `base_derivation_path` generalized to two branches.
pub struct Bip32KeyManager {
    network: Network,
    master_xpriv: bip32::ExtendedPrivKey,
    state: Mutex<Bip32KeyManagerState>,
}

impl Bip32KeyManager {
    pub fn new(network: Network, master_xpriv: bip32::ExtendedPrivKey) -> Self {
        let mut next_index = HashMap::new();
        next_index.insert(KeyPurpose::External, 0);
        next_index.insert(KeyPurpose::Internal, 0);
        Bip32KeyManager {
            network,
            master_xpriv,
            state: Mutex::new(Bip32KeyManagerState {
                next_index,
                derived: HashMap::new(),
                used: std::collections::HashSet::new(),
            }),
        }
    }

    fn branch_path(purpose: KeyPurpose) -> bip32::DerivationPath {
        let branch = match purpose {
            KeyPurpose::External => 0,
            KeyPurpose::Internal => 1,
        };
        vec![bip32::ChildNumber::from_hardened_idx(branch).expect("valid hardened index")].into()
    }

    fn derive(&self, purpose: KeyPurpose, index: u32) -> Result<ExtKey> {
        let mut path = Bip32KeyManager::branch_path(purpose);
        path = path.child(bip32::ChildNumber::from_normal_idx(index)?);
        let child_xpriv = self.master_xpriv.derive_priv(&SECP, &path)?;
        let xpub = bip32::ExtendedPubKey::from_private(&SECP, &child_xpriv);
        Ok(ExtKey {
            purpose,
            index,
            xpub,
            xpriv: Some(child_xpriv),
        })
    }
}

impl KeyManager for Bip32KeyManager {
    fn get_keys(&self) -> Vec<ExtKey> {
        self.state.lock().unwrap().derived.values().cloned().collect()
    }

    fn generate_child_key(&self, purpose: KeyPurpose, index: u32) -> Result<ExtKey> {
        let key = self.derive(purpose, index)?;
        let script_hash = key.script_hash(self.network);
        let mut state = self.state.lock().unwrap();
        state.derived.insert(script_hash, key.clone());
        let next = state.next_index.entry(purpose).or_insert(0);
        if index >= *next {
            *next = index + 1;
        }
        Ok(key)
    }

    /// Marking a script used is what advances the current-key pointer, not
    /// `get_current_key` itself — otherwise every lookup of "the" current
    /// address would hand out a new one.
    fn mark_key_as_used(&self, script_hash: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.used.insert(script_hash.to_vec());
        if let Some(key) = state.derived.get(script_hash).cloned() {
            let next = state.next_index.entry(key.purpose).or_insert(0);
            if key.index >= *next {
                *next = key.index + 1;
            }
        }
        Ok(())
    }

    fn get_key_for_script(&self, script_hash: &[u8]) -> Result<ExtKey> {
        self.state
            .lock()
            .unwrap()
            .derived
            .get(script_hash)
            .cloned()
            .ok_or_else(|| Error::NotFound("no key for script".into()))
    }

    /// Returns the key at the current (unused) index for `purpose` without
    /// advancing the pointer, deriving and caching it on first access so
    /// repeated calls are idempotent.
    fn get_current_key(&self, purpose: KeyPurpose) -> Result<ExtKey> {
        let index = {
            let state = self.state.lock().unwrap();
            *state.next_index.get(&purpose).unwrap_or(&0)
        };
        {
            let state = self.state.lock().unwrap();
            if let Some(found) = state.derived.values().find(|k| k.purpose == purpose && k.index == index) {
                return Ok(found.clone());
            }
        }
        let key = self.derive(purpose, index)?;
        let script_hash = key.script_hash(self.network);
        self.state.lock().unwrap().derived.insert(script_hash, key.clone());
        Ok(key)
    }
}
