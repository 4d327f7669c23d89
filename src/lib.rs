// Rust Bitcoin Wallet
// Written in 2019 by
//   Steven Roose <steven@stevenroose.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the CC0 Public Domain Dedication
// along with this software.
// If not, see <http://creativecommons.org/publicdomain/zero/1.0/>.
//

//! # SPV Wallet Core
//!
//! The transaction/UTXO ingestion and reorganization engine of an SPV
//! wallet, together with its bloom-filter construction and coin-selection /
//! transaction-building collaborators. The peer-to-peer wire service, HD
//! key derivation, persistent storage and header verification themselves
//! are external collaborators, consumed here only through the traits in
//! `datastore`, `keymanager`, `headerchain` and `wire`.

#![crate_name = "spv_wallet_core"]

// Coding conventions
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

#[macro_use]
extern crate lazy_static;

pub mod addressset;
pub mod broadcaster;
pub mod callbacks;
pub mod coinselect;
pub mod config;
pub mod datastore;
pub mod error;
pub mod fees;
pub mod filter;
pub mod headerchain;
pub mod ingest;
pub mod keymanager;
pub mod redeemscript;
pub mod reorg;
pub mod txbuilder;
pub mod types;
pub mod wire;

lazy_static! {
    static ref SECP: secp256k1::Secp256k1<secp256k1::All> = secp256k1::Secp256k1::new();
}
