use std::{error, fmt, result};

use bitcoin::util::bip32;
use secp256k1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Bip32(bip32::Error),
    Secp256k1(secp256k1::Error),

    /// A txid, outpoint or key was looked up and not present.
    NotFound(String),
    /// Sanity check failed: malformed tx, malformed redeem script, dust.
    Validation(String),
    /// Coin selection could not meet `target + maxFee`.
    InsufficientFunds,
    /// `bump_fee` preconditions.
    BumpFeeAlreadyConfirmed,
    BumpFeeDead,
    BumpFeeNotFound,
    /// Wrapped error from the Datastore.
    Storage(String),
    /// Only ever produced while shutting down.
    Cancelled,

    /// A signing input's previous output script doesn't belong to this
    /// wallet (no key or no tracked script for it).
    UtxoNotInWallet,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Bip32(ref e) => write!(f, "BIP-32 error: {}", e),
            Error::Secp256k1(ref e) => write!(f, "secp256k1 error: {}", e),
            Error::NotFound(ref what) => write!(f, "not found: {}", what),
            Error::Validation(ref msg) => write!(f, "validation failed: {}", msg),
            Error::InsufficientFunds => f.write_str("not enough funds to fund the given transaction"),
            Error::BumpFeeAlreadyConfirmed => f.write_str("transaction is confirmed, cannot bump fee"),
            Error::BumpFeeDead => f.write_str("cannot bump fee of a dead transaction"),
            Error::BumpFeeNotFound => f.write_str("transaction either doesn't exist or has already been spent"),
            Error::Storage(ref msg) => write!(f, "storage error: {}", msg),
            Error::Cancelled => f.write_str("operation cancelled during shutdown"),
            Error::UtxoNotInWallet => f.write_str("a UTXO was used that is not part of the wallet"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Bip32(ref e) => Some(e),
            Error::Secp256k1(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Error {
        Error::Secp256k1(e)
    }
}

impl From<bip32::Error> for Error {
    fn from(e: bip32::Error) -> Error {
        Error::Bip32(e)
    }
}

pub type Result<T> = result::Result<T, Error>;
