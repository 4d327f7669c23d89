//! TxBuilder (SPEC_FULL.md §4.5.3-§4.5.6): the fee/change fixed point, BIP-69
//! sorting and signing, the two multisig redeem-script paths, sweep and
//! CPFP-only fee bump. Grounded on `buildTx` / `NewUnsignedTransaction` /
//! `SweepAddress` / `BumpFee` in the original Go source's `sortsignsend.go`.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::blockdata::script::Builder;
use bitcoin::{Address, OutPoint, PublicKey, Script, Transaction, TxIn, TxOut};
use secp256k1::Message;

use crate::coinselect::{Coin, CoinSelector};
use crate::config::WalletConfig;
use crate::datastore::Datastore;
use crate::error::{Error, Result};
use crate::fees::{FeeLevel, FeeProvider};
use crate::keymanager::{ExtKey, KeyManager, KeyPurpose};
use crate::redeemscript;
use crate::types::{TransactionInput, TransactionOutput};
use crate::SECP;

const TX_BASE_SIZE: i64 = 10;
const P2PKH_INPUT_SIZE: i64 = 148;
const P2PKH_OUTPUT_SIZE: i64 = 34;
const SIGHASH_ALL: u32 = 0x01;

fn estimate_size(num_inputs: usize, num_outputs: usize, input_size: i64) -> i64 {
    TX_BASE_SIZE + input_size * num_inputs as i64 + P2PKH_OUTPUT_SIZE * num_outputs as i64
}

fn fee_for_size(fee_per_kb: i64, size: i64) -> i64 {
    (fee_per_kb * size) / 1000
}

/// Mirrors `txrules.IsDustAmount`: an output is dust if its value is less
/// than 3x the cost of spending it at the relay floor.
fn is_dust(value: i64, script_len: usize, relay_fee_per_kb: i64) -> bool {
    let total_size = 8 + 1 + script_len as i64 + P2PKH_INPUT_SIZE;
    value < 3 * relay_fee_per_kb * total_size / 1000
}

pub struct UnsignedTx {
    pub tx: Transaction,
    pub change_index: Option<usize>,
    pub prev_scripts: HashMap<OutPoint, Script>,
    pub prev_values: HashMap<OutPoint, i64>,
}

pub struct TxBuilder {
    config: WalletConfig,
    datastore: Arc<dyn Datastore>,
    key_manager: Arc<dyn KeyManager>,
    coin_selector: CoinSelector,
    fee_provider: Arc<dyn FeeProvider>,
}

impl TxBuilder {
    pub fn new(
        config: WalletConfig,
        datastore: Arc<dyn Datastore>,
        key_manager: Arc<dyn KeyManager>,
        fee_provider: Arc<dyn FeeProvider>,
    ) -> Self {
        TxBuilder {
            config,
            coin_selector: CoinSelector::new(datastore.clone()),
            datastore,
            key_manager,
            fee_provider,
        }
    }

    /// The fee/change fixed point (SPEC_FULL.md §4.5.3).
    pub fn build_unsigned(
        &self,
        outputs: Vec<TxOut>,
        fee_per_kb: i64,
        chain_height: u32,
    ) -> Result<UnsignedTx> {
        let target_amount: i64 = outputs.iter().map(|o| o.value as i64).sum();
        let coins = self.coin_selector.gather_coins(chain_height)?;

        let mut target_fee = fee_for_size(fee_per_kb, estimate_size(1, outputs.len() + 1, P2PKH_INPUT_SIZE));

        loop {
            let (input_amount, chosen) = self
                .coin_selector
                .select(coins.clone(), target_amount + target_fee)?;

            let max_signed_size =
                estimate_size(chosen.len(), outputs.len() + 1, P2PKH_INPUT_SIZE);
            let max_required_fee = fee_for_size(fee_per_kb, max_signed_size);
            let remaining = input_amount - target_amount;
            if remaining < max_required_fee {
                target_fee = max_required_fee;
                continue;
            }

            let change_amount = input_amount - target_amount - max_required_fee;
            let change_key = self.key_manager.get_current_key(KeyPurpose::Internal)?;
            let change_script = change_key.address(self.config.network).script_pubkey();

            let mut final_outputs = outputs.clone();
            let mut change_index = None;
            if change_amount != 0
                && !is_dust(change_amount, change_script.as_bytes().len(), self.config.relay_fee_per_kb)
            {
                final_outputs.push(TxOut {
                    value: change_amount as u64,
                    script_pubkey: change_script,
                });
                change_index = Some(final_outputs.len() - 1);
            }

            let mut prev_scripts = HashMap::new();
            let mut prev_values = HashMap::new();
            let inputs = chosen
                .iter()
                .map(|c| {
                    prev_scripts.insert(c.outpoint, c.script_pubkey.clone());
                    prev_values.insert(c.outpoint, c.value);
                    TxIn {
                        previous_output: c.outpoint,
                        script_sig: Script::new(),
                        sequence: 0xFFFF_FFFF,
                        witness: vec![],
                    }
                })
                .collect();

            let tx = Transaction {
                version: 1,
                lock_time: 0,
                input: inputs,
                output: final_outputs,
            };

            return Ok(UnsignedTx {
                tx,
                change_index,
                prev_scripts,
                prev_values,
            });
        }
    }

    /// Applies BIP-69 sorting in place and updates `change_index` to track
    /// the change output's post-sort position (matched by script, since
    /// values may coincide but the change script is unique to this tx).
    pub fn sort_bip69(unsigned: &mut UnsignedTx) {
        let change_script = unsigned
            .change_index
            .map(|i| unsigned.tx.output[i].script_pubkey.clone());

        unsigned.tx.input.sort_by(|a, b| {
            let a_key = (a.previous_output.txid.as_ref().to_vec(), a.previous_output.vout);
            let b_key = (b.previous_output.txid.as_ref().to_vec(), b.previous_output.vout);
            a_key.cmp(&b_key)
        });
        unsigned.tx.output.sort_by(|a, b| {
            let a_key = (a.value, a.script_pubkey.as_bytes().to_vec());
            let b_key = (b.value, b.script_pubkey.as_bytes().to_vec());
            a_key.cmp(&b_key)
        });

        unsigned.change_index = change_script
            .and_then(|s| unsigned.tx.output.iter().position(|o| o.script_pubkey == s));
    }

    /// Signs every input of `unsigned.tx` as a standard P2PKH spend, sighash
    /// type "all", compressed pubkeys.
    pub fn sign(&self, unsigned: &UnsignedTx) -> Result<Transaction> {
        let mut tx = unsigned.tx.clone();
        for i in 0..tx.input.len() {
            let prevout = tx.input[i].previous_output;
            let script_pubkey = unsigned
                .prev_scripts
                .get(&prevout)
                .ok_or(Error::UtxoNotInWallet)?
                .clone();
            let script_hash = script_hash_of(&script_pubkey)?;
            let key = self.key_manager.get_key_for_script(&script_hash)?;
            tx.input[i].script_sig = sign_p2pkh_input(&tx, i, &script_pubkey, &key)?;
        }
        Ok(tx)
    }

    /// Builds, sorts and signs a simple payment to `outputs`, after a dust
    /// check on each requested output (SPEC_FULL.md §8 S6).
    pub fn build_and_sign_spend(
        &self,
        outputs: Vec<TxOut>,
        fee_level: FeeLevel,
        chain_height: u32,
    ) -> Result<Transaction> {
        for out in &outputs {
            if is_dust(out.value as i64, out.script_pubkey.as_bytes().len(), self.config.relay_fee_per_kb) {
                return Err(Error::Validation("output amount is below dust threshold".into()));
            }
        }
        let fee_per_kb = self.fee_provider.fee_per_byte(fee_level) as i64 * 1000;
        let mut unsigned = self.build_unsigned(outputs, fee_per_kb, chain_height)?;
        Self::sort_bip69(&mut unsigned);
        self.sign(&unsigned)
    }

    /// Sweeps explicit inputs to a single output (SPEC_FULL.md §4.5.6),
    /// clamping the output to zero if the fee would exceed the swept value.
    /// `redeem_script` selects the multisig signing path when present.
    pub fn sweep(
        &self,
        inputs: &[TransactionInput],
        destination: Option<Address>,
        fee_level: FeeLevel,
    ) -> Result<Transaction> {
        let total: i64 = inputs.iter().map(|i| i.value).sum();
        let dest = match destination {
            Some(a) => a,
            None => self
                .key_manager
                .get_current_key(KeyPurpose::Internal)?
                .address(self.config.network),
        };
        let out_script = dest.script_pubkey();

        let fee_per_byte = self.fee_provider.fee_per_byte(fee_level) as i64;
        let size = estimate_size(inputs.len(), 1, P2PKH_INPUT_SIZE);
        let fee = fee_per_byte * size;
        let out_value = (total - fee).max(0);

        let mut txins = Vec::with_capacity(inputs.len());
        let mut prev_scripts = HashMap::new();
        for input in inputs {
            let outpoint = OutPoint {
                txid: input.outpoint_hash,
                vout: input.outpoint_index,
            };
            if let Some(addr) = &input.linked_address {
                prev_scripts.insert(outpoint, addr.script_pubkey());
            }
            txins.push(TxIn {
                previous_output: outpoint,
                script_sig: Script::new(),
                sequence: 0xFFFF_FFFF,
                witness: vec![],
            });
        }

        let mut tx = Transaction {
            version: 1,
            lock_time: 0,
            input: txins,
            output: vec![TxOut {
                value: out_value as u64,
                script_pubkey: out_script,
            }],
        };
        sort_tx_in_place(&mut tx);

        for i in 0..tx.input.len() {
            let prevout = tx.input[i].previous_output;
            let script_pubkey = prev_scripts.get(&prevout).ok_or(Error::UtxoNotInWallet)?.clone();
            let script_hash = script_hash_of(&script_pubkey)?;
            let key = self.key_manager.get_key_for_script(&script_hash)?;
            tx.input[i].script_sig = sign_p2pkh_input(&tx, i, &script_pubkey, &key)?;
        }
        Ok(tx)
    }

    /// CPFP-only fee bump (SPEC_FULL.md §4.5.6, §9 note 3: RBF is
    /// intentionally not implemented). Finds the UTXO created by `txid`
    /// that is still unconfirmed and sweeps it at the `FeeBump` level.
    pub fn bump_fee(&self, txid: &crate::types::Hash32) -> Result<Transaction> {
        let txn = self.datastore.txns().get(txid)?;
        if txn.height > 0 {
            return Err(Error::BumpFeeAlreadyConfirmed);
        }
        if txn.height < 0 {
            return Err(Error::BumpFeeDead);
        }

        let utxos = self.datastore.utxos().get_all()?;
        let utxo = utxos
            .into_iter()
            .find(|u| u.op.txid == *txid && u.at_height == 0)
            .ok_or(Error::BumpFeeNotFound)?;

        let linked_address = Address::from_script(&utxo.script_pubkey, self.config.network);
        let input = TransactionInput {
            outpoint_hash: utxo.op.txid,
            outpoint_index: utxo.op.vout,
            linked_address,
            value: utxo.value,
        };
        self.sweep(&[input], None, FeeLevel::FeeBump)
    }

    /// Plain or timelocked multisig spend (SPEC_FULL.md §4.5.5): no coin
    /// selection; inputs are given explicitly. Fee is subtracted uniformly
    /// (integer-divided) across outputs.
    pub fn build_multisig_unsigned(
        &self,
        inputs: &[TransactionInput],
        outputs: &[TransactionOutput],
        redeem_script: &Script,
        fee_per_byte: u64,
    ) -> Result<Transaction> {
        let timelocked = redeemscript::is_timelocked(redeem_script.as_bytes());

        let mut txouts: Vec<TxOut> = outputs
            .iter()
            .map(|o| {
                let script_pubkey = o
                    .address
                    .as_ref()
                    .ok_or_else(|| Error::Validation("multisig output missing address".into()))?
                    .script_pubkey();
                Ok(TxOut { value: o.value as u64, script_pubkey })
            })
            .collect::<Result<Vec<_>>>()?;

        let size = estimate_size(inputs.len(), txouts.len(), P2PKH_INPUT_SIZE);
        let fee = fee_per_byte as i64 * size;
        if !txouts.is_empty() {
            let fee_per_output = fee / txouts.len() as i64;
            for out in &mut txouts {
                out.value = (out.value as i64 - fee_per_output).max(0) as u64;
            }
        }

        let txins: Vec<TxIn> = inputs
            .iter()
            .map(|i| TxIn {
                previous_output: OutPoint {
                    txid: i.outpoint_hash,
                    vout: i.outpoint_index,
                },
                script_sig: Script::new(),
                sequence: 0xFFFF_FFFF,
                witness: vec![],
            })
            .collect();

        let mut tx = Transaction {
            version: if timelocked { 2 } else { 1 },
            lock_time: 0,
            input: txins,
            output: txouts,
        };

        if timelocked {
            let sequence = redeemscript::lock_time_from_redeem_script(redeem_script.as_bytes())?;
            for txin in &mut tx.input {
                txin.sequence = sequence;
            }
        }

        sort_tx_in_place(&mut tx);
        Ok(tx)
    }

    /// One signer's half of a multisig spend (SPEC_FULL.md §4.5.5):
    /// produces a signature per input without assembling the final
    /// scriptSig, mirroring `CreateMultisigSignature`.
    pub fn sign_multisig_half(
        &self,
        tx: &Transaction,
        input_values: &[i64],
        redeem_script: &Script,
        key: &ExtKey,
    ) -> Result<Vec<Vec<u8>>> {
        let privkey = key.ec_privkey()?;
        let mut sigs = Vec::with_capacity(tx.input.len());
        for i in 0..tx.input.len() {
            let value = *input_values.get(i).unwrap_or(&0);
            let sighash = tx.signature_hash(i, redeem_script, SIGHASH_ALL);
            let msg = Message::from_slice(&sighash[..]).map_err(Error::Secp256k1)?;
            let sig = SECP.sign(&msg, &privkey.key);
            let mut der = sig.serialize_der();
            der.push(SIGHASH_ALL as u8);
            sigs.push(der);
        }
        Ok(sigs)
    }

    /// Combines two signers' signature sets into the final scriptSigs,
    /// mirroring `Multisign`: `OP_0 <sig1> <sig2> [OP_1 if timelocked]
    /// <redeemScript>`.
    pub fn combine_multisig(
        &self,
        mut tx: Transaction,
        sigs_a: &[Vec<u8>],
        sigs_b: &[Vec<u8>],
        redeem_script: &Script,
    ) -> Result<Transaction> {
        let timelocked = redeemscript::is_timelocked(redeem_script.as_bytes());
        for i in 0..tx.input.len() {
            let mut builder = Builder::new()
                .push_opcode(bitcoin::blockdata::opcodes::all::OP_PUSHBYTES_0)
                .push_slice(sigs_a.get(i).map(Vec::as_slice).unwrap_or(&[]))
                .push_slice(sigs_b.get(i).map(Vec::as_slice).unwrap_or(&[]));
            if timelocked {
                builder = builder.push_opcode(bitcoin::blockdata::opcodes::all::OP_PUSHNUM_1);
            }
            builder = builder.push_slice(redeem_script.as_bytes());
            tx.input[i].script_sig = builder.into_script();
        }
        Ok(tx)
    }
}

fn sort_tx_in_place(tx: &mut Transaction) {
    tx.input.sort_by(|a, b| {
        let a_key = (a.previous_output.txid.as_ref().to_vec(), a.previous_output.vout);
        let b_key = (b.previous_output.txid.as_ref().to_vec(), b.previous_output.vout);
        a_key.cmp(&b_key)
    });
    tx.output.sort_by(|a, b| {
        let a_key = (a.value, a.script_pubkey.as_bytes().to_vec());
        let b_key = (b.value, b.script_pubkey.as_bytes().to_vec());
        a_key.cmp(&b_key)
    });
}

fn script_hash_of(script: &Script) -> Result<Vec<u8>> {
    let bytes = script.as_bytes();
    if bytes.len() == 25 && bytes[0] == 0x76 && bytes[1] == 0xa9 && bytes[2] == 0x14 {
        Ok(bytes[3..23].to_vec())
    } else {
        Err(Error::Validation("not a P2PKH script".into()))
    }
}

fn sign_p2pkh_input(tx: &Transaction, index: usize, prev_script: &Script, key: &ExtKey) -> Result<Script> {
    let sighash = tx.signature_hash(index, prev_script, SIGHASH_ALL);
    let msg = Message::from_slice(&sighash[..]).map_err(Error::Secp256k1)?;
    let privkey = key.ec_privkey()?;
    let sig = SECP.sign(&msg, &privkey.key);
    let mut der = sig.serialize_der();
    der.push(SIGHASH_ALL as u8);

    let pubkey: PublicKey = key.public_key();
    Ok(Builder::new()
        .push_slice(&der)
        .push_slice(&pubkey.to_bytes())
        .into_script())
}

/// Fee estimate for an arbitrary input/output set at a flat rate, used by
/// wallet-level `estimate_fee`/`estimate_spend_fee` callers (SPEC_FULL.md
/// §4.5: EstimateFee / EstimateSpendFee).
pub fn estimate_fee(num_inputs: usize, outputs: &[TransactionOutput], fee_per_byte: u64) -> u64 {
    let size = estimate_size(num_inputs, outputs.len(), P2PKH_INPUT_SIZE);
    (size * fee_per_byte as i64).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::util::bip32;
    use crate::datastore::MemoryDatastore;
    use crate::fees::StaticFeeProvider;
    use crate::keymanager::Bip32KeyManager;
    use crate::types::Utxo;
    use bitcoin::Network;
    use bitcoin_hashes::Hash;

    fn master() -> bip32::ExtendedPrivKey {
        bip32::ExtendedPrivKey::new_master(Network::Testnet, &[11u8; 32]).unwrap()
    }

    fn setup() -> TxBuilder {
        let km = Arc::new(Bip32KeyManager::new(Network::Testnet, master()));
        let ds: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let fees = Arc::new(StaticFeeProvider::default());
        TxBuilder::new(WalletConfig::new(Network::Testnet), ds, km, fees)
    }

    #[test]
    fn dust_outputs_are_rejected_before_coin_selection() {
        let builder = setup();
        let addr = builder
            .key_manager
            .get_current_key(KeyPurpose::External)
            .unwrap()
            .address(Network::Testnet);
        let outputs = vec![TxOut { value: 500, script_pubkey: addr.script_pubkey() }];
        let err = builder.build_and_sign_spend(outputs, FeeLevel::Normal, 200).unwrap_err();
        assert_eq!(err, Error::Validation("output amount is below dust threshold".into()));
    }

    #[test]
    fn sweep_clamps_to_zero_when_fee_exceeds_value() {
        let builder = setup();
        let key = builder.key_manager.get_current_key(KeyPurpose::External).unwrap();
        let addr = key.address(Network::Testnet);
        let input = TransactionInput {
            outpoint_hash: bitcoin_hashes::sha256d::Hash::from_slice(&[5u8; 32]).unwrap(),
            outpoint_index: 0,
            linked_address: Some(addr),
            value: 1,
        };
        let tx = builder.sweep(&[input], None, FeeLevel::Priority).unwrap();
        assert_eq!(tx.output[0].value, 0);
    }

    #[test]
    fn build_unsigned_selects_enough_coins_and_adds_change() {
        let builder = setup();
        let key = builder.key_manager.get_current_key(KeyPurpose::External).unwrap();
        let script_hash = key.script_hash(Network::Testnet);
        builder.key_manager.mark_key_as_used(&script_hash).unwrap();

        let utxo = Utxo {
            op: OutPoint {
                txid: bitcoin_hashes::sha256d::Hash::from_slice(&[1u8; 32]).unwrap(),
                vout: 0,
            },
            at_height: 100,
            value: 100_000,
            script_pubkey: key.address(Network::Testnet).script_pubkey(),
            watch_only: false,
        };
        builder.datastore.utxos().put(utxo).unwrap();

        let dest = builder.key_manager.get_current_key(KeyPurpose::External).unwrap().address(Network::Testnet);
        let outputs = vec![TxOut { value: 10_000, script_pubkey: dest.script_pubkey() }];
        let unsigned = builder.build_unsigned(outputs, 1000, 200).unwrap();
        assert!(unsigned.tx.input.len() >= 1);
        assert!(unsigned.change_index.is_some());
    }
}
