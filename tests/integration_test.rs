//! End-to-end scenarios from SPEC_FULL.md §8 (S1-S6), exercised against the
//! crate's own in-memory reference fixtures: no real network, database or
//! header-sync stack is needed to drive the ingestion/reorg engine.

use std::sync::Arc;
use std::time::SystemTime;

use bitcoin::util::bip32;
use bitcoin::{Network, OutPoint, Script, Transaction, TxIn, TxOut};

use spv_wallet_core::addressset::AddressSet;
use spv_wallet_core::callbacks::Dispatcher;
use spv_wallet_core::coinselect::CoinSelector;
use spv_wallet_core::config::WalletConfig;
use spv_wallet_core::datastore::{Datastore, MemoryDatastore};
use spv_wallet_core::error::Error;
use spv_wallet_core::fees::{FeeLevel, StaticFeeProvider};
use spv_wallet_core::ingest::Ingestor;
use spv_wallet_core::keymanager::{Bip32KeyManager, KeyManager, KeyPurpose};
use spv_wallet_core::reorg::ReorgHandler;
use spv_wallet_core::txbuilder::TxBuilder;
use spv_wallet_core::types::HEIGHT_DEAD;

struct Harness {
    ds: Arc<dyn Datastore>,
    set: Arc<AddressSet>,
    km: Arc<Bip32KeyManager>,
    ingestor: Arc<Ingestor>,
}

fn harness(seed: u8) -> Harness {
    let master = bip32::ExtendedPrivKey::new_master(Network::Testnet, &[seed; 32]).unwrap();
    let km = Arc::new(Bip32KeyManager::new(Network::Testnet, master));
    let ds: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
    let set = Arc::new(AddressSet::new(Network::Testnet));
    set.rebuild(km.as_ref(), ds.as_ref()).unwrap();
    let dispatcher = Arc::new(Dispatcher::new());
    let ingestor = Arc::new(Ingestor::new(
        Network::Testnet,
        ds.clone(),
        set.clone(),
        km.clone(),
        dispatcher,
        Vec::new(),
    ));
    Harness { ds, set, km, ingestor }
}

fn funding_tx(to: &bitcoin::Address, value: u64) -> Transaction {
    Transaction {
        version: 1,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Script::new(),
            sequence: 0xFFFF_FFFF,
            witness: vec![],
        }],
        output: vec![TxOut { value, script_pubkey: to.script_pubkey() }],
    }
}

fn spend_tx(from: OutPoint, value: u64) -> Transaction {
    Transaction {
        version: 1,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: from,
            script_sig: Script::new(),
            sequence: 0xFFFF_FFFF,
            witness: vec![],
        }],
        output: vec![TxOut { value, script_pubkey: Script::new() }],
    }
}

/// S1: receive-then-spend.
#[test]
fn s1_receive_then_spend() {
    let h = harness(1);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);

    let t1 = funding_tx(&addr, 50_000);
    let hits = h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap();
    assert_eq!(hits, 1);

    let utxos = h.ds.utxos().get_all().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].op, OutPoint { txid: t1.txid(), vout: 0 });
    assert_eq!(utxos[0].value, 50_000);
    assert_eq!(utxos[0].at_height, 100);

    let t2 = spend_tx(OutPoint { txid: t1.txid(), vout: 0 }, 49_500);
    let hits = h.ingestor.ingest(&t2, 101, SystemTime::now()).unwrap();
    assert_eq!(hits, 1);

    assert!(h.ds.utxos().get_all().unwrap().is_empty());
    let stxos = h.ds.stxos().get_all().unwrap();
    assert_eq!(stxos.len(), 1);
    assert_eq!(stxos[0].spend_height, 101);
    assert_eq!(stxos[0].spend_txid, t2.txid());

    let t1_row = h.ds.txns().get(&t1.txid()).unwrap();
    assert_eq!(t1_row.value, 50_000);
    let t2_row = h.ds.txns().get(&t2.txid()).unwrap();
    assert_eq!(t2_row.value, -50_000);
}

/// S2: reorg past the height both T1 and T2 confirmed at undoes both spends
/// and both creations.
#[test]
fn s2_reorg_undoes_the_whole_chain() {
    let h = harness(2);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);

    let t1 = funding_tx(&addr, 50_000);
    h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap();
    let t2 = spend_tx(OutPoint { txid: t1.txid(), vout: 0 }, 49_500);
    h.ingestor.ingest(&t2, 101, SystemTime::now()).unwrap();

    let reorg = ReorgHandler::new(h.ds.clone(), h.ingestor.clone());
    reorg.process_reorg(99);

    let t1_row = h.ds.txns().get(&t1.txid()).unwrap();
    assert_eq!(t1_row.height, HEIGHT_DEAD);
    let t2_row = h.ds.txns().get(&t2.txid()).unwrap();
    assert_eq!(t2_row.height, HEIGHT_DEAD);
    assert!(h.ds.utxos().get_all().unwrap().is_empty());
    assert!(h.ds.stxos().get_all().unwrap().is_empty());
}

/// S3: two unconfirmed transactions double-spend the same owned outpoint;
/// the first seen wins.
#[test]
fn s3_first_seen_resolves_the_unconfirmed_conflict() {
    let h = harness(3);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);

    let t1 = funding_tx(&addr, 50_000);
    h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap();
    let outpoint = OutPoint { txid: t1.txid(), vout: 0 };

    let a = spend_tx(outpoint, 49_000);
    let b = spend_tx(outpoint, 48_000);

    assert_eq!(h.ingestor.ingest(&a, 0, SystemTime::now()).unwrap(), 1);
    assert_eq!(h.ingestor.ingest(&b, 0, SystemTime::now()).unwrap(), 0);

    let stxos = h.ds.stxos().get_all().unwrap();
    assert_eq!(stxos.len(), 1);
    assert_eq!(stxos[0].spend_txid, a.txid());
    assert!(h.ds.txns().get(&b.txid()).is_err());
}

/// S4: the first-seen loser confirms in a block and overtakes the winner.
#[test]
fn s4_confirmation_overturns_first_seen_loser() {
    let h = harness(4);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);

    let t1 = funding_tx(&addr, 50_000);
    h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap();
    let outpoint = OutPoint { txid: t1.txid(), vout: 0 };

    let a = spend_tx(outpoint, 49_000);
    let b = spend_tx(outpoint, 48_000);
    h.ingestor.ingest(&a, 0, SystemTime::now()).unwrap();
    h.ingestor.ingest(&b, 200, SystemTime::now()).unwrap();

    let stxos = h.ds.stxos().get_all().unwrap();
    assert_eq!(stxos.len(), 1);
    assert_eq!(stxos[0].spend_txid, b.txid());
    assert_eq!(stxos[0].spend_height, 200);

    let a_row = h.ds.txns().get(&a.txid()).unwrap();
    assert_eq!(a_row.height, HEIGHT_DEAD);
}

/// S5: fee-bumping a still-unconfirmed receive sweeps its UTXO at the bump
/// fee rate and self-ingests the sweep at height 0.
#[test]
fn s5_fee_bump_sweeps_the_unconfirmed_utxo() {
    let h = harness(5);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);

    let t1 = funding_tx(&addr, 50_000);
    h.ingestor.ingest(&t1, 0, SystemTime::now()).unwrap();

    let fees = Arc::new(StaticFeeProvider::default());
    let builder = TxBuilder::new(
        WalletConfig::new(Network::Testnet),
        h.ds.clone(),
        h.km.clone(),
        fees,
    );
    let bump = builder.bump_fee(&t1.txid()).unwrap();
    assert_eq!(bump.input.len(), 1);
    assert_eq!(bump.input[0].previous_output, OutPoint { txid: t1.txid(), vout: 0 });
    assert_eq!(bump.output.len(), 1);
    assert!(bump.output[0].value < 50_000);

    let hits = h.ingestor.ingest(&bump, 0, SystemTime::now()).unwrap();
    assert_eq!(hits, 1);
    let stxos = h.ds.stxos().get_all().unwrap();
    assert_eq!(stxos.len(), 1);
    assert_eq!(stxos[0].spend_txid, bump.txid());
}

/// bump_fee preconditions: a confirmed or dead parent cannot be bumped.
#[test]
fn bump_fee_rejects_confirmed_or_dead_parents() {
    let h = harness(6);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);
    let t1 = funding_tx(&addr, 50_000);
    h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap();

    let fees = Arc::new(StaticFeeProvider::default());
    let builder = TxBuilder::new(WalletConfig::new(Network::Testnet), h.ds.clone(), h.km.clone(), fees);
    assert_eq!(builder.bump_fee(&t1.txid()).unwrap_err(), Error::BumpFeeAlreadyConfirmed);

    h.ingestor.mark_dead(&t1.txid()).unwrap();
    let builder2 = TxBuilder::new(
        WalletConfig::new(Network::Testnet),
        h.ds.clone(),
        h.km.clone(),
        Arc::new(StaticFeeProvider::default()),
    );
    assert_eq!(builder2.bump_fee(&t1.txid()).unwrap_err(), Error::BumpFeeDead);
}

/// S6: a spend below the relay dust floor is rejected before coin selection
/// ever runs.
#[test]
fn s6_dust_output_rejected_before_coin_selection() {
    let h = harness(7);
    let fees = Arc::new(StaticFeeProvider::default());
    let builder = TxBuilder::new(WalletConfig::new(Network::Testnet), h.ds.clone(), h.km.clone(), fees);

    let key = h.km.get_current_key(KeyPurpose::External).unwrap();
    let addr = key.address(Network::Testnet);
    let outputs = vec![TxOut { value: 500, script_pubkey: addr.script_pubkey() }];
    let err = builder.build_and_sign_spend(outputs, FeeLevel::Normal, 200).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    // No coins were ever touched.
    assert!(h.ds.utxos().get_all().unwrap().is_empty());
}

/// Dedup idempotence (invariant 4): re-ingesting the same tx at the same
/// height is a no-op and returns zero hits.
#[test]
fn dedup_idempotence() {
    let h = harness(8);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);
    let t1 = funding_tx(&addr, 50_000);

    assert_eq!(h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap(), 1);
    assert_eq!(h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap(), 0);
    assert_eq!(h.ds.utxos().get_all().unwrap().len(), 1);
    assert_eq!(h.ds.txns().get_all(true).unwrap().len(), 1);
}

/// Build, sort and select a real spend against a funded wallet end to end,
/// then check BIP-69 determinism: two builds from the same inputs/outputs
/// produce byte-identical layouts.
#[test]
fn coin_selection_and_build_are_deterministic() {
    let h = harness(9);
    let key = h.km.generate_child_key(KeyPurpose::External, 0).unwrap();
    let addr = key.address(Network::Testnet);
    h.km.mark_key_as_used(&key.script_hash(Network::Testnet)).unwrap();

    let t1 = funding_tx(&addr, 100_000);
    h.ingestor.ingest(&t1, 100, SystemTime::now()).unwrap();

    let selector = CoinSelector::new(h.ds.clone());
    let coins = selector.gather_coins(200).unwrap();
    assert_eq!(coins.len(), 1);

    let fees = Arc::new(StaticFeeProvider::default());
    let builder = TxBuilder::new(WalletConfig::new(Network::Testnet), h.ds.clone(), h.km.clone(), fees);
    let dest = h.km.get_current_key(KeyPurpose::External).unwrap().address(Network::Testnet);
    let outputs = vec![TxOut { value: 20_000, script_pubkey: dest.script_pubkey() }];

    let mut unsigned_a = builder.build_unsigned(outputs.clone(), 1000, 200).unwrap();
    TxBuilder::sort_bip69(&mut unsigned_a);
    let mut unsigned_b = builder.build_unsigned(outputs, 1000, 200).unwrap();
    TxBuilder::sort_bip69(&mut unsigned_b);

    assert_eq!(
        bitcoin::consensus::encode::serialize(&unsigned_a.tx),
        bitcoin::consensus::encode::serialize(&unsigned_b.tx)
    );
}
