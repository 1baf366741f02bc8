//! End-to-end indexing flow over the in-memory reference backends:
//! provision shards, fan a block's transactions and transfers out to
//! per-address index rows, overlay pending-transaction data, and read the
//! rows back through paginated range scans.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{address, Address, TxHash, U256};
use serde_json::json;
use uuid::Uuid;

use chainshard::cache::{CacheScopes, MemoryCache};
use chainshard::cursor;
use chainshard::fanout::{EconomyAddressIndexWriter, FanoutParams};
use chainshard::pending::PendingTxReconciler;
use chainshard::shards::{EconomyUserPair, EntityKind, ShardDirectory};
use chainshard::store::{tables, ItemKey, MemoryStore, QueryOptions, TableStore};
use chainshard::types::{address_identifier, TransactionReceipt, TransferEvent, NATIVE_ECONOMY};

const CHAIN: u64 = 2000;
const TIMESTAMP: u64 = 1_700_000_000;

struct Harness {
    store: Arc<MemoryStore>,
    directory: Arc<ShardDirectory>,
    writer: EconomyAddressIndexWriter,
    reconciler: PendingTxReconciler,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let scopes = Arc::new(CacheScopes::new(Arc::new(MemoryCache::with_defaults())));
    scopes.register_chain(CHAIN, Arc::new(MemoryCache::with_defaults()));

    let dyn_store: Arc<dyn TableStore> = store.clone();
    let directory = Arc::new(ShardDirectory::new(dyn_store.clone(), Arc::clone(&scopes)));
    let writer = EconomyAddressIndexWriter::new(dyn_store.clone(), Arc::clone(&directory));
    let reconciler = PendingTxReconciler::new(dyn_store, scopes, CHAIN);

    Harness {
        store,
        directory,
        writer,
        reconciler,
    }
}

fn receipt(hash: TxHash, from: Address, to: Address, index: u64) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: hash,
        from,
        to: Some(to),
        contract_address: None,
        transaction_index: index,
        block_number: 100,
        status: 1,
    }
}

async fn provision_and_assign(h: &Harness, pairs: &[(Address, Address)]) {
    for number in 1..=2 {
        h.directory
            .provision_shard(EntityKind::EconomyAddress, CHAIN, number, true)
            .await
            .unwrap();
    }
    for (economy, user) in pairs {
        h.directory
            .allocate_economy_address(
                CHAIN,
                &EconomyUserPair {
                    economy: *economy,
                    user: *user,
                },
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn full_block_flow_writes_and_pages_rows() {
    let h = harness();

    let alice = address!("0000000000000000000000000000000000000a11");
    let bob = address!("0000000000000000000000000000000000000b0b");
    let token = address!("000000000000000000000000000000000000beef");

    provision_and_assign(
        &h,
        &[
            (NATIVE_ECONOMY, alice),
            (NATIVE_ECONOMY, bob),
            (token, alice),
            (token, bob),
            (token, token),
        ],
    )
    .await;

    // Three native transactions from alice plus one token transfer.
    let mut receipts = HashMap::new();
    let mut transfers = HashMap::new();
    for index in 0..3u64 {
        let hash = TxHash::with_last_byte(10 + index as u8);
        receipts.insert(hash, receipt(hash, alice, bob, index));
    }
    let transfer_hash = TxHash::with_last_byte(10);
    transfers.insert(
        transfer_hash,
        vec![TransferEvent {
            transaction_hash: transfer_hash,
            contract_address: token,
            from: alice,
            to: bob,
            amount: U256::from(1_000),
            event_index: 1,
        }],
    );

    let report = h
        .writer
        .run(FanoutParams {
            chain_id: CHAIN,
            block_timestamp: TIMESTAMP,
            receipts,
            transfers,
        })
        .await
        .unwrap();

    // 3 txs x 2 native participants + 1 transfer x 3 token participants.
    assert_eq!(report.rows_written, 9);
    assert!(report.shards_not_found.is_empty());

    // Alice's native history pages newest-first across her shard.
    let alice_id = address_identifier(&alice, CHAIN, &NATIVE_ECONOMY);
    let location = h
        .directory
        .economy_address_resolver(CHAIN)
        .fetch(&[EconomyUserPair {
            economy: NATIVE_ECONOMY,
            user: alice,
        }])
        .await
        .unwrap()
        .into_values()
        .next()
        .unwrap();
    let table = tables::economy_address_transactions(CHAIN, location.shard_number);

    let first_page = h
        .store
        .query(
            &table,
            &alice_id,
            QueryOptions {
                ascending: false,
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first_page.items.len(), 2);
    let continuation = first_page.last_evaluated_key.expect("a page remains");

    let second_page = h
        .store
        .query(
            &table,
            &alice_id,
            QueryOptions {
                ascending: false,
                limit: Some(10),
                exclusive_start_key: Some(continuation),
            },
        )
        .await
        .unwrap();
    assert_eq!(second_page.items.len(), 1);
    assert!(second_page.last_evaluated_key.is_none());

    // Cursors embedded in the sort keys decode back to block coordinates.
    let page = h
        .store
        .query(&table, &alice_id, QueryOptions::default())
        .await
        .unwrap();
    for item in &page.items {
        let hash = item["transaction_hash"].as_str().unwrap();
        assert!(hash.starts_with("0x"));
    }
}

#[tokio::test]
async fn rerun_of_identical_block_converges() {
    let h = harness();
    let alice = address!("0000000000000000000000000000000000000a11");
    let bob = address!("0000000000000000000000000000000000000b0b");
    provision_and_assign(&h, &[(NATIVE_ECONOMY, alice), (NATIVE_ECONOMY, bob)]).await;

    let hash = TxHash::with_last_byte(0xab);
    let mut receipts = HashMap::new();
    receipts.insert(hash, receipt(hash, alice, bob, 0));
    let params = FanoutParams {
        chain_id: CHAIN,
        block_timestamp: TIMESTAMP,
        receipts,
        transfers: HashMap::new(),
    };

    h.writer.run(params.clone()).await.unwrap();
    h.writer.run(params.clone()).await.unwrap();
    h.writer.run(params).await.unwrap();

    for user in [alice, bob] {
        let id = address_identifier(&user, CHAIN, &NATIVE_ECONOMY);
        let mut total = 0;
        for shard in 1..=2 {
            total += h
                .store
                .query(
                    &tables::economy_address_transactions(CHAIN, shard),
                    &id,
                    QueryOptions::default(),
                )
                .await
                .unwrap()
                .items
                .len();
        }
        assert_eq!(total, 1, "exactly one row per role address after re-runs");
    }
}

#[tokio::test]
async fn pending_overlay_survives_into_confirmed_records() {
    let h = harness();
    let hash = TxHash::with_last_byte(0x77);
    let uuid = Uuid::new_v4();

    // Submission-time record, keyed by hash and by uuid.
    h.store
        .put(
            &tables::pending_transactions_by_hash(CHAIN),
            ItemKey::hash_only(format!("{hash:#x}")),
            json!({
                "transaction_uuid": uuid,
                "transaction_hash": format!("{hash:#x}"),
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .await
        .unwrap();
    h.store
        .put(
            &tables::pending_transactions(CHAIN),
            ItemKey::hash_only(uuid.to_string()),
            json!({
                "transaction_uuid": uuid,
                "gasPrice": "5",
                "transferAmount": "250",
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .await
        .unwrap();

    let mut confirmed = HashMap::new();
    confirmed.insert(hash, json!({"gasPrice": "7", "status": "1"}));

    let merged = h.reconciler.reconcile(confirmed).await.unwrap();
    let record = &merged[&hash];
    assert_eq!(record["gasPrice"], json!("7"));
    assert_eq!(record["status"], json!("1"));
    assert_eq!(record["transferAmount"], json!("250"));
}

#[tokio::test]
async fn cursor_sort_keys_order_rows_by_block_position() {
    // Rows written under ascending (tx_index, event_index) must come back in
    // the same order from an ascending range scan.
    let coordinates = [(0u32, 0u32), (0, 1), (0, 2), (1, 0), (2, 5)];
    let mut sorted: Vec<String> = coordinates
        .iter()
        .map(|(tx, ev)| cursor::encode(TIMESTAMP, *tx, *ev).unwrap())
        .collect();
    let mut expected = sorted.clone();
    expected.sort();
    sorted.sort_by(|a, b| {
        let da = cursor::decode(a).unwrap();
        let db = cursor::decode(b).unwrap();
        (da.power1, da.power2).cmp(&(db.power1, db.power2))
    });
    assert_eq!(sorted, expected);
}
