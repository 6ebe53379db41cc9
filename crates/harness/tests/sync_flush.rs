use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tripledger_core::{Collection, EntityKind, EntityRecord, RecordId};
use tripledger_harness::{Call, FlakyStore, MockServer, TestClient, init_tracing, wait_for};
use tripledger_storage::LocalStore;

/// Client that queued `notes` as expenses while offline and is now back
/// online, with the auto-sync listener stopped so the test drives syncing.
async fn client_with_queued(notes: &[&str]) -> Result<TestClient, Box<dyn std::error::Error>> {
    init_tracing();
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    client.service.dispose();
    client.go_offline();
    for (i, note) in notes.iter().enumerate() {
        let outcome = client.add_expense(100 * (i as i64 + 1), note).await;
        assert!(outcome.is_offline);
    }
    client.go_online();
    Ok(client)
}

// ============================================================================
// Replay
// ============================================================================

#[tokio::test]
async fn replay_is_exactly_once() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["a", "b", "c"]).await?;
    assert_eq!(client.pending(), 3);

    let report = client.sync().await;
    assert_eq!((report.synced, report.failed, report.skipped), (3, 0, false));
    assert_eq!(client.pending(), 0);
    assert_eq!(client.server.create_calls(), 3);

    let again = client.sync().await;
    assert_eq!((again.synced, again.failed), (0, 0));
    assert_eq!(client.server.create_calls(), 3);
    assert_eq!(client.server.records(EntityKind::Transaction).len(), 3);
    Ok(())
}

#[tokio::test]
async fn concurrent_sync_runs_once() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["x", "y"]).await?;

    let (first, second) = tokio::join!(client.sync(), client.sync());
    assert!(first.skipped ^ second.skipped, "exactly one call should be skipped");
    assert_eq!(first.synced + second.synced, 2);
    assert_eq!(client.server.create_calls(), 2);
    assert_eq!(client.pending(), 0);
    Ok(())
}

#[tokio::test]
async fn sync_while_offline_does_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["a"]).await?;
    client.go_offline();
    client.server.reset_calls();

    let report = client.sync().await;
    assert_eq!((report.synced, report.failed, report.skipped), (0, 0, false));
    assert!(client.server.calls().is_empty());
    assert_eq!(client.pending(), 1);
    Ok(())
}

#[tokio::test]
async fn mutations_for_one_entity_replay_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["dinner"]).await?;
    client.go_offline();
    let temp = client.visible_transactions()[0].id.clone();
    client
        .edit(EntityKind::Transaction, &temp, json!({ "amount": 2000 }))
        .await;
    client
        .edit(EntityKind::Transaction, &temp, json!({ "amount": 2500, "tip": 300 }))
        .await;
    client.go_online();
    client.server.reset_calls();

    let report = client.sync().await;
    assert_eq!((report.synced, report.failed), (3, 0));

    let replayed: Vec<Call> = client
        .server
        .calls()
        .into_iter()
        .filter(|c| !matches!(c, Call::List(_)))
        .collect();
    let server_id = client.server.records(EntityKind::Transaction)[0].id.clone();
    assert_eq!(
        replayed,
        vec![
            Call::Create(EntityKind::Transaction),
            Call::Update(EntityKind::Transaction, server_id.clone()),
            Call::Update(EntityKind::Transaction, server_id),
        ]
    );

    let on_server = &client.server.records(EntityKind::Transaction)[0];
    assert_eq!(on_server.payload["amount"], 2500);
    assert_eq!(on_server.payload["tip"], 300);
    assert_eq!(on_server.payload["note"], "dinner");
    Ok(())
}

#[tokio::test]
async fn offline_expenses_end_up_under_server_ids() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["expense A", "expense B"]).await?;
    let before = client.visible_transactions();
    assert_eq!(before.len(), 2);
    assert!(before.iter().all(|r| r.id.is_temporary()));

    let report = client.sync().await;
    assert_eq!((report.synced, report.failed), (2, 0));
    assert_eq!(client.pending(), 0);

    let after = client.visible_transactions();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|r| !r.id.is_temporary()));
    let ids: HashSet<&RecordId> = after.iter().map(|r| &r.id).collect();
    assert_eq!(ids.len(), 2);

    let notes: HashSet<&str> = after
        .iter()
        .filter_map(|r| r.payload["note"].as_str())
        .collect();
    assert_eq!(notes, HashSet::from(["expense A", "expense B"]));

    for r in &before {
        assert!(client.service.store().resolve_id(&r.id)?.is_some());
    }
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn one_failure_does_not_stop_the_rest() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["ok 1", "broken", "ok 2"]).await?;
    client.server.reject_payloads_with("note", json!("broken"));

    let report = client.sync().await;
    assert_eq!((report.synced, report.failed), (2, 1));
    assert_eq!(client.pending(), 1);

    let stuck = client.service.queue().pending()?;
    assert_eq!(stuck[0].payload.as_ref().map(|p| p["note"].clone()), Some(json!("broken")));
    assert_eq!(client.service.coordinator().failure_count(stuck[0].op_id), 1);

    client.server.clear_faults();
    let retry = client.sync().await;
    assert_eq!((retry.synced, retry.failed), (1, 0));
    assert_eq!(client.pending(), 0);
    assert_eq!(client.service.coordinator().failure_count(stuck[0].op_id), 0);
    Ok(())
}

#[tokio::test]
async fn failed_create_blocks_its_own_updates() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["refused"]).await?;
    client.server.reject_payloads_with("note", json!("refused"));
    client.go_offline();
    let temp = client.visible_transactions()[0].id.clone();
    client
        .edit(EntityKind::Transaction, &temp, json!({ "amount": 1 }))
        .await;
    client.go_online();

    let report = client.sync().await;
    assert_eq!((report.synced, report.failed), (0, 2));
    assert_eq!(client.server.count_calls(|c| matches!(c, Call::Update(..))), 0);
    assert_eq!(client.pending(), 2);

    client.server.clear_faults();
    let retry = client.sync().await;
    assert_eq!((retry.synced, retry.failed), (2, 0));
    assert_eq!(client.server.records(EntityKind::Transaction)[0].payload["amount"], 1);
    Ok(())
}

#[tokio::test]
async fn failure_under_temp_id_blocks_work_under_server_id() -> Result<(), Box<dyn std::error::Error>> {
    let client = client_with_queued(&["bike"]).await?;
    client.go_offline();
    let temp = client.visible_transactions()[0].id.clone();
    client
        .edit(EntityKind::Transaction, &temp, json!({ "note": "bad" }))
        .await;
    client.go_online();
    client.server.reject_payloads_with("note", json!("bad"));

    let first = client.sync().await;
    assert_eq!((first.synced, first.failed), (1, 1));
    let server_id = client.server.records(EntityKind::Transaction)[0].id.clone();
    assert_eq!(client.service.store().resolve_id(&temp)?, Some(server_id.clone()));

    client.go_offline();
    client
        .edit(EntityKind::Transaction, &server_id, json!({ "amount": 7 }))
        .await;
    client.go_online();
    client.server.reset_calls();

    let second = client.sync().await;
    assert_eq!((second.synced, second.failed), (0, 2));
    assert_eq!(client.server.count_calls(|c| matches!(c, Call::Update(..))), 1);
    assert_eq!(client.server.records(EntityKind::Transaction)[0].payload["amount"], 100);

    client.server.clear_faults();
    let retry = client.sync().await;
    assert_eq!((retry.synced, retry.failed), (2, 0));
    let on_server = &client.server.records(EntityKind::Transaction)[0];
    assert_eq!(on_server.payload["note"], "bad");
    assert_eq!(on_server.payload["amount"], 7);
    Ok(())
}

#[tokio::test]
async fn create_stays_queued_when_reconcile_fails() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let store = Arc::new(FlakyStore::new()?);
    let client = TestClient::with_store(store.clone(), Arc::new(MockServer::new())).await?;
    client.service.dispose();
    client.go_offline();
    let temp = client.add_expense(60, "ferry").await.record.ok_or("no record")?.id;

    store.fail_reconcile(true);
    client.go_online();
    let report = client.sync().await;
    assert_eq!((report.synced, report.failed), (0, 1));

    let queued = client.service.queue().pending()?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].target, temp);
    assert_eq!(client.service.coordinator().failure_count(queued[0].op_id), 1);
    assert!(store.resolve_id(&temp)?.is_none());
    assert_eq!(client.server.records(EntityKind::Transaction).len(), 1);
    Ok(())
}

#[tokio::test]
async fn queued_delete_of_already_deleted_record_succeeds() -> Result<(), Box<dyn std::error::Error>> {
    let server = Arc::new(MockServer::new());
    let alice = TestClient::new(server.clone()).await?;
    let bob = TestClient::new(server.clone()).await?;

    let shared = alice.add_expense(40, "split").await.record.ok_or("no record")?;
    alice.service.dispose();
    alice.service.detector().set_online(false);
    let queued = alice.remove(EntityKind::Transaction, &shared.id).await;
    assert!(queued.is_offline);

    let direct = bob.remove(EntityKind::Transaction, &shared.id).await;
    assert!(!direct.is_offline);

    alice.service.detector().set_online(true);
    let report = alice.sync().await;
    assert_eq!((report.synced, report.failed), (1, 0));
    assert_eq!(alice.pending(), 0);
    Ok(())
}

// ============================================================================
// Canonical refresh
// ============================================================================

#[tokio::test]
async fn refresh_pulls_records_from_other_clients() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    let seeded = client
        .server
        .seed(EntityKind::Trip, json!({ "name": "Lisbon" }))?;
    assert!(client.service.store().last_synced(Collection::Trips)?.is_none());

    client.sync().await;

    let trips = client.service.store().get_all(Collection::Trips)?;
    assert_eq!(trips, vec![seeded]);
    assert!(client.service.store().last_synced(Collection::Trips)?.is_some());
    Ok(())
}

#[tokio::test]
async fn refresh_prunes_records_deleted_elsewhere() -> Result<(), Box<dyn std::error::Error>> {
    let server = Arc::new(MockServer::new());
    let alice = TestClient::new(server.clone()).await?;
    let bob = TestClient::new(server.clone()).await?;

    let rec = alice.add_expense(15, "parking").await.record.ok_or("no record")?;
    bob.remove(EntityKind::Transaction, &rec.id).await;
    assert_eq!(alice.visible_transactions().len(), 1);

    alice.sync().await;
    assert!(alice.visible_transactions().is_empty());
    Ok(())
}

#[tokio::test]
async fn refresh_keeps_newer_unsynced_local_edit() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    client.service.dispose();
    let rec = client.add_expense(500, "hotel").await.record.ok_or("no record")?;

    client.server.reject_id(&rec.id);
    client.go_offline();
    client
        .edit(EntityKind::Transaction, &rec.id, json!({ "amount": 999 }))
        .await;
    client.go_online();

    let report = client.sync().await;
    assert_eq!((report.synced, report.failed), (0, 1));

    let local = client
        .service
        .store()
        .get(Collection::Transactions, &rec.id)?
        .ok_or("missing")?;
    assert_eq!(local.payload["amount"], 999);
    assert_eq!(client.server.records(EntityKind::Transaction)[0].payload["amount"], 500);
    Ok(())
}

#[tokio::test]
async fn record_cached_while_listing_is_not_pruned() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    client.service.dispose();

    // Confirmed by the server after it built the list, cached before the
    // list reaches the client.
    let confirmed = EntityRecord::new(RecordId::new("tx_late"), 1, json!({ "amount": 9 }));
    let store = client.service.store();
    let landed = confirmed.clone();
    let fired = AtomicBool::new(false);
    client.server.after_list(move |kind| {
        if kind == EntityKind::Transaction && !fired.swap(true, Ordering::SeqCst) {
            let _ = store.put_many(Collection::Transactions, std::slice::from_ref(&landed));
        }
    });

    client.sync().await;
    let kept = client
        .service
        .store()
        .get(Collection::Transactions, &confirmed.id)?;
    assert_eq!(kept, Some(confirmed));
    Ok(())
}

#[tokio::test]
async fn edit_cached_while_listing_is_not_overwritten() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    client.service.dispose();
    let rec = client.add_expense(5, "coffee").await.record.ok_or("no record")?;

    let newer = EntityRecord {
        updated_at: Some(rec.recency() + 1_000),
        payload: json!({ "amount": 6, "currency": "EUR", "note": "coffee" }),
        ..rec.clone()
    };
    let store = client.service.store();
    let landed = newer.clone();
    let fired = AtomicBool::new(false);
    client.server.after_list(move |kind| {
        if kind == EntityKind::Transaction && !fired.swap(true, Ordering::SeqCst) {
            let _ = store.put_many(Collection::Transactions, std::slice::from_ref(&landed));
        }
    });

    client.sync().await;
    let local = client
        .service
        .store()
        .get(Collection::Transactions, &rec.id)?
        .ok_or("missing")?;
    assert_eq!(local.payload["amount"], 6);
    Ok(())
}

// ============================================================================
// Connectivity-driven sync
// ============================================================================

#[tokio::test]
async fn going_online_flushes_the_queue() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    client.go_offline();
    client.add_expense(120, "bus").await;
    client.add_expense(80, "metro").await;
    assert_eq!(client.pending(), 2);

    client.go_online();
    assert!(wait_for(|| client.pending() == 0).await);
    assert_eq!(client.server.create_calls(), 2);
    Ok(())
}
