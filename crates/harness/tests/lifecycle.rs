use std::sync::Arc;

use serde_json::json;
use tripledger_core::{Collection, EntityKind, EntityRecord, RecordId};
use tripledger_engine::{SyncConfig, SyncService};
use tripledger_harness::{MockServer, TestClient, init_tracing, wait_for};
use tripledger_storage::LocalStore;

#[tokio::test]
async fn init_twice_keeps_data_and_one_listener() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    client.go_offline();
    client.add_expense(75, "fuel").await;

    client.service.init().await;
    client.service.init().await;

    assert!(client.service.is_listening());
    assert!(client.service.store_error().is_none());
    assert_eq!(client.pending(), 1);
    assert_eq!(
        client.service.store().get_all(Collection::Transactions)?.len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn dispose_stops_auto_sync() -> Result<(), Box<dyn std::error::Error>> {
    let client = TestClient::new(Arc::new(MockServer::new())).await?;
    client.service.dispose();
    assert!(!client.service.is_listening());

    client.go_offline();
    client.add_expense(10, "ice cream").await;
    client.go_online();
    assert!(!wait_for(|| client.pending() == 0).await);

    client.service.init().await;
    assert!(client.service.is_listening());
    assert_eq!(client.pending(), 0, "init flushes leftovers when online");
    Ok(())
}

#[tokio::test]
async fn queue_survives_restart() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tripledger.db");
    let path = path.to_str().ok_or("non-utf8 path")?;
    let server = Arc::new(MockServer::new());

    {
        let client = TestClient::on_disk(path, server.clone()).await?;
        client.go_offline();
        client.add_expense(300, "hostel").await;
        client.add_expense(120, "ferry").await;
        assert_eq!(client.pending(), 2);
    }

    server.set_reachable(true);
    let restarted = TestClient::on_disk(path, server.clone()).await?;
    assert_eq!(restarted.pending(), 0);
    assert_eq!(server.records(EntityKind::Transaction).len(), 2);

    let visible = restarted.visible_transactions();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|r| !r.id.is_temporary()));
    Ok(())
}

#[tokio::test]
async fn restored_queue_does_not_reuse_temp_ids() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tripledger.db");
    let path = path.to_str().ok_or("non-utf8 path")?;
    let server = Arc::new(MockServer::new());

    // A queued create stamped far in the future, as if the clock went back.
    let future: u64 = 1 << 50;
    {
        let client = TestClient::on_disk(path, server.clone()).await?;
        client.go_offline();
        let store = client.service.store();
        let temp = RecordId::temporary(future);
        store.commit_offline(
            Collection::Transactions,
            tripledger_storage::LocalWrite::Put(&EntityRecord::new(temp.clone(), future, json!({}))),
            &tripledger_core::PendingMutation::create(EntityKind::Transaction, temp, json!({}), future),
        )?;
    }

    let config = SyncConfig {
        database_path: Some(path.to_string()),
        start_online: false,
        ..SyncConfig::default()
    };
    let client = TestClient::with_config(config, server).await?;
    let outcome = client.add_expense(1, "after restart").await;
    let id = outcome.record.ok_or("no record")?.id;
    assert_eq!(id, RecordId::temporary(future + 1));
    Ok(())
}

#[tokio::test]
async fn unavailable_store_fails_open() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("no-such-dir").join("cache.db");
    let config = SyncConfig {
        database_path: Some(missing.to_string_lossy().into_owned()),
        ..SyncConfig::default()
    };
    let server = Arc::new(MockServer::new());
    let service = SyncService::new(config, server.clone())?;
    service.init().await;
    assert!(service.store_error().is_some());

    // Reads fall back to the snapshot.
    let snapshot = vec![EntityRecord::new(RecordId::new("trip_1"), 1, json!({ "name": "Oslo" }))];
    let state = service.query(Collection::Trips, snapshot.clone()).state();
    assert_eq!(state.data, snapshot);
    assert!(state.load_error.is_some());
    assert!(!state.is_loading);

    // Online writes still reach the server.
    let online = service
        .writer()
        .create(EntityKind::Trip, json!({ "name": "Bergen" }))
        .await;
    assert!(online.success);
    assert!(!online.is_offline);

    // Offline writes have nowhere to go.
    service.detector().set_online(false);
    let offline = service
        .writer()
        .create(EntityKind::Trip, json!({ "name": "Tromso" }))
        .await;
    assert!(!offline.success);
    assert!(offline.error.is_some());

    assert_eq!(service.connectivity_status().pending_count, 0);
    Ok(())
}

#[tokio::test]
async fn config_loads_from_json() -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig::from_json(r#"{ "freshnessThresholdMs": 1000, "startOnline": false }"#)?;
    let client = TestClient::with_config(config, Arc::new(MockServer::new())).await?;
    assert!(!client.service.connectivity_status().online);
    assert_eq!(client.service.config().freshness_threshold_ms, 1000);

    let outcome = client.add_expense(3, "gum").await;
    assert!(outcome.is_offline);
    assert!(client.server.calls().is_empty());
    Ok(())
}
