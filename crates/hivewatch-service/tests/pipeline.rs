//! End-to-end tests of the store-and-forward pipeline.
//!
//! Records flow from mock sensors through the collector into an on-disk
//! store and out to a local HTTP endpoint that can be switched off to
//! simulate an unreachable uplink.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use hivewatch_core::{MemorySink, MockSensor, MockWeightSensor, Sensor, WeightSensor, codes};
use hivewatch_service::{
    AppState, Collector, Config, HttpSubmitter, SensorSet, SubmitError, Submitter, SyncEngine,
};
use hivewatch_store::{NewRecord, SensorRecord, Store};
use hivewatch_types::{CalibrationProfile, Channel, Readings};

/// Submitter that records delivery order and fails a configurable set of ids.
#[derive(Default)]
struct RecordingSubmitter {
    delivered: StdMutex<Vec<i64>>,
    failing: StdMutex<HashSet<i64>>,
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn submit(&self, record: &SensorRecord) -> Result<(), SubmitError> {
        if self.failing.lock().unwrap().contains(&record.id) {
            return Err(SubmitError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(record.id);
        Ok(())
    }
}

fn insert(store: &Mutex<Store>, weight: f64) -> i64 {
    store
        .try_lock()
        .unwrap()
        .insert(&NewRecord::new(Readings::new().with(Channel::Weight, weight)))
        .unwrap()
}

/// A local ingest endpoint that can be taken offline.
struct Endpoint {
    url: String,
    online: Arc<AtomicBool>,
    received: Arc<StdMutex<Vec<serde_json::Value>>>,
}

async fn endpoint() -> Endpoint {
    let online = Arc::new(AtomicBool::new(true));
    let received = Arc::new(StdMutex::new(Vec::new()));

    let app = Router::new().route(
        "/ingest",
        post({
            let online = Arc::clone(&online);
            let received = Arc::clone(&received);
            move |axum::Json(body): axum::Json<serde_json::Value>| {
                let online = Arc::clone(&online);
                let received = Arc::clone(&received);
                async move {
                    if !online.load(Ordering::SeqCst) {
                        return StatusCode::SERVICE_UNAVAILABLE;
                    }
                    received.lock().unwrap().push(body);
                    StatusCode::OK
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Endpoint {
        url: format!("http://{addr}/ingest"),
        online,
        received,
    }
}

#[tokio::test]
async fn test_sync_delivers_in_insertion_order() {
    let store = Mutex::new(Store::open_in_memory().unwrap());
    let a = insert(&store, 1.0);
    let b = insert(&store, 2.0);
    let c = insert(&store, 3.0);

    let sink = MemorySink::new();
    let submitter = RecordingSubmitter::default();
    let engine = SyncEngine::new(&store, &sink, Duration::from_secs(10));
    let report = engine
        .run_sync_cycle(&submitter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(*submitter.delivered.lock().unwrap(), vec![a, b, c]);
    assert_eq!(store.lock().await.count(Some(true)).unwrap(), 3);
}

#[tokio::test]
async fn test_partial_failure_is_isolated_and_retried() {
    let store = Mutex::new(Store::open_in_memory().unwrap());
    let a = insert(&store, 1.0);
    let b = insert(&store, 2.0);

    let sink = MemorySink::new();
    let submitter = RecordingSubmitter::default();
    submitter.failing.lock().unwrap().insert(a);
    let engine = SyncEngine::new(&store, &sink, Duration::from_secs(10));

    let first = engine
        .run_sync_cycle(&submitter, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!((first.succeeded, first.failed), (1, 1));
    {
        let store = store.lock().await;
        assert!(!store.get(a).unwrap().unwrap().synced);
        assert!(store.get(b).unwrap().unwrap().synced);
    }
    assert_eq!(sink.count(codes::SERVER_UPLOAD_ERROR), 1);

    // Endpoint recovers: only A is attempted again
    submitter.failing.lock().unwrap().clear();
    let second = engine
        .run_sync_cycle(&submitter, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!((second.attempted, second.succeeded), (1, 1));
    assert_eq!(*submitter.delivered.lock().unwrap(), vec![b, a]);
    assert_eq!(store.lock().await.count(Some(false)).unwrap(), 0);
}

#[tokio::test]
async fn test_lost_acknowledgment_redelivers_then_marks_once() {
    let store = Mutex::new(Store::open_in_memory().unwrap());
    let id = insert(&store, 1.0);

    // The endpoint accepted the record but the local mark never happened
    let submitter = RecordingSubmitter::default();
    let record = store.lock().await.get(id).unwrap().unwrap();
    submitter.submit(&record).await.unwrap();

    let sink = MemorySink::new();
    let engine = SyncEngine::new(&store, &sink, Duration::from_secs(10));
    engine
        .run_sync_cycle(&submitter, &CancellationToken::new())
        .await
        .unwrap();

    // Delivered twice (at-least-once), marked once
    assert_eq!(*submitter.delivered.lock().unwrap(), vec![id, id]);
    let store = store.lock().await;
    let synced_at = store.get(id).unwrap().unwrap().synced_at;
    assert!(!store.mark_synced(id).unwrap());
    assert_eq!(store.get(id).unwrap().unwrap().synced_at, synced_at);
}

#[tokio::test]
async fn test_retention_ignores_sync_state() {
    let store = Store::open_in_memory().unwrap();
    let now = OffsetDateTime::now_utc();
    let old = store
        .insert(&NewRecord::at(
            now - time::Duration::days(200),
            Readings::new().with(Channel::Weight, 1.0),
        ))
        .unwrap();
    let recent = store
        .insert(&NewRecord::at(
            now - time::Duration::days(10),
            Readings::new().with(Channel::Weight, 2.0),
        ))
        .unwrap();

    // The old record never reached the endpoint and is still deleted
    let removed = store
        .prune_older_than(Duration::from_secs(180 * 24 * 60 * 60))
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.get(old).unwrap().is_none());
    assert!(store.get(recent).unwrap().is_some());
}

#[tokio::test]
async fn test_collector_buffers_while_offline_and_drains_on_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = endpoint().await;

    let mut config = Config::default();
    config.storage.path = dir.path().join("records.db");
    config.upload.url = Some(endpoint.url.clone());

    let sink = Arc::new(MemorySink::new());
    let store = Store::open(&config.storage.path).unwrap();
    let state = AppState::new(store, config.clone(), sink.clone());
    *state.calibration.write().await = Some(CalibrationProfile::new(2.0, 1000.0, 500.0));

    let temp = Arc::new(MockSensor::new(Channel::TempInside, 35.1));
    let scale = Arc::new(MockWeightSensor::new(3000.0));
    let sensors = SensorSet {
        channels: vec![temp as Arc<dyn Sensor>],
        weight: Some(scale as Arc<dyn WeightSensor>),
    };
    let submitter = HttpSubmitter::new(&endpoint.url, config.upload.timeout()).unwrap();
    let collector = Collector::new(Arc::clone(&state), sensors, Some(Arc::new(submitter)));
    let cancel = CancellationToken::new();

    // Uplink down for two cycles: records are kept locally
    endpoint.online.store(false, Ordering::SeqCst);
    for _ in 0..2 {
        let report = collector.run_cycle(&cancel).await.unwrap();
        assert!(report.record_id.is_some());
        assert_eq!(report.sync.unwrap().failed, report.sync.unwrap().attempted);
    }
    assert_eq!(state.store.lock().await.count(Some(false)).unwrap(), 2);
    assert_eq!(sink.count(codes::SERVER_UPLOAD_ERROR), 3);

    // Uplink back: the backlog and the new record go out oldest first
    endpoint.online.store(true, Ordering::SeqCst);
    let report = collector.run_cycle(&cancel).await.unwrap();
    let sync = report.sync.unwrap();
    assert_eq!((sync.attempted, sync.succeeded), (3, 3));
    assert_eq!(state.store.lock().await.count(Some(false)).unwrap(), 0);

    let received = endpoint.received.lock().unwrap();
    let ids: Vec<i64> = received.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(received[0]["weight"], 1000.0);
    assert_eq!(received[0]["temp_inside"], 35.1);
    assert!(received[0]["pressure"].is_null());
    assert!(received[0]["timestamp"].is_string());
}

#[tokio::test]
async fn test_store_survives_restart_with_backlog() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.db");

    {
        let store = Store::open(&path).unwrap();
        store
            .insert(&NewRecord::new(Readings::new().with(Channel::Pressure, 1012.5)))
            .unwrap();
    }

    let store = Mutex::new(Store::open(&path).unwrap());
    let sink = MemorySink::new();
    let submitter = RecordingSubmitter::default();
    let report = SyncEngine::new(&store, &sink, Duration::from_secs(10))
        .run_sync_cycle(&submitter, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
}
