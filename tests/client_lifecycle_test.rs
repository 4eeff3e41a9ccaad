use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flagsync_lib::data_store::{DataStore, MemoryDataStore, CACHE_KEY};
use flagsync_lib::event_logger::LogEvent;
use flagsync_lib::network::{ChunkResponse, SpecTransport};
use flagsync_lib::spec_types::{ConfigSpec, DownloadedSpecs, EvaluationReason, IDListMetadata};
use flagsync_lib::{ClientError, ClientState, FlagsyncClient, Options};

/// Transport serving one fixed spec payload, counting every fetch.
#[derive(Default)]
struct FakeTransport {
    specs: Mutex<Option<DownloadedSpecs>>,
    spec_fetches: AtomicUsize,
    posted_events: Mutex<Vec<LogEvent>>,
}

impl FakeTransport {
    fn with_specs(specs: DownloadedSpecs) -> Self {
        Self {
            specs: Mutex::new(Some(specs)),
            ..Default::default()
        }
    }

    fn fetch_count(&self) -> usize {
        self.spec_fetches.load(Ordering::SeqCst)
    }

    fn posted(&self) -> usize {
        self.posted_events.lock().unwrap().len()
    }
}

#[async_trait]
impl SpecTransport for FakeTransport {
    async fn fetch_config_specs(
        &self,
        _since_time: i64,
    ) -> Result<Option<DownloadedSpecs>, String> {
        self.spec_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.specs.lock().unwrap().clone())
    }

    async fn fetch_id_list_manifest(
        &self,
    ) -> Result<Option<HashMap<String, IDListMetadata>>, String> {
        Ok(None)
    }

    async fn fetch_id_list_chunk(
        &self,
        _url: &str,
        _from_byte: i64,
    ) -> Result<ChunkResponse, String> {
        Err("no id lists in this test".to_string())
    }

    async fn post_events(&self, events: &[LogEvent]) -> Result<(), String> {
        self.posted_events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}

fn specs_with_gate(time: i64, gate: &str) -> DownloadedSpecs {
    DownloadedSpecs {
        has_updates: true,
        time,
        feature_gates: vec![ConfigSpec {
            name: gate.to_string(),
            definition: serde_json::json!({"enabled": true}),
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_network_initialize_serves_fetched_specs() {
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "g1")));
    let client = FlagsyncClient::with_transport(
        Options::default().disable_diagnostics(),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert_eq!(client.state(), ClientState::Running);
    assert!(client.get_gate("g1").unwrap().is_some());
    assert_eq!(client.get_last_update_time().unwrap(), 100);
    assert_eq!(
        client.get_evaluation_reason().unwrap(),
        EvaluationReason::Network
    );
    assert_eq!(transport.fetch_count(), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_initialize_fetches_once() {
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "g1")));
    let client = Arc::new(FlagsyncClient::with_transport(
        Options::default().disable_diagnostics(),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    ));

    let (a, b) = tokio::join!(client.initialize(), client.initialize());
    a.unwrap();
    b.unwrap();

    assert_eq!(transport.fetch_count(), 1);
    assert_eq!(client.state(), ClientState::Running);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reads_before_initialize_fail() {
    let transport = Arc::new(FakeTransport::default());
    let client = FlagsyncClient::with_transport(
        Options::default().disable_diagnostics(),
        transport as Arc<dyn SpecTransport>,
    );

    assert!(matches!(
        client.get_config("anything"),
        Err(ClientError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_reads_after_shutdown_fail() {
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "g1")));
    let client = FlagsyncClient::with_transport(
        Options::default().disable_diagnostics(),
        transport as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    client.shutdown().await.unwrap();
    assert_eq!(client.state(), ClientState::Stopped);

    assert!(matches!(
        client.get_config("anything"),
        Err(ClientError::ShutDown)
    ));
    // A stopped client cannot come back; callers must build a new one.
    assert!(matches!(
        client.initialize().await,
        Err(ClientError::ShutDown)
    ));
}

#[tokio::test]
async fn test_persisted_cache_wins_over_network() {
    let data_store = Arc::new(MemoryDataStore::new());
    let cached = serde_json::to_string(&specs_with_gate(50, "cached_gate")).unwrap();
    data_store.set(CACHE_KEY, &cached).await.unwrap();

    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "network_gate")));
    let client = FlagsyncClient::with_transport(
        Options::default()
            .disable_diagnostics()
            .data_store(Arc::clone(&data_store) as Arc<dyn DataStore>),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert_eq!(
        client.get_evaluation_reason().unwrap(),
        EvaluationReason::DataAdapter
    );
    assert!(client.get_gate("cached_gate").unwrap().is_some());
    assert!(client.get_gate("network_gate").unwrap().is_none());
    assert_eq!(transport.fetch_count(), 0);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_wins_when_cache_missing() {
    let bootstrap = serde_json::to_string(&specs_with_gate(40, "bootstrap_gate")).unwrap();
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "network_gate")));
    let client = FlagsyncClient::with_transport(
        Options::default()
            .disable_diagnostics()
            .bootstrap_values(&bootstrap),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert_eq!(
        client.get_evaluation_reason().unwrap(),
        EvaluationReason::Bootstrap
    );
    assert!(client.get_gate("bootstrap_gate").unwrap().is_some());
    assert_eq!(transport.fetch_count(), 0);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_bootstrap_falls_through_to_network() {
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "network_gate")));
    let client = FlagsyncClient::with_transport(
        Options::default()
            .disable_diagnostics()
            .bootstrap_values("this is not json"),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert_eq!(
        client.get_evaluation_reason().unwrap(),
        EvaluationReason::Network
    );
    assert!(client.get_gate("network_gate").unwrap().is_some());
    assert_eq!(transport.fetch_count(), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_network_result_written_back_to_cache() {
    let data_store = Arc::new(MemoryDataStore::new());
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "g1")));
    let client = FlagsyncClient::with_transport(
        Options::default()
            .disable_diagnostics()
            .data_store(Arc::clone(&data_store) as Arc<dyn DataStore>),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert_eq!(
        client.get_evaluation_reason().unwrap(),
        EvaluationReason::Network
    );

    let written = data_store.get(CACHE_KEY).await.unwrap();
    let round_trip: DownloadedSpecs = serde_json::from_str(&written).unwrap();
    assert_eq!(round_trip.time, 100);
    assert_eq!(round_trip.feature_gates[0].name, "g1");

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rules_updated_callback_fires_for_network_source() {
    let calls = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&calls);

    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "g1")));
    let client = FlagsyncClient::with_transport(
        Options::default()
            .disable_diagnostics()
            .on_rules_updated(move |raw| seen.lock().unwrap().push(raw.to_string())),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    let recorded = calls.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].contains("\"g1\""));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rules_updated_callback_silent_for_bootstrap() {
    let calls = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&calls);

    let bootstrap = serde_json::to_string(&specs_with_gate(40, "g1")).unwrap();
    let transport = Arc::new(FakeTransport::default());
    let client = FlagsyncClient::with_transport(
        Options::default()
            .disable_diagnostics()
            .bootstrap_values(&bootstrap)
            .on_rules_updated(move |raw| seen.lock().unwrap().push(raw.to_string())),
        transport as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert!(calls.lock().unwrap().is_empty());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_local_mode_never_touches_transport() {
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "g1")));
    let client = FlagsyncClient::with_transport(
        Options::default().disable_diagnostics().local_mode(),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert_eq!(client.state(), ClientState::Running);
    assert_eq!(transport.fetch_count(), 0);
    assert_eq!(
        client.get_evaluation_reason().unwrap(),
        EvaluationReason::Uninitialized
    );
    assert!(client.get_gate("g1").unwrap().is_none());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_buffered_diagnostics() {
    // Diagnostics stay enabled here; the initialize context samples at full
    // rate by default, so the overall marker batch is buffered during
    // initialize and must leave on shutdown.
    let transport = Arc::new(FakeTransport::with_specs(specs_with_gate(100, "g1")));
    let client = FlagsyncClient::with_transport(
        Options::default(),
        Arc::clone(&transport) as Arc<dyn SpecTransport>,
    );

    client.initialize().await.unwrap();
    assert_eq!(transport.posted(), 0);

    client.shutdown().await.unwrap();
    assert_eq!(transport.posted(), 1);
}

#[tokio::test]
async fn test_invalid_server_key_rejected() {
    assert!(matches!(
        FlagsyncClient::new("", Options::default()),
        Err(ClientError::InvalidServerKey)
    ));
    assert!(matches!(
        FlagsyncClient::new("client-abc", Options::default()),
        Err(ClientError::InvalidServerKey)
    ));
    assert!(FlagsyncClient::new("server-abc123", Options::default()).is_ok());
}
