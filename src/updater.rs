use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::data_store::CACHE_KEY;
use crate::network::SpecTransport;
use crate::options::Options;
use crate::spec_store::SpecStore;
use crate::spec_types::{DownloadedSpecs, EvaluationReason};

/// Owns the transport, the shared update-time cursor, and the background
/// polling tasks that keep a [`SpecStore`] fresh after the initial sync.
pub struct SpecUpdater {
    transport: Arc<dyn SpecTransport>,
    options: Arc<Options>,
    last_update_time: Arc<AtomicI64>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    polling_started: AtomicBool,
}

impl SpecUpdater {
    pub fn new(transport: Arc<dyn SpecTransport>, options: Arc<Options>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            transport,
            options,
            last_update_time: Arc::new(AtomicI64::new(0)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            polling_started: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &Arc<dyn SpecTransport> {
        &self.transport
    }

    pub fn last_update_time(&self) -> i64 {
        self.last_update_time.load(Ordering::Acquire)
    }

    pub fn set_last_update_time(&self, time: i64) {
        self.last_update_time.store(time, Ordering::Release);
    }

    pub async fn fetch_config_specs(&self) -> Result<Option<DownloadedSpecs>, String> {
        self.transport
            .fetch_config_specs(self.last_update_time())
            .await
    }

    /// Spawn the config-polling and ID-list-polling loops. Started at most
    /// once; the loops run until [`SpecUpdater::shutdown`].
    pub fn start_polling(&self, store: Arc<SpecStore>) {
        if self.polling_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.handles.lock().unwrap();
        handles.push(self.spawn_config_poll(Arc::clone(&store)));
        handles.push(self.spawn_id_list_poll(store));
    }

    fn spawn_config_poll(&self, store: Arc<SpecStore>) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let options = Arc::clone(&self.options);
        let last_update_time = Arc::clone(&self.last_update_time);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(options.rules_sync_interval);
            // The first tick completes immediately; initialize() has already
            // synced, so consume it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        poll_specs_once(&transport, &options, &last_update_time, &store).await;
                    }
                }
            }
        })
    }

    fn spawn_id_list_poll(&self, store: Arc<SpecStore>) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let options = Arc::clone(&self.options);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(options.id_list_sync_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match transport.fetch_id_list_manifest().await {
                            Ok(Some(manifest)) => {
                                store.process_pushed_id_lists(&manifest).await;
                            }
                            Ok(None) => {}
                            Err(e) => store.error_boundary().log_error("poll_id_lists", &e),
                        }
                    }
                }
            }
        })
    }

    /// Signal both loops and wait for them to wind down. In-flight work is
    /// allowed to reach its next suspension point, never killed mid-patch.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn poll_specs_once(
    transport: &Arc<dyn SpecTransport>,
    options: &Arc<Options>,
    last_update_time: &Arc<AtomicI64>,
    store: &Arc<SpecStore>,
) {
    let polled_store = options
        .data_store
        .as_ref()
        .filter(|data_store| data_store.supports_polling());

    if let Some(data_store) = polled_store {
        if let Some(raw) = data_store.get(CACHE_KEY).await {
            match serde_json::from_str::<DownloadedSpecs>(&raw) {
                Ok(specs) => store.process_pushed_specs(&specs, EvaluationReason::DataAdapter),
                Err(e) => store
                    .error_boundary()
                    .log_error("poll_data_store", &format!("cached specs unreadable: {}", e)),
            }
        }
        return;
    }

    match transport
        .fetch_config_specs(last_update_time.load(Ordering::Acquire))
        .await
    {
        Ok(Some(specs)) => store.process_pushed_specs(&specs, EvaluationReason::Network),
        Ok(None) => {}
        Err(e) => store.error_boundary().log_error("poll_config_specs", &e),
    }
}
