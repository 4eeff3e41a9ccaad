use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use sha1::Digest;

use crate::data_store::{DataStore, CACHE_KEY};
use crate::diagnostics::{ContextKind, Diagnostics, MarkerKey, StepKind};
use crate::error_boundary::ErrorBoundary;
use crate::id_list_sync;
use crate::options::Options;
use crate::sdk_configs::SdkConfigs;
use crate::spec_types::{
    ConfigSpec, DownloadedSpecs, EntityNames, EvaluationReason, IDList, IDListMetadata,
};
use crate::updater::SpecUpdater;

/// One immutable, fully-derived bundle of spec definitions. Built from a
/// wire payload in one go and published by swapping the handle in
/// [`SpecStore`]; never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct SpecSnapshot {
    pub gates: HashMap<String, ConfigSpec>,
    pub dynamic_configs: HashMap<String, ConfigSpec>,
    pub layer_configs: HashMap<String, ConfigSpec>,
    pub layers: HashMap<String, Vec<String>>,
    pub experiment_to_layer: HashMap<String, String>,
    pub sdk_keys_to_app_ids: HashMap<String, String>,
    pub hashed_sdk_keys_to_app_ids: HashMap<String, String>,
    pub hashed_sdk_keys_to_entities: HashMap<String, EntityNames>,
    pub primary_target_app_id: Option<String>,
}

/// Local home of everything the evaluator reads: the current spec snapshot
/// and the ID-list table. Reads are synchronous lookups; all writes funnel
/// through one update pipeline.
pub struct SpecStore {
    updater: Arc<SpecUpdater>,
    options: Arc<Options>,
    diagnostics: Arc<Diagnostics>,
    sdk_configs: Arc<SdkConfigs>,
    error_boundary: Arc<ErrorBoundary>,
    snapshot: RwLock<Arc<SpecSnapshot>>,
    id_lists: Mutex<HashMap<String, IDList>>,
    init_reason: RwLock<EvaluationReason>,
    init_time: AtomicI64,
    download_id_list_call_count: AtomicU64,
}

pub(crate) fn hash_key(key: &str) -> String {
    let mut hasher = sha1::Sha1::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn index_by_name(specs: &[ConfigSpec]) -> HashMap<String, ConfigSpec> {
    specs
        .iter()
        .map(|spec| (spec.name.clone(), spec.clone()))
        .collect()
}

impl SpecStore {
    pub fn new(
        updater: Arc<SpecUpdater>,
        options: Arc<Options>,
        diagnostics: Arc<Diagnostics>,
        sdk_configs: Arc<SdkConfigs>,
        error_boundary: Arc<ErrorBoundary>,
    ) -> Self {
        Self {
            updater,
            options,
            diagnostics,
            sdk_configs,
            error_boundary,
            snapshot: RwLock::new(Arc::new(SpecSnapshot::default())),
            id_lists: Mutex::new(HashMap::new()),
            init_reason: RwLock::new(EvaluationReason::Uninitialized),
            init_time: AtomicI64::new(0),
            download_id_list_call_count: AtomicU64::new(0),
        }
    }

    /// Run the one-shot source precedence (persisted cache, bootstrap,
    /// network), pull ID lists, then start background polling.
    pub async fn initialize(self: &Arc<Self>) {
        self.initialize_specs().await;

        let last = self.updater.last_update_time();
        self.init_time
            .store(if last == 0 { -1 } else { last }, Ordering::Release);

        match self.updater.transport().fetch_id_list_manifest().await {
            Ok(Some(manifest)) => self.sync_id_lists_from_network(&manifest).await,
            Ok(None) => {}
            Err(e) => self.error_boundary.log_error("get_id_lists", &e),
        }

        self.updater.start_polling(Arc::clone(self));
    }

    pub async fn shutdown(&self) {
        self.updater.shutdown().await;
    }

    /// Adopt a wire payload as the current snapshot. Returns false without
    /// side effects when the payload carries no updates or is older than
    /// what we already hold; the bootstrap path skips the age check for the
    /// very first application.
    pub fn apply_snapshot(&self, specs: &DownloadedSpecs, from_bootstrap: bool) -> bool {
        if !specs.has_updates {
            return false;
        }
        let last = self.updater.last_update_time();
        if specs.time < last && !(from_bootstrap && last == 0) {
            return false;
        }

        let instrument = self.options.data_store.is_none() && !from_bootstrap;
        if instrument {
            self.diagnostics.mark_start(
                MarkerKey::DownloadConfigSpecs,
                Some(StepKind::Process),
                None,
                None,
            );
        }

        let mut snapshot = SpecSnapshot {
            gates: index_by_name(&specs.feature_gates),
            dynamic_configs: index_by_name(&specs.dynamic_configs),
            layer_configs: index_by_name(&specs.layer_configs),
            ..Default::default()
        };

        // The inverse index is rebuilt from scratch with the layers map so
        // the two can never disagree.
        if let Some(layers) = &specs.layers {
            for (layer_name, experiments) in layers {
                for experiment in experiments {
                    snapshot
                        .experiment_to_layer
                        .insert(experiment.clone(), layer_name.clone());
                }
            }
            snapshot.layers = layers.clone();
        }

        snapshot.sdk_keys_to_app_ids = specs.sdk_keys_to_app_ids.clone().unwrap_or_default();
        snapshot.hashed_sdk_keys_to_app_ids =
            specs.hashed_sdk_keys_to_app_ids.clone().unwrap_or_default();
        snapshot.hashed_sdk_keys_to_entities =
            specs.hashed_sdk_keys_to_entities.clone().unwrap_or_default();
        snapshot.primary_target_app_id = specs.primary_target_app_id.clone();

        *self.snapshot.write().unwrap() = Arc::new(snapshot);
        self.updater.set_last_update_time(specs.time);

        if let Some(rates) = &specs.diagnostics {
            self.diagnostics.set_sampling_rate(rates);
        }
        if let Some(configs) = &specs.sdk_configs {
            self.sdk_configs.set_configs(configs.clone());
        }
        if let Some(flags) = &specs.sdk_flags {
            self.sdk_configs.set_flags(flags.clone());
        }

        if instrument {
            self.diagnostics.mark_end(
                MarkerKey::DownloadConfigSpecs,
                true,
                Some(StepKind::Process),
                None,
                None,
            );
        }
        true
    }

    /// The current snapshot handle. Cheap to take; holders read a frozen
    /// view regardless of later updates.
    pub fn snapshot(&self) -> Arc<SpecSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    pub fn get_gate(&self, name: &str) -> Option<ConfigSpec> {
        self.snapshot().gates.get(name).cloned()
    }

    pub fn get_all_gates(&self) -> HashMap<String, ConfigSpec> {
        self.snapshot().gates.clone()
    }

    pub fn get_config(&self, name: &str) -> Option<ConfigSpec> {
        self.snapshot().dynamic_configs.get(name).cloned()
    }

    pub fn get_all_configs(&self) -> HashMap<String, ConfigSpec> {
        self.snapshot().dynamic_configs.clone()
    }

    pub fn get_layer_config(&self, name: &str) -> Option<ConfigSpec> {
        self.snapshot().layer_configs.get(name).cloned()
    }

    pub fn get_all_layer_configs(&self) -> HashMap<String, ConfigSpec> {
        self.snapshot().layer_configs.clone()
    }

    pub fn get_layer(&self, name: &str) -> Option<Vec<String>> {
        self.snapshot().layers.get(name).cloned()
    }

    pub fn get_all_layers(&self) -> HashMap<String, Vec<String>> {
        self.snapshot().layers.clone()
    }

    pub fn get_layer_name_for_experiment(&self, experiment: &str) -> Option<String> {
        self.snapshot().experiment_to_layer.get(experiment).cloned()
    }

    pub fn get_id_list(&self, name: &str) -> Option<IDList> {
        self.id_lists.lock().unwrap().get(name).cloned()
    }

    pub fn get_all_id_lists(&self) -> HashMap<String, IDList> {
        self.id_lists.lock().unwrap().clone()
    }

    /// Membership probe that avoids cloning the whole list.
    pub fn id_list_contains(&self, name: &str, id: &str) -> bool {
        self.id_lists
            .lock()
            .unwrap()
            .get(name)
            .map(|list| list.members.contains(id))
            .unwrap_or(false)
    }

    /// Look up the app ID granted to a client key. Hashed key material wins
    /// over the plaintext table so either storage generation resolves.
    pub fn get_app_id_from_key(&self, key: &str) -> Option<String> {
        let snapshot = self.snapshot();
        if let Some(app_id) = snapshot.hashed_sdk_keys_to_app_ids.get(&hash_key(key)) {
            return Some(app_id.clone());
        }
        snapshot.sdk_keys_to_app_ids.get(key).cloned()
    }

    pub fn get_entities_from_key(&self, key: &str) -> Option<EntityNames> {
        self.snapshot()
            .hashed_sdk_keys_to_entities
            .get(&hash_key(key))
            .cloned()
    }

    pub fn get_primary_target_app_id(&self) -> Option<String> {
        self.snapshot().primary_target_app_id.clone()
    }

    pub fn get_last_update_time(&self) -> i64 {
        self.updater.last_update_time()
    }

    pub fn get_init_time(&self) -> i64 {
        self.init_time.load(Ordering::Acquire)
    }

    pub fn get_evaluation_reason(&self) -> EvaluationReason {
        *self.init_reason.read().unwrap()
    }

    /// Reconcile the local ID-list table against server metadata and fetch
    /// the deltas for every list that grew.
    pub async fn sync_id_lists_from_network(
        self: &Arc<Self>,
        manifest: &HashMap<String, IDListMetadata>,
    ) {
        id_list_sync::sync_id_lists(self, self.updater.transport(), manifest).await;
    }

    pub(crate) fn process_pushed_specs(&self, specs: &DownloadedSpecs, reason: EvaluationReason) {
        if self.apply_snapshot(specs, false) {
            self.set_evaluation_reason(reason);
            self.fire_rules_updated(specs);
        }
        self.diagnostics.log_diagnostics(ContextKind::ConfigSync);
    }

    pub(crate) async fn process_pushed_id_lists(
        self: &Arc<Self>,
        manifest: &HashMap<String, IDListMetadata>,
    ) {
        self.sync_id_lists_from_network(manifest).await;
        self.diagnostics.log_diagnostics(ContextKind::ConfigSync);
    }

    pub(crate) fn set_evaluation_reason(&self, reason: EvaluationReason) {
        *self.init_reason.write().unwrap() = reason;
    }

    pub(crate) fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub(crate) fn error_boundary(&self) -> &Arc<ErrorBoundary> {
        &self.error_boundary
    }

    pub(crate) fn id_lists(&self) -> MutexGuard<'_, HashMap<String, IDList>> {
        self.id_lists.lock().unwrap()
    }

    pub(crate) fn next_download_call_count(&self) -> u64 {
        self.download_id_list_call_count
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    async fn initialize_specs(self: &Arc<Self>) {
        if let Some(data_store) = &self.options.data_store {
            if let Some(raw) = data_store.get(CACHE_KEY).await {
                match serde_json::from_str::<DownloadedSpecs>(&raw) {
                    Ok(specs) => {
                        if self.apply_snapshot(&specs, false) {
                            self.set_evaluation_reason(EvaluationReason::DataAdapter);
                            return;
                        }
                    }
                    Err(e) => self.error_boundary.log_error(
                        "read_cached_specs",
                        &format!("persisted cache unreadable: {}", e),
                    ),
                }
            }
        }

        if let Some(raw) = &self.options.bootstrap_values {
            self.diagnostics
                .mark_start(MarkerKey::Bootstrap, Some(StepKind::Process), None, None);
            let applied = match serde_json::from_str::<DownloadedSpecs>(raw) {
                Ok(specs) => {
                    let applied = self.apply_snapshot(&specs, true);
                    if applied {
                        self.set_evaluation_reason(EvaluationReason::Bootstrap);
                    }
                    applied
                }
                Err(e) => {
                    self.error_boundary.log_error(
                        "parse_bootstrap",
                        &format!("bootstrap payload could not be parsed: {}", e),
                    );
                    false
                }
            };
            self.diagnostics.mark_end(
                MarkerKey::Bootstrap,
                applied,
                Some(StepKind::Process),
                None,
                None,
            );
            if applied {
                return;
            }
        }

        // Neither the cache nor bootstrap produced a usable snapshot.
        match self.updater.fetch_config_specs().await {
            Ok(Some(specs)) => {
                if self.apply_snapshot(&specs, false) {
                    self.set_evaluation_reason(EvaluationReason::Network);
                    if let Some(data_store) = &self.options.data_store {
                        self.write_specs_to_data_store(data_store, &specs).await;
                    }
                    if self.options.bootstrap_values.is_none() {
                        self.fire_rules_updated(&specs);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => self.error_boundary.log_error("download_config_specs", &e),
        }
    }

    async fn write_specs_to_data_store(&self, data_store: &Arc<dyn DataStore>, specs: &DownloadedSpecs) {
        let serialized = match serde_json::to_string_pretty(specs) {
            Ok(serialized) => serialized,
            Err(e) => {
                self.error_boundary
                    .log_error("write_cached_specs", &format!("serialization failed: {}", e));
                return;
            }
        };
        if let Err(e) = data_store.set(CACHE_KEY, &serialized).await {
            self.error_boundary.log_error("write_cached_specs", &e);
        }
    }

    fn fire_rules_updated(&self, specs: &DownloadedSpecs) {
        let Some(callback) = &self.options.rules_updated_callback else {
            return;
        };
        match serde_json::to_string(specs) {
            Ok(raw) if !raw.is_empty() => callback(&raw),
            Ok(_) => {}
            Err(e) => self
                .error_boundary
                .log_error("rules_updated_callback", &format!("serialization failed: {}", e)),
        }
    }
}
