use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::diagnostics::{ContextKind, Diagnostics, MarkerData, MarkerKey};
use crate::error_boundary::ErrorBoundary;
use crate::errors::ClientError;
use crate::event_logger::EventLogger;
use crate::network::{HttpTransport, SpecTransport};
use crate::options::Options;
use crate::sdk_configs::SdkConfigs;
use crate::spec_store::{SpecSnapshot, SpecStore};
use crate::spec_types::{ConfigSpec, EntityNames, EvaluationReason, IDList};
use crate::updater::SpecUpdater;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unstarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// The embedding application's handle to the whole machine: one instance
/// per process, initialized once, shut down once. Every read asserts the
/// `Running` state and otherwise fails synchronously — nothing is queued.
pub struct FlagsyncClient {
    options: Arc<Options>,
    state: RwLock<ClientState>,
    lifecycle: Mutex<()>,
    store: Arc<SpecStore>,
    logger: Arc<EventLogger>,
    diagnostics: Arc<Diagnostics>,
    transport: Arc<dyn SpecTransport>,
    sdk_configs: Arc<SdkConfigs>,
}

impl FlagsyncClient {
    pub fn new(server_key: &str, options: Options) -> Result<Self, ClientError> {
        if server_key.is_empty() || !server_key.starts_with("server-") {
            return Err(ClientError::InvalidServerKey);
        }
        let transport = Arc::new(HttpTransport::new(&options.api_url, server_key));
        let logger = Arc::new(EventLogger::new(
            Arc::clone(&transport) as Arc<dyn SpecTransport>
        ));
        let diagnostics = Arc::new(Diagnostics::new(
            options.disable_diagnostics,
            Arc::clone(&logger) as Arc<dyn crate::diagnostics::MarkerSink>,
        ));
        transport.attach_diagnostics(Arc::clone(&diagnostics));
        Ok(Self::assemble(options, transport, logger, diagnostics))
    }

    /// Build against a caller-supplied transport (in-process fakes, local
    /// proxies). The transport is taken as-is; no key handling happens here.
    pub fn with_transport(options: Options, transport: Arc<dyn SpecTransport>) -> Self {
        let logger = Arc::new(EventLogger::new(Arc::clone(&transport)));
        let diagnostics = Arc::new(Diagnostics::new(
            options.disable_diagnostics,
            Arc::clone(&logger) as Arc<dyn crate::diagnostics::MarkerSink>,
        ));
        Self::assemble(options, transport, logger, diagnostics)
    }

    fn assemble(
        options: Options,
        transport: Arc<dyn SpecTransport>,
        logger: Arc<EventLogger>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let options = Arc::new(options);
        let sdk_configs = Arc::new(SdkConfigs::new());
        let updater = Arc::new(SpecUpdater::new(Arc::clone(&transport), Arc::clone(&options)));
        let store = Arc::new(SpecStore::new(
            updater,
            Arc::clone(&options),
            Arc::clone(&diagnostics),
            Arc::clone(&sdk_configs),
            Arc::new(ErrorBoundary::new()),
        ));
        Self {
            options,
            state: RwLock::new(ClientState::Unstarted),
            lifecycle: Mutex::new(()),
            store,
            logger,
            diagnostics,
            transport,
            sdk_configs,
        }
    }

    /// Sync specs from the highest-precedence available source and start
    /// background polling. Safe to race: callers serialize on the lifecycle
    /// lock, later callers see `Running` and return at once.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        let _guard = self.lifecycle.lock().await;
        match *self.state.read().unwrap() {
            ClientState::Running => return Ok(()),
            ClientState::ShuttingDown | ClientState::Stopped => return Err(ClientError::ShutDown),
            ClientState::Unstarted => {}
        }

        self.diagnostics
            .mark_start(MarkerKey::Overall, None, Some(ContextKind::Initialize), None);
        if !self.options.local_mode {
            self.store.initialize().await;
        }
        self.diagnostics.mark_end(
            MarkerKey::Overall,
            true,
            None,
            Some(ContextKind::Initialize),
            Some(MarkerData::Reason {
                reason: self.store.get_evaluation_reason().as_str().to_string(),
            }),
        );
        self.diagnostics.log_diagnostics(ContextKind::Initialize);
        self.diagnostics.set_context(ContextKind::ConfigSync);

        *self.state.write().unwrap() = ClientState::Running;
        Ok(())
    }

    /// Wind everything down. Polling stops first, buffered telemetry drains
    /// next, and only then does the transport go away; reordering would log
    /// through a closed transport or lose what's buffered.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_running()?;
        *self.state.write().unwrap() = ClientState::ShuttingDown;

        self.store.shutdown().await;
        self.logger.shutdown().await;
        self.transport.shutdown().await;

        *self.state.write().unwrap() = ClientState::Stopped;
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        *self.state.read().unwrap()
    }

    pub fn get_gate(&self, name: &str) -> Result<Option<ConfigSpec>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_gate(name))
    }

    pub fn get_all_gates(&self) -> Result<HashMap<String, ConfigSpec>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_all_gates())
    }

    pub fn get_config(&self, name: &str) -> Result<Option<ConfigSpec>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_config(name))
    }

    pub fn get_all_configs(&self) -> Result<HashMap<String, ConfigSpec>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_all_configs())
    }

    pub fn get_layer_config(&self, name: &str) -> Result<Option<ConfigSpec>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_layer_config(name))
    }

    pub fn get_all_layer_configs(&self) -> Result<HashMap<String, ConfigSpec>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_all_layer_configs())
    }

    pub fn get_layer(&self, name: &str) -> Result<Option<Vec<String>>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_layer(name))
    }

    pub fn get_all_layers(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_all_layers())
    }

    pub fn get_layer_name_for_experiment(
        &self,
        experiment: &str,
    ) -> Result<Option<String>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_layer_name_for_experiment(experiment))
    }

    pub fn get_id_list(&self, name: &str) -> Result<Option<IDList>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_id_list(name))
    }

    pub fn get_all_id_lists(&self) -> Result<HashMap<String, IDList>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_all_id_lists())
    }

    pub fn id_list_contains(&self, name: &str, id: &str) -> Result<bool, ClientError> {
        self.ensure_running()?;
        Ok(self.store.id_list_contains(name, id))
    }

    pub fn get_app_id_from_key(&self, key: &str) -> Result<Option<String>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_app_id_from_key(key))
    }

    pub fn get_entities_from_key(&self, key: &str) -> Result<Option<EntityNames>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_entities_from_key(key))
    }

    pub fn get_primary_target_app_id(&self) -> Result<Option<String>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_primary_target_app_id())
    }

    pub fn get_last_update_time(&self) -> Result<i64, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_last_update_time())
    }

    pub fn get_init_time(&self) -> Result<i64, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_init_time())
    }

    pub fn get_evaluation_reason(&self) -> Result<EvaluationReason, ClientError> {
        self.ensure_running()?;
        Ok(self.store.get_evaluation_reason())
    }

    /// A frozen view of the current specs, for evaluators that want to make
    /// several consistent lookups without re-entering the store.
    pub fn snapshot(&self) -> Result<Arc<SpecSnapshot>, ClientError> {
        self.ensure_running()?;
        Ok(self.store.snapshot())
    }

    pub fn sdk_configs(&self) -> &Arc<SdkConfigs> {
        &self.sdk_configs
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        match *self.state.read().unwrap() {
            ClientState::Running => Ok(()),
            ClientState::Unstarted => Err(ClientError::NotInitialized),
            ClientState::ShuttingDown | ClientState::Stopped => Err(ClientError::ShutDown),
        }
    }
}
