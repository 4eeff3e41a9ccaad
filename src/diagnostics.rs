use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use rand::Rng;
use serde::Serialize;

pub const MAX_SAMPLING_RATE: u32 = 10_000;

/// Logical operation a batch of markers belongs to. Each context has its own
/// queue and its own sampling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Initialize,
    ConfigSync,
    ApiCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKey {
    DownloadConfigSpecs,
    Bootstrap,
    GetIdList,
    GetIdListSources,
    Overall,
    CheckGate,
    GetConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Process,
    NetworkRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Start,
    End,
}

/// Fields that are only meaningful for a specific (key, step) pair. A marker
/// carries exactly the variant its pair calls for, nothing else.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MarkerData {
    Network {
        #[serde(rename = "markerID", skip_serializing_if = "Option::is_none")]
        marker_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdk_region: Option<String>,
    },
    IdListSources {
        id_list_count: usize,
    },
    ApiCall {
        config_name: String,
        #[serde(rename = "markerID")]
        marker_id: String,
    },
    Reason {
        reason: String,
    },
}

/// One timestamped diagnostics event. Timestamps are monotonic fractional
/// milliseconds since client construction, not wall-clock.
#[derive(Debug, Clone, Serialize)]
pub struct Marker {
    pub key: MarkerKey,
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<StepKind>,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(flatten)]
    pub data: Option<MarkerData>,
}

/// Downstream consumer of a flushed marker queue.
pub trait MarkerSink: Send + Sync {
    fn log_diagnostics(&self, context: ContextKind, markers: Vec<Marker>);
}

fn sampling_key(context: ContextKind) -> &'static str {
    match context {
        ContextKind::ConfigSync => "dcs",
        ContextKind::Initialize => "initialize",
        ContextKind::ApiCall => "api_call",
    }
}

pub struct Diagnostics {
    disabled: bool,
    context: RwLock<ContextKind>,
    sampling_rates: RwLock<HashMap<&'static str, u32>>,
    markers: Mutex<HashMap<ContextKind, Vec<Marker>>>,
    epoch: Instant,
    sink: std::sync::Arc<dyn MarkerSink>,
}

impl Diagnostics {
    pub fn new(disabled: bool, sink: std::sync::Arc<dyn MarkerSink>) -> Self {
        Self {
            disabled,
            context: RwLock::new(ContextKind::Initialize),
            sampling_rates: RwLock::new(HashMap::from([
                ("dcs", 0),
                ("log", 0),
                ("initialize", MAX_SAMPLING_RATE),
                ("idlist", 0),
                ("api_call", 0),
            ])),
            markers: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
            sink,
        }
    }

    /// Switch the ambient context used when `mark_start`/`mark_end` are
    /// called without an explicit one.
    pub fn set_context(&self, context: ContextKind) {
        *self.context.write().unwrap() = context;
    }

    pub fn mark_start(
        &self,
        key: MarkerKey,
        step: Option<StepKind>,
        context: Option<ContextKind>,
        data: Option<MarkerData>,
    ) {
        if self.disabled {
            return;
        }
        let marker = Marker {
            key,
            action: ActionKind::Start,
            step,
            timestamp: self.now_ms(),
            success: None,
            data,
        };
        self.add_marker(marker, context);
    }

    pub fn mark_end(
        &self,
        key: MarkerKey,
        success: bool,
        step: Option<StepKind>,
        context: Option<ContextKind>,
        data: Option<MarkerData>,
    ) {
        if self.disabled {
            return;
        }
        let marker = Marker {
            key,
            action: ActionKind::End,
            step,
            timestamp: self.now_ms(),
            success: Some(success),
            data,
        };
        self.add_marker(marker, context);
    }

    /// Adopt server-pushed sampling rates. Values are clamped into
    /// `[0, 10000]`; keys we don't know about are ignored.
    pub fn set_sampling_rate(&self, rates: &HashMap<String, i64>) {
        let mut table = self.sampling_rates.write().unwrap();
        for (key, rate) in rates {
            let known = match key.as_str() {
                "dcs" => "dcs",
                "log" => "log",
                "initialize" => "initialize",
                "idlist" => "idlist",
                "api_call" => "api_call",
                _ => continue,
            };
            table.insert(known, (*rate).clamp(0, MAX_SAMPLING_RATE as i64) as u32);
        }
    }

    pub fn should_log_diagnostics(&self, context: ContextKind) -> bool {
        let rate = self
            .sampling_rates
            .read()
            .unwrap()
            .get(sampling_key(context))
            .copied()
            .unwrap_or(0);
        let draw = rand::thread_rng().gen_range(0.0..MAX_SAMPLING_RATE as f64);
        rate as f64 > draw
    }

    /// Flush the context's queue through the sink if the sampling draw
    /// passes. The queue is cleared only on an actual flush; an unsampled
    /// attempt leaves the markers in place for the next attempt.
    pub fn log_diagnostics(&self, context: ContextKind) {
        let mut markers = self.markers.lock().unwrap();
        let empty = markers.get(&context).map(Vec::is_empty).unwrap_or(true);
        if empty || !self.should_log_diagnostics(context) {
            return;
        }
        let queue = markers.remove(&context).unwrap_or_default();
        drop(markers);
        self.sink.log_diagnostics(context, queue);
    }

    pub fn start_network_request_diagnostics(&self, key: Option<MarkerKey>) {
        if let Some(key) = key {
            self.mark_start(key, Some(StepKind::NetworkRequest), None, None);
        }
    }

    pub fn end_network_request_diagnostics(
        &self,
        key: Option<MarkerKey>,
        success: bool,
        status_code: Option<u16>,
        sdk_region: Option<String>,
    ) {
        if let Some(key) = key {
            self.mark_end(
                key,
                success,
                Some(StepKind::NetworkRequest),
                None,
                Some(MarkerData::Network {
                    marker_id: None,
                    url: None,
                    status_code,
                    sdk_region,
                }),
            );
        }
    }

    /// Map a request URL to the instrumentation key its markers should be
    /// recorded under.
    pub fn key_from_url(url: &str) -> Option<MarkerKey> {
        if url.contains("/download_config_specs") {
            return Some(MarkerKey::DownloadConfigSpecs);
        }
        if url.contains("/get_id_lists") {
            return Some(MarkerKey::GetIdListSources);
        }
        None
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1_000.0
    }

    fn add_marker(&self, marker: Marker, context: Option<ContextKind>) {
        let context = context.unwrap_or_else(|| *self.context.read().unwrap());
        self.markers
            .lock()
            .unwrap()
            .entry(context)
            .or_default()
            .push(marker);
    }

    #[cfg(test)]
    fn queued(&self, context: ContextKind) -> usize {
        self.markers
            .lock()
            .unwrap()
            .get(&context)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
