use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// One spec definition (a gate, dynamic config or layer config) as authored
/// on the server. Everything besides the name is an opaque blob consumed by
/// the rule evaluator; the store only ever indexes by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    pub name: String,
    #[serde(flatten)]
    pub definition: serde_json::Value,
}

/// Named gate/config entity lists granted to a hashed client key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityNames {
    #[serde(default)]
    pub gates: Vec<String>,
    #[serde(default)]
    pub configs: Vec<String>,
}

/// The full spec payload as it comes off the wire (network fetch, bootstrap
/// string or persisted cache — all three carry the same shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadedSpecs {
    pub has_updates: bool,
    pub time: i64,
    pub feature_gates: Vec<ConfigSpec>,
    pub dynamic_configs: Vec<ConfigSpec>,
    pub layer_configs: Vec<ConfigSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<HashMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_lists: Option<HashMap<String, bool>>,
    #[serde(rename = "sdkKeysToAppIDs", skip_serializing_if = "Option::is_none")]
    pub sdk_keys_to_app_ids: Option<HashMap<String, String>>,
    #[serde(rename = "hashedSDKKeysToAppIDs", skip_serializing_if = "Option::is_none")]
    pub hashed_sdk_keys_to_app_ids: Option<HashMap<String, String>>,
    #[serde(rename = "hashedSDKKeysToEntities", skip_serializing_if = "Option::is_none")]
    pub hashed_sdk_keys_to_entities: Option<HashMap<String, EntityNames>>,
    #[serde(rename = "primaryTargetAppID", skip_serializing_if = "Option::is_none")]
    pub primary_target_app_id: Option<String>,
    /// Per-context diagnostics sampling rates pushed by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<HashMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_configs: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_flags: Option<HashMap<String, bool>>,
}

/// Server-advertised state of one ID list, returned by the manifest
/// endpoint. `size` is the byte length of the remote append-only log, not a
/// member count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IDListMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "fileID", skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(rename = "creationTime")]
    pub creation_time: i64,
    pub size: i64,
}

/// Locally materialized ID list. `size` is the byte offset up to which the
/// remote log has been consumed; `file_id` + `creation_time` identify the
/// generation the accumulated members belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IDList {
    pub name: String,
    pub url: Option<String>,
    pub file_id: Option<String>,
    pub creation_time: i64,
    pub size: i64,
    pub members: HashSet<String>,
}

impl IDList {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Where the currently served specs came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    Uninitialized,
    Bootstrap,
    DataAdapter,
    Network,
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::Uninitialized => "UNINITIALIZED",
            EvaluationReason::Bootstrap => "BOOTSTRAP",
            EvaluationReason::DataAdapter => "DATA_ADAPTER",
            EvaluationReason::Network => "NETWORK",
        }
    }
}
