//! Embedded feature-flag and experimentation client. Keeps an always-fresh
//! local copy of remotely authored gates, dynamic configs, layers and
//! targeting ID lists so flag checks never pay a network round trip.

pub mod client;
pub mod data_store;
pub mod diagnostics;
pub mod error_boundary;
pub mod errors;
pub mod event_logger;
mod id_list_sync;
pub mod network;
pub mod options;
pub mod sdk_configs;
pub mod spec_store;
pub mod spec_types;
pub mod updater;

pub use client::{ClientState, FlagsyncClient};
pub use data_store::{DataStore, MemoryDataStore, SledDataStore, CACHE_KEY};
pub use errors::ClientError;
pub use network::{HttpTransport, SpecTransport};
pub use options::Options;
pub use spec_store::{SpecSnapshot, SpecStore};
pub use spec_types::{
    ConfigSpec, DownloadedSpecs, EntityNames, EvaluationReason, IDList, IDListMetadata,
};
