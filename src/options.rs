use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::data_store::DataStore;

pub const DEFAULT_API_URL: &str = "https://api.flagsync.dev";

/// Fires after each accepted network- or datastore-driven rules update with
/// the serialized payload.
pub type RulesUpdatedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Client configuration. Chain the setters over `Options::default()`:
///
/// ```
/// use flagsync_lib::Options;
///
/// let options = Options::default()
///     .api("https://flags.internal.example.com")
///     .rules_sync_interval(std::time::Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct Options {
    pub api_url: String,
    pub rules_sync_interval: Duration,
    pub id_list_sync_interval: Duration,
    pub bootstrap_values: Option<String>,
    pub data_store: Option<Arc<dyn DataStore>>,
    pub rules_updated_callback: Option<RulesUpdatedCallback>,
    pub disable_diagnostics: bool,
    pub local_mode: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            rules_sync_interval: Duration::from_secs(10),
            id_list_sync_interval: Duration::from_secs(60),
            bootstrap_values: None,
            data_store: None,
            rules_updated_callback: None,
            disable_diagnostics: false,
            local_mode: false,
        }
    }
}

impl Options {
    pub fn api(mut self, url: &str) -> Self {
        self.api_url = url.to_string();
        self
    }

    pub fn rules_sync_interval(mut self, interval: Duration) -> Self {
        self.rules_sync_interval = interval;
        self
    }

    pub fn id_list_sync_interval(mut self, interval: Duration) -> Self {
        self.id_list_sync_interval = interval;
        self
    }

    /// Seed the client with a spec payload baked into the binary or shipped
    /// alongside it, applied when no persisted cache is usable.
    pub fn bootstrap_values(mut self, raw: &str) -> Self {
        self.bootstrap_values = Some(raw.to_string());
        self
    }

    pub fn data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.data_store = Some(store);
        self
    }

    pub fn on_rules_updated(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.rules_updated_callback = Some(Arc::new(callback));
        self
    }

    pub fn disable_diagnostics(mut self) -> Self {
        self.disable_diagnostics = true;
        self
    }

    /// Never touch the network; specs only come from explicit local seeding.
    pub fn local_mode(mut self) -> Self {
        self.local_mode = true;
        self
    }

    /// Best-effort load from a `flagsync.toml`-style file, falling back to
    /// defaults for anything missing or unparsable.
    pub fn from_config_file(path: &str) -> Self {
        let file: FileOptions = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_default();

        let mut options = Options::default();
        if let Some(api) = file.api {
            options.api_url = api;
        }
        if let Some(secs) = file.rules_sync_interval_secs {
            options.rules_sync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.id_list_sync_interval_secs {
            options.id_list_sync_interval = Duration::from_secs(secs);
        }
        if let Some(disabled) = file.disable_diagnostics {
            options.disable_diagnostics = disabled;
        }
        if let Some(local) = file.local_mode {
            options.local_mode = local;
        }
        options
    }
}

#[derive(Deserialize, Default)]
struct FileOptions {
    api: Option<String>,
    rules_sync_interval_secs: Option<u64>,
    id_list_sync_interval_secs: Option<u64>,
    disable_diagnostics: Option<bool>,
    local_mode: Option<bool>,
}

/// Resolve the server key from: explicit arg > FLAGSYNC_SERVER_KEY env var.
pub fn resolve_server_key(key_arg: Option<&str>) -> Option<String> {
    key_arg
        .map(String::from)
        .or_else(|| std::env::var("FLAGSYNC_SERVER_KEY").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.api_url, DEFAULT_API_URL);
        assert_eq!(options.rules_sync_interval, Duration::from_secs(10));
        assert_eq!(options.id_list_sync_interval, Duration::from_secs(60));
        assert!(!options.local_mode);
        assert!(options.bootstrap_values.is_none());
    }

    #[test]
    fn test_missing_config_file_falls_back_to_defaults() {
        let options = Options::from_config_file("/nonexistent/flagsync.toml");
        assert_eq!(options.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_config_file_overrides() {
        let path = std::env::temp_dir().join(format!("flagsync-options-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "api = \"https://flags.corp.example.com\"\nrules_sync_interval_secs = 30\ndisable_diagnostics = true\n",
        )
        .unwrap();

        let options = Options::from_config_file(path.to_str().unwrap());
        assert_eq!(options.api_url, "https://flags.corp.example.com");
        assert_eq!(options.rules_sync_interval, Duration::from_secs(30));
        assert!(options.disable_diagnostics);
        // Untouched fields keep their defaults.
        assert_eq!(options.id_list_sync_interval, Duration::from_secs(60));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_resolve_server_key_prefers_arg() {
        assert_eq!(
            resolve_server_key(Some("server-abc")).as_deref(),
            Some("server-abc")
        );
    }
}
