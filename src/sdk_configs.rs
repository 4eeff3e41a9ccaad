use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

/// Server-pushed knobs that tune the SDK itself, as opposed to the specs the
/// host application evaluates. Replaced wholesale on every accepted spec
/// payload that carries them.
#[derive(Default)]
pub struct SdkConfigs {
    configs: RwLock<HashMap<String, Value>>,
    flags: RwLock<HashMap<String, bool>>,
}

impl SdkConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_configs(&self, configs: HashMap<String, Value>) {
        *self.configs.write().unwrap() = configs;
    }

    pub fn set_flags(&self, flags: HashMap<String, bool>) {
        *self.flags.write().unwrap() = flags;
    }

    pub fn get_config(&self, name: &str) -> Option<Value> {
        self.configs.read().unwrap().get(name).cloned()
    }

    /// Whether an SDK-level flag is on. Unknown flags are off.
    pub fn on(&self, name: &str) -> bool {
        self.flags.read().unwrap().get(name).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_flag_is_off() {
        let configs = SdkConfigs::new();
        assert!(!configs.on("anything"));
        configs.set_flags(HashMap::from([("stream_events".to_string(), true)]));
        assert!(configs.on("stream_events"));
        assert!(!configs.on("other"));
    }

    #[test]
    fn test_configs_replaced_wholesale() {
        let configs = SdkConfigs::new();
        configs.set_configs(HashMap::from([(
            "batch_size".to_string(),
            Value::from(100),
        )]));
        assert_eq!(configs.get_config("batch_size"), Some(Value::from(100)));
        configs.set_configs(HashMap::new());
        assert_eq!(configs.get_config("batch_size"), None);
    }
}
