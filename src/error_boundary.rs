use std::collections::HashSet;
use std::sync::Mutex;

/// Best-effort sink for failures that must never abort a sync cycle.
///
/// Each distinct (tag, message) pair is written to stderr once; repeats are
/// swallowed so a flapping endpoint doesn't flood the host application's
/// logs on every poll.
#[derive(Default)]
pub struct ErrorBoundary {
    seen: Mutex<HashSet<String>>,
}

impl ErrorBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_error(&self, tag: &str, message: &str) {
        let entry = format!("{}: {}", tag, message);
        let mut seen = self.seen.lock().unwrap();
        if seen.insert(entry) {
            eprintln!("flagsync: {}: {}", tag, message);
        }
    }
}
