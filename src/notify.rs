use std::sync::Mutex;
use tracing::info;

/// Sink for user-visible notifications (watch-list hits). Kept synchronous:
/// every call site already runs on the event loop.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes notifications to the service log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "seatmap::user", "{}", message);
    }
}

/// Collects notifications in memory so tests can assert on them.
#[derive(Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
