//! Destinations for module diagnostics.

use parking_lot::Mutex;
use tidepool_core::diagnostic::Diagnostic;
use tracing::{info, warn};

/// Receives every recognized diagnostic message and plain log line.
///
/// The sink is fixed when a binding is created and shared with the host
/// functions through the store.
pub trait DiagnosticSink: Send + Sync {
    /// Called for each decoded diagnostic message.
    fn emit(&self, diagnostic: &Diagnostic);

    /// Called for each line written through the plain log import.
    fn log(&self, text: &str);
}

/// Sink that forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::Condition(condition) => {
                warn!(target: "tidepool::module", %condition, "module condition");
            }
            Diagnostic::Binary(bytes) => {
                info!(
                    target: "tidepool::module",
                    bytes = bytes.len(),
                    "{}",
                    diagnostic.emitted_text()
                );
            }
            Diagnostic::Log(text) | Diagnostic::Text(text) => {
                info!(target: "tidepool::module", "{text}");
            }
        }
    }

    fn log(&self, text: &str) {
        info!(target: "tidepool::module::console", "{text}");
    }
}

/// Sink that collects emitted text in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    emitted: Mutex<Vec<String>>,
    logs: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Text emitted so far, binary payloads as base64.
    pub fn emitted(&self) -> Vec<String> {
        self.emitted.lock().clone()
    }

    /// Lines written through the plain log import.
    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    /// Drain the emitted text.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.emitted.lock())
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, diagnostic: &Diagnostic) {
        self.emitted
            .lock()
            .push(diagnostic.emitted_text().into_owned());
    }

    fn log(&self, text: &str) {
        self.logs.lock().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_core::diagnostic::ModuleCondition;

    #[test]
    fn memory_sink_collects_text() {
        let sink = MemorySink::new();
        sink.emit(&Diagnostic::Log("hello".to_string()));
        sink.emit(&Diagnostic::Binary(vec![0, 1, 2, 3]));
        sink.emit(&Diagnostic::Condition(ModuleCondition::QueryFailed));
        sink.log("console line");

        assert_eq!(sink.emitted(), vec!["hello", "AAECAw==", "query-failed"]);
        assert_eq!(sink.logs(), vec!["console line"]);
        assert_eq!(sink.take().len(), 3);
        assert!(sink.emitted().is_empty());
    }

    #[test]
    fn tracing_sink_accepts_every_kind() {
        let sink = TracingSink;
        sink.emit(&Diagnostic::Text("{}".to_string()));
        sink.emit(&Diagnostic::Binary(Vec::new()));
        sink.emit(&Diagnostic::Condition(ModuleCondition::Uninitialized));
        sink.log("plain");
    }
}
