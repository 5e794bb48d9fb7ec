use parking_lot::Mutex;
use std::sync::Arc;

/// Sink for traceback text.
///
/// `report` receives the full block; `trace` receives the one-line
/// summary that the fallback formatter also mirrors to a secondary channel.
pub trait Reporter: Send + Sync {
    fn report(&self, text: &str);

    fn trace(&self, _line: &str) {}
}

/// Default sink: `tracing` events under `pylauncher::traceback`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, text: &str) {
        tracing::error!(target: "pylauncher::traceback", "Traceback:\n\n{}\n", text);
    }

    fn trace(&self, line: &str) {
        tracing::trace!(target: "pylauncher::traceback", "{}", line);
    }
}

/// Keeps reports in memory, e.g. for a host that shows them in a dialog.
#[derive(Debug, Default, Clone)]
pub struct BufferedReporter {
    reports: Arc<Mutex<Vec<String>>>,
    traces: Arc<Mutex<Vec<String>>>,
}

impl BufferedReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_reports(&self) -> Vec<String> {
        std::mem::take(&mut *self.reports.lock())
    }

    pub fn take_traces(&self) -> Vec<String> {
        std::mem::take(&mut *self.traces.lock())
    }

    pub fn last_report(&self) -> Option<String> {
        self.reports.lock().last().cloned()
    }
}

impl Reporter for BufferedReporter {
    fn report(&self, text: &str) {
        self.reports.lock().push(text.to_string());
    }

    fn trace(&self, line: &str) {
        self.traces.lock().push(line.to_string());
    }
}
