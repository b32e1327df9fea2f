//! Sink for the data-quality events raised while preparing a dataset.
//!
//! Unreadable images and images without a detected face are not fatal, they are reported
//! here and the caller keeps going. The call site is passed explicitly so a sink does not
//! need to introspect the stack.
use std::cell::RefCell;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

pub trait Reporter {
    fn report(&self, severity: Severity, message: &str, location: &'static Location<'static>);

    #[track_caller]
    fn warn(&self, message: &str) {
        self.report(Severity::Warning, message, Location::caller());
    }

    #[track_caller]
    fn info(&self, message: &str) {
        self.report(Severity::Info, message, Location::caller());
    }
}

/// Forwards every event to `tracing`, keeping the original call site as fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, severity: Severity, message: &str, location: &'static Location<'static>) {
        match severity {
            Severity::Info => {
                tracing::info!(file = location.file(), line = location.line(), "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(file = location.file(), line = location.line(), "{}", message)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportEvent {
    pub severity: Severity,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
}

/// Keeps events in memory. Clones share the same event log.
#[derive(Clone, Debug, Default)]
pub struct MemoryReporter {
    events: Rc<RefCell<Vec<ReportEvent>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<ReportEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.severity == Severity::Warning)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, severity: Severity, message: &str, location: &'static Location<'static>) {
        self.events.borrow_mut().push(ReportEvent {
            severity,
            message: message.to_string(),
            file: location.file(),
            line: location.line(),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_reporter_keeps_call_site() {
        let reporter = MemoryReporter::new();
        let shared = reporter.clone();
        let line = line!() + 1;
        reporter.warn("unable to read image");
        reporter.info("loaded");

        let events = shared.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[0].message, "unable to read image");
        assert_eq!(events[0].line, line);
        assert!(events[0].file.ends_with("report.rs"));
        assert_eq!(shared.warnings().len(), 1);

        shared.clear();
        assert!(reporter.events().is_empty());
    }
}
