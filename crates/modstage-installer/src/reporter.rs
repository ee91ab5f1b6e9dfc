use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Notice,
    Ok,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Ok => "",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for the human readable progress of an installer run.
///
/// The installer only ever pushes to it.
pub trait InstallReporter {
    fn start(&mut self) {}

    fn message(&mut self, text: &str, severity: Severity);

    fn end(&mut self) {}
}

impl<T: InstallReporter + ?Sized> InstallReporter for &mut T {
    fn start(&mut self) {
        (**self).start()
    }
    fn message(&mut self, text: &str, severity: Severity) {
        (**self).message(text, severity)
    }
    fn end(&mut self) {
        (**self).end()
    }
}

impl<T: InstallReporter + ?Sized> InstallReporter for Box<T> {
    fn start(&mut self) {
        (**self).start()
    }
    fn message(&mut self, text: &str, severity: Severity) {
        (**self).message(text, severity)
    }
    fn end(&mut self) {
        (**self).end()
    }
}

/// Keeps every message in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryReporter {
    pub starts: usize,
    pub ends: usize,
    pub messages: Vec<(Severity, String)>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_severity(&self, severity: Severity) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    pub fn errors(&self) -> Vec<&str> {
        self.with_severity(Severity::Error)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.iter().any(|(_, text)| text.contains(needle))
    }
}

impl InstallReporter for MemoryReporter {
    fn start(&mut self) {
        self.starts += 1;
    }

    fn message(&mut self, text: &str, severity: Severity) {
        self.messages.push((severity, text.to_string()));
    }

    fn end(&mut self) {
        self.ends += 1;
    }
}
