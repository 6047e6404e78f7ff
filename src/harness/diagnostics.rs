//! Bounded diagnostic trail, most recent entry first.

use std::collections::VecDeque;
use std::time::SystemTime;

use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct DiagnosticEntry {
    pub at: SystemTime,
    pub level: DiagnosticLevel,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: VecDeque<DiagnosticEntry>,
    capacity: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, level: DiagnosticLevel, message: impl Into<String>) {
        let message = message.into();
        if level != DiagnosticLevel::Info {
            warn!("{}", message);
        }
        self.entries.push_front(DiagnosticEntry {
            at: SystemTime::now(),
            level,
            message,
        });
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> impl Iterator<Item = &DiagnosticEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&DiagnosticEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_recent_first_and_bounded() {
        let mut log = DiagnosticLog::new(3);
        for i in 0..5 {
            log.push(DiagnosticLevel::Info, format!("entry {}", i));
        }
        assert_eq!(log.len(), 3);
        let msgs: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["entry 4", "entry 3", "entry 2"]);
        assert_eq!(log.latest().unwrap().message, "entry 4");
    }
}
