// ── Event Log ──────────────────────────────────────────────────────────────
// Commands report through this in-memory ring buffer rather than printing.
// When full, the oldest entry is overwritten. Reads return newest first.

use crate::atoms::constants::EVENT_LOG_CAPACITY;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub level: EventLevel,
    /// Subsystem tag, e.g. "cache", "remote", "expand".
    pub source: String,
    pub message: String,
}

/// Ring-buffer event log shared across the engine.
pub struct EventLog {
    entries: Mutex<EventRing>,
}

struct EventRing {
    entries: Vec<EngineEvent>,
    /// Write index (wraps at capacity).
    head: usize,
    /// Total entries ever written.
    total: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        EventLog {
            entries: Mutex::new(EventRing {
                entries: Vec::with_capacity(EVENT_LOG_CAPACITY),
                head: 0,
                total: 0,
            }),
        }
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.push(EventLevel::Info, source, message.into());
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        self.push(EventLevel::Warn, source, message.into());
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.push(EventLevel::Error, source, message.into());
    }

    fn push(&self, level: EventLevel, source: &str, message: String) {
        let event = EngineEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            source: source.to_string(),
            message,
        };
        let mut ring = self.entries.lock();
        if ring.entries.len() < EVENT_LOG_CAPACITY {
            ring.entries.push(event);
        } else {
            let head = ring.head;
            ring.entries[head] = event;
        }
        ring.head = (ring.head + 1) % EVENT_LOG_CAPACITY;
        ring.total += 1;
    }

    /// Recent events, newest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<EngineEvent> {
        let ring = self.entries.lock();
        let len = ring.entries.len();
        if len == 0 {
            return vec![];
        }
        let count = limit.min(len);
        let mut result = Vec::with_capacity(count);
        let mut idx = if len < EVENT_LOG_CAPACITY {
            len - 1
        } else {
            (ring.head + EVENT_LOG_CAPACITY - 1) % EVENT_LOG_CAPACITY
        };
        for _ in 0..count {
            result.push(ring.entries[idx].clone());
            idx = (idx + len - 1) % len;
        }
        result
    }

    /// Total events ever written.
    pub fn total(&self) -> u64 {
        self.entries.lock().total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_reads() {
        let log = EventLog::new();
        log.info("cache", "first");
        log.warn("remote", "second");
        log.error("expand", "third");
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "third");
        assert_eq!(recent[1].message, "second");
        assert_eq!(log.total(), 3);
    }

    #[test]
    fn ring_overwrites_oldest() {
        let log = EventLog::new();
        for i in 0..(EVENT_LOG_CAPACITY + 10) {
            log.info("test", format!("event-{i}"));
        }
        assert_eq!(log.total(), (EVENT_LOG_CAPACITY + 10) as u64);
        let recent = log.recent(EVENT_LOG_CAPACITY + 50);
        assert_eq!(recent.len(), EVENT_LOG_CAPACITY);
        assert_eq!(
            recent[0].message,
            format!("event-{}", EVENT_LOG_CAPACITY + 9)
        );
        assert_eq!(recent.last().unwrap().message, "event-10");
    }

    #[test]
    fn empty_log_reads_empty() {
        let log = EventLog::new();
        assert!(log.recent(10).is_empty());
        assert_eq!(log.total(), 0);
    }
}
