//! Formatted leveled logging with include/exclude glob rules and a bounded
//! ring buffer drained by a background writer thread (§4.A).

mod ring;
mod rules;
mod writer;

use std::fmt::Arguments;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub use ring::{LogSlot, Priority, FILE_CAPACITY, FUNC_CAPACITY, TEXT_CAPACITY};
pub use rules::{Rule, RuleAction};
use ring::RingBuffer;
use rules::RuleSet;
use writer::Writer;

/// Default ring buffer capacity; must stay a power of two.
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// The fraction of capacity that must drain before the logger starts
/// accepting new entries again after an overflow (§9: "tunable").
const OVERFLOW_REOPEN_NUMERATOR: usize = 7;
const OVERFLOW_REOPEN_DENOMINATOR: usize = 8;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("ring buffer capacity must be a power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),

    #[error("failed to open log file {path}: {source}")]
    FileOpen { path: PathBuf, source: std::io::Error },

    #[error("failed to create wakeup eventfd: {0}")]
    EventFd(std::io::Error),

    #[error("failed to spawn logger writer thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("logger already open")]
    AlreadyOpen,
}

/// Output backend selected by `-l` (§6).
#[derive(Debug, Clone)]
pub enum Method {
    None,
    Stderr,
    Syslog,
    File(PathBuf),
}

/// The logger facade. Cheap to clone (an `Arc` to shared state) so every
/// plugin-facing API and the socket/D-Bus control paths can hold one.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    ring: Arc<RingBuffer>,
    rules: parking_lot::Mutex<RuleSet>,
    verbosity: AtomicU32,
    dropped: AtomicU32,
    /// Set once an overflow has started; cleared (with one synthetic entry
    /// emitted) once occupancy falls back under the reopen threshold.
    overflowing: AtomicBool,
    writer: parking_lot::Mutex<Option<Writer>>,
    /// When the writer thread cannot be signaled, logging falls back to
    /// synchronous in-caller emission (§4.A "Failure semantics").
    synchronous_fallback: AtomicBool,
}

impl Logger {
    /// `open` per §4.A: selects the backend, sets initial verbosity, and
    /// starts the background writer thread (unless `method` is `None`).
    pub fn open(
        method: Method,
        verbosity: u8,
        ring_capacity: usize,
    ) -> Result<Self, LoggerError> {
        if !ring_capacity.is_power_of_two() {
            return Err(LoggerError::CapacityNotPowerOfTwo(ring_capacity));
        }
        let ring = Arc::new(RingBuffer::new(ring_capacity));
        let writer = Writer::spawn(method, ring.clone())?;

        let inner = Inner {
            ring,
            rules: parking_lot::Mutex::new(RuleSet::new()),
            verbosity: AtomicU32::new(verbosity as u32),
            dropped: AtomicU32::new(0),
            overflowing: AtomicBool::new(false),
            writer: parking_lot::Mutex::new(Some(writer)),
            synchronous_fallback: AtomicBool::new(false),
        };
        Ok(Logger { inner: Arc::new(inner) })
    }

    /// Stop the writer thread, flushing any entries still buffered from the
    /// calling thread per §4.A ("On worker-thread exit during process
    /// teardown, any remaining entries are flushed from the main thread").
    pub fn close(&self) {
        let mut guard = self.inner.writer.lock();
        if let Some(writer) = guard.take() {
            writer.shutdown();
        }
    }

    pub fn set_verbosity(&self, level: u8) {
        self.inner.verbosity.store(level as u32, Ordering::Relaxed);
    }

    pub fn verbosity(&self) -> u8 {
        self.inner.verbosity.load(Ordering::Relaxed) as u8
    }

    pub fn include(&self, pattern: &str) {
        self.inner.rules.lock().add(Rule { pattern: pattern.to_string(), action: RuleAction::Include });
    }

    pub fn exclude(&self, pattern: &str) {
        self.inner.rules.lock().add(Rule { pattern: pattern.to_string(), action: RuleAction::Exclude });
    }

    pub fn clear_rules(&self) {
        self.inner.rules.lock().clear();
    }

    /// `log(priority, file, func, fmt, args...)` — the hot path (§4.A).
    pub fn log(&self, priority: Priority, file: &str, func: &str, args: Arguments<'_>) {
        if !self.should_emit(priority, file, func) {
            return;
        }
        let text = std::fmt::format(args);
        self.enqueue(priority, file, func, &text);
    }

    fn should_emit(&self, priority: Priority, file: &str, func: &str) -> bool {
        match self.inner.rules.lock().decide(file, func) {
            Some(RuleAction::Include) => true,
            Some(RuleAction::Exclude) => false,
            None => priority as u8 <= self.verbosity(),
        }
    }

    fn enqueue(&self, priority: Priority, file: &str, func: &str, text: &str) {
        let slot = LogSlot::new(priority, file, func, text);

        if self.inner.synchronous_fallback.load(Ordering::Relaxed) {
            if let Some(writer) = self.inner.writer.lock().as_ref() {
                writer.emit_sync(&slot);
            }
            return;
        }

        // Reopen after a prior overflow once occupancy has drained enough.
        if self.inner.overflowing.load(Ordering::Relaxed) {
            let threshold =
                (self.inner.ring.capacity() * OVERFLOW_REOPEN_NUMERATOR) / OVERFLOW_REOPEN_DENOMINATOR;
            if self.inner.ring.occupancy() < threshold {
                self.inner.overflowing.store(false, Ordering::Relaxed);
                let lost = self.inner.dropped.swap(0, Ordering::Relaxed);
                if lost > 0 {
                    let notice = format!("logging ringbuffer overflow; {lost} messages lost");
                    let notice_slot = LogSlot::new(Priority::Warning, file, func, &notice);
                    self.push_or_drop(notice_slot);
                }
            }
        }

        self.push_or_drop(slot);
    }

    fn push_or_drop(&self, slot: LogSlot) {
        if self.inner.ring.try_push(slot) {
            self.notify_writer();
        } else {
            self.inner.overflowing.store(true, Ordering::Relaxed);
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn notify_writer(&self) {
        let guard = self.inner.writer.lock();
        match guard.as_ref() {
            Some(writer) if writer.notify().is_ok() => {}
            _ => self.inner.synchronous_fallback.store(true, Ordering::Relaxed),
        }
    }

    /// Current dropped-but-not-yet-reported count, exposed for tests.
    #[cfg(test)]
    pub(crate) fn dropped_count(&self) -> u32 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn ring_occupancy(&self) -> usize {
        self.inner.ring.occupancy()
    }
}

/// Formats and queues a log call; mirrors the C-style `log(priority, file,
/// func, fmt, args...)` contract from §4.A using Rust's format machinery.
#[macro_export]
macro_rules! dsme_log {
    ($logger:expr, $priority:expr, $($arg:tt)*) => {
        $logger.log($priority, file!(), concat!(module_path!(), "::", "<anon>"), format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_when_priority_within_verbosity_and_no_rule_matches() {
        let logger = Logger::open(Method::None, 6, 16).unwrap();
        assert!(logger.should_emit(Priority::Info, "foo.rs", "bar"));
        assert!(!logger.should_emit(Priority::Debug, "foo.rs", "bar"));
    }

    #[test]
    fn include_rule_overrides_verbosity() {
        let logger = Logger::open(Method::None, 3, 16).unwrap();
        logger.include("foo.rs:*");
        assert!(logger.should_emit(Priority::Debug, "foo.rs", "bar"));
    }

    #[test]
    fn exclude_rule_suppresses_unconditionally() {
        let logger = Logger::open(Method::None, 7, 16).unwrap();
        logger.exclude("foo.rs:*");
        assert!(!logger.should_emit(Priority::Emerg, "foo.rs", "bar"));
    }

    #[test]
    fn most_recently_added_matching_rule_wins() {
        let logger = Logger::open(Method::None, 3, 16).unwrap();
        logger.include("foo.rs:*");
        logger.exclude("foo.rs:*");
        assert!(!logger.should_emit(Priority::Emerg, "foo.rs", "bar"));
    }

    #[test]
    fn overflow_drops_entries_past_capacity() {
        let logger = Logger::open(Method::None, 7, 4).unwrap();
        for i in 0..10 {
            logger.enqueue(Priority::Notice, "f.rs", "g", &format!("msg {i}"));
        }
        assert!(logger.dropped_count() > 0 || logger.ring_occupancy() == 4);
    }
}
