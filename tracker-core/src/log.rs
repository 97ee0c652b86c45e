//! Process-wide debug log: tail-mergeable line store plus a mirrored sink.
//!
//! Every record lands in a bounded ring of text lines (served read-only to
//! remote viewers) and is mirrored best-effort to a secondary sink such as a
//! serial console. Recording also pumps the cooperative service hook so that
//! verbose logging can never starve the network responder or the watchdog.
//! The one exception is records originating *from* the responder itself,
//! which skip the pump to avoid unbounded recursion.

use core::fmt::Write as _;

use heapless::{Deque, String};

use crate::clock::Clock;
use crate::io::{IdleService, SERVICE_BURST, WAIT_GRANULE_MS};

/// Maximum bytes per stored log line; longer lines are truncated.
pub const MAX_LINE: usize = 160;

/// Lines retained before the oldest is evicted.
pub const STORE_CAPACITY: usize = 64;

/// A single stored log line.
pub type LogLine = String<MAX_LINE>;

/// Best-effort mirror for recorded text. Failures are swallowed; the store
/// is the authoritative copy.
pub trait LogSink {
    fn write(&mut self, text: &str);
}

/// Sink that discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn write(&mut self, _: &str) {}
}

/// Ordered line store: append at tail, remove at head, and replace or extend
/// the current tail to merge same-logical-line continuations.
///
/// The original firmware let this grow without bound; here the ring evicts
/// its oldest line at capacity and counts the evictions instead.
#[derive(Default)]
pub struct LogStore {
    lines: Deque<LogLine, STORE_CAPACITY>,
    overflow_count: u32,
}

impl LogStore {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Deque::new(),
            overflow_count: 0,
        }
    }

    /// Appends a new tail line, evicting the head when full.
    pub fn append_tail(&mut self, line: &LogLine) {
        if self.lines.is_full() {
            let _ = self.lines.pop_front();
            self.overflow_count = self.overflow_count.saturating_add(1);
        }
        // Cannot fail: a slot was just guaranteed above.
        let _ = self.lines.push_back(line.clone());
    }

    /// Removes and returns the oldest line.
    pub fn remove_head(&mut self) -> Option<LogLine> {
        self.lines.pop_front()
    }

    /// Replaces the current tail line outright. Returns `false` when the
    /// store is empty.
    pub fn replace_tail(&mut self, line: &LogLine) -> bool {
        match self.lines.back_mut() {
            Some(tail) => {
                *tail = line.clone();
                true
            }
            None => false,
        }
    }

    /// Extends the current tail line in place, truncating once the line is
    /// full. Returns `false` when the store is empty.
    pub fn append_to_tail(&mut self, text: &str) -> bool {
        match self.lines.back_mut() {
            Some(tail) => {
                for ch in text.chars() {
                    if tail.push(ch).is_err() {
                        break;
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Oldest-first view for remote viewers; entries are not consumed.
    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines lost to eviction since boot.
    #[must_use]
    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }
}

/// Per-record flags.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordOptions {
    /// Merge into the tail line when the previous record also continued.
    pub continuation: bool,
    /// Record originates from the network responder; skip the service pump.
    pub from_responder: bool,
}

impl RecordOptions {
    /// A plain, self-contained line.
    #[must_use]
    pub const fn line() -> Self {
        Self {
            continuation: false,
            from_responder: false,
        }
    }

    /// A continuation of the previous record's logical line.
    #[must_use]
    pub const fn continued() -> Self {
        Self {
            continuation: true,
            from_responder: false,
        }
    }

    /// Marks the record as responder-originated.
    #[must_use]
    pub const fn from_responder(mut self) -> Self {
        self.from_responder = true;
        self
    }
}

/// The logging facility proper: owns the store, the mirror sink, and the
/// continuation state.
pub struct DebugLog<S: LogSink> {
    store: LogStore,
    sink: S,
    last_was_continuation: bool,
}

impl<S: LogSink> DebugLog<S> {
    pub const fn new(sink: S) -> Self {
        Self {
            store: LogStore::new(),
            sink,
            last_was_continuation: false,
        }
    }

    /// Records `text`, prefixing new lines with the seconds since power-on.
    ///
    /// Two consecutive records that both request continuation share one
    /// stored line; the continuation carries no timestamp prefix. Every call
    /// mirrors the raw text to the sink, and (unless the record came from the
    /// responder) runs a burst of service passes, yields once, and waits one
    /// scheduler granule before returning.
    pub fn record(
        &mut self,
        clock: &impl Clock,
        services: &mut impl IdleService,
        text: &str,
        options: RecordOptions,
    ) {
        if options.continuation && self.last_was_continuation && !self.store.is_empty() {
            self.store.append_to_tail(text);
        } else {
            let mut line = LogLine::new();
            let _ = write!(line, "{}: ", clock.seconds_since_power_on());
            for ch in text.chars() {
                if line.push(ch).is_err() {
                    break;
                }
            }
            self.store.append_tail(&line);
        }
        self.last_was_continuation = options.continuation;

        self.sink.write(text);

        if !options.from_responder {
            for _ in 0..SERVICE_BURST {
                services.service_once();
            }
            services.yield_once();
            services.wait_ms(WAIT_GRANULE_MS);
        }
    }

    /// Read-only store view for remote retrieval.
    #[must_use]
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Explicit head removal, the only consuming access.
    pub fn remove_head(&mut self) -> Option<LogLine> {
        self.store.remove_head()
    }
}

#[cfg(test)]
mod tests {
    use super::{DebugLog, LogLine, LogSink, LogStore, MAX_LINE, RecordOptions, STORE_CAPACITY};
    use crate::clock::Clock;
    use crate::io::IdleService;

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn seconds_since_power_on(&self) -> u64 {
            self.0
        }

        fn now_millis(&self) -> u64 {
            self.0 * 1_000
        }
    }

    #[derive(Default)]
    struct CountingServices {
        service_calls: usize,
        yields: usize,
        waits: usize,
    }

    impl IdleService for CountingServices {
        fn service_once(&mut self) {
            self.service_calls += 1;
        }

        fn yield_once(&mut self) {
            self.yields += 1;
        }

        fn wait_ms(&mut self, _: u64) {
            self.waits += 1;
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        writes: usize,
    }

    impl LogSink for &mut CapturingSink {
        fn write(&mut self, _: &str) {
            self.writes += 1;
        }
    }

    fn line(text: &str) -> LogLine {
        let mut out = LogLine::new();
        for ch in text.chars() {
            if out.push(ch).is_err() {
                break;
            }
        }
        out
    }

    #[test]
    fn new_lines_carry_seconds_prefix() {
        let mut sink = CapturingSink::default();
        let mut log = DebugLog::new(&mut sink);
        let mut services = CountingServices::default();

        log.record(&FixedClock(42), &mut services, "modem on", RecordOptions::line());

        assert_eq!(log.store().len(), 1);
        assert_eq!(log.store().iter().next().unwrap().as_str(), "42: modem on");
    }

    #[test]
    fn consecutive_continuations_share_one_line() {
        let mut sink = CapturingSink::default();
        let mut log = DebugLog::new(&mut sink);
        let mut services = CountingServices::default();
        let clock = FixedClock(7);

        log.record(&clock, &mut services, "gps", RecordOptions::continued());
        log.record(&clock, &mut services, "...", RecordOptions::continued());
        log.record(&clock, &mut services, "fix", RecordOptions::continued());

        assert_eq!(log.store().len(), 1);
        assert_eq!(log.store().iter().next().unwrap().as_str(), "7: gps...fix");
    }

    #[test]
    fn continuation_after_plain_line_starts_fresh() {
        let mut sink = CapturingSink::default();
        let mut log = DebugLog::new(&mut sink);
        let mut services = CountingServices::default();
        let clock = FixedClock(1);

        log.record(&clock, &mut services, "first", RecordOptions::line());
        log.record(&clock, &mut services, "second", RecordOptions::continued());

        assert_eq!(log.store().len(), 2);
        let mut lines = log.store().iter();
        assert_eq!(lines.next().unwrap().as_str(), "1: first");
        assert_eq!(lines.next().unwrap().as_str(), "1: second");
    }

    #[test]
    fn every_record_mirrors_to_the_sink() {
        let mut sink = CapturingSink::default();
        {
            let mut log = DebugLog::new(&mut sink);
            let mut services = CountingServices::default();
            let clock = FixedClock(0);
            log.record(&clock, &mut services, "a", RecordOptions::line());
            log.record(&clock, &mut services, "b", RecordOptions::continued());
        }
        assert_eq!(sink.writes, 2);
    }

    #[test]
    fn responder_records_skip_the_service_pump() {
        let mut sink = CapturingSink::default();
        let mut log = DebugLog::new(&mut sink);
        let mut services = CountingServices::default();
        let clock = FixedClock(0);

        log.record(
            &clock,
            &mut services,
            "from responder",
            RecordOptions::line().from_responder(),
        );
        assert_eq!(services.service_calls, 0);
        assert_eq!(services.waits, 0);

        log.record(&clock, &mut services, "from loop", RecordOptions::line());
        assert!(services.service_calls > 0);
        assert_eq!(services.yields, 1);
        assert_eq!(services.waits, 1);
    }

    #[test]
    fn store_evicts_head_at_capacity() {
        let mut store = LogStore::new();
        for index in 0..STORE_CAPACITY + 5 {
            let mut text = LogLine::new();
            let _ = core::fmt::write(&mut text, format_args!("line {index}"));
            store.append_tail(&text);
        }

        assert_eq!(store.len(), STORE_CAPACITY);
        assert_eq!(store.overflow_count(), 5);
        assert_eq!(store.iter().next().unwrap().as_str(), "line 5");
    }

    #[test]
    fn remove_head_consumes_oldest_first() {
        let mut store = LogStore::new();
        store.append_tail(&line("oldest"));
        store.append_tail(&line("newest"));

        assert_eq!(store.remove_head().unwrap().as_str(), "oldest");
        assert_eq!(store.remove_head().unwrap().as_str(), "newest");
        assert!(store.remove_head().is_none());
    }

    #[test]
    fn replace_tail_swaps_only_the_last_line() {
        let mut store = LogStore::new();
        assert!(!store.replace_tail(&line("nothing to replace")));

        store.append_tail(&line("kept"));
        store.append_tail(&line("replaced"));
        assert!(store.replace_tail(&line("final")));

        let mut lines = store.iter();
        assert_eq!(lines.next().unwrap().as_str(), "kept");
        assert_eq!(lines.next().unwrap().as_str(), "final");
    }

    #[test]
    fn tail_append_truncates_at_line_capacity() {
        let mut store = LogStore::new();
        store.append_tail(&line("x"));
        for _ in 0..MAX_LINE {
            store.append_to_tail("yy");
        }
        assert_eq!(store.iter().next().unwrap().len(), MAX_LINE);
    }
}
