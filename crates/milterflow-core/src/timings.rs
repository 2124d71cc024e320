//! Per-message timing collection.

use std::time::Instant;

/// Log target of timing reports.
pub const TIMINGS_TARGET: &str = "milterflow::timings";

/// Category of a timing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingKind {
    /// Session bookkeeping.
    Overhead,
    /// Phase plugin.
    MilterPlugin,
    /// Prepender.
    Prepender,
    /// Scanner plugin.
    Plugin,
    /// Appender.
    Appender,
}

impl TimingKind {
    /// Short label used in reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Overhead => "",
            Self::MilterPlugin => "(MPL) ",
            Self::Prepender => "(PRE) ",
            Self::Plugin => "(PLG) ",
            Self::Appender => "(APP) ",
        }
    }
}

/// One tracked interval.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingEntry {
    /// What ran.
    pub name: String,
    /// Category.
    pub kind: TimingKind,
    /// Seconds since the previous entry.
    pub seconds: f64,
}

/// Collects time spent per phase and plugin.
///
/// A disabled tracker ignores every call.
#[derive(Debug, Clone)]
pub struct Timings {
    enabled: bool,
    port: u16,
    started: Instant,
    last: Instant,
    entries: Vec<TimingEntry>,
    async_waits: Vec<(String, f64)>,
}

impl Timings {
    /// Creates a tracker.
    #[must_use]
    pub fn new(enabled: bool, port: u16) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            port,
            started: now,
            last: now,
            entries: Vec::new(),
            async_waits: Vec::new(),
        }
    }

    /// Returns true if timings are collected.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records the time since the previous entry under `name`.
    pub fn track(&mut self, name: &str, kind: TimingKind) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        self.entries.push(TimingEntry {
            name: name.to_string(),
            kind,
            seconds: now.duration_since(self.last).as_secs_f64(),
        });
        self.last = now;
    }

    /// Adds time spent waiting on an asynchronous source.
    pub fn add_async(&mut self, name: &str, seconds: f64) {
        if !self.enabled {
            return;
        }
        match self.async_waits.iter_mut().find(|(n, _)| n == name) {
            Some((_, total)) => *total += seconds,
            None => self.async_waits.push((name.to_string(), seconds)),
        }
    }

    /// Restarts the clock and forgets every entry.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.started = now;
        self.last = now;
        self.entries.clear();
        self.async_waits.clear();
    }

    /// Tracked entries.
    #[must_use]
    pub fn entries(&self) -> &[TimingEntry] {
        &self.entries
    }

    /// Sum of all entries of `kind`, or of every entry.
    #[must_use]
    pub fn sum(&self, kind: Option<TimingKind>) -> f64 {
        self.entries
            .iter()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .map(|e| e.seconds)
            .sum()
    }

    /// Logs every entry for message `id`.
    pub fn report(&self, id: &str, with_realtime: bool) {
        if !self.enabled {
            return;
        }
        let port = self.port;

        if with_realtime {
            let real = self.started.elapsed().as_secs_f64();
            tracing::info!(target: TIMINGS_TARGET, "port: {port}, id: {id}, real: {real:.6}");
            for (name, seconds) in &self.async_waits {
                tracing::info!(target: TIMINGS_TARGET, "port: {port}, id: {id}, async {name}: {seconds:.6}");
            }
        }

        tracing::info!(target: TIMINGS_TARGET, "port: {port}, id: {id}, total: {:.3}", self.sum(None));
        tracing::info!(
            target: TIMINGS_TARGET,
            "port: {port}, id: {id}, overhead: {:.3}",
            self.sum(Some(TimingKind::Overhead))
        );

        for entry in &self.entries {
            let label = entry.kind.label();
            let name = &entry.name;
            let seconds = entry.seconds;
            if entry.kind == TimingKind::Overhead {
                tracing::debug!(target: TIMINGS_TARGET, "port: {port}, id: {id}, {name}: {seconds:.3}");
            } else {
                tracing::info!(target: TIMINGS_TARGET, "port: {port}, id: {id}, {label}{name}: {seconds:.3}");
            }
        }
    }
}
