//! Named trace regions and the sinks that receive them.

use crate::heap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// One closed region, as delivered to a [`TraceSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRecord {
    /// Task id assigned at launch
    pub task: u64,
    /// What triggered the task ("startup", "http at ...")
    pub origin: String,
    /// Region name
    pub name: &'static str,
    /// Name of the thread the region ran on
    pub thread: Option<String>,
    /// Nanoseconds since the tracer epoch
    pub start_ns: u64,
    pub end_ns: u64,
    /// Process heap live bytes at region entry and exit
    pub heap_live_start: u64,
    pub heap_live_end: u64,
}

impl RegionRecord {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Destination for closed regions. Must tolerate concurrent callers.
pub trait TraceSink: Send + Sync {
    fn record(&self, region: RegionRecord);

    /// Disabled sinks let the tracer skip clock and heap reads entirely
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sink used when tracing is turned off
#[derive(Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _region: RegionRecord) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Collects regions in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    regions: Mutex<Vec<RegionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far, in arrival order
    pub fn regions(&self) -> Vec<RegionRecord> {
        self.lock().clone()
    }

    /// Regions recorded for one task, in arrival order
    pub fn regions_for(&self, task: u64) -> Vec<RegionRecord> {
        self.lock()
            .iter()
            .filter(|r| r.task == task)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RegionRecord>> {
        // A panicking recorder cannot leave the Vec half-written
        self.regions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TraceSink for MemorySink {
    fn record(&self, region: RegionRecord) {
        self.lock().push(region);
    }
}

/// Cheap, cloneable handle to the process-wide trace stream.
///
/// All clones share one sink and one epoch, so timestamps from concurrent
/// tasks land on the same timeline.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn TraceSink>,
    epoch: Instant,
}

impl Tracer {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            sink,
            epoch: Instant::now(),
        }
    }

    /// A tracer that drops every region
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_enabled()
    }

    /// Open a region that closes when the returned guard is dropped
    pub fn region<'a>(&'a self, task: u64, origin: &'a str, name: &'static str) -> Region<'a> {
        let enabled = self.is_enabled();
        Region {
            tracer: self,
            task,
            origin,
            name,
            enabled,
            start_ns: if enabled { self.now_ns() } else { 0 },
            heap_live_start: if enabled {
                heap::snapshot().live_bytes
            } else {
                0
            },
        }
    }

    /// Run `f` inside a region named `name`.
    ///
    /// The region is recorded even if `f` does nothing.
    pub fn with_region<R>(
        &self,
        task: u64,
        origin: &str,
        name: &'static str,
        f: impl FnOnce() -> R,
    ) -> R {
        let _region = self.region(task, origin, name);
        f()
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// An open region. Recorded on drop.
pub struct Region<'a> {
    tracer: &'a Tracer,
    task: u64,
    origin: &'a str,
    name: &'static str,
    enabled: bool,
    start_ns: u64,
    heap_live_start: u64,
}

impl Drop for Region<'_> {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let record = RegionRecord {
            task: self.task,
            origin: self.origin.to_owned(),
            name: self.name,
            thread: std::thread::current().name().map(str::to_owned),
            start_ns: self.start_ns,
            end_ns: self.tracer.now_ns(),
            heap_live_start: self.heap_live_start,
            heap_live_end: heap::snapshot().live_bytes,
        };
        self.tracer.sink.record(record);
    }
}
