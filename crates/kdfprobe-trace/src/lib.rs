//! Trace regions and heap accounting for kdfprobe.
//!
//! This crate provides the two observation channels the probe writes to:
//! - **Regions**: named, timestamped intervals delivered to a [`TraceSink`]
//! - **Heap accounting**: a counting global allocator whose live byte count is
//!   stamped onto every region boundary
//!
//! # Usage
//!
//! Install the counting allocator in the binary:
//! ```rust,ignore
//! kdfprobe_trace::counting_allocator!();
//! ```
//!
//! Bracket work with a region:
//! ```rust,ignore
//! let tracer = Tracer::new(Arc::new(MemorySink::new()));
//! tracer.with_region(task, "startup", "derive", || expensive());
//! ```
//!
//! When the `heap` feature is disabled, the macro expands to nothing and the
//! heap counters stay at zero.

pub mod heap;
mod region;

pub use heap::{CountingAllocator, HeapSnapshot, release_free_memory};
pub use region::{MemorySink, NoopSink, Region, RegionRecord, TraceSink, Tracer};

/// Install [`CountingAllocator`] as the global allocator.
///
/// Expands to nothing when the `heap` feature is disabled.
///
/// # Examples
///
/// ```rust,ignore
/// kdfprobe_trace::counting_allocator!();
/// ```
#[macro_export]
#[cfg(feature = "heap")]
macro_rules! counting_allocator {
    () => {
        #[global_allocator]
        static __KDFPROBE_ALLOC: $crate::CountingAllocator = $crate::CountingAllocator::new();
    };
}

/// No-op when heap feature is disabled
#[macro_export]
#[cfg(not(feature = "heap"))]
macro_rules! counting_allocator {
    () => {};
}
