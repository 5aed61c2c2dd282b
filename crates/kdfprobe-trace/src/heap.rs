//! Process-wide heap accounting through a counting allocator.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Bytes currently allocated and not yet freed
static LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
/// Cumulative bytes handed out since process start
static ALLOC_BYTES: AtomicU64 = AtomicU64::new(0);
/// Cumulative allocation calls since process start
static ALLOC_COUNT: AtomicU64 = AtomicU64::new(0);
/// Set on the first allocation routed through the counting allocator
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// A global allocator that wraps [`System`] and keeps running totals.
///
/// Counters are relaxed atomics: they are observational and may be read
/// mid-update by a concurrent thread.
pub struct CountingAllocator;

impl CountingAllocator {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for CountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn record_alloc(size: usize) {
    if !INSTALLED.load(Ordering::Relaxed) {
        INSTALLED.store(true, Ordering::Relaxed);
    }
    LIVE_BYTES.fetch_add(size as u64, Ordering::Relaxed);
    ALLOC_BYTES.fetch_add(size as u64, Ordering::Relaxed);
    ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn record_dealloc(size: usize) {
    LIVE_BYTES.fetch_sub(size as u64, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for CountingAllocator {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        record_dealloc(layout.size());
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        // On failure the original block is untouched
        if !new_ptr.is_null() {
            record_dealloc(layout.size());
            record_alloc(new_size);
        }
        new_ptr
    }
}

/// Point-in-time view of the heap counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapSnapshot {
    pub live_bytes: u64,
    pub allocated_bytes: u64,
    pub allocations: u64,
}

/// Read the current counters. All zero when the allocator is not installed.
pub fn snapshot() -> HeapSnapshot {
    HeapSnapshot {
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
        allocated_bytes: ALLOC_BYTES.load(Ordering::Relaxed),
        allocations: ALLOC_COUNT.load(Ordering::Relaxed),
    }
}

/// Whether [`CountingAllocator`] has served at least one allocation
pub fn is_counting() -> bool {
    INSTALLED.load(Ordering::Relaxed)
}

/// Ask the allocator to hand freed pages back to the OS.
///
/// Blocks until the trim completes. Returns `true` if memory was released.
/// Only glibc exposes a trim entry point; elsewhere this does nothing.
pub fn release_free_memory() -> bool {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        unsafe { libc::malloc_trim(0) != 0 }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_alloc_and_dealloc() {
        // Exercise the allocator directly; the test binary uses the system one.
        let alloc = CountingAllocator::new();
        let layout = Layout::from_size_align(4096, 8).unwrap();
        let before = snapshot();

        let ptr = unsafe { alloc.alloc(layout) };
        assert!(!ptr.is_null());
        let during = snapshot();
        assert!(during.allocated_bytes >= before.allocated_bytes + 4096);
        assert!(during.allocations > before.allocations);
        assert!(is_counting());

        unsafe { alloc.dealloc(ptr, layout) };
        let after = snapshot();
        // Freeing never rewinds the cumulative total
        assert!(after.allocated_bytes >= during.allocated_bytes);
    }

    #[test]
    fn test_realloc_moves_accounting() {
        let alloc = CountingAllocator::new();
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let ptr = alloc.alloc_zeroed(layout);
            assert!(!ptr.is_null());
            let grown = alloc.realloc(ptr, layout, 256);
            assert!(!grown.is_null());
            alloc.dealloc(grown, Layout::from_size_align(256, 8).unwrap());
        }
    }

    #[test]
    fn test_release_free_memory_is_callable() {
        let _ = release_free_memory();
    }
}
