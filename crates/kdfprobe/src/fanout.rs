//! Launches invocations at startup and per request.
//!
//! Launch and abandon: every invocation runs on a detached thread and nothing
//! joins it. There is no queue and no limit on tasks in flight.

use crate::config::RunConfig;
use crate::invocation::Invocation;
use std::sync::atomic::{AtomicU64, Ordering};

pub const STARTUP_ORIGIN: &str = "startup";

/// Origin label for invocations triggered by a request at `timestamp`
pub fn request_origin(timestamp: &str) -> String {
    format!("http at {timestamp}")
}

pub struct FanOut {
    config: RunConfig,
    unit: Invocation,
    next_task: AtomicU64,
}

impl FanOut {
    pub fn new(config: RunConfig, unit: Invocation) -> Self {
        Self {
            config,
            unit,
            next_task: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Launch the single startup invocation
    pub fn on_startup(&self) -> usize {
        self.launch(1, STARTUP_ORIGIN)
    }

    /// Launch `count` invocations for a request received at `timestamp`
    pub fn on_request(&self, timestamp: &str) -> usize {
        self.launch(self.config.count.get(), &request_origin(timestamp))
    }

    /// Total task ids handed out so far
    pub fn launched(&self) -> u64 {
        self.next_task.load(Ordering::Relaxed)
    }

    fn launch(&self, count: usize, origin: &str) -> usize {
        let mut launched = 0;
        for _ in 0..count {
            let task = self.next_task.fetch_add(1, Ordering::Relaxed);
            let unit = self.unit.clone();
            let origin = origin.to_owned();

            // Dropping the JoinHandle detaches the thread
            let spawned = std::thread::Builder::new()
                .name(format!("invocation-{task}"))
                .spawn(move || unit.run(task, &origin));

            match spawned {
                Ok(_) => launched += 1,
                Err(e) => tracing::warn!(task, "failed to launch invocation: {e}"),
            }
        }
        launched
    }
}
