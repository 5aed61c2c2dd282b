//! One unit of probed work: salt, derive, optional forced collection.
//!
//! Every invocation emits exactly two regions, `derive` then `force-collect`,
//! so timelines recorded with and without `--force` line up region for
//! region. The collect region is emitted empty when forcing is off.

use crate::config::RunConfig;
use crate::error::Result;
use crate::kdf::{self, KdfParams, OsEntropy, PASSPHRASE, SaltSource};
use kdfprobe_trace::Tracer;
use std::sync::Arc;

pub const REGION_DERIVE: &str = "derive";
pub const REGION_FORCE_COLLECT: &str = "force-collect";

/// What a completed invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// The primitive produced a key
    pub derived: bool,
    /// A forced collection ran
    pub collected: bool,
}

/// The probed workload. Cheap to clone; clones share the salt source and
/// trace stream and nothing else.
#[derive(Clone)]
pub struct Invocation {
    force_collect: bool,
    params: KdfParams,
    salt_source: Arc<dyn SaltSource>,
    tracer: Tracer,
}

impl Invocation {
    pub fn new(config: &RunConfig, tracer: Tracer) -> Self {
        Self::with_parts(config, KdfParams::WORKLOAD, Arc::new(OsEntropy), tracer)
    }

    pub fn with_parts(
        config: &RunConfig,
        params: KdfParams,
        salt_source: Arc<dyn SaltSource>,
        tracer: Tracer,
    ) -> Self {
        Self {
            force_collect: config.force_collect,
            params,
            salt_source,
            tracer,
        }
    }

    /// Run the workload once.
    ///
    /// Only a salt failure is returned; it happens before any region opens.
    /// A derivation failure is logged and the collect step still runs.
    pub fn execute(&self, task: u64, origin: &str) -> Result<Outcome> {
        tracing::info!(task, origin, "invocation requested");

        let salt = self.salt_source.generate()?;

        let key = self.tracer.with_region(task, origin, REGION_DERIVE, || {
            match kdf::derive_key(PASSPHRASE, &salt, &self.params) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(task, origin, "{e}");
                    None
                }
            }
        });
        let derived = key.is_some();

        let collected = self
            .tracer
            .with_region(task, origin, REGION_FORCE_COLLECT, || {
                if self.force_collect {
                    drop(key);
                    let released = kdfprobe_trace::release_free_memory();
                    tracing::debug!(task, released, "forced collection");
                    true
                } else {
                    false
                }
            });

        Ok(Outcome { derived, collected })
    }

    /// Entry point for launched tasks. A salt failure ends the process.
    pub fn run(&self, task: u64, origin: &str) {
        if let Err(e) = self.execute(task, origin) {
            tracing::error!(task, origin, "{e}");
            std::process::exit(e.exit_code());
        }
    }
}
