use crate::cli::Cli;
use crate::error::{Error, Result};
use std::num::NonZeroUsize;

/// Immutable probe configuration, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Release freed heap memory after each derivation
    pub force_collect: bool,
    /// Invocations launched per request
    pub count: NonZeroUsize,
}

impl RunConfig {
    pub fn new(force_collect: bool, count: usize) -> Result<Self> {
        let count = NonZeroUsize::new(count).ok_or_else(|| {
            Error::InvalidArgument("invocation count must be at least 1".to_string())
        })?;
        Ok(Self {
            force_collect,
            count,
        })
    }

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        Self::new(cli.force, cli.count)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            force_collect: false,
            count: NonZeroUsize::MIN,
        }
    }
}
