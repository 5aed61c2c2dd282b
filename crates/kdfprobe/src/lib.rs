pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fanout;
pub mod invocation;
pub mod kdf;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
