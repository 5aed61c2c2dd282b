use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Secure random source failed: {0}")]
    Entropy(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("HTTP server error: {0}")]
    Server(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Trace writer error: {0}")]
    TraceWriter(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// Process exit codes
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const DATABASE_ERROR: i32 = 6;
    pub const ENTROPY_FAILURE: i32 = 7;
    pub const SERVER_ERROR: i32 = 8;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Entropy(_) => exit_code::ENTROPY_FAILURE,
            Error::Server(_) => exit_code::SERVER_ERROR,
            Error::Database(_) => exit_code::DATABASE_ERROR,
            Error::InvalidArgument(_) => exit_code::INVALID_ARGUMENTS,
            _ => exit_code::GENERAL_ERROR,
        }
    }
}
