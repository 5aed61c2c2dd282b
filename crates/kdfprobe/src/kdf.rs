//! The scrypt workload and its salt source.

use crate::error::{Error, Result};

/// Fixed input to every derivation
pub const PASSPHRASE: &[u8] = b"example_phrase";

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

pub type Salt = [u8; SALT_LEN];

/// scrypt cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N
    pub log_n: u8,
    /// Block size factor
    pub r: u32,
    /// Parallelization factor
    pub p: u32,
    /// Derived key length in bytes
    pub len: usize,
}

impl KdfParams {
    /// N = 2^17, r = 8, p = 1, 32-byte output: roughly 128 MiB of scratch per call
    pub const WORKLOAD: KdfParams = KdfParams {
        log_n: 17,
        r: 8,
        p: 1,
        len: 32,
    };

    /// Scratch memory the primitive allocates: 128 * r * N bytes
    pub fn scratch_bytes(&self) -> u64 {
        128u64
            .saturating_mul(self.r as u64)
            .saturating_mul(1u64.checked_shl(self.log_n as u32).unwrap_or(u64::MAX))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::WORKLOAD
    }
}

/// Run scrypt over `passphrase` and `salt`.
///
/// Blocking and CPU-bound for the whole call.
pub fn derive_key(passphrase: &[u8], salt: &[u8], params: &KdfParams) -> Result<Vec<u8>> {
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, params.len)
        .map_err(|e| Error::KeyDerivation(format!("{e} ({params:?})")))?;

    let mut key = vec![0u8; params.len];
    scrypt::scrypt(passphrase, salt, &scrypt_params, &mut key)
        .map_err(|e| Error::KeyDerivation(format!("{e} (len {})", params.len)))?;
    Ok(key)
}

/// Source of salt bytes
pub trait SaltSource: Send + Sync {
    fn fill(&self, salt: &mut [u8]) -> Result<()>;

    fn generate(&self) -> Result<Salt> {
        let mut salt = [0u8; SALT_LEN];
        self.fill(&mut salt)?;
        Ok(salt)
    }
}

/// The operating system's secure random source
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl SaltSource for OsEntropy {
    fn fill(&self, salt: &mut [u8]) -> Result<()> {
        getrandom::fill(salt).map_err(|e| Error::Entropy(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHEAP: KdfParams = KdfParams {
        log_n: 4,
        r: 8,
        p: 1,
        len: 32,
    };

    #[test]
    fn test_workload_params() {
        let params = KdfParams::default();
        assert_eq!(params.log_n, 17);
        assert_eq!(params.r, 8);
        assert_eq!(params.p, 1);
        assert_eq!(params.len, 32);
        assert_eq!(params.scratch_bytes(), 128 * 1024 * 1024);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key(PASSPHRASE, &salt, &CHEAP).unwrap();
        let b = derive_key(PASSPHRASE, &salt, &CHEAP).unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
    }

    #[test]
    fn test_salt_changes_key() {
        let a = derive_key(PASSPHRASE, &[1u8; SALT_LEN], &CHEAP).unwrap();
        let b = derive_key(PASSPHRASE, &[2u8; SALT_LEN], &CHEAP).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_cost_rejected() {
        let params = KdfParams { log_n: 64, ..CHEAP };
        assert!(matches!(
            derive_key(PASSPHRASE, &[0u8; SALT_LEN], &params),
            Err(Error::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_os_entropy_salts_differ() {
        let a = OsEntropy.generate().unwrap();
        let b = OsEntropy.generate().unwrap();
        assert_ne!(a, b);
    }
}
