//! Context configuration
//!
//! Tuning knobs for a [`Context`](crate::Context): worker threads for the CPU
//! backend, reduction chunk sizing and the device allocation limit. The
//! process-wide default context reads them from the environment.

use crate::error::{Error, Result};
use std::env;
use std::str::FromStr;
use tessera_backends::CpuBackendConfig;

/// Smallest chunk a reduction is split into, in elements
pub const DEFAULT_MIN_CHUNK_LEN: usize = 4096;

/// Chunks planned per compute unit
pub const DEFAULT_CHUNKS_PER_UNIT: usize = 4;

/// Configuration for building a [`Context`](crate::Context)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Worker threads for the CPU backend; `None` uses one per core
    pub threads: Option<usize>,
    /// Minimum elements per reduction chunk
    pub min_chunk_len: usize,
    /// Upper bound on chunks per compute unit
    pub chunks_per_unit: usize,
    /// Device allocation limit in bytes; `None` keeps the backend default
    pub max_allocation_bytes: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            threads: None,
            min_chunk_len: DEFAULT_MIN_CHUNK_LEN,
            chunks_per_unit: DEFAULT_CHUNKS_PER_UNIT,
            max_allocation_bytes: None,
        }
    }
}

impl ContextConfig {
    /// Read configuration from the environment, starting from defaults.
    ///
    /// # Environment Variables
    ///
    /// - `TESSERA_THREADS` - CPU backend worker threads
    /// - `TESSERA_MIN_CHUNK_LEN` - minimum elements per reduction chunk
    /// - `TESSERA_CHUNKS_PER_UNIT` - chunks planned per compute unit
    /// - `TESSERA_MAX_ALLOCATION_BYTES` - device allocation limit
    ///
    /// Unset or empty variables keep their defaults. Values that do not parse
    /// are reported as [`Error::InvalidConfig`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(threads) = parse_env("TESSERA_THREADS")? {
            config.threads = Some(threads);
        }
        if let Some(min_chunk_len) = parse_env("TESSERA_MIN_CHUNK_LEN")? {
            config.min_chunk_len = min_chunk_len;
        }
        if let Some(chunks_per_unit) = parse_env("TESSERA_CHUNKS_PER_UNIT")? {
            config.chunks_per_unit = chunks_per_unit;
        }
        if let Some(max_bytes) = parse_env("TESSERA_MAX_ALLOCATION_BYTES")? {
            config.max_allocation_bytes = Some(max_bytes);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the CPU backend worker thread count
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the minimum chunk length
    pub fn with_min_chunk_len(mut self, min_chunk_len: usize) -> Self {
        self.min_chunk_len = min_chunk_len;
        self
    }

    /// Set the chunks planned per compute unit
    pub fn with_chunks_per_unit(mut self, chunks_per_unit: usize) -> Self {
        self.chunks_per_unit = chunks_per_unit;
        self
    }

    /// Set the device allocation limit
    pub fn with_max_allocation_bytes(mut self, max_allocation_bytes: usize) -> Self {
        self.max_allocation_bytes = Some(max_allocation_bytes);
        self
    }

    /// Reject zero-valued sizing parameters
    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(Error::InvalidConfig("threads must be at least 1".to_string()));
        }
        if self.min_chunk_len == 0 {
            return Err(Error::InvalidConfig("min_chunk_len must be at least 1".to_string()));
        }
        if self.chunks_per_unit == 0 {
            return Err(Error::InvalidConfig("chunks_per_unit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// CPU backend configuration derived from this context configuration
    pub fn cpu_backend_config(&self) -> CpuBackendConfig {
        let defaults = CpuBackendConfig::default();
        CpuBackendConfig {
            threads: self.threads,
            max_allocation_bytes: self.max_allocation_bytes.unwrap_or(defaults.max_allocation_bytes),
            max_blocks: defaults.max_blocks,
        }
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| Error::InvalidConfig(format!("{key}={raw:?}: {err}"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(Error::InvalidConfig(format!("{key} is not valid unicode"))),
    }
}
