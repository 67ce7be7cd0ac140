//! Toolchain configuration.
//!
//! Loaded from JSON and optionally overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `HARVEST_BASE_URL` | `base_url` |
//! | `HARVEST_STUB_PATH` | `stub_path` |
//! | `HARVEST_NATIVE_LIBRARY` | `native_library` |
//! | `HARVEST_EXTRACTION_TIMEOUT_SECS` | `extraction_timeout_secs` |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::executor::HarvesterExecutor;
use crate::harvest::DirectoryPayloadHarvester;
use crate::package::{NativeLibrary, PackageBuilder, PackageError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn default_concurrency_limit() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Base URL remote payloads are published under
    #[serde(default)]
    pub base_url: Option<String>,

    /// Stub executable; defaults to the stub next to the running tool
    #[serde(default)]
    pub stub_path: Option<PathBuf>,

    /// Native packaging library
    #[serde(default)]
    pub native_library: Option<PathBuf>,

    /// Extraction timeout; absent waits indefinitely
    #[serde(default)]
    pub extraction_timeout_secs: Option<u64>,

    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            stub_path: None,
            native_library: None,
            extraction_timeout_secs: None,
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

impl ToolchainConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Applies `HARVEST_*` environment variables on top of this config.
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("HARVEST_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(stub) = lookup("HARVEST_STUB_PATH") {
            self.stub_path = Some(PathBuf::from(stub));
        }
        if let Some(library) = lookup("HARVEST_NATIVE_LIBRARY") {
            self.native_library = Some(PathBuf::from(library));
        }
        if let Some(secs) = lookup("HARVEST_EXTRACTION_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid(format!("HARVEST_EXTRACTION_TIMEOUT_SECS: {}", e))
            })?;
            self.extraction_timeout_secs = Some(secs);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if matches!(self.base_url.as_deref(), Some("")) {
            return Err(ConfigError::Invalid("base_url must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn extraction_timeout(&self) -> Option<Duration> {
        self.extraction_timeout_secs.map(Duration::from_secs)
    }

    /// Directory harvester with the configured base URL (if any).
    pub fn directory_harvester(&self) -> DirectoryPayloadHarvester {
        let harvester = DirectoryPayloadHarvester::new();
        match &self.base_url {
            Some(url) => harvester.with_base_url(url.clone()),
            None => harvester,
        }
    }

    pub fn executor(&self) -> HarvesterExecutor {
        HarvesterExecutor::new(self.concurrency_limit)
    }

    /// Package builder backed by the configured native library.
    ///
    /// # Errors
    ///
    /// - [`PackageError::InvalidArgument`] if no native library is configured
    /// - [`PackageError::LibraryLoad`] if it cannot be loaded
    pub fn package_builder(&self) -> Result<PackageBuilder, PackageError> {
        let library = self.native_library.as_ref().ok_or_else(|| {
            PackageError::InvalidArgument("native_library is not configured".to_string())
        })?;
        let native = Arc::new(NativeLibrary::load(library)?);

        let mut builder = match &self.stub_path {
            Some(stub) => PackageBuilder::with_stub(native, stub.clone()),
            None => PackageBuilder::new(native)?,
        };
        if let Some(timeout) = self.extraction_timeout() {
            builder = builder.with_extraction_timeout(timeout);
        }
        Ok(builder)
    }
}
