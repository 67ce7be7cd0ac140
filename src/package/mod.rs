//! Package module - self-extracting setup creation and extraction.
//!
//! - **Native boundary**: [`NativePackager`] and the run-time loaded [`NativeLibrary`]
//! - **Builder**: [`PackageBuilder`] combines a stub with packages and inverts it
//! - **Verification**: [`RoundTripVerifier`] builds, extracts and compares a package

pub mod builder;
pub mod native;
pub mod verify;

use std::path::PathBuf;
use thiserror::Error;

pub use builder::{PackageBuilder, DEFAULT_EXTRACT_DIRECTIVE, STUB_FILE_NAME};
pub use native::{NativeBool, NativeLibrary, NativePackager, NativeSetupPackage, WideChar};
pub use verify::{ExtractedPackage, RoundTripResult, RoundTripStats, RoundTripVerifier, VerifyError};

/// Errors that can occur while building or extracting a setup.
#[derive(Error, Debug)]
pub enum PackageError {
    /// A required input was not supplied
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The native build call returned a non-zero status
    #[error(
        "Failed to create setup '{}' from stub '{}' (status {status})",
        output.display(),
        stub.display()
    )]
    NativeBuildFailure {
        output: PathBuf,
        stub: PathBuf,
        status: i32,
    },

    /// The setup's extraction process exited unsuccessfully
    #[error("Failed to extract package from '{}' (exit status {status:?})", path.display())]
    ExtractionFailure { path: PathBuf, status: Option<i32> },

    /// The extraction process outlived the configured timeout
    #[error("Extraction from '{}' timed out after {timeout_ms}ms", path.display())]
    ExtractionTimeout { path: PathBuf, timeout_ms: u64 },

    /// The native packaging library could not be loaded
    #[error("Failed to load packaging library '{}': {reason}", path.display())]
    LibraryLoad { path: PathBuf, reason: String },

    /// Filesystem error while preparing output or temporary files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
