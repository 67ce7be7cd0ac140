//! Round-trip verification of built setups.
//!
//! [`RoundTripVerifier`] runs two blocking stages (Build → Extract) and then
//! compares the extracted package with the original:
//! - Async execution via `tokio`, each stage on the blocking pool
//! - Configurable timeout per stage
//! - Structured logging via `tracing`
//! - Automatic removal of the extracted file via RAII (`Drop` on `ExtractedPackage`)

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::package::builder::PackageBuilder;
use crate::package::PackageError;

// ============================================================================
// Verification Types
// ============================================================================

/// A package unpacked from a setup.
///
/// # RAII Cleanup
///
/// `ExtractedPackage` implements [`Drop`] and removes the file when
/// `cleanup_on_drop` is set, including on early return from an error path.
/// It intentionally does **not** implement `Clone`.
#[derive(Debug)]
pub struct ExtractedPackage {
    /// Extracted package file
    pub path: PathBuf,

    /// Whether to delete the file on drop (mirrors verifier `auto_cleanup`).
    pub(crate) cleanup_on_drop: bool,
}

impl Drop for ExtractedPackage {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove extracted package"
                );
            }
        }
    }
}

/// Outcome of a successful round trip.
#[derive(Debug)]
pub struct RoundTripResult {
    /// Built setup
    pub setup_path: PathBuf,

    /// Extracted package.
    ///
    /// `None` when `auto_cleanup` is enabled: the file is already gone.
    pub extracted_path: Option<PathBuf>,

    pub stats: RoundTripStats,
}

#[derive(Debug, Default, Clone)]
pub struct RoundTripStats {
    pub total_duration_ms: u64,
    pub build_duration_ms: u64,
    pub extraction_duration_ms: u64,
    /// Size of the original package (bytes)
    pub package_size_bytes: u64,
    /// Size of the built setup (bytes)
    pub setup_size_bytes: u64,
}

// ============================================================================
// Verification Errors
// ============================================================================

#[derive(thiserror::Error, Debug)]
pub enum VerifyError {
    /// Stage execution exceeded timeout
    #[error("Stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout { stage: String, timeout_ms: u64 },

    #[error("Build stage failed: {0}")]
    Build(PackageError),

    #[error("Extraction stage failed: {0}")]
    Extract(PackageError),

    /// Stage task panicked or was cancelled
    #[error("Stage '{stage}' task failed: {reason}")]
    Task { stage: String, reason: String },

    /// Extracted bytes differ from the original package
    #[error("Extracted package differs from original (expected {expected} bytes, got {actual})")]
    Mismatch { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Verifier
// ============================================================================

/// Builds a setup from a package, extracts it again, and checks the bytes.
///
/// ```ignore
/// let verifier = RoundTripVerifier::new(builder)
///     .with_timeout(Duration::from_secs(120))
///     .with_cleanup(true);
/// let result = verifier.execute("product.msi".into(), "out/setup.exe".into()).await?;
/// ```
pub struct RoundTripVerifier {
    builder: PackageBuilder,

    /// Timeout for each stage (default: 5 minutes)
    stage_timeout: Duration,

    /// Whether to remove the extracted package afterwards
    auto_cleanup: bool,
}

impl RoundTripVerifier {
    /// Default configuration:
    /// - Timeout: 5 minutes per stage
    /// - Auto-cleanup: enabled
    pub fn new(builder: PackageBuilder) -> Self {
        Self {
            builder,
            stage_timeout: Duration::from_secs(300), // 5 minutes
            auto_cleanup: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.auto_cleanup = cleanup;
        self
    }

    /// Builds `package` into `output`, extracts it, and compares contents.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] if either stage fails or times out, or the
    /// extracted bytes differ from `package`.
    pub async fn execute(
        &self,
        package: PathBuf,
        output: PathBuf,
    ) -> Result<RoundTripResult, VerifyError> {
        let start = Instant::now();
        let mut stats = RoundTripStats::default();

        // ====================================================================
        // Stage 1: Build
        // ====================================================================

        info!(package = %package.display(), "Starting build stage");
        let build_start = Instant::now();

        let builder = self.builder.clone().with_target_package(&package);
        let build_output = output.clone();
        let mut build = tokio::task::spawn_blocking(move || builder.build(&build_output));
        let built = match timeout(self.stage_timeout, &mut build).await {
            Ok(joined) => joined,
            Err(_) => {
                // The native call cannot be interrupted: wait for it, then
                // drop whatever it wrote.
                let _ = build.await;
                remove_artifact(&output).await;
                return Err(self.stage_timeout_error("build"));
            }
        };
        built.map_err(|e| VerifyError::Task {
            stage: "build".to_string(),
            reason: e.to_string(),
        })?
        .map_err(VerifyError::Build)?;

        stats.build_duration_ms = build_start.elapsed().as_millis() as u64;
        stats.package_size_bytes = tokio::fs::metadata(&package).await?.len();
        stats.setup_size_bytes = tokio::fs::metadata(&output).await?.len();
        info!(
            duration_ms = stats.build_duration_ms,
            setup = %output.display(),
            "Build completed"
        );

        // ====================================================================
        // Stage 2: Extraction
        // ====================================================================

        info!("Starting extraction stage");
        let extraction_start = Instant::now();

        let (builder, stage_bounded) = self.extraction_builder();
        let setup = output.clone();
        let mut extract =
            tokio::task::spawn_blocking(move || builder.extract_embedded_package(&setup));
        let extracted = match timeout(self.stage_timeout, &mut extract).await {
            Ok(joined) => joined,
            Err(_) => {
                // The builder kills the process at the same deadline.
                if let Ok(Ok(path)) = extract.await {
                    remove_artifact(&path).await;
                }
                return Err(self.stage_timeout_error("extract"));
            }
        };
        let path = match extracted.map_err(|e| VerifyError::Task {
            stage: "extract".to_string(),
            reason: e.to_string(),
        })? {
            Ok(path) => path,
            Err(PackageError::ExtractionTimeout { .. }) if stage_bounded => {
                return Err(self.stage_timeout_error("extract"));
            }
            Err(e) => return Err(VerifyError::Extract(e)),
        };
        let auto_cleanup = self.auto_cleanup;
        let mut extracted = ExtractedPackage {
            path,
            cleanup_on_drop: auto_cleanup,
        };

        stats.extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.extraction_duration_ms,
            path = %extracted.path.display(),
            "Extraction completed"
        );

        // ====================================================================
        // Stage 3: Compare
        // ====================================================================

        let original = tokio::fs::read(&package).await?;
        let roundtrip = tokio::fs::read(&extracted.path).await?;
        if original != roundtrip {
            // A failed round trip keeps nothing.
            extracted.cleanup_on_drop = true;
            return Err(VerifyError::Mismatch {
                expected: original.len() as u64,
                actual: roundtrip.len() as u64,
            });
        }

        let extracted_path = if auto_cleanup {
            None
        } else {
            Some(extracted.path.clone())
        };
        // Drop runs cleanup when enabled.
        drop(extracted);

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(total_ms = stats.total_duration_ms, "Round trip verified");

        Ok(RoundTripResult {
            setup_path: output,
            extracted_path,
            stats,
        })
    }

    /// Builder whose extraction is killed no later than the stage deadline.
    /// The flag is set when the stage deadline is the binding limit.
    fn extraction_builder(&self) -> (PackageBuilder, bool) {
        match self.builder.extraction_timeout() {
            Some(limit) if limit < self.stage_timeout => (self.builder.clone(), false),
            _ => (
                self.builder
                    .clone()
                    .with_extraction_timeout(self.stage_timeout),
                true,
            ),
        }
    }

    fn stage_timeout_error(&self, stage: &str) -> VerifyError {
        warn!(stage, timeout_ms = self.stage_timeout.as_millis() as u64, "Stage timed out");
        VerifyError::StageTimeout {
            stage: stage.to_string(),
            timeout_ms: self.stage_timeout.as_millis() as u64,
        }
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Failed to remove stage artifact"
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================
