//! Self-extracting setup builder.
//!
//! [`PackageBuilder`] drives the native packaging library to combine a stub
//! executable with one or more installer packages, and inverts the operation
//! by running a built setup with the extraction directive.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};

use crate::model::SetupPackageDescriptor;
use crate::package::native::NativePackager;
use crate::package::PackageError;

/// Stub executable shipped next to the tool.
#[cfg(windows)]
pub const STUB_FILE_NAME: &str = "setupstub.exe";
#[cfg(not(windows))]
pub const STUB_FILE_NAME: &str = "setupstub";

/// Argument that makes a built setup unpack its embedded package.
pub const DEFAULT_EXTRACT_DIRECTIVE: &str = "/extract";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone)]
pub struct PackageBuilder {
    native: Arc<dyn NativePackager>,
    stub_path: PathBuf,
    target_package: Option<PathBuf>,
    extract_directive: String,
    /// `None` waits for the extraction process indefinitely
    extraction_timeout: Option<Duration>,
    temp_dir: Option<PathBuf>,
}

impl std::fmt::Debug for PackageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageBuilder")
            .field("stub_path", &self.stub_path)
            .field("target_package", &self.target_package)
            .field("extract_directive", &self.extract_directive)
            .field("extraction_timeout", &self.extraction_timeout)
            .field("temp_dir", &self.temp_dir)
            .finish_non_exhaustive()
    }
}

impl PackageBuilder {
    /// Creates a builder whose stub is [`STUB_FILE_NAME`] in the directory of
    /// the running executable.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Io`] if the running executable cannot be located.
    pub fn new(native: Arc<dyn NativePackager>) -> Result<Self, PackageError> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::with_stub(native, dir.join(STUB_FILE_NAME)))
    }

    /// Creates a builder with an explicit stub path.
    pub fn with_stub(native: Arc<dyn NativePackager>, stub_path: impl Into<PathBuf>) -> Self {
        Self {
            native,
            stub_path: stub_path.into(),
            target_package: None,
            extract_directive: DEFAULT_EXTRACT_DIRECTIVE.to_string(),
            extraction_timeout: None,
            temp_dir: None,
        }
    }

    pub fn with_extract_directive(mut self, directive: impl Into<String>) -> Self {
        self.extract_directive = directive.into();
        self
    }

    /// Bounds how long extraction may run before the process is killed.
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = Some(timeout);
        self
    }

    /// Directory for extracted packages (default: the system temp directory).
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_target_package(mut self, package: impl Into<PathBuf>) -> Self {
        self.target_package = Some(package.into());
        self
    }

    pub fn set_target_package(&mut self, package: impl Into<PathBuf>) {
        self.target_package = Some(package.into());
    }

    pub fn target_package(&self) -> Option<&Path> {
        self.target_package.as_deref()
    }

    pub fn stub_path(&self) -> &Path {
        &self.stub_path
    }

    pub fn extraction_timeout(&self) -> Option<Duration> {
        self.extraction_timeout
    }

    /// Builds a setup at `output` embedding the target package.
    ///
    /// # Errors
    ///
    /// - [`PackageError::InvalidArgument`] if no target package is set or
    ///   `output` is empty
    /// - [`PackageError::Io`] if the output directory cannot be created
    /// - [`PackageError::NativeBuildFailure`] on a non-zero native status; any
    ///   file left at `output` is removed
    #[instrument(skip(self, output), fields(output = %output.display()))]
    pub fn build(&self, output: &Path) -> Result<(), PackageError> {
        let package = self.target_package.as_deref().ok_or_else(|| {
            PackageError::InvalidArgument("target package path is not set".to_string())
        })?;
        prepare_output(output)?;

        debug!(stub = %self.stub_path.display(), package = %package.display(), "Creating setup");
        let status = self
            .native
            .create_simple_setup(&self.stub_path, package, output);
        self.check_status(status, output)?;

        info!("Created setup");
        Ok(())
    }

    /// Builds a setup at `output` embedding `packages` in order.
    ///
    /// # Errors
    ///
    /// Same as [`PackageBuilder::build`], except that the target package is
    /// not consulted.
    #[instrument(skip(self, output, packages), fields(output = %output.display(), packages = packages.len()))]
    pub fn build_multi(
        &self,
        output: &Path,
        packages: &[SetupPackageDescriptor],
    ) -> Result<(), PackageError> {
        prepare_output(output)?;

        let status = self.native.create_setup(&self.stub_path, packages, output);
        self.check_status(status, output)?;

        info!("Created multi-package setup");
        Ok(())
    }

    /// Runs the setup at `file` with the extraction directive and returns the
    /// path of the extracted package.
    ///
    /// The returned file belongs to the caller. On any failure the temporary
    /// file is deleted before returning.
    ///
    /// # Errors
    ///
    /// - [`PackageError::Io`] if the temporary file or the process cannot be created
    /// - [`PackageError::ExtractionFailure`] if the process exits unsuccessfully
    /// - [`PackageError::ExtractionTimeout`] if a timeout is configured and expires
    #[instrument(skip(self, file), fields(file = %file.display()))]
    pub fn extract_embedded_package(&self, file: &Path) -> Result<PathBuf, PackageError> {
        let temp = self.allocate_temp()?;

        let child = Command::new(file)
            .arg(&self.extract_directive)
            .arg(&*temp)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                discard(temp);
                return Err(e.into());
            }
        };
        debug!(pid = child.id(), destination = %temp.display(), "Spawned extraction");

        let status = match self.wait(&mut child) {
            Ok(status) => status,
            Err(e) => {
                discard(temp);
                return Err(e.into());
            }
        };

        let status = match status {
            Some(status) => status,
            None => {
                discard(temp);
                let timeout_ms = self
                    .extraction_timeout
                    .map(|t| t.as_millis() as u64)
                    .unwrap_or(0);
                warn!(timeout_ms, "Extraction timed out");
                return Err(PackageError::ExtractionTimeout {
                    path: file.to_path_buf(),
                    timeout_ms,
                });
            }
        };

        if !status.success() {
            discard(temp);
            warn!(status = ?status.code(), "Extraction failed");
            return Err(PackageError::ExtractionFailure {
                path: file.to_path_buf(),
                status: status.code(),
            });
        }

        let extracted = temp.keep().map_err(|e| PackageError::Io(e.error))?;
        info!(extracted = %extracted.display(), "Extracted embedded package");
        Ok(extracted)
    }

    fn check_status(&self, status: i32, output: &Path) -> Result<(), PackageError> {
        if status == 0 {
            return Ok(());
        }

        if output.exists() {
            if let Err(e) = std::fs::remove_file(output) {
                warn!(output = %output.display(), error = %e, "Failed to remove invalid setup");
            }
        }
        Err(PackageError::NativeBuildFailure {
            output: output.to_path_buf(),
            stub: self.stub_path.clone(),
            status,
        })
    }

    fn allocate_temp(&self) -> io::Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("extracted-");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }

    /// Waits for `child`; `Ok(None)` means the timeout expired and the child
    /// was killed and reaped.
    fn wait(&self, child: &mut Child) -> io::Result<Option<ExitStatus>> {
        let timeout = match self.extraction_timeout {
            Some(timeout) => timeout,
            None => return child.wait().map(Some),
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                // Kill fails only if the child already exited; wait reaps either way.
                let _ = child.kill();
                child.wait()?;
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }
}

fn prepare_output(output: &Path) -> Result<(), PackageError> {
    if output.as_os_str().is_empty() {
        return Err(PackageError::InvalidArgument(
            "output file must not be empty".to_string(),
        ));
    }
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn discard(temp: TempPath) {
    let path = temp.to_path_buf();
    if let Err(e) = temp.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    /// Shell stub: with `/extract <dest>` copies everything after line 4 of
    /// itself to `<dest>`.
    pub(crate) const SHELL_STUB: &str = "#!/bin/sh\n\
        [ \"$1\" = \"/extract\" ] || exit 2\n\
        tail -n +5 \"$0\" > \"$2\" || exit 3\n\
        exit 0\n";

    /// Packager producing POSIX shell self-extractors: stub + package bytes.
    pub(crate) struct ShellPackager {
        pub status: i32,
        pub multi_calls: Mutex<Vec<Vec<SetupPackageDescriptor>>>,
    }

    impl ShellPackager {
        pub fn new(status: i32) -> Self {
            Self {
                status,
                multi_calls: Mutex::new(Vec::new()),
            }
        }

        fn write_setup(&self, stub: &Path, packages: &[&Path], output: &Path) -> i32 {
            if self.status != 0 {
                // Leaves a truncated file behind like a failing native build.
                let _ = fs::write(output, b"partial");
                return self.status;
            }
            let mut bytes = match fs::read(stub) {
                Ok(bytes) => bytes,
                Err(_) => return -1,
            };
            for package in packages {
                match fs::read(package) {
                    Ok(data) => bytes.extend(data),
                    Err(_) => return -1,
                }
            }
            if fs::write(output, &bytes).is_err() {
                return -1;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if fs::set_permissions(output, fs::Permissions::from_mode(0o755)).is_err() {
                    return -1;
                }
            }
            0
        }
    }

    impl NativePackager for ShellPackager {
        fn create_setup(
            &self,
            stub: &Path,
            packages: &[SetupPackageDescriptor],
            output: &Path,
        ) -> i32 {
            self.multi_calls.lock().unwrap().push(packages.to_vec());
            let paths: Vec<&Path> = packages.iter().map(|p| p.source_path.as_path()).collect();
            self.write_setup(stub, &paths, output)
        }

        fn create_simple_setup(&self, stub: &Path, package: &Path, output: &Path) -> i32 {
            self.write_setup(stub, &[package], output)
        }
    }

    pub(crate) fn write_stub(dir: &Path) -> PathBuf {
        let stub = dir.join(STUB_FILE_NAME);
        fs::write(&stub, SHELL_STUB).unwrap();
        stub
    }

    #[cfg(unix)]
    fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn dir_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_default_stub_is_next_to_executable() {
        let builder = PackageBuilder::new(Arc::new(ShellPackager::new(0))).unwrap();
        let exe_dir = std::env::current_exe().unwrap().parent().unwrap().to_path_buf();
        assert_eq!(builder.stub_path(), exe_dir.join(STUB_FILE_NAME));
    }

    #[test]
    fn test_build_without_target_is_invalid_argument() {
        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(0)), "stub");
        assert!(matches!(
            builder.build(Path::new("out/setup.exe")),
            Err(PackageError::InvalidArgument(_))
        ));
        assert!(matches!(
            builder.build(Path::new("")),
            Err(PackageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_build_with_empty_output_is_invalid_argument() {
        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(0)), "stub")
            .with_target_package("product.msi");
        assert!(matches!(
            builder.build(Path::new("")),
            Err(PackageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_build_creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path());
        let package = dir.path().join("product.msi");
        fs::write(&package, b"msi bytes").unwrap();

        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(0)), &stub)
            .with_target_package(&package);
        let output = dir.path().join("nested").join("out").join("setup.exe");
        builder.build(&output).unwrap();

        let built = fs::read(&output).unwrap();
        assert!(built.starts_with(SHELL_STUB.as_bytes()));
        assert!(built.ends_with(b"msi bytes"));
    }

    #[test]
    fn test_native_failure_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path());
        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(5)), &stub)
            .with_target_package(dir.path().join("product.msi"));
        let output = dir.path().join("setup.exe");

        match builder.build(&output) {
            Err(PackageError::NativeBuildFailure {
                output: failed,
                stub: failed_stub,
                status,
            }) => {
                assert_eq!(failed, output);
                assert_eq!(failed_stub, stub);
                assert_eq!(status, 5);
            }
            other => panic!("expected NativeBuildFailure, got {:?}", other),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_build_multi_passes_descriptors_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path());
        let first = dir.path().join("a.msi");
        let second = dir.path().join("b.msi");
        fs::write(&first, b"A").unwrap();
        fs::write(&second, b"B").unwrap();

        let packager = Arc::new(ShellPackager::new(0));
        let builder = PackageBuilder::with_stub(packager.clone(), &stub);
        let descriptors = vec![
            SetupPackageDescriptor {
                source_path: first,
                privileged: true,
                cache: false,
            },
            SetupPackageDescriptor::new(second),
        ];

        let output = dir.path().join("bundle").join("setup.exe");
        builder.build_multi(&output, &descriptors).unwrap();

        assert_eq!(packager.multi_calls.lock().unwrap()[0], descriptors);
        assert!(fs::read(&output).unwrap().ends_with(b"AB"));
    }

    #[test]
    fn test_build_multi_failure() {
        let dir = tempfile::tempdir().unwrap();
        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(1)), "stub");
        let output = dir.path().join("setup.exe");
        assert!(matches!(
            builder.build_multi(&output, &[SetupPackageDescriptor::new("a.msi")]),
            Err(PackageError::NativeBuildFailure { status: 1, .. })
        ));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_then_extract_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path());
        let package = dir.path().join("product.msi");
        let contents: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        fs::write(&package, &contents).unwrap();

        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(0)), &stub)
            .with_target_package(&package);
        let output = dir.path().join("setup.exe");
        builder.build(&output).unwrap();

        let extracted = builder.extract_embedded_package(&output).unwrap();
        assert_eq!(fs::read(&extracted).unwrap(), contents);
        fs::remove_file(extracted).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_extraction_failure_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("tmp");
        fs::create_dir_all(&temp_dir).unwrap();
        let setup = dir.path().join("broken-setup");
        write_script(&setup, "#!/bin/sh\nexit 7\n");

        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(0)), "stub")
            .with_temp_dir(&temp_dir);
        match builder.extract_embedded_package(&setup) {
            Err(PackageError::ExtractionFailure { path, status }) => {
                assert_eq!(path, setup);
                assert_eq!(status, Some(7));
            }
            other => panic!("expected ExtractionFailure, got {:?}", other),
        }
        assert!(dir_is_empty(&temp_dir));
    }

    #[cfg(unix)]
    #[test]
    fn test_extraction_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("tmp");
        fs::create_dir_all(&temp_dir).unwrap();
        let setup = dir.path().join("hanging-setup");
        write_script(&setup, "#!/bin/sh\nexec sleep 30\n");

        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(0)), "stub")
            .with_temp_dir(&temp_dir)
            .with_extraction_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let result = builder.extract_embedded_package(&setup);
        assert!(matches!(
            result,
            Err(PackageError::ExtractionTimeout { timeout_ms: 200, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(dir_is_empty(&temp_dir));
    }

    #[test]
    fn test_missing_setup_is_io_error_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let builder = PackageBuilder::with_stub(Arc::new(ShellPackager::new(0)), "stub")
            .with_temp_dir(dir.path());

        let result = builder.extract_embedded_package(&dir.path().join("no-such-setup"));
        assert!(matches!(result, Err(PackageError::Io(_))));
        assert!(dir_is_empty(dir.path()));
    }
}
