//! Boundary to the native packaging library.
//!
//! The library exports two entry points with the platform's system calling
//! convention and wide-character strings:
//!
//! ```text
//! int CreateSetup(const wchar_t* stub, const SetupPackage* packages,
//!                 unsigned int count, const wchar_t* output);
//! int CreateSimpleSetup(const wchar_t* stub, const wchar_t* package,
//!                       const wchar_t* output);
//! ```
//!
//! Status `0` is success. The stub's binary format is owned by the library.

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::debug;

use crate::model::SetupPackageDescriptor;
use crate::package::PackageError;

/// `wchar_t` of the target platform.
#[cfg(windows)]
pub type WideChar = u16;
#[cfg(not(windows))]
pub type WideChar = u32;

/// Win32 `BOOL`: 4 bytes, non-zero is true.
pub type NativeBool = i32;

/// Package record passed to `CreateSetup`.
///
/// ```text
/// struct SetupPackage {
///     const wchar_t* sourcePath;
///     BOOL privileged;
///     BOOL cache;
/// };
/// ```
///
/// Both flags are 4-byte `BOOL`s, not 1-byte C `bool`.
#[repr(C)]
#[derive(Debug)]
pub struct NativeSetupPackage {
    pub source_path: *const WideChar,
    pub privileged: NativeBool,
    pub cache: NativeBool,
}

impl NativeSetupPackage {
    /// Record for `package` whose source path points into `source`.
    ///
    /// `source` must outlive every use of the returned record.
    pub fn new(package: &SetupPackageDescriptor, source: &[WideChar]) -> Self {
        Self {
            source_path: source.as_ptr(),
            privileged: NativeBool::from(package.privileged),
            cache: NativeBool::from(package.cache),
        }
    }
}

type CreateSetupFn = unsafe extern "system" fn(
    stub: *const WideChar,
    packages: *const NativeSetupPackage,
    count: u32,
    output: *const WideChar,
) -> i32;

type CreateSimpleSetupFn = unsafe extern "system" fn(
    stub: *const WideChar,
    package: *const WideChar,
    output: *const WideChar,
) -> i32;

/// The two native build entry points.
///
/// Implemented by [`NativeLibrary`]; tests substitute their own packager.
pub trait NativePackager: Send + Sync {
    /// Builds `output` from `stub` and the ordered `packages`. Returns the native status.
    fn create_setup(&self, stub: &Path, packages: &[SetupPackageDescriptor], output: &Path) -> i32;

    /// Builds `output` from `stub` and a single `package`. Returns the native status.
    fn create_simple_setup(&self, stub: &Path, package: &Path, output: &Path) -> i32;
}

/// Native packaging library loaded at run time.
pub struct NativeLibrary {
    path: PathBuf,
    create_setup: CreateSetupFn,
    create_simple_setup: CreateSimpleSetupFn,
    // Keeps both entry points mapped.
    _library: Library,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl NativeLibrary {
    /// Loads the library at `path` and resolves both entry points.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::LibraryLoad`] if the library cannot be loaded
    /// or does not export `CreateSetup` and `CreateSimpleSetup`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PackageError> {
        let path = path.as_ref();
        let load_error = |reason: String| PackageError::LibraryLoad {
            path: path.to_path_buf(),
            reason,
        };

        // SAFETY: loading runs the library's initializers; the packaging
        // library is a trusted part of the toolchain.
        let library = unsafe { Library::new(path) }.map_err(|e| load_error(e.to_string()))?;

        // SAFETY: signatures match the packaging library's exports.
        let (create_setup, create_simple_setup) = unsafe {
            let create_setup = *library
                .get::<CreateSetupFn>(b"CreateSetup\0")
                .map_err(|e| load_error(e.to_string()))?;
            let create_simple_setup = *library
                .get::<CreateSimpleSetupFn>(b"CreateSimpleSetup\0")
                .map_err(|e| load_error(e.to_string()))?;
            (create_setup, create_simple_setup)
        };

        debug!(path = %path.display(), "Loaded native packaging library");
        Ok(Self {
            path: path.to_path_buf(),
            create_setup,
            create_simple_setup,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NativePackager for NativeLibrary {
    fn create_setup(&self, stub: &Path, packages: &[SetupPackageDescriptor], output: &Path) -> i32 {
        let stub = to_wide(stub);
        let output = to_wide(output);
        // Owns the strings the records point into.
        let sources: Vec<Vec<WideChar>> = packages.iter().map(|p| to_wide(&p.source_path)).collect();
        let records: Vec<NativeSetupPackage> = packages
            .iter()
            .zip(&sources)
            .map(|(p, source)| NativeSetupPackage::new(p, source))
            .collect();

        // SAFETY: every pointer refers to a NUL-terminated buffer or to
        // `records`, all of which outlive the call.
        unsafe {
            (self.create_setup)(
                stub.as_ptr(),
                records.as_ptr(),
                records.len() as u32,
                output.as_ptr(),
            )
        }
    }

    fn create_simple_setup(&self, stub: &Path, package: &Path, output: &Path) -> i32 {
        let stub = to_wide(stub);
        let package = to_wide(package);
        let output = to_wide(output);

        // SAFETY: all three buffers are NUL-terminated and outlive the call.
        unsafe { (self.create_simple_setup)(stub.as_ptr(), package.as_ptr(), output.as_ptr()) }
    }
}

/// Encodes `path` as a NUL-terminated wide string.
#[cfg(windows)]
pub fn to_wide(path: &Path) -> Vec<WideChar> {
    use std::os::windows::ffi::OsStrExt;

    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

/// Encodes `path` as a NUL-terminated wide string.
#[cfg(not(windows))]
pub fn to_wide(path: &Path) -> Vec<WideChar> {
    path.to_string_lossy()
        .chars()
        .map(|c| c as WideChar)
        .chain(std::iter::once(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_wide_is_nul_terminated() {
        let wide = to_wide(Path::new("out.exe"));
        assert_eq!(wide.len(), "out.exe".len() + 1);
        assert_eq!(wide.last(), Some(&0));
        assert_eq!(wide[0], 'o' as WideChar);
    }

    #[test]
    fn test_to_wide_keeps_non_ascii() {
        let wide = to_wide(Path::new("paquete-ñ.msi"));
        assert!(wide.contains(&('ñ' as WideChar)));
        assert_eq!(wide.last(), Some(&0));
    }

    #[test]
    fn test_package_record_uses_four_byte_flags() {
        assert_eq!(std::mem::size_of::<NativeBool>(), 4);
        assert_eq!(
            std::mem::offset_of!(NativeSetupPackage, cache),
            std::mem::offset_of!(NativeSetupPackage, privileged) + 4
        );

        let source = to_wide(Path::new("product.msi"));
        let record = NativeSetupPackage::new(
            &SetupPackageDescriptor {
                source_path: PathBuf::from("product.msi"),
                privileged: true,
                cache: false,
            },
            &source,
        );
        assert_eq!(record.source_path, source.as_ptr());
        assert_eq!(record.privileged, 1);
        assert_eq!(record.cache, 0);
    }

    #[test]
    fn test_load_missing_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = NativeLibrary::load(dir.path().join("setupbld.dll"));
        assert!(matches!(result, Err(PackageError::LibraryLoad { .. })));
    }
}
