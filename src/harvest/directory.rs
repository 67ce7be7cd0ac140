//! Directory payload harvester.
//!
//! Walks a directory tree and emits one [`Payload`] per regular file, each
//! addressed by its path relative to the root and by a download URL under
//! the configured base URL.

use std::io::ErrorKind;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::harvest::identifier::HashIdentifierGenerator;
use crate::harvest::remote::FileRemoteMetadataHarvester;
use crate::harvest::traits::{IdentifierGenerator, RemoteMetadataHarvester};
use crate::model::{Fragment, FragmentElement, Payload};
use crate::traits::{HarvestError, Harvester};

/// Identifier prefix for harvested payloads.
pub const PAYLOAD_ID_PREFIX: &str = "pld";

pub struct DirectoryPayloadHarvester {
    base_url: Option<String>,
    identifiers: Arc<dyn IdentifierGenerator>,
    remote: Arc<dyn RemoteMetadataHarvester>,
}

impl Default for DirectoryPayloadHarvester {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryPayloadHarvester {
    /// Creates a harvester with the hashing identifier generator and the
    /// file-based remote metadata harvester. A base URL must still be set.
    pub fn new() -> Self {
        Self {
            base_url: None,
            identifiers: Arc::new(HashIdentifierGenerator),
            remote: Arc::new(FileRemoteMetadataHarvester),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_identifier_generator(mut self, identifiers: Arc<dyn IdentifierGenerator>) -> Self {
        self.identifiers = identifiers;
        self
    }

    pub fn with_remote_harvester(mut self, remote: Arc<dyn RemoteMetadataHarvester>) -> Self {
        self.remote = remote;
        self
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = Some(base_url.into());
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Harvests every regular file under `root` into a single fragment.
    ///
    /// # Errors
    ///
    /// - [`HarvestError::InvalidArgument`] if `root` is empty or no base URL is
    ///   set; checked before any filesystem access
    /// - [`HarvestError::Io`] if `root` is not a directory
    /// - [`HarvestError::Io`] / [`HarvestError::Walk`] if the tree cannot be read
    /// - Any error from the remote metadata harvester
    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub fn harvest_directory(&self, root: &Path) -> Result<Fragment, HarvestError> {
        if root.as_os_str().is_empty() {
            return Err(HarvestError::InvalidArgument(
                "root directory must not be empty".to_string(),
            ));
        }
        let base_url = match self.base_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(HarvestError::InvalidArgument(
                    "base download URL must be set".to_string(),
                ))
            }
        };

        let root = std::fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(HarvestError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("'{}' is not a directory", root.display()),
            )));
        }
        let mut fragment = Fragment::new();

        for entry in WalkDir::new(&root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_vanished(&e) => {
                    debug!(error = %e, "Entry vanished during enumeration");
                    continue;
                }
                Err(e) => return Err(HarvestError::Walk(e.to_string())),
            };

            // Re-check right before use: the file may have been removed or
            // replaced since enumeration.
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let payload = self.harvest_file(&root, path, base_url)?;
            debug!(name = %payload.name, "Harvested payload");
            fragment.push(FragmentElement::Payload(payload));
        }

        info!(payloads = fragment.children.len(), "Harvested directory");
        Ok(fragment)
    }

    fn harvest_file(&self, root: &Path, path: &Path, base_url: &str) -> Result<Payload, HarvestError> {
        let relative = path
            .strip_prefix(root)
            .map_err(|e| HarvestError::Walk(format!("{}: {}", path.display(), e)))?;
        let name = relative.to_string_lossy().into_owned();

        let id = self.identifiers.generate(PAYLOAD_ID_PREFIX, base_url, &name);
        let download_url = download_url(base_url, &name);
        let remote_payload = self.remote.harvest_remote(path)?;

        Ok(Payload {
            id,
            name,
            download_url,
            remote_payload,
        })
    }
}

impl Harvester for DirectoryPayloadHarvester {
    fn harvester_id(&self) -> &str {
        "directory"
    }

    fn harvest(&self, argument: &str) -> Result<Vec<Fragment>, HarvestError> {
        let fragment = self.harvest_directory(&PathBuf::from(argument))?;
        Ok(vec![fragment])
    }
}

/// `base_url + "/" + name` with every path separator turned into `/`.
pub fn download_url(base_url: &str, name: &str) -> String {
    let url = format!("{}/{}", base_url, name);
    url.replace(['\\', MAIN_SEPARATOR], "/")
}

fn is_vanished(error: &walkdir::Error) -> bool {
    error
        .io_error()
        .map(|e| e.kind() == ErrorKind::NotFound)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RemotePayload;
    use std::collections::HashMap;
    use std::fs;

    const BASE: &str = "https://cdn.example.com/app";

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("setup.exe"), b"stub").unwrap();
        fs::create_dir_all(dir.path().join("bin").join("x64")).unwrap();
        fs::write(dir.path().join("bin").join("app.dll"), b"dll").unwrap();
        fs::write(dir.path().join("bin").join("x64").join("app.dll"), b"dll64").unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        dir
    }

    fn by_url(fragment: &Fragment) -> HashMap<String, Payload> {
        fragment
            .payloads()
            .map(|p| (p.download_url.clone(), p.clone()))
            .collect()
    }

    struct UnreadableRemote;

    impl RemoteMetadataHarvester for UnreadableRemote {
        fn harvest_remote(&self, path: &Path) -> Result<RemotePayload, HarvestError> {
            Err(HarvestError::Io(std::io::Error::new(
                ErrorKind::PermissionDenied,
                format!("cannot read {}", path.display()),
            )))
        }
    }

    #[test]
    fn test_one_payload_per_file() {
        let dir = tree();
        let harvester = DirectoryPayloadHarvester::new().with_base_url(BASE);

        let fragments = harvester.harvest(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(fragments.len(), 1);

        let payloads = by_url(&fragments[0]);
        assert_eq!(payloads.len(), 3);
        assert!(payloads.contains_key("https://cdn.example.com/app/setup.exe"));
        assert!(payloads.contains_key("https://cdn.example.com/app/bin/app.dll"));
        assert!(payloads.contains_key("https://cdn.example.com/app/bin/x64/app.dll"));

        let nested = &payloads["https://cdn.example.com/app/bin/x64/app.dll"];
        let expected_name: PathBuf = ["bin", "x64", "app.dll"].iter().collect();
        assert_eq!(nested.name, expected_name.to_string_lossy());
        assert_eq!(nested.remote_payload.size, 5);
        assert!(nested.id.starts_with(PAYLOAD_ID_PREFIX));
    }

    #[test]
    fn test_ids_are_stable_across_harvests() {
        let dir = tree();
        let harvester = DirectoryPayloadHarvester::new().with_base_url(BASE);

        let first = by_url(&harvester.harvest_directory(dir.path()).unwrap());
        let second = by_url(&harvester.harvest_directory(dir.path()).unwrap());
        for (url, payload) in &first {
            assert_eq!(payload.id, second[url].id);
        }

        let expected = HashIdentifierGenerator.generate(PAYLOAD_ID_PREFIX, BASE, "setup.exe");
        assert_eq!(first["https://cdn.example.com/app/setup.exe"].id, expected);
    }

    #[test]
    fn test_empty_directory_yields_empty_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let harvester = DirectoryPayloadHarvester::new().with_base_url(BASE);

        let fragments = harvester.harvest(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].children.is_empty());
    }

    #[test]
    fn test_invalid_arguments_checked_before_filesystem() {
        // The root does not exist: an InvalidArgument (not Io) proves the
        // preconditions ran first.
        let missing = "/definitely/not/a/real/root";

        let no_url = DirectoryPayloadHarvester::new();
        assert!(matches!(
            no_url.harvest(missing),
            Err(HarvestError::InvalidArgument(_))
        ));

        let empty_url = DirectoryPayloadHarvester::new().with_base_url("");
        assert!(matches!(
            empty_url.harvest(missing),
            Err(HarvestError::InvalidArgument(_))
        ));

        let configured = DirectoryPayloadHarvester::new().with_base_url(BASE);
        assert!(matches!(
            configured.harvest(""),
            Err(HarvestError::InvalidArgument(_))
        ));
        assert!(matches!(configured.harvest(missing), Err(HarvestError::Io(_))));
    }

    #[test]
    fn test_file_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notadir.txt");
        fs::write(&file, b"not a directory").unwrap();

        let harvester = DirectoryPayloadHarvester::new().with_base_url(BASE);
        match harvester.harvest_directory(&file) {
            Err(HarvestError::Io(e)) => assert_eq!(e.kind(), ErrorKind::InvalidInput),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("present.msi"), b"msi").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.msi"), dir.path().join("link.msi"))
            .unwrap();

        let harvester = DirectoryPayloadHarvester::new().with_base_url(BASE);
        let fragment = harvester.harvest_directory(dir.path()).unwrap();

        let payloads: Vec<&Payload> = fragment.payloads().collect();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].name, "present.msi");
    }

    #[test]
    fn test_not_found_walk_errors_count_as_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let missing = WalkDir::new(dir.path().join("gone"))
            .into_iter()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(is_vanished(&missing));
    }

    #[test]
    fn test_remote_failure_propagates() {
        let dir = tree();
        let harvester = DirectoryPayloadHarvester::new()
            .with_base_url(BASE)
            .with_remote_harvester(Arc::new(UnreadableRemote));

        assert!(matches!(
            harvester.harvest_directory(dir.path()),
            Err(HarvestError::Io(_))
        ));
    }

    #[test]
    fn test_download_url_normalizes_separators() {
        assert_eq!(
            download_url("https://host/base", r"bin\x64\app.dll"),
            "https://host/base/bin/x64/app.dll"
        );
        assert_eq!(
            download_url("https://host/base", "bin/app.dll"),
            "https://host/base/bin/app.dll"
        );
    }
}
