use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

use crate::harvest::traits::RemoteMetadataHarvester;
use crate::model::RemotePayload;
use crate::traits::HarvestError;

/// Describes a remote payload from the local copy of the file.
///
/// Records size and SHA-256. Version resources are not read, so
/// `description`, `product_name` and `version` stay empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileRemoteMetadataHarvester;

impl RemoteMetadataHarvester for FileRemoteMetadataHarvester {
    fn harvest_remote(&self, path: &Path) -> Result<RemotePayload, HarvestError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let size = std::io::copy(&mut reader, &mut hasher)?;
        let hash = hex::encode_upper(hasher.finalize());

        debug!(path = %path.display(), size, "Harvested remote payload");

        Ok(RemotePayload {
            size,
            hash,
            description: None,
            product_name: None,
            version: None,
        })
    }
}
