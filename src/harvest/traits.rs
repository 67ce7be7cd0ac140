//! Seams between the harvesters and their collaborators.
//!
//! - [`Registerable`] / [`RegistrationSink`]: a module type's self-registration
//!   and the store it writes into
//! - [`ModuleLoader`]: loads a module and resolves its registrable types
//! - [`IdentifierGenerator`]: deterministic authoring identifiers
//! - [`RemoteMetadataHarvester`]: size/hash/version metadata for remote payloads

use std::path::Path;
use std::sync::Arc;

use crate::model::{RegistrationEntry, RemotePayload};
use crate::traits::HarvestError;

// ============================================================================
// Registration
// ============================================================================

/// Destination for registration writes.
pub trait RegistrationSink {
    fn write(&mut self, entry: RegistrationEntry);
}

impl RegistrationSink for Vec<RegistrationEntry> {
    fn write(&mut self, entry: RegistrationEntry) {
        self.push(entry);
    }
}

/// An exported module type that registers itself when asked.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so resolved types can be handed to
/// the blocking pool by [`HarvesterExecutor`](crate::HarvesterExecutor).
pub trait Registerable: Send + Sync {
    /// Name of the exported type, used in logs and errors.
    fn type_name(&self) -> &str;

    /// Performs the type's registration side effects into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Registration`] if the type's registration
    /// routine reports failure. Writes performed before the failure may
    /// already be in `sink`.
    fn apply_registration(&self, sink: &mut dyn RegistrationSink) -> Result<(), HarvestError>;
}

/// Loads a module and resolves every registrable type it exports.
pub trait ModuleLoader: Send + Sync {
    /// Loads the module at `path` and resolves all of its exported types.
    ///
    /// Resolution must be complete when this returns: callers install the
    /// isolation store right afterwards, and nothing may probe for types
    /// once the store is redirected.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::LoadFailure`] if the module cannot be loaded
    /// or one of its types cannot be resolved.
    fn resolve_types(&self, path: &Path) -> Result<Vec<Arc<dyn Registerable>>, HarvestError>;
}

// ============================================================================
// Payload collaborators
// ============================================================================

/// Produces deterministic identifiers from `(prefix, namespace, name)`.
///
/// The same inputs must always produce the same identifier.
pub trait IdentifierGenerator: Send + Sync {
    fn generate(&self, prefix: &str, namespace: &str, name: &str) -> String;
}

/// Describes a file that will be downloaded at install time.
pub trait RemoteMetadataHarvester: Send + Sync {
    /// # Errors
    ///
    /// Fails if the file cannot be read.
    fn harvest_remote(&self, path: &Path) -> Result<RemotePayload, HarvestError>;
}
