//! Harvest module - turns existing artifacts into authoring fragments.
//!
//! This module provides the harvesters and their collaborators:
//! - **Module**: [`ModuleHarvester`] captures self-registration under an [`IsolationStore`]
//! - **Native modules**: [`NativeModuleLoader`] resolves registrable types from shared libraries
//! - **Directory**: [`DirectoryPayloadHarvester`] emits remote payloads for a file tree
//! - **Collaborators**: default [`HashIdentifierGenerator`] and [`FileRemoteMetadataHarvester`]

pub mod directory;
pub mod identifier;
pub mod isolation;
pub mod module;
pub mod native_module;
pub mod remote;
pub mod traits;

// Re-export commonly used types
pub use traits::{
    IdentifierGenerator, ModuleLoader, Registerable, RegistrationSink, RemoteMetadataHarvester,
};

pub use directory::{download_url, DirectoryPayloadHarvester, PAYLOAD_ID_PREFIX};
pub use identifier::HashIdentifierGenerator;
pub use isolation::{IsolationScope, IsolationStore};
pub use module::{ModuleCatalog, ModuleHarvester, StaticRegisterable};
pub use native_module::{NativeModuleLoader, NativeRegistrationEntry};
pub use remote::FileRemoteMetadataHarvester;
