use crate::model::Fragment;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Failed to load module '{}': {reason}", path.display())]
    LoadFailure { path: PathBuf, reason: String },
    #[error("Registration of '{type_name}' failed: {reason}")]
    Registration { type_name: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk failed: {0}")]
    Walk(String),
    #[error("Harvest task failed: {0}")]
    Task(String),
}

/// Uniform capability shared by every harvester kind.
///
/// The argument is harvester specific: a module path, a directory, etc.
pub trait Harvester: Send + Sync {
    /// Short identifier used in logs (e.g., "module", "directory").
    fn harvester_id(&self) -> &str;

    /// Harvests `argument` into authoring fragments.
    fn harvest(&self, argument: &str) -> Result<Vec<Fragment>, HarvestError>;
}
