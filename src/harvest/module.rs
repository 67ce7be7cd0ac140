//! Module harvester: captures a module's self-registration into fragments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::harvest::isolation::IsolationStore;
use crate::harvest::traits::{ModuleLoader, Registerable, RegistrationSink};
use crate::model::{Fragment, FragmentElement, RegistrationEntry};
use crate::traits::{HarvestError, Harvester};

/// Harvests the registration writes a module performs when self-registering.
pub struct ModuleHarvester<L: ModuleLoader> {
    loader: L,
    store: IsolationStore,
}

impl<L: ModuleLoader> ModuleHarvester<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            store: IsolationStore::new(),
        }
    }

    pub fn with_store(mut self, store: IsolationStore) -> Self {
        self.store = store;
        self
    }

    /// Loads the module at `path` and returns every registration write its
    /// exported types perform. Duplicates across types are kept.
    ///
    /// # Errors
    ///
    /// - [`HarvestError::LoadFailure`] if the module or its types cannot be resolved
    /// - [`HarvestError::Registration`] if a type's registration fails; the
    ///   isolation store is still released
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn harvest_registration_entries(
        &self,
        path: &Path,
    ) -> Result<Vec<RegistrationEntry>, HarvestError> {
        // Types must be resolved before the store is redirected: resolution
        // can probe the registration store and would bind against the
        // redirected one.
        let types = self.loader.resolve_types(path)?;
        debug!(types = types.len(), "Resolved exported types");

        let mut scope = self.store.acquire();
        for registerable in &types {
            debug!(type_name = registerable.type_name(), "Applying registration");
            registerable.apply_registration(&mut scope)?;
        }
        let entries = scope.release();

        info!(entries = entries.len(), "Harvested registration entries");
        Ok(entries)
    }
}

impl<L: ModuleLoader> Harvester for ModuleHarvester<L> {
    fn harvester_id(&self) -> &str {
        "module"
    }

    fn harvest(&self, argument: &str) -> Result<Vec<Fragment>, HarvestError> {
        if argument.is_empty() {
            return Err(HarvestError::InvalidArgument(
                "module path must not be empty".to_string(),
            ));
        }

        let entries = self.harvest_registration_entries(Path::new(argument))?;
        let fragment = Fragment {
            id: None,
            children: entries
                .into_iter()
                .map(FragmentElement::RegistryValue)
                .collect(),
        };
        Ok(vec![fragment])
    }
}

// ============================================================================
// In-memory loader
// ============================================================================

/// Registrable type that replays a fixed list of writes.
#[derive(Debug, Clone)]
pub struct StaticRegisterable {
    name: String,
    entries: Vec<RegistrationEntry>,
}

impl StaticRegisterable {
    pub fn new(name: impl Into<String>, entries: Vec<RegistrationEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }
}

impl Registerable for StaticRegisterable {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn apply_registration(&self, sink: &mut dyn RegistrationSink) -> Result<(), HarvestError> {
        for entry in &self.entries {
            sink.write(entry.clone());
        }
        Ok(())
    }
}

/// Loader backed by an in-memory catalog of modules.
///
/// Lets registration be harvested without loading code into the process.
#[derive(Default)]
pub struct ModuleCatalog {
    modules: HashMap<PathBuf, Vec<Arc<dyn Registerable>>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(
        mut self,
        path: impl Into<PathBuf>,
        types: Vec<Arc<dyn Registerable>>,
    ) -> Self {
        self.modules.insert(path.into(), types);
        self
    }
}

impl ModuleLoader for ModuleCatalog {
    fn resolve_types(&self, path: &Path) -> Result<Vec<Arc<dyn Registerable>>, HarvestError> {
        self.modules
            .get(path)
            .cloned()
            .ok_or_else(|| HarvestError::LoadFailure {
                path: path.to_path_buf(),
                reason: "module not found".to_string(),
            })
    }
}
