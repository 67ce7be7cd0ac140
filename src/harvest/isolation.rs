//! Scoped isolation store for registration side effects.
//!
//! The store is process-wide: one [`IsolationScope`] may be live at a time.
//! [`IsolationStore::acquire`] blocks until the previous scope is released.
//! Acquiring twice on the same thread deadlocks; the scope is not reentrant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::harvest::traits::RegistrationSink;
use crate::model::RegistrationEntry;

static REDIRECTION: Mutex<()> = Mutex::new(());

/// Handle for installing the redirected registration store.
///
/// Clones share the installed flag, so a clone can observe whether a scope
/// acquired through another clone is live.
#[derive(Debug, Default, Clone)]
pub struct IsolationStore {
    installed: Arc<AtomicBool>,
}

impl IsolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the redirection and returns the scope that owns it.
    pub fn acquire(&self) -> IsolationScope {
        // Poisoned means a previous scope panicked; its Drop already ran.
        let guard = REDIRECTION.lock().unwrap_or_else(|e| e.into_inner());
        self.installed.store(true, Ordering::SeqCst);
        debug!("Isolation store installed");
        IsolationScope {
            entries: Vec::new(),
            installed: Arc::clone(&self.installed),
            _redirection: guard,
        }
    }

    /// Whether a scope acquired from this store is currently live.
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}

/// Live redirected store. Writes land here instead of in system state.
///
/// Dropping the scope removes the redirection and discards anything written;
/// call [`IsolationScope::release`] to flush the entries out first.
pub struct IsolationScope {
    entries: Vec<RegistrationEntry>,
    installed: Arc<AtomicBool>,
    _redirection: MutexGuard<'static, ()>,
}

impl IsolationScope {
    /// Flushes the captured entries and removes the redirection.
    pub fn release(mut self) -> Vec<RegistrationEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RegistrationSink for IsolationScope {
    fn write(&mut self, entry: RegistrationEntry) {
        self.entries.push(entry);
    }
}

impl Drop for IsolationScope {
    fn drop(&mut self) {
        self.installed.store(false, Ordering::SeqCst);
        debug!(discarded = self.entries.len(), "Isolation store released");
    }
}
