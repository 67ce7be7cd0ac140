//! Loader for modules shipped as native shared libraries.
//!
//! A harvestable library exports three C-ABI symbols:
//!
//! ```text
//! uint32_t    harvest_type_count(void);
//! const char* harvest_type_name(uint32_t index);
//! int32_t     harvest_register_type(uint32_t index, write_fn write, void* ctx);
//! ```
//!
//! `harvest_register_type` reports each write by calling
//! `write(ctx, &entry)` with a [`NativeRegistrationEntry`]; a non-zero
//! return value marks the registration as failed.

use std::ffi::{c_char, c_void, CStr};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use crate::harvest::traits::{ModuleLoader, Registerable, RegistrationSink};
use crate::model::{RegistrationEntry, RegistryRoot, RegistryValueKind};
use crate::traits::HarvestError;

type TypeCountFn = unsafe extern "C" fn() -> u32;
type TypeNameFn = unsafe extern "C" fn(index: u32) -> *const c_char;
type WriteEntryFn = unsafe extern "C" fn(ctx: *mut c_void, entry: *const NativeRegistrationEntry);
type RegisterTypeFn =
    unsafe extern "C" fn(index: u32, write: WriteEntryFn, ctx: *mut c_void) -> i32;

/// Registration write as reported across the C boundary.
///
/// `root`: 0 = classes root, 1 = current user, 2 = local machine, 3 = users.
/// `kind`: 0 = string, 1 = expandable string, 2 = multi-string, 3 = binary,
/// 4 = integer. `name` may be null for a key's default value.
#[repr(C)]
pub struct NativeRegistrationEntry {
    pub root: u32,
    pub key: *const c_char,
    pub name: *const c_char,
    pub value: *const c_char,
    pub kind: u32,
}

/// Loads modules with `libloading` and resolves their exports eagerly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleLoader;

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self
    }
}

/// Library handle plus the resolved registration entry point.
struct NativeModule {
    register: RegisterTypeFn,
    // Keeps the code behind `register` mapped.
    _library: Library,
}

struct NativeRegisterable {
    module: Arc<NativeModule>,
    index: u32,
    name: String,
}

impl ModuleLoader for NativeModuleLoader {
    fn resolve_types(&self, path: &Path) -> Result<Vec<Arc<dyn Registerable>>, HarvestError> {
        let load_failure = |reason: String| HarvestError::LoadFailure {
            path: path.to_path_buf(),
            reason,
        };

        // SAFETY: loading runs the library's initializers; harvesting a module
        // means trusting its code.
        let library = unsafe { Library::new(path) }.map_err(|e| load_failure(e.to_string()))?;

        // SAFETY: the signatures match the documented export contract.
        let (count, type_name, register) = unsafe {
            let count = *library
                .get::<TypeCountFn>(b"harvest_type_count\0")
                .map_err(|e| load_failure(e.to_string()))?;
            let type_name = *library
                .get::<TypeNameFn>(b"harvest_type_name\0")
                .map_err(|e| load_failure(e.to_string()))?;
            let register = *library
                .get::<RegisterTypeFn>(b"harvest_register_type\0")
                .map_err(|e| load_failure(e.to_string()))?;
            (count, type_name, register)
        };

        // SAFETY: `count` and `type_name` come from the still-loaded library;
        // returned names are borrowed only until copied below.
        let mut names = Vec::new();
        unsafe {
            for index in 0..count() {
                let raw = type_name(index);
                if raw.is_null() {
                    return Err(load_failure(format!("type {} has no name", index)));
                }
                let name = CStr::from_ptr(raw)
                    .to_str()
                    .map_err(|e| load_failure(format!("type {}: {}", index, e)))?
                    .to_string();
                names.push(name);
            }
        }
        debug!(path = %path.display(), types = names.len(), "Resolved native module");

        let module = Arc::new(NativeModule {
            register,
            _library: library,
        });
        Ok(names
            .into_iter()
            .zip(0u32..)
            .map(|(name, index)| {
                Arc::new(NativeRegisterable {
                    module: Arc::clone(&module),
                    index,
                    name,
                }) as Arc<dyn Registerable>
            })
            .collect())
    }
}

struct WriteContext<'a> {
    sink: &'a mut dyn RegistrationSink,
    error: Option<String>,
}

unsafe extern "C" fn write_entry(ctx: *mut c_void, entry: *const NativeRegistrationEntry) {
    // SAFETY: `ctx` is the `WriteContext` passed to `harvest_register_type`
    // by `apply_registration`, alive for the whole call.
    let ctx = unsafe { &mut *(ctx as *mut WriteContext<'_>) };
    if ctx.error.is_some() {
        return;
    }
    if entry.is_null() {
        ctx.error = Some("null registration entry".to_string());
        return;
    }
    // SAFETY: non-null, and valid for the duration of the callback.
    match unsafe { convert_entry(&*entry) } {
        Ok(converted) => ctx.sink.write(converted),
        Err(reason) => ctx.error = Some(reason),
    }
}

/// # Safety
///
/// Non-null string pointers in `entry` must be NUL-terminated.
unsafe fn convert_entry(entry: &NativeRegistrationEntry) -> Result<RegistrationEntry, String> {
    let root = match entry.root {
        0 => RegistryRoot::ClassesRoot,
        1 => RegistryRoot::CurrentUser,
        2 => RegistryRoot::LocalMachine,
        3 => RegistryRoot::Users,
        other => return Err(format!("unknown registry root {}", other)),
    };
    let kind = match entry.kind {
        0 => RegistryValueKind::String,
        1 => RegistryValueKind::ExpandString,
        2 => RegistryValueKind::MultiString,
        3 => RegistryValueKind::Binary,
        4 => RegistryValueKind::Integer,
        other => return Err(format!("unknown value kind {}", other)),
    };
    let key = unsafe { required_str(entry.key, "key")? };
    let value = unsafe { required_str(entry.value, "value")? };
    let name = if entry.name.is_null() {
        None
    } else {
        Some(unsafe { required_str(entry.name, "name")? })
    };

    Ok(RegistrationEntry::new(root, key, name, value, kind))
}

unsafe fn required_str(ptr: *const c_char, field: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("registration entry has null {}", field));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(str::to_string)
        .map_err(|e| format!("registration entry {} is not UTF-8: {}", field, e))
}

impl Registerable for NativeRegisterable {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn apply_registration(&self, sink: &mut dyn RegistrationSink) -> Result<(), HarvestError> {
        let mut ctx = WriteContext { sink, error: None };

        // SAFETY: `register` belongs to the library kept alive by
        // `self.module`; `ctx` outlives the call.
        let status = unsafe {
            (self.module.register)(
                self.index,
                write_entry,
                &mut ctx as *mut WriteContext<'_> as *mut c_void,
            )
        };

        if let Some(reason) = ctx.error {
            return Err(HarvestError::Registration {
                type_name: self.name.clone(),
                reason,
            });
        }
        if status != 0 {
            return Err(HarvestError::Registration {
                type_name: self.name.clone(),
                reason: format!("registration returned status {}", status),
            });
        }
        Ok(())
    }
}
