//! The native-module table and import-system restriction.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::PyList;
use std::collections::HashSet;
use std::ffi::CStr;

use super::host_module::{init_host_module, HOST_MODULE_NAME};
use crate::error::{LaunchError, Result};
use crate::ffi::OwnedRef;

pub type ModuleInit = unsafe extern "C" fn() -> *mut ffi::PyObject;

/// One entry of the native-module table.
#[derive(Clone, Copy)]
pub struct NativeModule {
    pub name: &'static CStr,
    pub init: ModuleInit,
}

impl NativeModule {
    pub const fn new(name: &'static CStr, init: ModuleInit) -> Self {
        Self { name, init }
    }

    pub fn display_name(&self) -> String {
        self.name.to_string_lossy().into_owned()
    }
}

impl std::fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeModule").field("name", &self.name).finish()
    }
}

/// Modules every launcher carries.
pub fn standard_modules() -> Vec<NativeModule> {
    vec![NativeModule::new(HOST_MODULE_NAME, init_host_module)]
}

/// Names already appended to the interpreter's init table.
static APPENDED: Lazy<Mutex<HashSet<&'static CStr>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Append `modules` to the init table. Must run before the interpreter
/// starts; entries already appended are skipped.
pub fn register_inittab(modules: &[NativeModule]) -> Result<()> {
    let mut appended = APPENDED.lock();

    for module in modules {
        if appended.contains(module.name) {
            continue;
        }
        let status = unsafe { ffi::PyImport_AppendInittab(module.name.as_ptr(), Some(module.init)) };
        if status < 0 {
            return Err(LaunchError::Registration { module: module.display_name() });
        }
        appended.insert(module.name);
        tracing::debug!(module = %module.display_name(), "Native module added to init table");
    }

    Ok(())
}

/// Install `modules` into a running interpreter by calling their
/// initializers directly; each one publishes itself in `sys.modules`.
pub fn register_live(py: Python<'_>, modules: &[NativeModule]) -> Result<()> {
    for module in modules {
        let created = unsafe { OwnedRef::from_owned_or_err(py, (module.init)()) };
        if let Err(e) = created {
            tracing::warn!(module = %module.display_name(), error = %e, "Native module init failed");
            return Err(LaunchError::Registration { module: module.display_name() });
        }

        let registered = py
            .import("sys")
            .and_then(|sys| sys.getattr("modules"))
            .and_then(|modules| modules.contains(module.display_name()))
            .unwrap_or(false);
        if !registered {
            return Err(LaunchError::Registration { module: module.display_name() });
        }
        tracing::debug!(module = %module.display_name(), "Native module registered late");
    }
    Ok(())
}

/// Import each of `names` so it stays available once the import system is
/// sealed.
pub fn preload(py: Python<'_>, names: &[String]) -> PyResult<()> {
    for name in names {
        py.import(name.as_str())?;
    }
    Ok(())
}

const KEPT_FINDERS: [&str; 2] = ["BuiltinImporter", "FrozenImporter"];

/// Restrict imports to built-in (native table) and frozen modules.
///
/// Path-based finders are removed from `sys.meta_path` and the path hook
/// caches are emptied. Already-imported modules stay in `sys.modules`. The
/// restriction lasts for the life of the interpreter.
pub fn seal_import_system(py: Python<'_>) -> PyResult<()> {
    let sys = py.import("sys")?;
    let meta_path = sys.getattr("meta_path")?.downcast::<PyList>()?;

    let kept = PyList::empty(py);
    for finder in meta_path.iter() {
        let name: Option<String> = finder
            .getattr("__name__")
            .ok()
            .and_then(|name| name.extract().ok());
        match name {
            Some(name) if KEPT_FINDERS.contains(&name.as_str()) => kept.append(finder)?,
            _ => tracing::debug!(finder = %finder, "Import finder removed"),
        }
    }

    sys.setattr("meta_path", kept)?;
    sys.getattr("path_hooks")?.call_method0("clear")?;
    sys.getattr("path_importer_cache")?.call_method0("clear")?;
    Ok(())
}
