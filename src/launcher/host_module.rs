//! The `host` native module: lets scripts write into the host's log.
//!
//! ```python
//! import host
//! host.log(2, "loaded intro scene")
//! host.version()
//! ```

use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::PyTuple;
use pyo3::{AsPyPointer, GILPool};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

use crate::args::{bad_argument, build_exception, build_none, ArgTuple};
use crate::compat;

pub const HOST_MODULE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"host\0") };

/// Script-facing log levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl ScriptLevel {
    pub fn from_int(level: i32) -> Option<Self> {
        match level {
            0 => Some(Self::Error),
            1 => Some(Self::Warn),
            2 => Some(Self::Info),
            3 => Some(Self::Debug),
            4 => Some(Self::Trace),
            _ => None,
        }
    }

    fn emit(self, message: &str) {
        match self {
            Self::Error => tracing::error!(target: "pylauncher::script", "{}", message),
            Self::Warn => tracing::warn!(target: "pylauncher::script", "{}", message),
            Self::Info => tracing::info!(target: "pylauncher::script", "{}", message),
            Self::Debug => tracing::debug!(target: "pylauncher::script", "{}", message),
            Self::Trace => tracing::trace!(target: "pylauncher::script", "{}", message),
        }
    }
}

/// Initializer for the native-module table.
///
/// # Safety
/// Called by the interpreter with the GIL held.
pub unsafe extern "C" fn init_host_module() -> *mut ffi::PyObject {
    let pool = GILPool::new();
    let py = pool.python();

    match create(py) {
        Ok(module) => {
            let module = module.as_ptr();
            ffi::Py_INCREF(module);
            module
        }
        Err(e) => {
            e.restore(py);
            ptr::null_mut()
        }
    }
}

fn create(py: Python<'_>) -> PyResult<&PyModule> {
    let module = compat::init_module(
        py,
        HOST_MODULE_NAME,
        vec![
            method(b"log\0", host_log, b"log(level, message)\0"),
            method(b"version\0", host_version, b"version() -> str\0"),
        ],
    )?;
    tracing::debug!("Native module 'host' initialized");
    Ok(module)
}

fn method(
    name: &'static [u8],
    function: ffi::PyCFunction,
    doc: &'static [u8],
) -> ffi::PyMethodDef {
    ffi::PyMethodDef {
        ml_name: name.as_ptr().cast::<c_char>(),
        ml_meth: ffi::PyMethodDefPointer { PyCFunction: function },
        ml_flags: ffi::METH_VARARGS,
        ml_doc: doc.as_ptr().cast::<c_char>(),
    }
}

/// Shared trampoline body: borrow the argument tuple, run `body`, and hand
/// either a new reference or a pending error back to the interpreter.
unsafe fn native_call(
    args: *mut ffi::PyObject,
    body: impl FnOnce(Python<'_>, &PyTuple) -> PyResult<PyObject>,
) -> *mut ffi::PyObject {
    let pool = GILPool::new();
    let py = pool.python();

    let result = py
        .from_borrowed_ptr_or_err::<PyAny>(args)
        .and_then(|args| args.downcast::<PyTuple>().map_err(|_| bad_argument()))
        .and_then(|args| body(py, args));

    match result {
        Ok(value) => value.into_ptr(),
        Err(e) => {
            e.restore(py);
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn host_log(
    _module: *mut ffi::PyObject,
    args: *mut ffi::PyObject,
) -> *mut ffi::PyObject {
    native_call(args, |py, args| {
        let level = args.get_int(0)?;
        let message = args.get_string(1)?;
        let level = ScriptLevel::from_int(level)
            .ok_or_else(|| build_exception(format!("unknown log level {}", level)))?;
        level.emit(&message);
        Ok(build_none(py))
    })
}

unsafe extern "C" fn host_version(
    _module: *mut ffi::PyObject,
    args: *mut ffi::PyObject,
) -> *mut ffi::PyObject {
    native_call(args, |py, _args| {
        Ok(compat::string_from_str(py, env!("CARGO_PKG_VERSION")).into_py(py))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyo3::exceptions::{PyRuntimeError, PyTypeError};

    #[test]
    fn test_level_mapping() {
        assert_eq!(ScriptLevel::from_int(0), Some(ScriptLevel::Error));
        assert_eq!(ScriptLevel::from_int(4), Some(ScriptLevel::Trace));
        assert_eq!(ScriptLevel::from_int(5), None);
        assert_eq!(ScriptLevel::from_int(-1), None);
    }

    #[test]
    fn test_host_module_calls() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let module = unsafe {
                let raw = init_host_module();
                PyObject::from_owned_ptr_or_err(py, raw).unwrap()
            };
            let module = module.as_ref(py);

            let version: String = module.getattr("version").unwrap().call0().unwrap().extract().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));

            assert!(module.getattr("log").unwrap().call1((2, "hello")).unwrap().is_none());

            let err = module.getattr("log").unwrap().call1(("loud", "x")).unwrap_err();
            assert!(err.is_instance_of::<PyTypeError>(py));
            assert!(err.to_string().contains("argument 0"));

            let err = module.getattr("log").unwrap().call1((9, "x")).unwrap_err();
            assert!(err.is_instance_of::<PyRuntimeError>(py));
        });
    }
}
