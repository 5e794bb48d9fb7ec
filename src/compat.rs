//! Legacy embedding vocabulary on top of the Python 3 C API
//!
//! Native modules written against the older API (text as one string type,
//! a separate small-int type, single-call module registration) are expressed
//! here in terms of the current one:
//! - `str` and `bytes` both count as "text"
//! - fixed-size construction always produces `bytes`
//! - module registration builds a heap descriptor and publishes the module in
//!   `sys.modules`
//! - the old integer and string names resolve to their `PyLong`/`PyUnicode`
//!   equivalents (see [`legacy`])

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pyo3::exceptions::{PyMemoryError, PyTypeError};
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyLong, PyModule, PyString};
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

use crate::ffi::OwnedRef;

/// Accepts both textual representations (`str` and `bytes`).
pub fn is_string(obj: &PyAny) -> bool {
    obj.downcast::<PyString>().is_ok() || obj.downcast::<PyBytes>().is_ok()
}

/// UTF-8 bytes of a `str`, or the raw buffer of a `bytes`.
///
/// Any other type is a `TypeError`.
pub fn string_bytes(obj: &PyAny) -> PyResult<&[u8]> {
    if let Ok(text) = obj.downcast::<PyString>() {
        return Ok(text.to_str()?.as_bytes());
    }
    if let Ok(bytes) = obj.downcast::<PyBytes>() {
        return Ok(bytes.as_bytes());
    }
    Err(PyTypeError::new_err("Expected str or bytes object"))
}

/// `string_bytes` for callers that need an owned Rust string.
pub fn string_lossy(obj: &PyAny) -> PyResult<String> {
    string_bytes(obj).map(|raw| String::from_utf8_lossy(raw).into_owned())
}

/// Null-terminated view of a textual object for C-style callers.
///
/// A null return means a `TypeError` is now pending on the interpreter, not
/// an empty string. The buffer lives as long as `obj`.
///
/// # Safety
/// The GIL must be held and `obj` must be null or a valid object pointer.
pub unsafe fn string_as_ptr(obj: *mut ffi::PyObject) -> *const c_char {
    if obj.is_null() {
        ffi::PyErr_SetString(ffi::PyExc_TypeError, b"NULL Python object\0".as_ptr().cast());
        return ptr::null();
    }

    if ffi::PyUnicode_Check(obj) != 0 {
        return ffi::PyUnicode_AsUTF8(obj);
    }

    if ffi::PyBytes_Check(obj) != 0 {
        return ffi::PyBytes_AsString(obj);
    }

    ffi::PyErr_SetString(
        ffi::PyExc_TypeError,
        b"Expected str or bytes object\0".as_ptr().cast(),
    );
    ptr::null()
}

/// Fixed-size construction always yields `bytes`; sources crossing this
/// boundary are already UTF-8 encoded.
pub fn string_from_bytes<'py>(py: Python<'py>, data: &[u8]) -> &'py PyBytes {
    PyBytes::new(py, data)
}

pub fn string_from_str<'py>(py: Python<'py>, text: &str) -> &'py PyString {
    PyString::new(py, text)
}

pub fn intern<'py>(py: Python<'py>, text: &str) -> &'py PyString {
    PyString::intern(py, text)
}

pub fn int_check(obj: &PyAny) -> bool {
    obj.downcast::<PyLong>().is_ok()
}

pub fn int_as_long(obj: &PyAny) -> PyResult<std::os::raw::c_long> {
    obj.extract()
}

pub fn int_from_long(py: Python<'_>, value: std::os::raw::c_long) -> PyObject {
    value.into_py(py)
}

/// Module descriptors already built, one per registered name.
struct Descriptor(*mut ffi::PyModuleDef);

// Only dereferenced by the interpreter with the GIL held
unsafe impl Send for Descriptor {}

static DESCRIPTORS: Lazy<Mutex<HashMap<&'static CStr, Descriptor>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Register a native module under `name` from a method table.
///
/// The descriptor (name, no docstring, no per-module state, the methods, no
/// slot/GC hooks) is heap allocated and must outlive the module, so it is
/// leaked on success and reused by later registrations of the same name;
/// `methods` is then ignored. The returned module is the registry's own
/// reference from `sys.modules`.
pub fn init_module<'py>(
    py: Python<'py>,
    name: &'static CStr,
    methods: Vec<ffi::PyMethodDef>,
) -> PyResult<&'py PyModule> {
    let mut descriptors = DESCRIPTORS.lock();

    let (descriptor, fresh) = match descriptors.get(name) {
        Some(existing) => (existing.0, false),
        None => (build_descriptor(name, methods)?, true),
    };

    let module = match unsafe { OwnedRef::from_owned(ffi::PyModule_Create(descriptor)) } {
        Some(module) => module,
        None => {
            if fresh {
                // Nothing references a descriptor that never produced a module
                unsafe { free_descriptor(descriptor) };
            }
            return Err(PyErr::fetch(py));
        }
    };
    if fresh {
        descriptors.insert(name, Descriptor(descriptor));
    }
    drop(descriptors);

    unsafe {
        let modules = ffi::PyImport_GetModuleDict();
        if ffi::PyDict_SetItemString(modules, name.as_ptr(), module.as_ptr()) < 0 {
            return Err(PyErr::fetch(py));
        }
        drop(module);

        let registered = ffi::PyDict_GetItemString(modules, name.as_ptr());
        py.from_borrowed_ptr_or_err::<PyAny>(registered)?
            .downcast::<PyModule>()
            .map_err(PyErr::from)
    }
}

fn build_descriptor(
    name: &'static CStr,
    mut methods: Vec<ffi::PyMethodDef>,
) -> PyResult<*mut ffi::PyModuleDef> {
    methods
        .try_reserve_exact(1)
        .map_err(|_| PyMemoryError::new_err("cannot allocate module method table"))?;
    methods.push(ffi::PyMethodDef::zeroed());

    let table: *mut [ffi::PyMethodDef] = Box::into_raw(methods.into_boxed_slice());
    Ok(Box::into_raw(Box::new(ffi::PyModuleDef {
        m_base: ffi::PyModuleDef_HEAD_INIT,
        m_name: name.as_ptr(),
        m_doc: ptr::null(),
        m_size: -1,
        m_methods: table.cast::<ffi::PyMethodDef>(),
        m_slots: ptr::null_mut(),
        m_traverse: None,
        m_clear: None,
        m_free: None,
    })))
}

/// # Safety
/// `descriptor` must come from `build_descriptor` and be unreferenced.
unsafe fn free_descriptor(descriptor: *mut ffi::PyModuleDef) {
    let descriptor = Box::from_raw(descriptor);
    let mut len = 0;
    while !(*descriptor.m_methods.add(len)).ml_name.is_null() {
        len += 1;
    }
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(descriptor.m_methods, len + 1)));
}

/// Old C API names resolved to their current equivalents.
#[allow(non_snake_case)]
pub mod legacy {
    pub use super::string_as_ptr as PyString_AsString;
    pub use super::string_as_ptr as PyString_AS_STRING;
    pub use pyo3::ffi::PyBytes_FromStringAndSize as PyString_FromStringAndSize;
    pub use pyo3::ffi::PyLong_AsLong as PyInt_AsLong;
    pub use pyo3::ffi::PyLong_Check as PyInt_Check;
    pub use pyo3::ffi::PyLong_FromLong as PyInt_FromLong;
    pub use pyo3::ffi::PyUnicode_FromString as PyString_FromString;
    pub use pyo3::ffi::PyUnicode_InternFromString as PyString_InternFromString;

    use pyo3::ffi::PyObject;

    /// # Safety
    /// The GIL must be held.
    pub unsafe fn PyString_Check(obj: *mut PyObject) -> i32 {
        (!obj.is_null()
            && (pyo3::ffi::PyUnicode_Check(obj) != 0 || pyo3::ffi::PyBytes_Check(obj) != 0))
            as i32
    }
}
