//! Raw CPython entry points the safe pyo3 layer does not wrap
//!
//! Covers:
//! 1. Trace registration (`PyEval_SetTrace`)
//! 2. Frame inspection (code object, current line)
//! 3. Scoped ownership of raw strong references (`OwnedRef`)
//!
//! Linking against libpython is provided by pyo3.

mod refcount;

pub use refcount::OwnedRef;

use pyo3::ffi::PyObject;
use std::os::raw::c_int;

/// Opaque interpreter frame (`PyFrameObject`)
#[repr(C)]
pub struct RawFrame {
    _private: [u8; 0],
}

/// `Py_tracefunc`
pub type TraceFn = unsafe extern "C" fn(
    obj: *mut PyObject,
    frame: *mut RawFrame,
    what: c_int,
    arg: *mut PyObject,
) -> c_int;

// `what` values passed to a trace function (Include/cpython/pystate.h)
pub const TRACE_CALL: c_int = 0;
pub const TRACE_EXCEPTION: c_int = 1;
pub const TRACE_LINE: c_int = 2;
pub const TRACE_RETURN: c_int = 3;

extern "C" {
    /// Installs `func` for the current thread; the interpreter takes its own
    /// reference to `obj` and drops the previous one.
    pub fn PyEval_SetTrace(func: Option<TraceFn>, obj: *mut PyObject);

    /// New reference to the frame's code object.
    pub fn PyFrame_GetCode(frame: *mut RawFrame) -> *mut PyObject;

    pub fn PyFrame_GetLineNumber(frame: *mut RawFrame) -> c_int;
}
