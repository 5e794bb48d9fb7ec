//! Scoped ownership of raw interpreter references
//!
//! Every pointer returned as a "new reference" by the C API is wrapped here
//! immediately, so the matching decref runs on every exit path.

use pyo3::ffi;
use pyo3::{PyErr, PyResult, Python};
use std::ptr::NonNull;

/// One strong reference to an interpreter object.
///
/// The GIL must be held whenever an `OwnedRef` is cloned or dropped.
pub struct OwnedRef {
    ptr: NonNull<ffi::PyObject>,
}

impl OwnedRef {
    /// Take ownership of a new reference; `None` for null.
    ///
    /// # Safety
    /// `ptr` must be null or a new (owned) reference, and the GIL must be held.
    #[inline]
    pub unsafe fn from_owned(ptr: *mut ffi::PyObject) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Like `from_owned`, but a null pointer becomes the pending interpreter
    /// error.
    ///
    /// # Safety
    /// Same as `from_owned`.
    pub unsafe fn from_owned_or_err(py: Python<'_>, ptr: *mut ffi::PyObject) -> PyResult<Self> {
        Self::from_owned(ptr).ok_or_else(|| PyErr::fetch(py))
    }

    /// Take a new reference to a borrowed pointer.
    ///
    /// # Safety
    /// `ptr` must be null or a valid borrowed reference, and the GIL must be held.
    pub unsafe fn from_borrowed(ptr: *mut ffi::PyObject) -> Option<Self> {
        let owned = NonNull::new(ptr)?;
        ffi::Py_INCREF(owned.as_ptr());
        Some(Self { ptr: owned })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut ffi::PyObject {
        self.ptr.as_ptr()
    }

    /// Release ownership without decrementing; the caller now owns the
    /// reference.
    #[inline]
    pub fn into_raw(self) -> *mut ffi::PyObject {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Current reference count (for debugging/testing)
    pub fn refcount(&self) -> isize {
        unsafe { ffi::Py_REFCNT(self.ptr.as_ptr()) as isize }
    }

    /// Convert into a pyo3 owner, handing the reference over.
    pub fn into_py_object(self, py: Python<'_>) -> pyo3::PyObject {
        unsafe { pyo3::PyObject::from_owned_ptr(py, self.into_raw()) }
    }
}

impl Clone for OwnedRef {
    fn clone(&self) -> Self {
        unsafe { ffi::Py_INCREF(self.ptr.as_ptr()) };
        Self { ptr: self.ptr }
    }
}

impl Drop for OwnedRef {
    fn drop(&mut self) {
        unsafe { ffi::Py_DECREF(self.ptr.as_ptr()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyo3::types::PyList;
    use pyo3::AsPyPointer;

    #[test]
    fn test_clone_and_drop_balance() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let list = PyList::empty(py);
            let base = unsafe { ffi::Py_REFCNT(list.as_ptr()) };

            let owned = unsafe { OwnedRef::from_borrowed(list.as_ptr()) }.unwrap();
            assert_eq!(owned.refcount() as ffi::Py_ssize_t, base + 1);

            let second = owned.clone();
            assert_eq!(second.refcount() as ffi::Py_ssize_t, base + 2);

            drop(second);
            drop(owned);
            assert_eq!(unsafe { ffi::Py_REFCNT(list.as_ptr()) }, base);
        });
    }

    #[test]
    fn test_null_is_pending_error() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            assert!(unsafe { OwnedRef::from_owned(std::ptr::null_mut()) }.is_none());

            unsafe {
                ffi::PyErr_SetString(ffi::PyExc_KeyError, b"missing\0".as_ptr().cast());
            }
            let err = unsafe { OwnedRef::from_owned_or_err(py, std::ptr::null_mut()) }
                .err()
                .unwrap();
            assert!(err.is_instance_of::<pyo3::exceptions::PyKeyError>(py));
        });
    }

    #[test]
    fn test_into_py_object_keeps_count() {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let list = PyList::empty(py);
            let base = unsafe { ffi::Py_REFCNT(list.as_ptr()) };

            let owned = unsafe { OwnedRef::from_borrowed(list.as_ptr()) }.unwrap();
            let object = owned.into_py_object(py);
            assert_eq!(unsafe { ffi::Py_REFCNT(object.as_ptr()) }, base + 1);

            drop(object);
            assert_eq!(unsafe { ffi::Py_REFCNT(list.as_ptr()) }, base);
        });
    }
}
