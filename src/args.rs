//! Positional argument extraction for native functions
//!
//! Every getter returns `PyResult`; on `Err` the error names the position and
//! what went wrong (missing, wrong type, out of range for the target width).
//! Native entry points restore that error on the interpreter and return null.

use pyo3::exceptions::{PyIndexError, PyOverflowError, PyRuntimeError, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::{PyFloat, PyLong, PyTuple};
use std::os::raw::{c_long, c_ulong};

use crate::compat;

pub trait ArgTuple {
    fn get_object(&self, pos: usize) -> PyResult<&PyAny>;
    fn get_string(&self, pos: usize) -> PyResult<String>;
    fn get_byte(&self, pos: usize) -> PyResult<u8>;
    fn get_word(&self, pos: usize) -> PyResult<u16>;
    fn get_int(&self, pos: usize) -> PyResult<i32>;
    fn get_unsigned_int(&self, pos: usize) -> PyResult<u32>;
    fn get_long(&self, pos: usize) -> PyResult<c_long>;
    fn get_unsigned_long(&self, pos: usize) -> PyResult<c_ulong>;
    fn get_long_long(&self, pos: usize) -> PyResult<i64>;
    fn get_unsigned_long_long(&self, pos: usize) -> PyResult<u64>;
    fn get_float(&self, pos: usize) -> PyResult<f32>;
    fn get_double(&self, pos: usize) -> PyResult<f64>;
    fn get_boolean(&self, pos: usize) -> PyResult<bool>;

    /// Native pointers travel through scripts as unsigned 64-bit integers.
    fn get_pointer<T>(&self, pos: usize) -> PyResult<*mut T> {
        self.get_unsigned_long_long(pos).map(|addr| addr as usize as *mut T)
    }
}

impl ArgTuple for PyTuple {
    fn get_object(&self, pos: usize) -> PyResult<&PyAny> {
        if pos >= self.len() {
            return Err(PyIndexError::new_err(format!(
                "argument {} missing: got {} argument(s)",
                pos,
                self.len()
            )));
        }
        self.get_item(pos)
    }

    fn get_string(&self, pos: usize) -> PyResult<String> {
        let obj = self.get_object(pos)?;
        compat::string_lossy(obj)
            .map_err(|_| type_error(pos, "str", obj))
    }

    fn get_byte(&self, pos: usize) -> PyResult<u8> {
        integer(self, pos, "unsigned char")
    }

    fn get_word(&self, pos: usize) -> PyResult<u16> {
        integer(self, pos, "WORD")
    }

    fn get_int(&self, pos: usize) -> PyResult<i32> {
        integer(self, pos, "int")
    }

    fn get_unsigned_int(&self, pos: usize) -> PyResult<u32> {
        integer(self, pos, "unsigned int")
    }

    fn get_long(&self, pos: usize) -> PyResult<c_long> {
        integer(self, pos, "long")
    }

    fn get_unsigned_long(&self, pos: usize) -> PyResult<c_ulong> {
        integer(self, pos, "unsigned long")
    }

    fn get_long_long(&self, pos: usize) -> PyResult<i64> {
        integer(self, pos, "long long")
    }

    fn get_unsigned_long_long(&self, pos: usize) -> PyResult<u64> {
        integer(self, pos, "unsigned long long")
    }

    fn get_float(&self, pos: usize) -> PyResult<f32> {
        self.get_double(pos).map(|value| value as f32)
    }

    fn get_double(&self, pos: usize) -> PyResult<f64> {
        let obj = self.get_object(pos)?;
        if obj.downcast::<PyFloat>().is_err() && obj.downcast::<PyLong>().is_err() {
            return Err(type_error(pos, "float", obj));
        }
        obj.extract()
    }

    /// Truthiness of an int (bool is an int subclass).
    fn get_boolean(&self, pos: usize) -> PyResult<bool> {
        let obj = self.get_object(pos)?;
        if obj.downcast::<PyLong>().is_err() {
            return Err(type_error(pos, "bool", obj));
        }
        obj.is_true()
    }
}

fn integer<'a, T>(args: &'a PyTuple, pos: usize, target: &str) -> PyResult<T>
where
    T: FromPyObject<'a>,
{
    let obj = args.get_object(pos)?;
    if obj.downcast::<PyLong>().is_err() {
        return Err(type_error(pos, target, obj));
    }
    obj.extract().map_err(|err| {
        if err.is_instance_of::<PyOverflowError>(obj.py()) {
            PyOverflowError::new_err(format!("argument {} out of range for {}", pos, target))
        } else {
            err
        }
    })
}

fn type_error(pos: usize, expected: &str, found: &PyAny) -> PyErr {
    let found = found
        .get_type()
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|_| "<unknown>".to_string());
    PyTypeError::new_err(format!("argument {} must be {}, not {}", pos, expected, found))
}

/// Error object for a native function to hand back to the script.
pub fn build_exception(message: impl Into<String>) -> PyErr {
    PyRuntimeError::new_err(message.into())
}

pub fn bad_argument() -> PyErr {
    PyTypeError::new_err("bad argument type for built-in operation")
}

pub fn build_none(py: Python<'_>) -> PyObject {
    py.None()
}

/// Call `obj.<name>(*args)` when the attribute exists.
///
/// `Ok(None)` means the object has no such member; an exception raised by
/// the member itself is returned as `Err`.
pub fn call_member<'py>(
    obj: &'py PyAny,
    name: &str,
    args: impl IntoPy<Py<PyTuple>>,
) -> PyResult<Option<&'py PyAny>> {
    if !obj.hasattr(name)? {
        return Ok(None);
    }
    obj.getattr(name)?.call1(args).map(Some)
}

pub fn call_member_bool(
    obj: &PyAny,
    name: &str,
    args: impl IntoPy<Py<PyTuple>>,
) -> PyResult<Option<bool>> {
    match call_member(obj, name, args)? {
        Some(result) => result.is_true().map(Some),
        None => Ok(None),
    }
}

pub fn call_member_long(
    obj: &PyAny,
    name: &str,
    args: impl IntoPy<Py<PyTuple>>,
) -> PyResult<Option<c_long>> {
    match call_member(obj, name, args)? {
        Some(result) => result.extract().map(Some),
        None => Ok(None),
    }
}
