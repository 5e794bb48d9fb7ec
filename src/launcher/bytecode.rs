//! Compiled-file container: a 16-byte header followed by one marshalled
//! code object.
//!
//! Header layout (little-endian 32-bit words):
//! `[magic][flags][stamp][source_info]`
//!
//! Only the magic is validated. `flags`, `stamp` and `source_info` are
//! required to be present but are not checked against any source file.

use pyo3::exceptions::PyRuntimeError;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyModule};

pub const HEADER_LEN: usize = 16;

pub const BAD_MAGIC: &str = "Bad magic number in compiled file";
pub const TRUNCATED_HEADER: &str = "Truncated header in compiled file";
pub const BAD_CODE: &str = "Bad code object in compiled file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: u32,
    pub flags: u32,
    pub stamp: u32,
    pub source_info: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    BadMagic { found: u32, expected: u32 },
    Truncated { len: usize },
}

impl HeaderError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::BadMagic { .. } => BAD_MAGIC,
            Self::Truncated { .. } => TRUNCATED_HEADER,
        }
    }
}

impl ContainerHeader {
    pub fn new(magic: u32) -> Self {
        Self { magic, flags: 0, stamp: 0, source_info: 0 }
    }

    /// Split `data` into header and body, checking the magic first.
    pub fn parse(data: &[u8], expected_magic: u32) -> Result<(Self, &[u8]), HeaderError> {
        let word = |index: usize| -> Option<u32> {
            let start = index * 4;
            data.get(start..start + 4)
                .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        };

        let magic = word(0).ok_or(HeaderError::Truncated { len: data.len() })?;
        if magic != expected_magic {
            return Err(HeaderError::BadMagic { found: magic, expected: expected_magic });
        }

        match (word(1), word(2), word(3)) {
            (Some(flags), Some(stamp), Some(source_info)) => Ok((
                Self { magic, flags, stamp, source_info },
                &data[HEADER_LEN..],
            )),
            _ => Err(HeaderError::Truncated { len: data.len() }),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        for (slot, word) in out
            .chunks_exact_mut(4)
            .zip([self.magic, self.flags, self.stamp, self.source_info])
        {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}

/// The running interpreter's bytecode magic.
pub fn current_magic(_py: Python<'_>) -> u32 {
    unsafe { ffi::PyImport_GetMagicNumber() as u32 }
}

/// Validate the header and unmarshal the code object that follows.
///
/// Every rejection is a `RuntimeError`.
pub fn load_code<'py>(py: Python<'py>, data: &[u8]) -> PyResult<&'py PyAny> {
    let (_, body) = ContainerHeader::parse(data, current_magic(py))
        .map_err(|e| PyRuntimeError::new_err(e.message()))?;

    let code = PyModule::import(py, "marshal")?
        .getattr("loads")?
        .call1((PyBytes::new(py, body),))
        .map_err(|e| {
            tracing::debug!(error = %e, "Unmarshal failed");
            PyRuntimeError::new_err(BAD_CODE)
        })?;

    if !is_code(code) {
        return Err(PyRuntimeError::new_err(BAD_CODE));
    }
    Ok(code)
}

/// Serialize a code object into a container stamped with the current magic.
pub fn dump_code(py: Python<'_>, code: &PyAny) -> PyResult<Vec<u8>> {
    if !is_code(code) {
        return Err(PyRuntimeError::new_err(BAD_CODE));
    }

    let body = PyModule::import(py, "marshal")?.getattr("dumps")?.call1((code,))?;
    let body = body.downcast::<PyBytes>()?.as_bytes();

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&ContainerHeader::new(current_magic(py)).to_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

pub fn is_code(obj: &PyAny) -> bool {
    unsafe { ffi::PyCode_Check(obj.as_ptr()) != 0 }
}
