//! Process-wide interpreter lifecycle.
//!
//! The interpreter is a process singleton: at most one launcher owns it at a
//! time, and once finalized it cannot be started again.

use pyo3::ffi;
use pyo3::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

use super::modules::{self, NativeModule};
use crate::error::{LaunchError, Result};

static LIVE: AtomicBool = AtomicBool::new(false);
static FINALIZED: AtomicBool = AtomicBool::new(false);

/// Ownership of the single launcher slot; released on drop.
#[derive(Debug)]
pub(super) struct Slot {
    _private: (),
}

impl Slot {
    pub(super) fn claim() -> Result<Self> {
        if FINALIZED.load(Ordering::Acquire) {
            return Err(LaunchError::Finalized);
        }
        LIVE.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LaunchError::AlreadyRunning)?;
        Ok(Self { _private: () })
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        LIVE.store(false, Ordering::Release);
    }
}

pub fn is_live() -> bool {
    LIVE.load(Ordering::Acquire)
}

pub fn is_finalized() -> bool {
    FINALIZED.load(Ordering::Acquire)
}

pub fn interpreter_running() -> bool {
    unsafe { ffi::Py_IsInitialized() != 0 }
}

/// Start the interpreter with `table` importable, or, when it is already
/// running, install the table's modules directly.
pub(super) fn start_interpreter(table: &[NativeModule]) -> Result<()> {
    if !interpreter_running() {
        modules::register_inittab(table)?;
        pyo3::prepare_freethreaded_python();
        tracing::info!(modules = table.len(), "Interpreter started");
        return Ok(());
    }

    tracing::debug!("Interpreter already running; registering native modules in place");
    Python::with_gil(|py| modules::register_live(py, table))
}

/// Keeps the calling thread's interpreter state alive between GIL
/// acquisitions, so per-thread settings such as the trace function survive
/// from one entry point to the next.
///
/// Must be created and dropped on the same thread, outside any GIL scope.
pub(super) struct ThreadAnchor {
    gil_state: ffi::PyGILState_STATE,
    saved: *mut ffi::PyThreadState,
}

impl ThreadAnchor {
    pub(super) fn acquire() -> Self {
        unsafe {
            let gil_state = ffi::PyGILState_Ensure();
            let saved = ffi::PyEval_SaveThread();
            Self { gil_state, saved }
        }
    }

    /// Stop the interpreter from the anchored thread.
    pub(super) fn finalize(self) -> i32 {
        FINALIZED.store(true, Ordering::Release);
        let status = unsafe {
            ffi::PyEval_RestoreThread(self.saved);
            ffi::Py_FinalizeEx()
        };
        // The thread state no longer exists; nothing to release
        std::mem::forget(self);
        status
    }
}

impl Drop for ThreadAnchor {
    fn drop(&mut self) {
        unsafe {
            ffi::PyEval_RestoreThread(self.saved);
            ffi::PyGILState_Release(self.gil_state);
        }
    }
}
