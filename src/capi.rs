//! C ABI for C/C++ hosts
//!
//! Handles come from `pylauncher_new` and go back through either
//! `pylauncher_free`, which releases the launcher but leaves the interpreter
//! running for a later `pylauncher_new`, or `pylauncher_finalize`, which also
//! stops the interpreter for the rest of the process. Every call returns 1 on
//! success and 0 on failure; a null handle or a non-UTF-8 string is a
//! failure.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;

use crate::launcher::{DirectorySource, Launcher};
use crate::logging;

pub struct LauncherHandle {
    launcher: Launcher,
    /// Backing storage for the last `pylauncher_get_error` result
    error: CString,
}

/// Start the interpreter. `script_root` (may be null for the working
/// directory) is where `pylauncher_run_file` resolves names.
///
/// Returns null when a launcher is already live or the interpreter cannot
/// start.
///
/// # Safety
/// `script_root` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_new(script_root: *const c_char) -> *mut LauncherHandle {
    if let Some(guard) = logging::init_logging(logging::LogConfig::from_env()) {
        // The log writer stays up for the rest of the process
        std::mem::forget(guard);
    }

    let mut builder = Launcher::builder();
    if !script_root.is_null() {
        match to_str(script_root) {
            Some(root) => builder = builder.with_source(DirectorySource::new(root)),
            None => return ptr::null_mut(),
        }
    }

    match builder.build() {
        Ok(launcher) => Box::into_raw(Box::new(LauncherHandle { launcher, error: CString::default() })),
        Err(e) => {
            tracing::error!(error = %e, "pylauncher_new failed");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `handle` must come from `pylauncher_new` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_free(handle: *mut LauncherHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Release the launcher and stop the interpreter. No handle can be created
/// afterwards in this process. Returns 0 for a null handle.
///
/// # Safety
/// `handle` must be null or come from `pylauncher_new`, on the thread that
/// created it, and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_finalize(handle: *mut LauncherHandle) -> c_int {
    if handle.is_null() {
        return 0;
    }
    let LauncherHandle { launcher, .. } = *Box::from_raw(handle);
    launcher.finalize();
    1
}

/// # Safety
/// `handle` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_create(handle: *mut LauncherHandle) -> c_int {
    with_launcher(handle, |launcher| status(launcher.create()))
}

/// # Safety
/// `handle` must be null or a live handle; `name` a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_run_file(handle: *mut LauncherHandle, name: *const c_char) -> c_int {
    let Some(name) = to_str(name) else { return 0 };
    with_launcher(handle, |launcher| status(launcher.run_file(name)))
}

/// # Safety
/// `data` must point to `size` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_run_memory_text_file(
    handle: *mut LauncherHandle,
    name: *const c_char,
    size: usize,
    data: *const c_char,
) -> c_int {
    let Some(name) = to_str(name) else { return 0 };
    let text: &[u8] = if size == 0 {
        &[]
    } else if data.is_null() {
        return 0;
    } else {
        slice::from_raw_parts(data.cast::<u8>(), size)
    };
    with_launcher(handle, |launcher| status(launcher.run_memory_text_file(name, text)))
}

/// # Safety
/// `handle` must be null or a live handle; `path` a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_run_compiled_file(
    handle: *mut LauncherHandle,
    path: *const c_char,
) -> c_int {
    let Some(path) = to_str(path) else { return 0 };
    with_launcher(handle, |launcher| status(launcher.run_compiled_file(path)))
}

/// # Safety
/// `handle` must be null or a live handle; `text` a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_run_line(handle: *mut LauncherHandle, text: *const c_char) -> c_int {
    let Some(text) = to_str(text) else { return 0 };
    with_launcher(handle, |launcher| status(launcher.run_line(text)))
}

/// Message of the latest failure, consumed by this call. The pointer stays
/// valid until the next call on the same handle; null for a null handle.
///
/// # Safety
/// `handle` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn pylauncher_get_error(handle: *mut LauncherHandle) -> *const c_char {
    let Some(handle) = handle.as_mut() else { return ptr::null() };

    let message = handle.launcher.get_error();
    // Interior NULs cannot cross the boundary; cut the message there
    let message = message.split('\0').next().unwrap_or_default();
    handle.error = CString::new(message).unwrap_or_default();
    handle.error.as_ptr()
}

unsafe fn with_launcher(
    handle: *mut LauncherHandle,
    call: impl FnOnce(&mut Launcher) -> c_int,
) -> c_int {
    match handle.as_mut() {
        Some(handle) => call(&mut handle.launcher),
        None => 0,
    }
}

unsafe fn to_str<'a>(text: *const c_char) -> Option<&'a str> {
    if text.is_null() {
        return None;
    }
    CStr::from_ptr(text).to_str().ok()
}

fn status(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => 1,
        Err(e) => {
            tracing::debug!(error = %e, "C API call failed");
            0
        }
    }
}
