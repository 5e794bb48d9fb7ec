//! Call/return/exception tracing
//!
//! The interpreter calls a single C trampoline for every traced event. The
//! trampoline recovers the active [`TraceHook`] from the capsule registered
//! alongside it and forwards the event. The capsule owns the hook, so
//! replacing or clearing the trace function releases the previous hook.

use parking_lot::Mutex;
use pyo3::ffi as py_ffi;
use pyo3::prelude::*;
use pyo3::GILPool;
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use crate::ffi::{self, OwnedRef, RawFrame};

pub const TRACE_CAPACITY: usize = 512;

/// Longest recorded frame description, in bytes.
const MAX_LINE_LEN: usize = 127;

const UNKNOWN: &str = "<unknown>";

const HOOK_CAPSULE_NAME: &[u8] = b"pylauncher.trace_hook\0";

/// Fixed-capacity shadow call stack.
///
/// Pushes beyond capacity are dropped, never overwritten.
#[derive(Debug, Clone)]
pub struct TraceBuffer {
    lines: Vec<String>,
    capacity: usize,
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::with_capacity(TRACE_CAPACITY)
    }
}

impl TraceBuffer {
    /// Storage grows on demand past the first [`TRACE_CAPACITY`] entries, so
    /// any configured limit is accepted.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { lines: Vec::with_capacity(capacity.min(TRACE_CAPACITY)), capacity }
    }

    /// Returns false when the entry was dropped.
    pub fn push(&mut self, line: String) -> bool {
        if self.lines.len() >= self.capacity {
            return false;
        }
        self.lines.push(line);
        true
    }

    pub fn pop(&mut self) -> Option<String> {
        self.lines.pop()
    }

    pub fn depth(&self) -> usize {
        self.lines.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Where an event happened. Unreadable fields are `<unknown>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub file: String,
    pub line: i32,
    pub function: String,
}

impl FrameInfo {
    pub fn new(file: impl Into<String>, line: i32, function: impl Into<String>) -> Self {
        Self { file: file.into(), line, function: function.into() }
    }

    /// # Safety
    /// The GIL must be held and `frame` must be the live frame handed to the
    /// trace function.
    unsafe fn capture(py: Python<'_>, frame: *mut RawFrame) -> Self {
        let line = ffi::PyFrame_GetLineNumber(frame);
        let code = OwnedRef::from_owned(ffi::PyFrame_GetCode(frame));

        let (file, function) = match code {
            Some(code) => {
                let code = py.from_borrowed_ptr::<PyAny>(code.as_ptr());
                (code_attr(code, "co_filename"), code_attr(code, "co_name"))
            }
            None => {
                py_ffi::PyErr_Clear();
                (UNKNOWN.to_string(), UNKNOWN.to_string())
            }
        };

        Self { file, line, function }
    }

    /// `"<kind>: File \"<file>\", line <n>, in <function>"`
    pub fn describe(&self, kind: &str) -> String {
        let mut text = format!(
            "{}: File \"{}\", line {}, in {}",
            kind, self.file, self.line, self.function
        );
        if text.len() > MAX_LINE_LEN {
            let mut cut = MAX_LINE_LEN;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        text
    }
}

fn code_attr(code: &PyAny, name: &str) -> String {
    code.getattr(name)
        .and_then(crate::compat::string_lossy)
        .unwrap_or_else(|_| UNKNOWN.to_string())
}

/// Receives interpreter trace events for the thread it is installed on.
pub trait TraceHook: Send {
    fn on_call(&mut self, _frame: &FrameInfo) {}

    fn on_return(&mut self) {}

    fn on_exception(&mut self, _frame: &FrameInfo) {}
}

/// Records call and exception sites, popping one entry per return.
#[derive(Debug, Clone)]
pub struct ShadowStack {
    buffer: Arc<Mutex<TraceBuffer>>,
}

impl ShadowStack {
    pub fn new(buffer: Arc<Mutex<TraceBuffer>>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &Arc<Mutex<TraceBuffer>> {
        &self.buffer
    }
}

impl TraceHook for ShadowStack {
    fn on_call(&mut self, frame: &FrameInfo) {
        let mut buffer = self.buffer.lock();
        if !buffer.is_full() {
            buffer.push(frame.describe("Call"));
        }
    }

    fn on_return(&mut self) {
        self.buffer.lock().pop();
    }

    fn on_exception(&mut self, frame: &FrameInfo) {
        let mut buffer = self.buffer.lock();
        if !buffer.is_full() {
            buffer.push(frame.describe("Exception"));
        }
    }
}

type HookCell = Mutex<Box<dyn TraceHook>>;

/// Install `hook` as the current thread's trace function, replacing (and
/// releasing) any previous one.
pub fn install(py: Python<'_>, hook: Box<dyn TraceHook>) -> PyResult<()> {
    let cell: *mut HookCell = Box::into_raw(Box::new(Mutex::new(hook)));

    let capsule = unsafe {
        py_ffi::PyCapsule_New(
            cell.cast::<c_void>(),
            HOOK_CAPSULE_NAME.as_ptr().cast(),
            Some(release_hook),
        )
    };
    let capsule = match unsafe { OwnedRef::from_owned(capsule) } {
        Some(capsule) => capsule,
        None => {
            unsafe { drop(Box::from_raw(cell)) };
            return Err(PyErr::fetch(py));
        }
    };

    // The interpreter keeps its own reference to the capsule
    unsafe { ffi::PyEval_SetTrace(Some(dispatch), capsule.as_ptr()) };
    tracing::debug!("Trace hook installed");
    Ok(())
}

/// Remove the current thread's trace function.
pub fn uninstall(_py: Python<'_>) {
    unsafe { ffi::PyEval_SetTrace(None, ptr::null_mut()) };
    tracing::debug!("Trace hook removed");
}

unsafe extern "C" fn release_hook(capsule: *mut py_ffi::PyObject) {
    let cell = py_ffi::PyCapsule_GetPointer(capsule, HOOK_CAPSULE_NAME.as_ptr().cast());
    if cell.is_null() {
        py_ffi::PyErr_Clear();
        return;
    }
    drop(Box::from_raw(cell.cast::<HookCell>()));
}

unsafe extern "C" fn dispatch(
    obj: *mut py_ffi::PyObject,
    frame: *mut RawFrame,
    what: c_int,
    _arg: *mut py_ffi::PyObject,
) -> c_int {
    let cell = py_ffi::PyCapsule_GetPointer(obj, HOOK_CAPSULE_NAME.as_ptr().cast());
    if cell.is_null() {
        py_ffi::PyErr_Clear();
        return 0;
    }
    let cell = &*cell.cast::<HookCell>();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let pool = unsafe { GILPool::new() };
        let py = pool.python();

        match what {
            ffi::TRACE_CALL => {
                let info = unsafe { FrameInfo::capture(py, frame) };
                cell.lock().on_call(&info);
            }
            ffi::TRACE_EXCEPTION => {
                let info = unsafe { FrameInfo::capture(py, frame) };
                cell.lock().on_exception(&info);
            }
            ffi::TRACE_RETURN => cell.lock().on_return(),
            _ => {}
        }
    }));

    if outcome.is_err() {
        tracing::error!("Trace hook panicked; event ignored");
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: i32) -> FrameInfo {
        FrameInfo::new("ui/window.py", n, "OnUpdate")
    }

    #[test]
    fn test_describe_format() {
        assert_eq!(
            frame(12).describe("Call"),
            "Call: File \"ui/window.py\", line 12, in OnUpdate"
        );
        let unknown = FrameInfo::new(UNKNOWN, 0, UNKNOWN);
        assert_eq!(
            unknown.describe("Exception"),
            "Exception: File \"<unknown>\", line 0, in <unknown>"
        );
    }

    #[test]
    fn test_describe_truncates_long_paths() {
        let long = FrameInfo::new("é".repeat(200), 1, "f");
        let text = long.describe("Call");
        assert!(text.len() <= MAX_LINE_LEN);
        assert!(text.starts_with("Call: File \""));
    }

    #[test]
    fn test_buffer_drops_beyond_capacity() {
        let mut buffer = TraceBuffer::with_capacity(2);
        assert!(buffer.push("a".into()));
        assert!(buffer.push("b".into()));
        assert!(!buffer.push("c".into()));
        assert_eq!(buffer.lines(), &["a".to_string(), "b".to_string()]);
        assert_eq!(buffer.pop().as_deref(), Some("b"));
        assert_eq!(buffer.depth(), 1);
    }

    #[test]
    fn test_huge_limit_does_not_preallocate() {
        let mut buffer = TraceBuffer::with_capacity(usize::MAX);
        assert_eq!(buffer.capacity(), usize::MAX);
        assert!(buffer.push("a".into()));
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_shadow_stack_bounded_at_512() {
        let buffer = Arc::new(Mutex::new(TraceBuffer::default()));
        let mut stack = ShadowStack::new(buffer.clone());

        for n in 0..600 {
            stack.on_call(&frame(n));
        }
        assert_eq!(buffer.lock().depth(), TRACE_CAPACITY);
        // The first 512 survive; later pushes were dropped, not rotated in
        assert_eq!(buffer.lock().lines()[511], frame(511).describe("Call"));

        stack.on_return();
        assert_eq!(buffer.lock().depth(), TRACE_CAPACITY - 1);

        stack.on_exception(&frame(900));
        assert_eq!(
            buffer.lock().lines().last().cloned(),
            Some(frame(900).describe("Exception"))
        );
    }

    #[test]
    fn test_return_on_empty_is_noop() {
        let buffer = Arc::new(Mutex::new(TraceBuffer::default()));
        let mut stack = ShadowStack::new(buffer.clone());
        stack.on_return();
        assert_eq!(buffer.lock().depth(), 0);
    }
}
