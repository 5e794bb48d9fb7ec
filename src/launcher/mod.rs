//! The embedded-interpreter launcher
//!
//! A [`Launcher`] owns the interpreter for as long as it lives, the shared
//! execution namespace bound in [`Launcher::create`], and the most recent
//! failure. Every execution entry point runs against that one namespace, so
//! imports and assignments made by one call are visible to the next.
//!
//! ```no_run
//! use pylauncher::Launcher;
//!
//! let mut launcher = Launcher::builder().build()?;
//! launcher.create()?;
//! launcher.run_line("x = 41")?;
//! launcher.run_line("x = x + 1")?;
//! # Ok::<(), pylauncher::LaunchError>(())
//! ```

mod bytecode;
mod host_module;
mod lifecycle;
mod modules;
mod source;

pub use bytecode::{
    current_magic, dump_code, load_code, ContainerHeader, HeaderError, BAD_CODE, BAD_MAGIC,
    HEADER_LEN, TRUNCATED_HEADER,
};
pub use host_module::{ScriptLevel, HOST_MODULE_NAME};
pub use lifecycle::{interpreter_running, is_finalized, is_live};
pub use modules::{standard_modules, ModuleInit, NativeModule};
pub use source::{strip_carriage_returns, DirectorySource, MemorySource, PackSource};

use parking_lot::Mutex;
use pyo3::ffi as py_ffi;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::PyTypeInfo;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::LauncherConfig;
use crate::diagnostics::{self, LogReporter, Reporter, ShadowStack, TraceBuffer, TraceHook};
use crate::error::{LaunchError, Result};
use crate::ffi::OwnedRef;
use lifecycle::{Slot, ThreadAnchor};

const BOOTSTRAP_LINES: [&str; 2] = ["import __main__", "import sys"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherState {
    /// Interpreter running, namespace not bound yet
    Initialized,
    /// `create` succeeded; execution calls are accepted
    Ready,
}

pub struct LauncherBuilder {
    config: LauncherConfig,
    reporter: Arc<dyn Reporter>,
    source: Option<Box<dyn PackSource>>,
    modules: Vec<NativeModule>,
}

impl Default for LauncherBuilder {
    fn default() -> Self {
        Self {
            config: LauncherConfig::default(),
            reporter: Arc::new(LogReporter),
            source: None,
            modules: standard_modules(),
        }
    }
}

impl LauncherBuilder {
    pub fn with_config(mut self, config: LauncherConfig) -> Self {
        self.config = config;
        self
    }

    /// Sink for traceback reports. Defaults to [`LogReporter`].
    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Where `run_file` resolves names. Defaults to a [`DirectorySource`] at
    /// the configured script root, or the working directory.
    pub fn with_source(mut self, source: impl PackSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Add a module to the native-module table.
    pub fn with_module(mut self, module: NativeModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Start (or take over) the interpreter.
    ///
    /// Fails with `AlreadyRunning` while another launcher is live and with
    /// `Finalized` once the interpreter has been stopped in this process.
    /// Must not be called from inside a GIL scope.
    pub fn build(self) -> Result<Launcher> {
        let slot = Slot::claim()?;
        lifecycle::start_interpreter(&self.modules)?;
        let anchor = ThreadAnchor::acquire();

        if self.config.frozen_modules_only {
            Python::with_gil(|py| {
                modules::preload(py, &self.config.preload_modules)?;
                modules::seal_import_system(py)
            })
            .map_err(|e| {
                warn!(error = %e, "Could not restrict the import system");
                LaunchError::Bootstrap { step: "restrict imports".to_string() }
            })?;
        }

        let source = self.source.unwrap_or_else(|| {
            let root = self.config.script_root.clone().unwrap_or_else(|| PathBuf::from("."));
            Box::new(DirectorySource::new(root))
        });
        let trace = Arc::new(Mutex::new(TraceBuffer::with_capacity(self.config.trace_capacity)));

        info!(
            frozen_only = self.config.frozen_modules_only,
            trace_calls = self.config.trace_calls,
            "Launcher initialized"
        );

        Ok(Launcher {
            config: self.config,
            reporter: self.reporter,
            source,
            namespace: None,
            trace,
            hook_installed: false,
            pending: None,
            last_error: String::new(),
            anchor: Some(anchor),
            _slot: slot,
            _thread_bound: PhantomData,
        })
    }
}

pub struct Launcher {
    config: LauncherConfig,
    reporter: Arc<dyn Reporter>,
    source: Box<dyn PackSource>,
    namespace: Option<Py<PyDict>>,
    trace: Arc<Mutex<TraceBuffer>>,
    hook_installed: bool,
    /// Failure of the latest call, kept until `get_error` or the next call
    pending: Option<PyErr>,
    last_error: String,
    anchor: Option<ThreadAnchor>,
    _slot: Slot,
    _thread_bound: PhantomData<*const ()>,
}

impl Launcher {
    pub fn builder() -> LauncherBuilder {
        LauncherBuilder::default()
    }

    pub fn state(&self) -> LauncherState {
        if self.namespace.is_some() {
            LauncherState::Ready
        } else {
            LauncherState::Initialized
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Bind the execution namespace and run the bootstrap statements.
    ///
    /// Installs the shadow-stack trace hook first when `trace_calls` is set.
    /// `TRUE` and `FALSE` become builtins visible to every script.
    #[instrument(skip(self))]
    pub fn create(&mut self) -> Result<()> {
        if self.namespace.is_some() {
            return Err(LaunchError::AlreadyCreated);
        }

        if self.config.trace_calls && !self.hook_installed {
            let hook = ShadowStack::new(self.trace.clone());
            self.set_trace_hook(hook)?;
        }

        match Python::with_gil(bind_namespace) {
            Ok(namespace) => self.namespace = Some(namespace),
            Err(e) => {
                warn!(error = %e, "Cannot bind __main__");
                self.pending = Some(e);
                return Err(LaunchError::Bootstrap { step: "bind __main__".to_string() });
            }
        }

        for line in BOOTSTRAP_LINES {
            if self.run_line(line).is_err() {
                self.namespace = None;
                return Err(LaunchError::Bootstrap { step: line.to_string() });
            }
        }

        info!("Launcher ready");
        Ok(())
    }

    /// Resolve `name` through the pack source, then compile and run it.
    ///
    /// An unresolvable (empty) name fails with `NotFound` without touching
    /// the error state.
    #[instrument(skip(self))]
    pub fn run_file(&mut self, name: &str) -> Result<()> {
        Python::with_gil(|py| {
            let namespace = self.begin(py)?;

            let raw = self.source.resolve(name);
            if raw.is_empty() {
                debug!("Nothing resolved");
                return Err(LaunchError::NotFound { name: name.to_string() });
            }

            let text = strip_carriage_returns(&raw);
            self.compile_and_run(py, &namespace, &text, name)
        })
    }

    /// Run in-memory script text, labelled `name` in diagnostics.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn run_memory_text_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        Python::with_gil(|py| {
            let namespace = self.begin(py)?;
            let text = strip_carriage_returns(data);
            self.compile_and_run(py, &namespace, &text, name)
        })
    }

    /// Load a compiled container from disk and run its code object.
    ///
    /// A rejected container fails with `Format`; the `RuntimeError` stays
    /// retrievable through [`get_error`](Self::get_error) and
    /// [`report_error`](Self::report_error).
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn run_compiled_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        Python::with_gil(|py| {
            let namespace = self.begin(py)?;

            let data = fs::read(path).map_err(|source| {
                debug!(error = %source, "Cannot open compiled file");
                LaunchError::Unreadable { path: path.to_path_buf(), source }
            })?;

            let code = match load_code(py, &data) {
                Ok(code) => code,
                Err(e) => return Err(self.format_failure(py, e)),
            };
            self.evaluate(py, &namespace, code)
        })
    }

    /// Compile and run one piece of text in the shared namespace.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn run_line(&mut self, text: &str) -> Result<()> {
        Python::with_gil(|py| {
            let namespace = self.begin(py)?;
            let globals = namespace.as_ref(py);
            py.run(text, Some(globals), Some(globals))
                .map_err(|e| self.script_failure(py, e))
        })
    }

    /// Consume the latest failure and return its message, or `""` when there
    /// is none. A second call in a row returns `""`.
    pub fn get_error(&mut self) -> &str {
        let pending = self.pending.take();

        self.last_error = Python::with_gil(|py| {
            pending
                .or_else(|| PyErr::take(py))
                .map(|err| diagnostics::error_message(py, &err))
                .unwrap_or_default()
        });
        &self.last_error
    }

    pub fn has_pending_error(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the latest failure is an instance of `T`.
    pub fn pending_error_is<T: PyTypeInfo>(&self) -> bool {
        match &self.pending {
            Some(err) => Python::with_gil(|py| err.is_instance_of::<T>(py)),
            None => false,
        }
    }

    /// Format the latest failure (without consuming it) and send it to the
    /// reporter. With no failure, reports the shadow stack instead.
    pub fn report_error(&self) -> String {
        let shadow = self.trace_lines();
        Python::with_gil(|py| {
            diagnostics::report_traceback(py, self.pending.as_ref(), &shadow, self.reporter.as_ref())
        })
    }

    /// Replace the current thread's trace hook.
    pub fn set_trace_hook(&mut self, hook: impl TraceHook + 'static) -> Result<()> {
        Python::with_gil(|py| diagnostics::install(py, Box::new(hook))).map_err(|e| {
            warn!(error = %e, "Cannot install trace hook");
            LaunchError::Bootstrap { step: "install trace hook".to_string() }
        })?;
        self.hook_installed = true;
        Ok(())
    }

    pub fn clear_trace_hook(&mut self) {
        if self.hook_installed {
            Python::with_gil(diagnostics::uninstall);
            self.hook_installed = false;
        }
    }

    /// Snapshot of the shadow stack, outermost first.
    pub fn trace_lines(&self) -> Vec<String> {
        self.trace.lock().lines().to_vec()
    }

    pub fn trace_depth(&self) -> usize {
        self.trace.lock().depth()
    }

    pub fn trace_buffer(&self) -> Arc<Mutex<TraceBuffer>> {
        self.trace.clone()
    }

    /// Compile `source` under the label `name` and return it as a compiled
    /// container, ready for [`run_compiled_file`](Self::run_compiled_file).
    #[instrument(skip(self, source), fields(len = source.len()))]
    pub fn compile_to_container(&mut self, name: &str, source: &[u8]) -> Result<Vec<u8>> {
        self.pending = None;
        let text = strip_carriage_returns(source);

        Python::with_gil(|py| {
            let code = compile_source(py, &text, name).map_err(|e| self.script_failure(py, e))?;
            dump_code(py, code).map_err(|e| self.format_failure(py, e))
        })
    }

    /// Stop the interpreter. No launcher can be built in this process
    /// afterwards.
    ///
    /// Must run on the thread that started the interpreter.
    pub fn finalize(mut self) {
        self.release_interpreter_state();

        if let Some(anchor) = self.anchor.take() {
            let status = anchor.finalize();
            if status != 0 {
                warn!(status, "Interpreter finalization reported an error");
            }
        }
        info!("Interpreter finalized");
    }

    fn begin(&mut self, py: Python<'_>) -> Result<Py<PyDict>> {
        self.pending = None;
        match &self.namespace {
            Some(namespace) => Ok(namespace.clone_ref(py)),
            None => Err(LaunchError::NotReady),
        }
    }

    fn compile_and_run(
        &mut self,
        py: Python<'_>,
        namespace: &Py<PyDict>,
        text: &[u8],
        name: &str,
    ) -> Result<()> {
        let code = compile_source(py, text, name).map_err(|e| self.script_failure(py, e))?;
        self.evaluate(py, namespace, code)
    }

    /// Evaluate `code` with the namespace as both globals and locals.
    fn evaluate(&mut self, py: Python<'_>, namespace: &Py<PyDict>, code: &PyAny) -> Result<()> {
        let globals = namespace.as_ptr();
        let result = unsafe {
            OwnedRef::from_owned_or_err(py, py_ffi::PyEval_EvalCode(code.as_ptr(), globals, globals))
        };

        match result {
            Ok(_value) => Ok(()),
            Err(e) => Err(self.script_failure(py, e)),
        }
    }

    fn script_failure(&mut self, py: Python<'_>, err: PyErr) -> LaunchError {
        // Copy first: formatting runs Python code, which fires the trace hook
        let shadow = self.trace_lines();
        let traceback = diagnostics::report_traceback(py, Some(&err), &shadow, self.reporter.as_ref());
        self.pending = Some(err);
        LaunchError::Script { traceback }
    }

    fn format_failure(&mut self, py: Python<'_>, err: PyErr) -> LaunchError {
        let message = diagnostics::error_message(py, &err);
        warn!(%message, "Compiled file rejected");
        self.pending = Some(err);
        LaunchError::Format { message }
    }

    fn release_interpreter_state(&mut self) {
        if lifecycle::is_finalized() || !interpreter_running() {
            return;
        }
        Python::with_gil(|py| {
            if self.hook_installed {
                diagnostics::uninstall(py);
                self.hook_installed = false;
            }
            self.namespace = None;
            self.pending = None;
        });
    }
}

impl Drop for Launcher {
    fn drop(&mut self) {
        self.release_interpreter_state();
        debug!("Launcher released");
    }
}

fn bind_namespace(py: Python<'_>) -> PyResult<Py<PyDict>> {
    let main = py.import("__main__")?;
    let namespace = main.dict();

    let builtins = py.import("builtins")?;
    builtins.setattr("TRUE", 1)?;
    builtins.setattr("FALSE", 0)?;
    namespace.set_item("__builtins__", builtins)?;

    Ok(namespace.into())
}

/// Compile `text` as a whole program labelled `name`.
fn compile_source<'py>(py: Python<'py>, text: &[u8], name: &str) -> PyResult<&'py PyAny> {
    let compile = py.import("builtins")?.getattr("compile")?;
    compile.call1((crate::compat::string_from_bytes(py, text), name, "exec"))
}
