use pyo3::prelude::*;
use pyo3::types::{PyList, PyModule};

use super::Reporter;
use crate::compat;

pub const NO_PENDING_ERROR: &str = "(No Python error set - failure occurred at host level)";

/// Format `error` after the shadow-stack lines, hand the block to
/// `reporter` and return it.
///
/// With no error, the shadow-stack lines are followed by a placeholder
/// saying the failure happened on the host side.
///
/// Prefers the interpreter's own `traceback.format_exception`; falls back to
/// `<type name>: <value>` when that is unavailable or returns something
/// other than a list, mirroring the value to `Reporter::trace`.
pub fn report_traceback(
    py: Python<'_>,
    error: Option<&PyErr>,
    shadow: &[String],
    reporter: &dyn Reporter,
) -> String {
    let mut text = String::new();
    for line in shadow {
        text.push_str(line);
        text.push('\n');
    }

    let Some(error) = error else {
        text.push_str(NO_PENDING_ERROR);
        reporter.report(&text);
        return text;
    };

    match format_exception(py, error) {
        Ok(formatted) => text.push_str(&formatted),
        Err(format_err) => {
            tracing::debug!(error = %format_err, "traceback.format_exception unavailable");
            let summary = summarize(py, error, reporter);
            text.push_str(&summary);
        }
    }

    reporter.report(&text);
    text
}

fn format_exception(py: Python<'_>, error: &PyErr) -> PyResult<String> {
    let formatter = PyModule::import(py, "traceback")?.getattr("format_exception")?;
    let traceback = match error.traceback(py) {
        Some(tb) => tb.to_object(py),
        None => py.None(),
    };

    let lines = formatter.call1((error.get_type(py), error.value(py), traceback))?;
    let lines = lines.downcast::<PyList>()?;

    Ok(lines
        .iter()
        .map(|line| compat::string_lossy(line).unwrap_or_default())
        .collect())
}

/// Single-line `<type name>: <value>` form.
pub fn summarize(py: Python<'_>, error: &PyErr, reporter: &dyn Reporter) -> String {
    let mut text = String::new();

    if let Ok(name) = error.get_type(py).getattr("__name__").and_then(compat::string_lossy) {
        text.push_str(&name);
        text.push_str(": ");
    }

    if let Ok(value) = error.value(py).str() {
        let value = value.to_string_lossy();
        text.push_str(&value);
        reporter.trace(&value);
    }

    text
}

/// `str(value)` of the error, or empty when even that fails.
pub fn error_message(py: Python<'_>, error: &PyErr) -> String {
    error
        .value(py)
        .str()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_default()
}
