use parking_lot::{const_mutex, Mutex, MutexGuard};
use pylauncher::launcher::{current_magic, HEADER_LEN, TRUNCATED_HEADER};
use pylauncher::{
    BufferedReporter, ErrorKind, FrameInfo, LaunchError, Launcher, LauncherConfig, LauncherState,
    MemorySource, TraceHook,
};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestRunner};
use pyo3::exceptions::PyRuntimeError;
use pyo3::Python;
use std::cell::RefCell;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// The interpreter is process-wide; one launcher at a time
static SERIAL: Mutex<()> = const_mutex(());

struct Fixture {
    launcher: Launcher,
    reporter: BufferedReporter,
    _serial: MutexGuard<'static, ()>,
}

fn fixture_with(source: MemorySource, config: LauncherConfig) -> Fixture {
    let serial = SERIAL.lock();
    let reporter = BufferedReporter::new();
    let mut launcher = Launcher::builder()
        .with_config(config)
        .with_reporter(reporter.clone())
        .with_source(source)
        .build()
        .unwrap();
    launcher.create().unwrap();
    Fixture { launcher, reporter, _serial: serial }
}

fn fixture(source: MemorySource) -> Fixture {
    fixture_with(source, LauncherConfig::default().with_trace_calls(true))
}

#[test]
fn test_namespace_persists_across_calls() {
    let mut fx = fixture(MemorySource::new());

    fx.launcher.run_line("persist_x = 41").unwrap();
    fx.launcher.run_line("persist_x = persist_x + 1").unwrap();
    fx.launcher.run_line("assert persist_x == 42").unwrap();
    assert_eq!(fx.launcher.state(), LauncherState::Ready);
}

#[test]
fn test_side_effects_shared_between_entry_points() {
    let source = MemorySource::new().with_file("shared/define.py", "shared_value = 7\n");
    let mut fx = fixture(source);

    fx.launcher.run_file("shared/define.py").unwrap();
    fx.launcher.run_memory_text_file("use.py", b"shared_value *= 2\n").unwrap();
    fx.launcher.run_line("assert shared_value == 14").unwrap();
}

#[test]
fn test_true_false_builtins() {
    let mut fx = fixture(MemorySource::new());
    fx.launcher.run_line("assert TRUE == 1 and FALSE == 0").unwrap();
    fx.launcher.run_memory_text_file("flags.py", b"flag_seen = TRUE\n").unwrap();
    fx.launcher.run_line("assert flag_seen == 1").unwrap();
}

#[test]
fn test_get_error_is_one_shot() {
    let mut fx = fixture(MemorySource::new());

    let err = fx.launcher.run_line("raise ValueError('only once')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);

    assert_eq!(fx.launcher.get_error(), "only once");
    assert_eq!(fx.launcher.get_error(), "");
}

#[test]
fn test_next_call_discards_unconsumed_error() {
    let mut fx = fixture(MemorySource::new());

    assert!(fx.launcher.run_line("raise ValueError('stale')").is_err());
    assert!(fx.launcher.has_pending_error());

    fx.launcher.run_line("fresh_value = 1").unwrap();
    assert!(!fx.launcher.has_pending_error());
    assert_eq!(fx.launcher.get_error(), "");
}

#[test]
fn test_missing_file_leaves_no_error_state() {
    let mut fx = fixture(MemorySource::new().with_file("empty.py", ""));

    for name in ["missing.py", "empty.py"] {
        let err = fx.launcher.run_file(name).unwrap_err();
        assert!(err.is_resolution(), "{} should be a resolution failure", name);
        assert!(matches!(err, LaunchError::NotFound { .. }));
        assert!(!fx.launcher.has_pending_error());
        assert_eq!(fx.launcher.get_error(), "");
    }
    assert!(fx.reporter.take_reports().is_empty());
}

#[test]
fn test_carriage_returns_do_not_change_behavior() {
    let source = MemorySource::new()
        .with_file("crlf_ok.py", "crlf_total = 1\r\ncrlf_total += 2\r\n")
        .with_file("crlf_bad.py", "a\r\n=\r\n1\r\n")
        .with_file("lf_bad.py", "a\n=\n1\n");
    let mut fx = fixture(source);

    fx.launcher.run_file("crlf_ok.py").unwrap();
    fx.launcher.run_line("assert crlf_total == 3").unwrap();

    // Same program with and without CRs: both rejected the same way
    assert!(fx.launcher.run_file("crlf_bad.py").is_err());
    let from_crlf = fx.launcher.get_error().replace("crlf_bad.py", "<label>");
    assert!(fx.launcher.run_file("lf_bad.py").is_err());
    let from_lf = fx.launcher.get_error().replace("lf_bad.py", "<label>");
    assert!(!from_crlf.is_empty());
    assert_eq!(from_crlf, from_lf);

    assert!(fx.launcher.run_memory_text_file("mem.py", b"a\r\n=\r\n1\r\n").is_err());
    let from_memory = fx.launcher.get_error().replace("mem.py", "<label>");
    assert_eq!(from_memory, from_lf);
}

#[test]
fn test_memory_text_may_contain_triple_quotes() {
    let mut fx = fixture(MemorySource::new());
    let text = b"quoted = '''a'''\r\nquoted_too = \"\"\"b\"\"\"\r\n";

    fx.launcher.run_memory_text_file("quotes.py", text).unwrap();
    fx.launcher.run_line("assert quoted + quoted_too == 'ab'").unwrap();
}

#[test]
fn test_runtime_error_reports_traceback() {
    let mut fx = fixture(MemorySource::new());
    let script = b"def explode():\n    raise KeyError('lost')\nexplode()\n";

    let err = fx.launcher.run_memory_text_file("boom.py", script).unwrap_err();
    let LaunchError::Script { traceback } = err else {
        panic!("expected a script failure");
    };

    assert!(traceback.contains("Traceback (most recent call last)"));
    assert!(traceback.contains("File \"boom.py\", line 2, in explode"));
    assert!(traceback.trim_end().ends_with("KeyError: 'lost'"));
    assert_eq!(fx.reporter.last_report(), Some(traceback));
    assert_eq!(fx.launcher.get_error(), "'lost'");
}

#[test]
fn test_traceback_falls_back_to_summary_without_formatter() {
    let mut fx = fixture(MemorySource::new());
    fx.launcher
        .run_line("import sys, traceback\nsaved_traceback = traceback\nsys.modules['traceback'] = None")
        .unwrap();

    let err = fx.launcher.run_line("raise ValueError('fallback me')").unwrap_err();
    fx.launcher.run_line("sys.modules['traceback'] = saved_traceback").unwrap();

    let LaunchError::Script { traceback } = err else {
        panic!("expected a script failure");
    };
    assert!(!traceback.contains("Traceback (most recent call last)"));
    assert!(traceback.trim_end().ends_with("ValueError: fallback me"));
    assert_eq!(fx.reporter.take_traces(), vec!["fallback me".to_string()]);
    assert_eq!(fx.reporter.last_report(), Some(traceback));
}

#[test]
fn test_oversized_trace_capacity_from_config() {
    let config = LauncherConfig::parse("trace_calls = true\ntrace_capacity = 9223372036854775807\n").unwrap();
    let mut fx = fixture_with(MemorySource::new(), config);

    assert_eq!(fx.launcher.trace_buffer().lock().capacity(), 9_223_372_036_854_775_807);
    fx.launcher
        .run_line("def roomy():\n    return 1\nroomy_result = roomy()")
        .unwrap();
    assert_eq!(fx.launcher.trace_depth(), 0);
}

#[test]
fn test_compile_error_reported_like_runtime_error() {
    let mut fx = fixture(MemorySource::new().with_file("broken.py", "def (:\n"));

    let err = fx.launcher.run_file("broken.py").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
    assert!(err.to_string().contains("SyntaxError"));
    assert_eq!(fx.reporter.take_reports().len(), 1);
    assert!(!fx.launcher.get_error().is_empty());
}

#[test]
fn test_shadow_stack_lines_lead_the_report() {
    let mut fx = fixture(MemorySource::new());
    let script = b"def shadow_fail():\n    raise RuntimeError('deep')\nshadow_fail()\n";

    fx.launcher.run_line("shadow_ok = [n for n in range(3)]").unwrap();
    assert_eq!(fx.launcher.trace_depth(), 0);

    let err = fx.launcher.run_memory_text_file("shadow.py", script).unwrap_err();
    let traceback = match err {
        LaunchError::Script { traceback } => traceback,
        other => panic!("unexpected {:?}", other),
    };

    assert!(traceback.starts_with("Call: File \"shadow.py\""));
    assert!(traceback.contains("in shadow_fail"));
    assert!(fx.launcher.trace_lines().iter().any(|line| line.contains("in shadow_fail")));
}

#[test]
fn test_report_error_without_failure_uses_placeholder() {
    let mut fx = fixture_with(MemorySource::new(), LauncherConfig::default().with_trace_calls(false));
    fx.launcher.run_line("quiet = 1").unwrap();

    let text = fx.launcher.report_error();
    assert_eq!(text, pylauncher::diagnostics::NO_PENDING_ERROR);
    assert_eq!(fx.reporter.last_report().as_deref(), Some(text.as_str()));
}

#[derive(Clone, Default)]
struct CountingHook {
    calls: Arc<AtomicUsize>,
    returns: Arc<AtomicUsize>,
    functions: Arc<Mutex<Vec<String>>>,
}

impl TraceHook for CountingHook {
    fn on_call(&mut self, frame: &FrameInfo) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.functions.lock().push(frame.function.clone());
    }

    fn on_return(&mut self) {
        self.returns.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_custom_trace_hook_overrides_default() {
    let mut fx = fixture(MemorySource::new());
    let hook = CountingHook::default();

    fx.launcher.set_trace_hook(hook.clone()).unwrap();
    fx.launcher
        .run_line("def traced_target():\n    return 1\ntraced_target()\n")
        .unwrap();

    assert!(hook.calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(hook.calls.load(Ordering::SeqCst), hook.returns.load(Ordering::SeqCst));
    assert!(hook.functions.lock().iter().any(|name| name == "traced_target"));
    // The shadow stack no longer receives events
    assert_eq!(fx.launcher.trace_depth(), 0);

    fx.launcher.clear_trace_hook();
    let seen = hook.calls.load(Ordering::SeqCst);
    fx.launcher.run_line("traced_target()").unwrap();
    assert_eq!(hook.calls.load(Ordering::SeqCst), seen);
}

#[test]
fn test_host_module_importable() {
    let mut fx = fixture(MemorySource::new());

    fx.launcher
        .run_line("import host\nhost.log(2, 'hello from script')\nhost_version = host.version()")
        .unwrap();
    fx.launcher
        .run_line(&format!("assert host_version == '{}'", env!("CARGO_PKG_VERSION")))
        .unwrap();

    assert!(fx.launcher.run_line("host.log('loud', 'x')").is_err());
    assert!(fx.launcher.get_error().contains("argument 0"));
}

const STDOUT_SINK: &str = "import sys
class RoundTripSink:
    def __init__(self):
        self.parts = []
    def write(self, text):
        self.parts.append(text)
    def flush(self):
        pass
rt_saved = sys.stdout
rt_results = []
";

/// Run `call` with `sys.stdout` captured into `rt_results`.
fn run_captured(launcher: &mut Launcher, call: impl FnOnce(&mut Launcher) -> pylauncher::Result<()>) {
    launcher.run_line("rt_sink = RoundTripSink(); sys.stdout = rt_sink").unwrap();
    let result = call(launcher);
    launcher
        .run_line("sys.stdout = rt_saved; rt_results.append(''.join(rt_sink.parts))")
        .unwrap();
    result.unwrap();
}

#[test]
fn test_round_trip_through_container() {
    let mut fx = fixture(MemorySource::new());
    fx.launcher.run_line(STDOUT_SINK).unwrap();

    run_captured(&mut fx.launcher, |launcher| {
        launcher.run_memory_text_file("roundtrip.py", b"print(1)")
    });

    let container = fx.launcher.compile_to_container("roundtrip.py", b"print(1)").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.pyc");
    fs::write(&path, &container).unwrap();

    run_captured(&mut fx.launcher, |launcher| launcher.run_compiled_file(&path));

    fx.launcher
        .run_line("assert rt_results == ['1\\n', '1\\n'], rt_results")
        .unwrap();
}

#[test]
fn test_wrong_magic_always_rejected() {
    let fx = RefCell::new(fixture(MemorySource::new()));
    let magic = Python::with_gil(current_magic);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.pyc");

    let strategy = (
        any::<u32>().prop_filter("foreign magic", move |m| *m != magic),
        proptest::collection::vec(any::<u8>(), 0..96),
    );

    let mut runner = TestRunner::new(ProptestConfig::with_cases(64));
    runner
        .run(&strategy, |(foreign, rest)| {
            let mut data = foreign.to_le_bytes().to_vec();
            data.extend_from_slice(&rest);
            fs::write(&path, &data).unwrap();

            let mut fx = fx.borrow_mut();
            let err = fx.launcher.run_compiled_file(&path).unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::Format);
            prop_assert!(fx.launcher.pending_error_is::<PyRuntimeError>());
            prop_assert_eq!(fx.launcher.get_error(), "Bad magic number in compiled file");
            Ok(())
        })
        .unwrap();

    // Format failures are not reported automatically
    assert!(fx.borrow().reporter.take_reports().is_empty());
}

#[test]
fn test_truncated_and_unreadable_containers() {
    let mut fx = fixture(MemorySource::new());
    let magic = Python::with_gil(current_magic);
    let dir = tempfile::tempdir().unwrap();

    let short = dir.path().join("short.pyc");
    let mut data = magic.to_le_bytes().to_vec();
    data.extend_from_slice(&[0u8; HEADER_LEN - 8]);
    fs::write(&short, &data).unwrap();

    let err = fx.launcher.run_compiled_file(&short).unwrap_err();
    assert!(matches!(err, LaunchError::Format { ref message } if message == TRUNCATED_HEADER));
    assert_eq!(fx.launcher.get_error(), TRUNCATED_HEADER);

    let err = fx.launcher.run_compiled_file(dir.path().join("absent.pyc")).unwrap_err();
    assert!(matches!(err, LaunchError::Unreadable { .. }));
    assert!(!fx.launcher.has_pending_error());
}

#[test]
fn test_lifecycle_misuse() {
    let _serial = SERIAL.lock();

    let mut launcher = Launcher::builder().build().unwrap();
    assert_eq!(launcher.state(), LauncherState::Initialized);
    assert!(matches!(launcher.run_line("x = 1"), Err(LaunchError::NotReady)));
    assert!(matches!(launcher.run_file("main.py"), Err(LaunchError::NotReady)));

    assert!(matches!(Launcher::builder().build(), Err(LaunchError::AlreadyRunning)));

    launcher.create().unwrap();
    assert!(matches!(launcher.create(), Err(LaunchError::AlreadyCreated)));
    drop(launcher);

    let again = Launcher::builder().build();
    assert!(again.is_ok());
}
