//! Import restriction runs in its own process: sealing the import system
//! lasts for the life of the interpreter.

use pylauncher::{BufferedReporter, ErrorKind, Launcher, LauncherConfig};

#[test]
fn test_only_builtin_frozen_and_preloaded_modules_import() {
    let reporter = BufferedReporter::new();
    let config = LauncherConfig::default()
        .with_trace_calls(false)
        .with_preload("json");

    let mut launcher = Launcher::builder()
        .with_config(config)
        .with_reporter(reporter.clone())
        .build()
        .unwrap();
    launcher.create().unwrap();

    // Built into the interpreter, frozen, from the native table, preloaded
    launcher.run_line("import marshal").unwrap();
    launcher.run_line("import os").unwrap();
    launcher.run_line("import host").unwrap();
    launcher.run_line("import json; assert json.loads('[1]') == [1]").unwrap();

    // Only reachable through the filesystem
    let err = launcher.run_line("import wave").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
    assert!(err.to_string().contains("ModuleNotFoundError"));
    assert!(launcher.get_error().contains("wave"));
    assert_eq!(reporter.take_reports().len(), 1);

    launcher
        .run_line("import sys; assert all(f.__name__ != 'PathFinder' for f in sys.meta_path)")
        .unwrap();
}
