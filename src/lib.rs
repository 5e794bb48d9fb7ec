// Core modules
pub mod args;
pub mod capi;
pub mod compat;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ffi;
pub mod launcher;
pub mod logging;

// Re-export commonly used items
pub use args::{bad_argument, build_exception, build_none, ArgTuple};
pub use config::LauncherConfig;
pub use diagnostics::{BufferedReporter, FrameInfo, LogReporter, Reporter, TraceBuffer, TraceHook};
pub use error::{ConfigError, ErrorKind, LaunchError, Result};
pub use launcher::{
    DirectorySource, Launcher, LauncherBuilder, LauncherState, MemorySource, NativeModule,
    PackSource,
};
pub use logging::{init_dev_logging, init_logging, init_prod_logging, LogConfig, LogFormat, LogOutput};
