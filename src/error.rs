use std::fmt;
use std::io;
use std::path::PathBuf;

/// Broad classification of a launcher failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Launcher used out of order, or a second instance requested
    Lifecycle,
    /// Source or bytecode could not be located; nothing ran
    Resolution,
    /// Bytecode container rejected before any code ran
    Format,
    /// Compile or runtime failure inside the interpreter
    Script,
}

#[derive(Debug)]
pub enum LaunchError {
    AlreadyRunning,
    Finalized,
    Registration { module: String },
    NotReady,
    AlreadyCreated,
    Bootstrap { step: String },
    NotFound { name: String },
    Unreadable { path: PathBuf, source: io::Error },
    Format { message: String },
    Script { traceback: String },
}

impl LaunchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning
            | Self::Finalized
            | Self::Registration { .. }
            | Self::NotReady
            | Self::AlreadyCreated
            | Self::Bootstrap { .. } => ErrorKind::Lifecycle,
            Self::NotFound { .. } | Self::Unreadable { .. } => ErrorKind::Resolution,
            Self::Format { .. } => ErrorKind::Format,
            Self::Script { .. } => ErrorKind::Script,
        }
    }

    /// True when the failure happened before the interpreter saw any code.
    pub fn is_resolution(&self) -> bool {
        self.kind() == ErrorKind::Resolution
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "A launcher is already live in this process"),
            Self::Finalized => write!(f, "The interpreter has been finalized in this process"),
            Self::Registration { module } => {
                write!(f, "Failed to register native module '{}'", module)
            }
            Self::NotReady => write!(f, "Launcher is not ready: call create() first"),
            Self::AlreadyCreated => write!(f, "Launcher namespace is already bound"),
            Self::Bootstrap { step } => write!(f, "Bootstrap failed at: {}", step),
            Self::NotFound { name } => write!(f, "Script not found: {}", name),
            Self::Unreadable { path, source } => {
                write!(f, "Cannot open {}: {}", path.display(), source)
            }
            Self::Format { message } => write!(f, "Rejected compiled file: {}", message),
            Self::Script { traceback } => write!(f, "Script failed:\n{}", traceback),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreadable { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub path: Option<PathBuf>,
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { path: None, message: message.into() }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}
