//! Script sources: the packed-filesystem collaborator and source
//! normalization

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves a logical script name to its bytes.
///
/// An empty buffer means "not found"; nothing else distinguishes the two.
pub trait PackSource {
    fn resolve(&self, name: &str) -> Vec<u8>;
}

/// Plain directory tree standing in for the packed archive.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PackSource for DirectorySource {
    fn resolve(&self, name: &str) -> Vec<u8> {
        let path = self.root.join(name);
        match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Script not resolved");
                Vec::new()
            }
        }
    }
}

/// In-memory archive keyed by logical name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }

    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }
}

impl PackSource for MemorySource {
    fn resolve(&self, name: &str) -> Vec<u8> {
        self.files.get(name).cloned().unwrap_or_default()
    }
}

/// Drop every carriage-return byte; stored scripts may use CRLF endings.
pub fn strip_carriage_returns(data: &[u8]) -> Vec<u8> {
    data.iter().copied().filter(|&byte| byte != b'\r').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_crlf() {
        assert_eq!(strip_carriage_returns(b"a\r\n=\r\n1\r\n"), b"a\n=\n1\n");
        assert_eq!(strip_carriage_returns(b"\r\r"), b"");
    }

    #[test]
    fn test_memory_source_missing_is_empty() {
        let source = MemorySource::new().with_file("main.py", "x = 1\n");
        assert_eq!(source.resolve("main.py"), b"x = 1\n");
        assert!(source.resolve("other.py").is_empty());
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ui")).unwrap();
        fs::write(dir.path().join("ui/intro.py"), b"print('hi')\r\n").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.resolve("ui/intro.py"), b"print('hi')\r\n");
        assert!(source.resolve("ui/missing.py").is_empty());
    }

    proptest! {
        #[test]
        fn prop_strip_removes_only_cr(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let stripped = strip_carriage_returns(&data);
            prop_assert!(!stripped.contains(&b'\r'));
            let expected: Vec<u8> = data.iter().copied().filter(|b| *b != 13).collect();
            prop_assert_eq!(&stripped, &expected);
            prop_assert_eq!(strip_carriage_returns(&stripped), stripped);
        }
    }
}
