use crate::net::support::NetResult;
use serde_json::{Map, Value};
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

/// A received message. The variant mirrors the wire tag the peer chose;
/// consumers pattern-match on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Bytes(Vec<u8>),
    Text(String),
    /// An in-memory file (complete transfer, or a chunked transfer
    /// received without autosave).
    File(FileData),
    /// A chunked transfer that was streamed straight to disk; carries no
    /// content, only the name and size of what was written.
    SavedFile(FileRef),
    Object(Map<String, Value>),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileData {
    pub name: String,
    pub size: u64,
    pub data: Vec<u8>,
}

impl FileData {
    /// Writes the content to the given path.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> NetResult<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(OsStr::to_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        let file = FileData {
            name: "archive.tar.gz".to_string(),
            size: 0,
            data: Vec::new(),
        };

        assert_eq!(file.extension(), Some("gz"));
    }

    #[test]
    fn test_extension_missing() {
        let file = FileData {
            name: "README".to_string(),
            size: 0,
            data: Vec::new(),
        };

        assert_eq!(file.extension(), None);
    }

    #[test]
    fn test_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");

        let file = FileData {
            name: "blob.bin".to_string(),
            size: 4,
            data: vec![1, 2, 3, 4],
        };
        file.save(&path).unwrap();

        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
    }
}
