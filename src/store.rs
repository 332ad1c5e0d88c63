//! Source store (C1): read file bytes, report content identity, and write
//! atomically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{PipelineError, Result};

/// Content hash over a byte slice. Collision-resistant; not cryptographically
/// audited here, only used as a cache/identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        ContentHash(*blake3::hash(bytes).as_bytes())
    }

    pub fn to_hex(self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

/// The outcome of reading a file: its bytes plus content identity.
pub struct ReadFile {
    pub bytes: Vec<u8>,
    pub content_hash: ContentHash,
    pub mtime_ns: u128,
}

/// Read `file`, computing its content hash and modification time.
#[tracing::instrument(skip_all, fields(path = %file.display()))]
pub fn read(file: &Path) -> Result<ReadFile> {
    let bytes = fs::read(file).map_err(|source| PipelineError::SourceIo {
        path: file.to_path_buf(),
        source,
    })?;
    let metadata = fs::metadata(file).map_err(|source| PipelineError::SourceIo {
        path: file.to_path_buf(),
        source,
    })?;
    let mtime_ns = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let content_hash = ContentHash::of(&bytes);
    Ok(ReadFile {
        bytes,
        content_hash,
        mtime_ns,
    })
}

/// Write `bytes` to `file` by writing a sibling temporary file and renaming
/// it in place. On rename failure the original file is left untouched.
#[tracing::instrument(skip(bytes), fields(path = %file.display()))]
pub fn write_atomic(file: &Path, bytes: &[u8]) -> Result<()> {
    let dir = file.parent().unwrap_or_else(|| Path::new("."));
    let tmp_name = format!(
        ".{}.docxref-tmp",
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    );
    let tmp_path: PathBuf = dir.join(tmp_name);

    let write_result = (|| -> std::io::Result<()> {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp_path, file)?;
        Ok(())
    })();

    write_result.map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        PipelineError::SourceIo {
            path: file.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_reports_stable_content_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, b"x = 1\n").unwrap();
        let first = read(&path).unwrap();
        let second = read(&path).unwrap();
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, b"old\n").unwrap();
        write_atomic(&path, b"new\n").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new\n");
    }

    #[test]
    fn write_atomic_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        write_atomic(&path, b"hello\n").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("docxref-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
