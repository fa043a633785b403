use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use super::StorageBackend;
use vger_types::error::{Result, VgerError};

/// Repository storage on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: &str) -> Result<Self> {
        let root = PathBuf::from(root);
        let root = match fs::canonicalize(&root) {
            Ok(real) => real,
            Err(_) => root,
        };
        Ok(Self { root })
    }

    /// Reject storage keys that could escape the repository root.
    fn validate_key(key: &str) -> Result<()> {
        let reason = if key.is_empty() {
            Some("empty")
        } else if key.starts_with('/') || key.starts_with('\\') {
            Some("absolute path")
        } else if key.contains('\\') {
            Some("contains backslash")
        } else if Path::new(key)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            Some("parent traversal")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(VgerError::InvalidFormat(format!(
                "unsafe storage key '{key}': {reason}"
            ))),
            None => Ok(()),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Temp file in the target directory, then rename into place.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Every regular file below `dir`, as `/`-separated keys.
    fn walk(&self, dir: PathBuf) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let kind = entry.file_type()?;
                if kind.is_dir() {
                    pending.push(entry.path());
                } else if kind.is_file() {
                    keys.extend(self.key_of(&entry.path()));
                }
            }
        }
        Ok(keys)
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel.iter().map(|p| p.to_string_lossy()).collect();
        Some(parts.join("/"))
    }
}

/// Maps `NotFound` to `absent`, propagating other I/O errors.
fn or_absent<T>(res: io::Result<T>, absent: T) -> Result<T> {
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(absent),
        other => Ok(other?),
    }
}

impl StorageBackend for LocalBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        or_absent(fs::read(self.resolve(key)?).map(Some), None)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        self.atomic_write(&path, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        or_absent(fs::remove_file(self.resolve(key)?), ())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        or_absent(fs::metadata(self.resolve(key)?).map(|m| m.is_file()), false)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = match prefix.trim_end_matches('/') {
            "" => self.root.clone(),
            sub => self.resolve(sub)?,
        };
        if or_absent(fs::metadata(&dir).map(|m| m.is_dir()), false)? {
            self.walk(dir)
        } else {
            Ok(Vec::new())
        }
    }

    fn create_dir(&self, key: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(key.trim_end_matches('/'))?)?;
        Ok(())
    }
}
