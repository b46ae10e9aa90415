// Copyright 2020 Martin Pool.

//! Filesystem abstraction used by the block store to create, rename,
//! inspect and delete block files.
//!
//! Operations return `std::io::Result` to reflect their narrow focus; the
//! store converts them to [`crate::Error::IOError`] at its boundary.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Abstracted filesystem IO used to access block directories.
///
/// All implementations must be `Send + Sync` so they can be shared across
/// the threads serving concurrent sessions.
pub trait FileOps: Send + Sync + Debug {
    /// True if a file exists at `path`.
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Delete the file at `path`.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Rename (move) `src` to `dst`. Must be atomic within a single
    /// filesystem; `dst`'s parent directory must already exist.
    fn rename(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Size in bytes of the file at `path`.
    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Open a writer that appends bytes to `path`, creating parent
    /// directories and the file itself if necessary.
    fn create_writer(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Create a directory, and any missing parents, if it does not exist.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// List the immediate entries of a directory. Returns an empty vec if
    /// the directory does not exist.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation of [`FileOps`].
#[derive(Debug, Clone)]
pub struct LocalFileOps;

impl LocalFileOps {
    pub fn new() -> Self {
        LocalFileOps
    }
}

impl Default for LocalFileOps {
    fn default() -> Self {
        Self::new()
    }
}

impl FileOps for LocalFileOps {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(path.exists())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn create_writer(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Box::new(file))
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(path)? {
            out.push(entry?.path());
        }
        Ok(out)
    }
}

/// In-memory [`FileOps`] implementation, used for fast unit tests that don't
/// need to exercise a real filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemFileOps {
    files: Arc<Mutex<BTreeMap<PathBuf, Vec<u8>>>>,
}

impl MemFileOps {
    pub fn new() -> Self {
        MemFileOps::default()
    }
}

struct MemWriter {
    files: Arc<Mutex<BTreeMap<PathBuf, Vec<u8>>>>,
    path: PathBuf,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.files.lock().expect("lock file table");
        files.entry(self.path.clone()).or_default().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileOps for MemFileOps {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.lock().expect("lock file table").contains_key(path))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .expect("lock file table")
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let mut files = self.files.lock().expect("lock file table");
        let data = files
            .remove(src)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        files.insert(dst.to_path_buf(), data);
        Ok(())
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .lock()
            .expect("lock file table")
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn create_writer(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        self.files
            .lock()
            .expect("lock file table")
            .entry(path.to_path_buf())
            .or_default();
        Ok(Box::new(MemWriter {
            files: self.files.clone(),
            path: path.to_path_buf(),
        }))
    }

    fn create_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .lock()
            .expect("lock file table")
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_file_ops_roundtrip() {
        let fops = MemFileOps::new();
        let path = PathBuf::from("/a/b");
        assert!(!fops.exists(&path).unwrap());
        let mut w = fops.create_writer(&path).unwrap();
        w.write_all(b"hello").unwrap();
        drop(w);
        assert!(fops.exists(&path).unwrap());
        assert_eq!(fops.size(&path).unwrap(), 5);

        let dst = PathBuf::from("/a/c");
        fops.rename(&path, &dst).unwrap();
        assert!(!fops.exists(&path).unwrap());
        assert!(fops.exists(&dst).unwrap());

        fops.delete(&dst).unwrap();
        assert!(!fops.exists(&dst).unwrap());
    }
}
