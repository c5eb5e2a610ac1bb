//! Atomic file creation, append, and cleanup (§4.2, C2).

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

use crate::error::SinkError;

/// An open, append-only handle to a freshly created audio file.
pub struct Handle {
    file: File,
    path: PathBuf,
}

impl Handle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates every missing directory component of `path` (mode 0755), then
/// opens the leaf with create-new-exclusive semantics (mode 0664).
///
/// Retries on `ErrorKind::Interrupted`, matching the EINTR-retry requirement
/// for `open`/`fdopen` in §4.2.
pub fn open_new(path: &Path) -> Result<Handle, SinkError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            mkdir_p(parent)?;
        }
    }

    let file = retry_on_interrupt(|| {
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(0o664);
        opts.open(path)
    })
    .map_err(|e| {
        if e.kind() == ErrorKind::AlreadyExists {
            SinkError::AlreadyExists(path.to_path_buf())
        } else {
            SinkError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    Ok(Handle {
        file,
        path: path.to_path_buf(),
    })
}

fn mkdir_p(dir: &Path) -> Result<(), SinkError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    retry_on_interrupt(|| builder.create(dir)).map_err(|e| SinkError::Io {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Writes all bytes to the sink. A short write is treated as fatal (the
/// caller wraps the underlying `io::Error`).
pub fn append(handle: &mut Handle, bytes: &[u8]) -> Result<(), SinkError> {
    handle.file.write_all(bytes).map_err(|e| SinkError::Io {
        path: handle.path.clone(),
        source: e,
    })
}

/// Flushes and releases the handle.
pub fn close(mut handle: Handle) -> Result<(), SinkError> {
    handle.file.flush().map_err(|e| SinkError::Io {
        path: handle.path.clone(),
        source: e,
    })
}

/// Unlinks `path`, then walks upward removing each now-empty directory until
/// one is non-empty, does not exist, or would be at/above `root`.
///
/// Errors other than "directory not empty" or "does not exist" are fatal.
/// Never ascends to or above `root` (§4.2, testable property "Cleanup bounds").
pub fn delete_with_empty_parents(path: &Path, root: &Path) -> Result<(), SinkError> {
    match retry_on_interrupt(|| fs::remove_file(path)) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(SinkError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }

    let root = canonical_or(root);
    let mut dir = path.parent().map(Path::to_path_buf);

    while let Some(current) = dir {
        if current.as_os_str().is_empty() {
            break;
        }
        let current_canonical = canonical_or(&current);
        if current_canonical == root || is_above_root(&current_canonical, &root) {
            return Ok(());
        }

        match retry_on_interrupt(|| fs::remove_dir(&current)) {
            Ok(()) => {
                dir = current.parent().map(Path::to_path_buf);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                dir = current.parent().map(Path::to_path_buf);
            }
            Err(e) if is_not_empty(&e) => return Ok(()),
            Err(e) => {
                return Err(SinkError::Io {
                    path: current,
                    source: e,
                })
            }
        }
    }

    Ok(())
}

/// `current` is "above" `root` if `root` is a descendant of (or equal to) `current`.
fn is_above_root(current: &Path, root: &Path) -> bool {
    root.starts_with(current)
}

fn canonical_or(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_not_empty(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc_enotempty())
}

#[cfg(target_os = "linux")]
fn libc_enotempty() -> i32 {
    39
}

#[cfg(not(target_os = "linux"))]
fn libc_enotempty() -> i32 {
    66
}

fn retry_on_interrupt<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn open_new_creates_parent_dirs_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a/b/c.mp3");
        let mut handle = open_new(&path).expect("should create");
        append(&mut handle, b"hello").unwrap();
        close(handle).unwrap();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn open_new_twice_reports_already_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("song.mp3");
        let first = open_new(&path).expect("first create should succeed");
        close(first).unwrap();

        match open_new(&path) {
            Err(SinkError::AlreadyExists(p)) => assert_eq!(p, path),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[test]
    fn delete_with_empty_parents_removes_file_and_empty_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let path = root.join("artist/album/track.mp3");
        let mut handle = open_new(&path).unwrap();
        append(&mut handle, b"x").unwrap();
        close(handle).unwrap();

        delete_with_empty_parents(&path, &root).unwrap();

        assert!(!path.exists());
        assert!(!root.join("artist/album").exists());
        assert!(!root.join("artist").exists());
        assert!(root.exists());
    }

    #[test]
    fn delete_with_empty_parents_stops_at_non_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let path = root.join("artist/album/track.mp3");
        let sibling = root.join("artist/album/other.mp3");
        let mut handle = open_new(&path).unwrap();
        append(&mut handle, b"x").unwrap();
        close(handle).unwrap();
        let mut sibling_handle = open_new(&sibling).unwrap();
        append(&mut sibling_handle, b"y").unwrap();
        close(sibling_handle).unwrap();

        delete_with_empty_parents(&path, &root).unwrap();

        assert!(!path.exists());
        assert!(sibling.exists());
        assert!(root.join("artist/album").exists());
    }

    #[test]
    fn delete_never_ascends_above_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("recroot");
        fs::create_dir_all(&root).unwrap();
        let path = root.join("track.mp3");
        let mut handle = open_new(&path).unwrap();
        append(&mut handle, b"x").unwrap();
        close(handle).unwrap();

        delete_with_empty_parents(&path, &root).unwrap();

        assert!(!path.exists());
        assert!(root.exists(), "root itself must never be removed");
        assert!(tmp.path().exists());
    }

    #[test]
    fn idempotent_abort_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let path = root.join("a/b.mp3");
        let mut handle = open_new(&path).unwrap();
        append(&mut handle, b"x").unwrap();
        close(handle).unwrap();

        delete_with_empty_parents(&path, &root).unwrap();
        // Second call: file and dir already gone, must be a no-op, not an error.
        delete_with_empty_parents(&path, &root).unwrap();
    }
}
