use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::paths::PathBuilder;
use crate::error::{Error, Result};

/// Primitive filesystem operations. Every path is checked against the
/// storage roots before the filesystem is touched.
///
/// Operations are blocking; async callers run them on the blocking pool.
#[derive(Debug, Clone)]
pub struct StorageEngine {
    paths: PathBuilder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub executable: bool,
}

impl StorageEngine {
    pub fn new(paths: PathBuilder) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathBuilder {
        &self.paths
    }

    fn check(&self, path: &Path) -> Result<()> {
        self.paths.ensure_contained(path)
    }

    pub fn make_dir(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        fs::create_dir_all(path)?;
        Ok(())
    }

    pub fn file_exists(&self, path: &Path) -> Result<bool> {
        self.check(path)?;
        Ok(path.is_file())
    }

    pub fn dir_exists(&self, path: &Path) -> Result<bool> {
        self.check(path)?;
        Ok(path.is_dir())
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.check(path)?;
        fs::read(path).map_err(not_found_or_io)
    }

    pub fn read_to_string(&self, path: &Path) -> Result<String> {
        self.check(path)?;
        fs::read_to_string(path).map_err(not_found_or_io)
    }

    /// Atomically replace `path` with `data`: write a sibling temp file,
    /// fsync it, then rename over the destination.
    pub fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.check(path)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidPath(format!("'{}' has no parent", path.display())))?;
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidPath(format!("'{}' has no file name", path.display())))?;
        let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let result = (|| -> std::io::Result<()> {
            let mut temp_file = File::create(&temp_path)?;
            temp_file.write_all(data)?;
            temp_file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Returns false when the file did not exist.
    pub fn delete_file(&self, path: &Path) -> Result<bool> {
        self.check(path)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Recursively delete a directory. Returns false when it did not exist.
    pub fn delete_dir(&self, path: &Path) -> Result<bool> {
        self.check(path)?;
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Remove `path` and then any parents left empty, stopping at `stop_at`.
    pub fn prune_empty_parents(&self, path: &Path, stop_at: &Path) -> Result<()> {
        self.check(path)?;
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == stop_at || !dir.starts_with(stop_at) {
                break;
            }
            match fs::remove_dir(dir) {
                Ok(()) => current = dir.parent(),
                Err(_) => break,
            }
        }
        Ok(())
    }

    pub fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        self.check(src)?;
        self.check(dst)?;
        let data = fs::read(src).map_err(not_found_or_io)?;
        self.write_file(dst, &data)
    }

    /// Move a file, falling back to copy + delete across filesystems.
    pub fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        self.check(src)?;
        self.check(dst)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound),
            Err(_) => {
                self.copy_file(src, dst)?;
                fs::remove_file(src)?;
                Ok(())
            }
        }
    }

    /// Rename a directory tree. The destination must not exist.
    pub fn move_dir(&self, src: &Path, dst: &Path) -> Result<()> {
        self.check(src)?;
        self.check(dst)?;
        if dst.exists() {
            return Err(Error::AlreadyExists);
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst).map_err(not_found_or_io)
    }

    /// Lists a directory, sorted by name. A missing directory lists empty.
    pub fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        self.check(path)?;
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut listed = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            listed.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
                executable: is_executable(&entry.metadata()?),
            });
        }
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    /// Open a file for async streaming.
    pub async fn open_read(&self, path: &Path) -> Result<(tokio::fs::File, u64)> {
        self.check(path)?;
        let file = tokio::fs::File::open(path).await.map_err(not_found_or_io)?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

fn not_found_or_io(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(temp: &TempDir) -> StorageEngine {
        StorageEngine::new(PathBuilder::new(
            temp.path().join("data"),
            temp.path().join("data/tmp"),
        ))
    }

    #[test]
    fn test_write_read_delete() {
        let temp = TempDir::new().unwrap();
        let storage = engine(&temp);
        let path = temp.path().join("data/modules/acme/vpc/aws/1.0.0/source.zip");

        storage.write_file(&path, b"archive").unwrap();
        assert!(storage.file_exists(&path).unwrap());
        assert!(!storage.dir_exists(&path).unwrap());
        assert!(storage.dir_exists(path.parent().unwrap()).unwrap());
        assert_eq!(storage.read_file(&path).unwrap(), b"archive");

        storage.write_file(&path, b"replaced").unwrap();
        assert_eq!(storage.read_to_string(&path).unwrap(), "replaced");

        let leftovers: Vec<_> = storage
            .list_dir(path.parent().unwrap())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(leftovers, ["source.zip"]);

        assert!(storage.delete_file(&path).unwrap());
        assert!(!storage.delete_file(&path).unwrap());
        assert!(matches!(storage.read_file(&path), Err(Error::NotFound)));
    }

    #[test]
    fn test_traversal_never_touches_filesystem() {
        let temp = TempDir::new().unwrap();
        let storage = engine(&temp);
        let outside = temp.path().join("data/../outside.txt");

        assert!(matches!(
            storage.write_file(&outside, b"x"),
            Err(Error::PathTraversal(_))
        ));
        assert!(!temp.path().join("outside.txt").exists());
        assert!(matches!(
            storage.read_file(Path::new("/etc/passwd")),
            Err(Error::PathTraversal(_))
        ));
    }

    #[test]
    fn test_move_and_copy() {
        let temp = TempDir::new().unwrap();
        let storage = engine(&temp);
        let src = temp.path().join("data/upload/a/b/c/1.0.0/source.zip");
        let dst = temp.path().join("data/modules/a/b/c/1.0.0/source.zip");
        let copy = temp.path().join("data/tmp/copy.zip");

        storage.write_file(&src, b"zip").unwrap();
        storage.copy_file(&src, &copy).unwrap();
        storage.move_file(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(storage.read_file(&dst).unwrap(), b"zip");
        assert_eq!(storage.read_file(&copy).unwrap(), b"zip");
        assert!(matches!(storage.move_file(&src, &dst), Err(Error::NotFound)));
    }

    #[test]
    fn test_delete_dir_and_prune() {
        let temp = TempDir::new().unwrap();
        let storage = engine(&temp);
        let root = temp.path().join("data/modules");
        let version_dir = root.join("a/b/c/1.0.0");
        storage.write_file(&version_dir.join("source.zip"), b"z").unwrap();

        assert!(storage.delete_dir(&version_dir).unwrap());
        storage.prune_empty_parents(&version_dir, &root).unwrap();
        assert!(!root.join("a").exists());
        assert!(root.exists());
        assert!(!storage.delete_dir(&version_dir).unwrap());
    }

    #[test]
    fn test_move_dir_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        let storage = engine(&temp);
        let src = temp.path().join("data/modules/old");
        let dst = temp.path().join("data/modules/new");
        storage.make_dir(&src).unwrap();
        storage.make_dir(&dst).unwrap();
        assert!(matches!(storage.move_dir(&src, &dst), Err(Error::AlreadyExists)));

        storage.delete_dir(&dst).unwrap();
        storage.move_dir(&src, &dst).unwrap();
        assert!(dst.is_dir());
    }
}
