//! Filesystem and archiver capabilities of a single store root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use walkdir::WalkDir;

use crate::error::{Result, StoreError};

/// Builds one archive out of an explicit list of files.
pub trait Archiver: Send + Sync {
    fn archive(&self, base: &Path, sources: &[PathBuf], dest: &Path) -> io::Result<()>;
}

/// Plain (uncompressed) tar archives. Entry names are relative to `base`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarArchiver;

impl Archiver for TarArchiver {
    fn archive(&self, base: &Path, sources: &[PathBuf], dest: &Path) -> io::Result<()> {
        let file = fs::File::create(dest)?;
        let mut builder = tar::Builder::new(file);
        for source in sources {
            let name = source.strip_prefix(base).unwrap_or(source);
            builder.append_path_with_name(source, name)?;
        }
        builder.into_inner()?.sync_all()
    }
}

/// Files of one extension kept under `root`.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
    extension: String,
    archiver: Arc<dyn Archiver>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("root", &self.root)
            .field("extension", &self.extension)
            .finish()
    }
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            archiver: Arc::new(TarArchiver),
        }
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn owns(&self, name: &str) -> bool {
        name.ends_with(&self.extension)
    }

    /// Joins a client supplied path onto the root. Leading slashes are
    /// ignored; `..` components are refused.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative.trim_start_matches('/'));
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(StoreError::io(
                relative,
                io::Error::new(io::ErrorKind::InvalidInput, "path leaves the store root"),
            ));
        }
        Ok(self.root.join(relative))
    }

    /// Creates `relative` (and every missing parent) under the root.
    pub async fn ensure_directory(&self, relative: &str) -> Result<PathBuf> {
        let dir = self.resolve(relative)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    /// Opens `dir/<basename of name>` for writing, truncating any previous
    /// content.
    pub async fn create_file(&self, dir: &str, name: &str) -> Result<(PathBuf, File)> {
        let file_name = Path::new(name).file_name().ok_or_else(|| {
            StoreError::io(
                name,
                io::Error::new(io::ErrorKind::InvalidInput, "missing file name"),
            )
        })?;
        let path = self.ensure_directory(dir).await?.join(file_name);
        let file = File::create(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok((path, file))
    }

    pub async fn open_file(&self, relative: &str) -> Result<File> {
        let path = self.resolve(relative)?;
        File::open(&path).await.map_err(|e| StoreError::io(&path, e))
    }

    pub async fn remove_file(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Sorted basenames of the regular files directly inside `relative` that
    /// carry this store's extension. A missing directory lists as empty.
    pub async fn list_basenames(&self, relative: &str) -> Result<Vec<String>> {
        let dir = self.resolve(relative)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.owns(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Where [`LocalStore::archive`] writes its output.
    pub fn archive_path(&self) -> PathBuf {
        let stem = self.extension.trim_start_matches('.');
        self.root.join(format!("{}_list.tar", stem))
    }

    /// Archives every file of this store's extension found anywhere under the
    /// root, returning the archive location.
    pub async fn archive(&self) -> Result<PathBuf> {
        let root = self.root.clone();
        let dest = self.archive_path();
        let extension = self.extension.clone();
        let archiver = Arc::clone(&self.archiver);

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;

        let task_dest = dest.clone();
        let count = tokio::task::spawn_blocking(move || -> io::Result<usize> {
            let sources: Vec<PathBuf> = WalkDir::new(&root)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.ends_with(&extension))
                })
                .map(|entry| entry.into_path())
                .filter(|path| *path != task_dest)
                .collect();
            archiver.archive(&root, &sources, &task_dest)?;
            Ok(sources.len())
        })
        .await
        .map_err(|e| StoreError::io(&dest, io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(|e| StoreError::io(&dest, e))?;

        tracing::debug!(archive = %dest.display(), files = count, "archive written");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalStore {
        LocalStore::new(dir.path(), ".txt")
    }

    #[test]
    fn resolve_stays_inside_the_root() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(
            store.resolve("/notes/a.txt").unwrap(),
            dir.path().join("notes/a.txt")
        );
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("notes/../../x.txt").is_err());
    }

    #[tokio::test]
    async fn create_file_builds_missing_directories() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (path, _file) = store.create_file("a/b/c", "/tmp/x.txt").await.unwrap();
        assert_eq!(path, dir.path().join("a/b/c/x.txt"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn listing_is_one_level_and_filtered() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(dir.path().join("docs/deeper")).unwrap();
        fs::write(dir.path().join("docs/b.txt"), b"b").unwrap();
        fs::write(dir.path().join("docs/a.txt"), b"a").unwrap();
        fs::write(dir.path().join("docs/c.pdf"), b"c").unwrap();
        fs::write(dir.path().join("docs/deeper/d.txt"), b"d").unwrap();

        let names = store.list_basenames("docs").await.unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert!(store.list_basenames("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_of_absent_file_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.remove_file("ghost.txt").await,
            Err(StoreError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn archive_collects_matching_files_recursively() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(dir.path().join("x/y")).unwrap();
        fs::write(dir.path().join("top.txt"), b"1").unwrap();
        fs::write(dir.path().join("x/y/deep.txt"), b"2").unwrap();
        fs::write(dir.path().join("x/skip.pdf"), b"3").unwrap();

        let path = store.archive().await.unwrap();
        assert_eq!(path, dir.path().join("txt_list.tar"));

        let mut archive = tar::Archive::new(fs::File::open(&path).unwrap());
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["top.txt".to_string(), "x/y/deep.txt".to_string()]);
    }
}
