use crate::error::{StorageError, StorageResult};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A closed or active batch file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub path: PathBuf,
    /// Creation time encoded in the file name (ms since UNIX epoch)
    pub created_at_ms: u64,
    pub size: u64,
}

/// Name of the batch file created at `created_at_ms`
pub fn batch_file_name(created_at_ms: u64) -> String {
    created_at_ms.to_string()
}

/// Creation time encoded in a batch file name
///
/// Anything that is not a plain decimal timestamp (temporary files, foreign files) is
/// not a batch file.
pub fn parse_batch_file_name(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// One buffer directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    path: PathBuf,
}

impl Directory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_path(&self, created_at_ms: u64) -> PathBuf {
        self.path.join(batch_file_name(created_at_ms))
    }

    pub async fn create(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.path)
            .await
            .map_err(|e| StorageError::io("Failed to create directory", &self.path, e))
    }

    /// Batch files, oldest first
    ///
    /// A directory that does not exist is empty.
    pub async fn files(&self) -> StorageResult<Vec<BatchFile>> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io("Failed to list directory", &self.path, e)),
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(StorageError::io("Failed to list directory", &self.path, e))
                }
            };

            let Some(created_at_ms) = entry.file_name().to_str().and_then(parse_batch_file_name)
            else {
                continue;
            };

            // Deleted between listing and stat
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::io("Failed to stat batch file", entry.path(), e))
                }
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(BatchFile {
                path: entry.path(),
                created_at_ms,
                size: metadata.len(),
            });
        }

        files.sort_by_key(|f| f.created_at_ms);
        Ok(files)
    }

    pub async fn total_size(&self) -> StorageResult<u64> {
        Ok(self.files().await?.iter().map(|f| f.size).sum())
    }

    /// Delete every batch file; returns how many were removed
    ///
    /// Files that vanish concurrently are not errors. Other failures do not stop the
    /// sweep; the first one is returned after every file has been tried.
    pub async fn delete_all(&self) -> StorageResult<usize> {
        let mut deleted = 0;
        let mut first_error = None;

        for file in self.files().await? {
            match delete_file(&file.path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(file = %file.path.display(), error = %e, "Failed to delete batch file");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    /// Move every batch file into `destination`, oldest first; returns how many moved
    ///
    /// A file keeps its name unless the destination already holds that name, in which
    /// case it takes the next free timestamp. Nothing in the destination is overwritten.
    pub async fn move_all_to(&self, destination: &Directory) -> StorageResult<usize> {
        destination.create().await?;

        let mut moved = 0;
        let mut first_error = None;

        for file in self.files().await? {
            match move_file(&file, destination).await {
                Ok(true) => moved += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(file = %file.path.display(), error = %e, "Failed to move batch file");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(moved),
        }
    }
}

pub(crate) async fn delete_file(path: &Path) -> StorageResult<()> {
    fs::remove_file(path)
        .await
        .map_err(|e| StorageError::io("Failed to delete batch file", path, e))
}

/// Returns `false` when the source disappeared before it could be moved
async fn move_file(file: &BatchFile, destination: &Directory) -> StorageResult<bool> {
    let mut created_at_ms = file.created_at_ms;
    let mut target = destination.file_path(created_at_ms);
    while try_exists(&target).await? {
        created_at_ms += 1;
        target = destination.file_path(created_at_ms);
    }

    match fs::rename(&file.path, &target).await {
        Ok(()) => return Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            tracing::debug!(
                file = %file.path.display(),
                error = %e,
                "Rename failed, falling back to copy"
            );
        }
    }

    // Hidden temporary name: never listed as a batch file until the final rename.
    let temporary = destination
        .path()
        .join(format!(".{}.tmp", batch_file_name(created_at_ms)));

    match fs::copy(&file.path, &temporary).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StorageError::io("Failed to copy batch file", &file.path, e)),
    }

    if let Err(e) = fs::rename(&temporary, &target).await {
        let _ = fs::remove_file(&temporary).await;
        return Err(StorageError::io("Failed to rename copied batch file", &target, e));
    }

    match delete_file(&file.path).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => Err(e),
    }
}

async fn try_exists(path: &Path) -> StorageResult<bool> {
    fs::try_exists(path)
        .await
        .map_err(|e| StorageError::io("Failed to check batch file", path, e))
}

/// The unauthorized/authorized directory pair of one feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySet {
    /// Data written while consent is pending
    pub unauthorized: Directory,
    /// Data eligible for upload
    pub authorized: Directory,
}

impl DirectorySet {
    /// `<root>/<feature>/intermediate-v<version>` and `<root>/<feature>/v<version>`
    pub fn for_feature(root: &Path, feature: &str, format_version: u32) -> Self {
        let base = root.join(feature);
        Self {
            unauthorized: Directory::new(base.join(format!("intermediate-v{}", format_version))),
            authorized: Directory::new(base.join(format!("v{}", format_version))),
        }
    }

    pub async fn create(&self) -> StorageResult<()> {
        self.unauthorized.create().await?;
        self.authorized.create().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_batch(dir: &Directory, created_at_ms: u64, content: &str) {
        std::fs::write(dir.file_path(created_at_ms), content).unwrap();
    }

    #[test]
    fn test_parse_batch_file_name() {
        assert_eq!(parse_batch_file_name("1700000000000"), Some(1_700_000_000_000));
        assert_eq!(parse_batch_file_name(".1700000000000.tmp"), None);
        assert_eq!(parse_batch_file_name("notes.txt"), None);
        assert_eq!(parse_batch_file_name(""), None);
        assert_eq!(parse_batch_file_name("-5"), None);
    }

    #[test]
    fn test_directory_set_layout() {
        let set = DirectorySet::for_feature(Path::new("/data"), "tracing", 2);
        assert_eq!(set.unauthorized.path(), Path::new("/data/tracing/intermediate-v2"));
        assert_eq!(set.authorized.path(), Path::new("/data/tracing/v2"));
    }

    #[tokio::test]
    async fn test_files_sorted_and_filtered() {
        let root = tempfile::tempdir().unwrap();
        let dir = Directory::new(root.path());

        write_batch(&dir, 30, "c");
        write_batch(&dir, 10, "aaa");
        write_batch(&dir, 20, "bb");
        std::fs::write(root.path().join(".40.tmp"), "partial").unwrap();
        std::fs::create_dir(root.path().join("50")).unwrap();

        let files = dir.files().await.unwrap();
        let names: Vec<u64> = files.iter().map(|f| f.created_at_ms).collect();
        assert_eq!(names, vec![10, 20, 30]);
        assert_eq!(dir.total_size().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let dir = Directory::new(root.path().join("missing"));
        assert!(dir.files().await.unwrap().is_empty());
        assert_eq!(dir.delete_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_move_all_avoids_collisions() {
        let root = tempfile::tempdir().unwrap();
        let set = DirectorySet::for_feature(root.path(), "logging", 1);
        set.create().await.unwrap();

        write_batch(&set.unauthorized, 100, "moved-100");
        write_batch(&set.unauthorized, 200, "moved-200");
        write_batch(&set.authorized, 100, "existing-100");

        let moved = set.unauthorized.move_all_to(&set.authorized).await.unwrap();
        assert_eq!(moved, 2);
        assert!(set.unauthorized.files().await.unwrap().is_empty());

        let files = set.authorized.files().await.unwrap();
        let contents: Vec<String> = files
            .iter()
            .map(|f| std::fs::read_to_string(&f.path).unwrap())
            .collect();
        assert_eq!(contents, vec!["existing-100", "moved-100", "moved-200"]);
    }
}
