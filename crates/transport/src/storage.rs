//! Storage collaborator: where received files go and sent files come from.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};

/// Buffer size for file sinks and sources (256 KB).
pub const FILE_BUFFER_SIZE: usize = 256 * 1024;

/// Writable destination for a received body.
pub type WriteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable source for a streamed body.
pub type ReadSource = Box<dyn AsyncRead + Send + Unpin>;

/// A boxed future returned by storage methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = std::io::Result<T>> + Send + 'a>>;

/// A write in progress: bytes land in `staging` until [`Storage::commit`]
/// moves them to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub destination: PathBuf,
    pub staging: PathBuf,
}

/// File access used by the sender and receiver.
///
/// Both directions hand out streams so bodies never need to fit in memory.
/// Writes are staged: concurrent writers to one name never share a file,
/// and the last one to commit wins.
pub trait Storage: Send + Sync + 'static {
    /// Prepares a write to `path`, creating parent directories.
    fn create_or_replace<'a>(&'a self, path: &'a Path) -> StorageFuture<'a, (StagedFile, WriteSink)>;

    /// Replaces the destination with the staged content.
    fn commit<'a>(&'a self, staged: &'a StagedFile) -> StorageFuture<'a, ()>;

    /// Opens `path` for streaming reads.
    fn open_for_reading<'a>(&'a self, path: &'a Path) -> StorageFuture<'a, ReadSource>;
}

/// Local filesystem storage. Relative paths resolve against `root`.
#[derive(Debug, Clone, Default)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

/// Hidden sibling of `destination`, unique per call so writers never collide.
fn staging_path(destination: &Path) -> PathBuf {
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.{}.part", hex::encode(nonce)))
}

impl Storage for FsStorage {
    fn create_or_replace<'a>(&'a self, path: &'a Path) -> StorageFuture<'a, (StagedFile, WriteSink)> {
        Box::pin(async move {
            let destination = self.resolve(path);
            if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let staging = staging_path(&destination);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging)
                .await?;
            let sink: WriteSink = Box::new(BufWriter::with_capacity(FILE_BUFFER_SIZE, file));
            Ok((
                StagedFile {
                    destination,
                    staging,
                },
                sink,
            ))
        })
    }

    fn commit<'a>(&'a self, staged: &'a StagedFile) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = tokio::fs::rename(&staged.staging, &staged.destination).await {
                let _ = tokio::fs::remove_file(&staged.staging).await;
                return Err(e);
            }
            Ok(())
        })
    }

    fn open_for_reading<'a>(&'a self, path: &'a Path) -> StorageFuture<'a, ReadSource> {
        Box::pin(async move {
            let file = tokio::fs::File::open(self.resolve(path)).await?;
            let source: ReadSource = Box::new(BufReader::with_capacity(FILE_BUFFER_SIZE, file));
            Ok(source)
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn write(storage: &FsStorage, path: &str, content: &[u8]) -> StagedFile {
        let (staged, mut sink) = storage.create_or_replace(Path::new(path)).await.unwrap();
        sink.write_all(content).await.unwrap();
        sink.shutdown().await.unwrap();
        staged
    }

    #[tokio::test]
    async fn create_makes_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let staged = write(&storage, "nested/deeper/a.txt", b"first version").await;
        assert_eq!(staged.destination, dir.path().join("nested/deeper/a.txt"));
        assert_eq!(staged.staging.parent(), staged.destination.parent());
        storage.commit(&staged).await.unwrap();

        let staged = write(&storage, "nested/deeper/a.txt", b"v2").await;
        storage.commit(&staged).await.unwrap();

        assert_eq!(std::fs::read(&staged.destination).unwrap(), b"v2");
        let entries = std::fs::read_dir(dir.path().join("nested/deeper")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn destination_untouched_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"old").unwrap();
        let storage = FsStorage::new(dir.path());

        let staged = write(&storage, "keep.txt", b"new").await;
        assert_eq!(std::fs::read(dir.path().join("keep.txt")).unwrap(), b"old");
        assert_eq!(std::fs::read(&staged.staging).unwrap(), b"new");

        storage.commit(&staged).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("keep.txt")).unwrap(), b"new");
        assert!(!staged.staging.exists());
    }

    #[tokio::test]
    async fn overlapping_writes_get_separate_files_and_last_commit_wins() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let (first, mut first_sink) = storage.create_or_replace(Path::new("same.bin")).await.unwrap();
        first_sink.write_all(&[b'A'; 1000]).await.unwrap();

        let second = write(&storage, "same.bin", b"BBB").await;
        assert_ne!(first.staging, second.staging);
        storage.commit(&second).await.unwrap();

        first_sink.write_all(&[b'A'; 500]).await.unwrap();
        first_sink.shutdown().await.unwrap();
        storage.commit(&first).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("same.bin")).unwrap(), vec![b'A'; 1500]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn open_for_reading_streams_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("src.bin"), b"streamed").unwrap();

        let storage = FsStorage::new(dir.path());
        let mut source = storage.open_for_reading(Path::new("src.bin")).await.unwrap();
        let mut out = Vec::new();
        source.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"streamed");
    }

    #[tokio::test]
    async fn absolute_paths_ignore_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abs.txt");
        std::fs::write(&file, b"x").unwrap();

        let storage = FsStorage::default();
        assert!(storage.open_for_reading(&file).await.is_ok());
    }

    #[tokio::test]
    async fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let err = storage
            .open_for_reading(Path::new("missing.bin"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
