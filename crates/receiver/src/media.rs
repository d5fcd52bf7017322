//! Media-library import after a file is persisted.
//!
//! Import is best effort: whatever the outcome, the saved file stays where
//! it was written.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

/// A boxed future returned by importers.
pub type ImportFuture<'a> = Pin<Box<dyn Future<Output = ImportOutcome> + Send + 'a>>;

/// Result of handing a file to the media library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Not a media file, or no library configured.
    Skipped,
    Imported(PathBuf),
    Failed(String),
}

/// Something that can add a persisted file to a media library.
pub trait MediaImporter: Send + Sync + 'static {
    fn import_to_library<'a>(&'a self, path: &'a Path, is_video: bool) -> ImportFuture<'a>;
}

/// Importer that never imports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImport;

impl MediaImporter for NoImport {
    fn import_to_library<'a>(&'a self, _path: &'a Path, _is_video: bool) -> ImportFuture<'a> {
        Box::pin(async { ImportOutcome::Skipped })
    }
}

/// Copies media into `<library>/Pictures` or `<library>/Videos`.
#[derive(Debug, Clone)]
pub struct LibraryImporter {
    library_dir: PathBuf,
}

impl LibraryImporter {
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
        }
    }

    async fn copy_in(&self, path: &Path, is_video: bool) -> std::io::Result<PathBuf> {
        let album = self
            .library_dir
            .join(if is_video { "Videos" } else { "Pictures" });
        tokio::fs::create_dir_all(&album).await?;

        let name = path.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;
        let dest = free_destination(&album, Path::new(name)).await?;
        tokio::fs::copy(path, &dest).await?;
        Ok(dest)
    }
}

impl MediaImporter for LibraryImporter {
    fn import_to_library<'a>(&'a self, path: &'a Path, is_video: bool) -> ImportFuture<'a> {
        Box::pin(async move {
            match self.copy_in(path, is_video).await {
                Ok(dest) => {
                    debug!(src = %path.display(), dest = %dest.display(), "imported to library");
                    ImportOutcome::Imported(dest)
                }
                Err(e) => ImportOutcome::Failed(e.to_string()),
            }
        })
    }
}

/// First of `name`, `stem (1).ext`, `stem (2).ext`, ... not present in `dir`.
async fn free_destination(dir: &Path, name: &Path) -> std::io::Result<PathBuf> {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}
