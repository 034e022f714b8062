use std::fs::Metadata;
use std::io;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs as tokio_fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::common::{file_name, join_path, StorageEntry, SEPARATOR};
use crate::transport::Transport;

/// A local directory exposed as a rooted POSIX tree.
///
/// Endpoint path `/a/b` maps to `<root>/a/b`.
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    /// Create new local transport rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get full path for a key
    pub fn full_path(&self, key: &str) -> PathBuf {
        let relative = key.trim_start_matches(SEPARATOR);
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Endpoint path for a local path under the root
    fn key_for(root: &Path, path: &Path) -> String {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        join_path("/", &parts.join("/"))
    }

    fn entry_from_metadata(key: String, metadata: &Metadata) -> StorageEntry {
        StorageEntry {
            name: file_name(&key).to_string(),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            is_symlink: metadata.file_type().is_symlink(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            path: key,
        }
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn connect(&self) -> io::Result<()> {
        let metadata = tokio_fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", self.root.display()),
            ));
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> io::Result<StorageEntry> {
        let metadata = tokio_fs::metadata(self.full_path(path)).await?;
        Ok(Self::entry_from_metadata(join_path("/", path), &metadata))
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<StorageEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio_fs::read_dir(self.full_path(path)).await?;

        while let Some(entry) = dir.next_entry().await? {
            let metadata = tokio_fs::symlink_metadata(entry.path()).await?;
            let key = Self::key_for(&self.root, &entry.path());
            entries.push(Self::entry_from_metadata(key, &metadata));
        }

        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        tokio_fs::create_dir(self.full_path(path)).await
    }

    async fn read_chunk(&self, path: &str, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let mut file = tokio_fs::File::open(self.full_path(path)).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buffer).await?;

        Ok(buffer)
    }

    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        tokio_fs::read(self.full_path(path)).await
    }

    async fn write_chunk(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = if offset == 0 {
            tokio_fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(self.full_path(path))
                .await?
        } else {
            let mut file = tokio_fs::OpenOptions::new()
                .write(true)
                .open(self.full_path(path))
                .await?;
            file.seek(SeekFrom::Start(offset)).await?;
            file
        };

        file.write_all(data).await?;
        file.flush().await
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        tokio_fs::rename(self.full_path(from), self.full_path(to)).await
    }

    async fn remove_file(&self, path: &str) -> io::Result<()> {
        tokio_fs::remove_file(self.full_path(path)).await
    }

    /// 使用walkdir遍历，排序规则与默认实现一致（文件在前，目录按名称）
    async fn walk(&self, root: &str) -> io::Result<Vec<StorageEntry>> {
        use walkdir::WalkDir;

        let start = self.full_path(root);
        let base = self.root.clone();

        tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&start)
                .min_depth(1)
                .follow_links(false) // 不跟随符号链接，避免循环
                .max_open(100)
                .sort_by(|a, b| {
                    a.file_type()
                        .is_dir()
                        .cmp(&b.file_type().is_dir())
                        .then_with(|| a.file_name().cmp(b.file_name()))
                });

            let mut entries = Vec::new();
            for entry in walker {
                let entry = entry.map_err(io::Error::from)?;
                let metadata = entry.metadata().map_err(io::Error::from)?;
                let key = Self::key_for(&base, entry.path());
                entries.push(Self::entry_from_metadata(key, &metadata));
            }

            Ok(entries)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}
