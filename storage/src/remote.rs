//! Protocol-independent endpoint logic: listing policy, existence checks,
//! recursive directory creation and chunked transfers.

use std::io;
use std::path::Path;

use tokio::fs as tokio_fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use utils::app_config::{MissingRootPolicy, DEFAULT_CHUNK_SIZE};

use crate::common::{backup_path, cumulative_segments, parent_path, partial_path};
use crate::error::{StorageError, StorageResult};
use crate::transport::Transport;
use crate::Storage;

/// 单个目录段的创建结果
#[derive(Debug)]
pub enum DirOutcome {
    Created,
    AlreadyExists,
    TransportFailure(io::Error),
}

/// An endpoint built on top of a protocol [`Transport`].
pub struct RemoteStorage<T: Transport> {
    name: String,
    transport: T,
    chunk_size: u64,
    missing_root: MissingRootPolicy,
}

impl<T: Transport> RemoteStorage<T> {
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport,
            chunk_size: DEFAULT_CHUNK_SIZE,
            missing_root: MissingRootPolicy::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        // 0 would never make progress
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_missing_root(mut self, policy: MissingRootPolicy) -> Self {
        self.missing_root = policy;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 创建单个目录段，区分“已存在”和真正的传输失败
    pub async fn create_segment(&self, path: &str) -> DirOutcome {
        match self.transport.stat(path).await {
            Ok(entry) if entry.is_dir => return DirOutcome::AlreadyExists,
            Ok(_) => {
                return DirOutcome::TransportFailure(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} exists and is not a directory", path),
                ))
            }
            // stat may be refused on ancestors we can still traverse; try creating
            Err(_) => {}
        }

        match self.transport.create_dir(path).await {
            Ok(()) => DirOutcome::Created,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => DirOutcome::AlreadyExists,
            // Another writer may have created it between stat and mkdir.
            Err(e) => match self.transport.stat(path).await {
                Ok(entry) if entry.is_dir => DirOutcome::AlreadyExists,
                _ => DirOutcome::TransportFailure(e),
            },
        }
    }

    async fn upload_chunked(&self, local_path: &Path, remote_path: &str, size: u64) -> io::Result<()> {
        let mut file = tokio_fs::File::open(local_path).await?;
        let mut offset = 0u64;

        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size.min(size.saturating_sub(offset)) as usize);
            (&mut file).take(self.chunk_size).read_to_end(&mut chunk).await?;
            if chunk.is_empty() {
                break;
            }

            self.transport
                .write_chunk(remote_path, offset, &chunk)
                .await?;
            offset += chunk.len() as u64;
            log::debug!("Uploaded {} of {} bytes to {}", offset, size, remote_path);
        }

        if offset != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "local file changed during upload: expected {} bytes, sent {}",
                    size, offset
                ),
            ));
        }

        Ok(())
    }

    async fn upload_whole(&self, local_path: &Path, remote_path: &str) -> io::Result<()> {
        let data = tokio_fs::read(local_path).await?;
        self.transport.write_chunk(remote_path, 0, &data).await
    }

    async fn download_chunked(&self, remote_path: &str, local_path: &Path, size: u64) -> io::Result<()> {
        let mut file = tokio_fs::File::create(local_path).await?;
        let mut offset = 0u64;

        while offset < size {
            let len = self.chunk_size.min(size - offset);
            let chunk = self.transport.read_chunk(remote_path, offset, len).await?;
            if chunk.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} ended at {} of {} bytes", remote_path, offset, size),
                ));
            }

            file.write_all(&chunk).await?;
            offset += chunk.len() as u64;
            log::debug!("Downloaded {} of {} bytes from {}", offset, size, remote_path);
        }

        file.sync_all().await?;
        Ok(())
    }

    async fn download_whole(&self, remote_path: &str, local_path: &Path) -> io::Result<()> {
        let data = self.transport.read_file(remote_path).await?;
        let mut file = tokio_fs::File::create(local_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Moves a finished upload into place, replacing an existing destination.
    ///
    /// The old destination is moved aside and restored if the replacement
    /// cannot be renamed in, so a failed commit never loses it.
    async fn commit(&self, partial: &str, remote_path: &str) -> io::Result<()> {
        let first = match self.transport.rename(partial, remote_path).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // SFTP v3 refuses to rename over an existing file
        match self.transport.stat(remote_path).await {
            Ok(entry) if !entry.is_dir => {}
            _ => return Err(first),
        }

        let backup = backup_path(remote_path);
        self.transport.rename(remote_path, &backup).await?;

        match self.transport.rename(partial, remote_path).await {
            Ok(()) => {
                if let Err(e) = self.transport.remove_file(&backup).await {
                    log::warn!("Could not remove replaced file {}: {}", backup, e);
                }
                Ok(())
            }
            Err(e) => {
                if let Err(restore) = self.transport.rename(&backup, remote_path).await {
                    log::error!(
                        "Could not restore {} from {}: {}",
                        remote_path,
                        backup,
                        restore
                    );
                }
                Err(e)
            }
        }
    }

    async fn discard_remote(&self, partial: &str) {
        if let Err(e) = self.transport.remove_file(partial).await {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("Could not remove partial upload {}: {}", partial, e);
            }
        }
    }
}

#[async_trait::async_trait]
impl<T: Transport> Storage for RemoteStorage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> StorageResult<()> {
        self.transport
            .connect()
            .await
            .map_err(|source| StorageError::Connection {
                endpoint: self.name.clone(),
                source,
            })
    }

    async fn list_files(&self, root: &str) -> StorageResult<Vec<String>> {
        let listing_error = |source| StorageError::Listing {
            endpoint: self.name.clone(),
            root: root.to_string(),
            source,
        };

        match self.transport.stat(root).await {
            Ok(entry) if entry.is_dir => {}
            Ok(_) => {
                return Err(listing_error(io::Error::new(
                    io::ErrorKind::Other,
                    "root is not a directory",
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => match self.missing_root {
                MissingRootPolicy::Empty => {
                    log::warn!(
                        "Root {} does not exist on {}, treating it as empty",
                        root,
                        self.name
                    );
                    return Ok(Vec::new());
                }
                MissingRootPolicy::Error => return Err(listing_error(e)),
            },
            Err(e) => return Err(listing_error(e)),
        }

        let entries = self.transport.walk(root).await.map_err(listing_error)?;
        let files: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.is_file && !entry.is_symlink)
            .map(|entry| entry.path)
            .collect();

        log::debug!("Listed {} files under {} on {}", files.len(), root, self.name);
        Ok(files)
    }

    async fn exists(&self, path: &str) -> bool {
        self.transport.stat(path).await.is_ok()
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        if let Ok(entry) = self.transport.stat(path).await {
            if entry.is_dir {
                return Ok(());
            }
        }

        // 中间段的失败不立即返回，由最深一级决定结果
        let mut first_failure: Option<(String, io::Error)> = None;
        let mut deepest_ok = true;
        for segment in cumulative_segments(path) {
            deepest_ok = match self.create_segment(&segment).await {
                DirOutcome::Created => {
                    log::debug!("Created directory {} on {}", segment, self.name);
                    true
                }
                DirOutcome::AlreadyExists => true,
                DirOutcome::TransportFailure(source) => {
                    log::debug!("Could not create {} on {}: {}", segment, self.name, source);
                    if first_failure.is_none() {
                        first_failure = Some((segment, source));
                    }
                    false
                }
            };
        }

        match first_failure {
            Some((path, source)) if !deepest_ok => {
                Err(StorageError::DirectoryCreation { path, source })
            }
            _ => Ok(()),
        }
    }

    async fn file_size(&self, path: &str) -> StorageResult<u64> {
        match self.transport.stat(path).await {
            Ok(entry) if entry.is_dir => Err(StorageError::SizeLookup {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "path is a directory"),
            }),
            Ok(entry) => Ok(entry.size),
            Err(source) => Err(StorageError::SizeLookup {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        if let Some(parent) = parent_path(remote_path) {
            self.mkdir(&parent).await?;
        }

        let size = tokio_fs::metadata(local_path)
            .await
            .map_err(|e| StorageError::transfer(remote_path, e))?
            .len();

        let partial = partial_path(remote_path);
        let sent = if size > self.chunk_size {
            self.upload_chunked(local_path, &partial, size).await
        } else {
            self.upload_whole(local_path, &partial).await
        };

        let result = match sent {
            Ok(()) => self.commit(&partial, remote_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.discard_remote(&partial).await;
            return Err(StorageError::transfer(remote_path, e));
        }

        Ok(())
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let local_display = local_path.to_string_lossy().into_owned();

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio_fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::transfer(&local_display, e))?;
        }

        let size = self
            .transport
            .stat(remote_path)
            .await
            .map_err(|e| StorageError::transfer(remote_path, e))?
            .size;

        let partial = std::path::PathBuf::from(partial_path(&local_display));
        let received = if size > self.chunk_size {
            self.download_chunked(remote_path, &partial, size).await
        } else {
            self.download_whole(remote_path, &partial).await
        };

        let result = match received {
            Ok(()) => tokio_fs::rename(&partial, local_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            let _ = tokio_fs::remove_file(&partial).await;
            return Err(StorageError::transfer(remote_path, e));
        }

        Ok(())
    }
}
