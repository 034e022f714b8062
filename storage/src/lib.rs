pub mod common;
pub mod error;
pub mod file;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod remote;
#[cfg(feature = "sftp")]
pub mod sftp;
pub mod transport;

pub use common::*;
pub use error::{StorageError, StorageResult};
pub use file::LocalTransport;
#[cfg(any(test, feature = "testing"))]
pub use memory::{FailPoint, MemoryTransport, Op};
pub use remote::{DirOutcome, RemoteStorage};
#[cfg(feature = "sftp")]
pub use sftp::{SftpAuth, SftpSettings, SftpTransport};
pub use transport::Transport;

use std::path::Path;
#[cfg(feature = "sftp")]
use std::time::Duration;

use utils::app_config::{ConnectionConfig, ConnectionKind};

/// 远程存储能力：列举、存在性检查、递归建目录、分块上传/下载
///
/// Implementations must be safe to share between concurrent transfers.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Logical connection id of the endpoint.
    fn name(&self) -> &str;

    /// Verifies the endpoint is reachable. Failures here are fatal for a run.
    async fn connect(&self) -> StorageResult<()>;

    /// Every regular file under `root`, as absolute paths.
    async fn list_files(&self, root: &str) -> StorageResult<Vec<String>>;

    /// Never fails: any error reads as "does not exist".
    async fn exists(&self, path: &str) -> bool;

    /// Creates `path` and all missing ancestors. Idempotent.
    async fn mkdir(&self, path: &str) -> StorageResult<()>;

    async fn file_size(&self, path: &str) -> StorageResult<u64>;

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> StorageResult<()>;

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> StorageResult<()>;
}

/// 存储类型枚举
pub enum StorageType {
    Local(RemoteStorage<LocalTransport>),
    #[cfg(feature = "sftp")]
    Sftp(RemoteStorage<SftpTransport>),
}

impl StorageType {
    /// 仅用于日志的协议名称
    pub fn protocol(&self) -> &'static str {
        match self {
            StorageType::Local(_) => "local",
            #[cfg(feature = "sftp")]
            StorageType::Sftp(_) => "sftp",
        }
    }

    fn as_storage(&self) -> &dyn Storage {
        match self {
            StorageType::Local(storage) => storage,
            #[cfg(feature = "sftp")]
            StorageType::Sftp(storage) => storage,
        }
    }
}

/// 根据命名连接配置创建对应的存储实例
pub fn create_storage(id: &str, config: &ConnectionConfig) -> StorageResult<StorageType> {
    let storage = match config.kind {
        ConnectionKind::Local => create_local_storage(id, config)?,
        ConnectionKind::Sftp => create_sftp_storage(id, config)?,
    };

    log::debug!("Created {} endpoint {}", storage.protocol(), id);
    Ok(storage)
}

#[inline]
fn create_local_storage(id: &str, config: &ConnectionConfig) -> StorageResult<StorageType> {
    let root = config
        .root
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| StorageError::config(id, "local connection requires `root`"))?;

    let storage = RemoteStorage::new(id, LocalTransport::new(resolve_local_path(root)?))
        .with_chunk_size(config.chunk_size)
        .with_missing_root(config.missing_root);

    Ok(StorageType::Local(storage))
}

#[cfg(feature = "sftp")]
#[inline]
fn create_sftp_storage(id: &str, config: &ConnectionConfig) -> StorageResult<StorageType> {
    let host = config
        .host
        .clone()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| StorageError::config(id, "sftp connection requires `host`"))?;
    let username = config
        .username
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| StorageError::config(id, "sftp connection requires `username`"))?;

    let auth = match (&config.private_key, &config.password) {
        (Some(key), _) => SftpAuth::PrivateKey {
            path: key.into(),
            passphrase: config.passphrase.clone(),
        },
        (None, Some(password)) => SftpAuth::Password(password.clone()),
        (None, None) => SftpAuth::Agent,
    };

    let transport = SftpTransport::new(SftpSettings {
        host,
        port: config.port,
        username,
        auth,
        timeout: Duration::from_secs(config.timeout_secs),
    });

    let storage = RemoteStorage::new(id, transport)
        .with_chunk_size(config.chunk_size)
        .with_missing_root(config.missing_root);

    Ok(StorageType::Sftp(storage))
}

#[cfg(not(feature = "sftp"))]
fn create_sftp_storage(id: &str, _config: &ConnectionConfig) -> StorageResult<StorageType> {
    Err(StorageError::config(
        id,
        "built without the `sftp` feature",
    ))
}

/// 解析本地路径，支持相对路径和绝对路径
fn resolve_local_path(path: &str) -> StorageResult<std::path::PathBuf> {
    let path_obj = Path::new(path);

    if path_obj.is_absolute() {
        Ok(path_obj.to_path_buf())
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .map_err(|e| StorageError::config(path, format!("failed to get current directory: {}", e)))
    }
}

// 为StorageType实现统一的接口
#[async_trait::async_trait]
impl Storage for StorageType {
    fn name(&self) -> &str {
        self.as_storage().name()
    }

    async fn connect(&self) -> StorageResult<()> {
        self.as_storage().connect().await
    }

    async fn list_files(&self, root: &str) -> StorageResult<Vec<String>> {
        self.as_storage().list_files(root).await
    }

    async fn exists(&self, path: &str) -> bool {
        self.as_storage().exists(path).await
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.as_storage().mkdir(path).await
    }

    async fn file_size(&self, path: &str) -> StorageResult<u64> {
        self.as_storage().file_size(path).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        self.as_storage().upload_file(local_path, remote_path).await
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        self.as_storage().download_file(remote_path, local_path).await
    }
}
