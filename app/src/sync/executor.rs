use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use storage::{join_path, relative_path, Storage};
use utils::error::{Error, Result};

/// 每个尝试同步的文件 -> 是否成功
pub type SyncResult = BTreeMap<String, bool>;

/// Copies single files from the source endpoint to the target endpoint by
/// staging them in a local temporary file.
///
/// Calls are independent of each other and may run concurrently.
pub struct SyncExecutor {
    source: Arc<dyn Storage>,
    target: Arc<dyn Storage>,
    staging_dir: Option<PathBuf>,
}

impl SyncExecutor {
    pub fn new(source: Arc<dyn Storage>, target: Arc<dyn Storage>) -> Self {
        Self {
            source,
            target,
            staging_dir: None,
        }
    }

    /// Stage into `dir` instead of the system temporary directory.
    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.staging_dir = dir;
        self
    }

    /// Destination of `file` once its location under `source_root` is
    /// re-rooted at `target_root`.
    pub fn target_path(file: &str, source_root: &str, target_root: &str) -> Option<String> {
        relative_path(file, source_root).map(|relative| join_path(target_root, &relative))
    }

    /// 同步单个文件，失败只记录日志并返回false
    pub async fn sync_one(&self, file: &str, source_root: &str, target_root: &str) -> bool {
        match self.try_sync_one(file, source_root, target_root).await {
            Ok(target_path) => {
                log::info!("Synced {} to {}", file, target_path);
                true
            }
            Err(e) => {
                log::error!("Failed to sync {}: {}", file, e);
                false
            }
        }
    }

    async fn try_sync_one(&self, file: &str, source_root: &str, target_root: &str) -> Result<String> {
        let target_path = Self::target_path(file, source_root, target_root).ok_or_else(|| {
            Error::new(format!("{} is not under source root {}", file, source_root))
        })?;

        let staged = self.stage_file()?;
        let outcome = self.transfer(file, &target_path, staged.path()).await;

        // 无论成功与否都删除暂存文件
        if let Err(e) = staged.close() {
            log::warn!("Could not remove staging file for {}: {}", file, e);
        }

        outcome.map(|_| target_path)
    }

    fn stage_file(&self) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".sftpsync-").suffix(".staging");

        let staged = match &self.staging_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };

        Ok(staged)
    }

    async fn transfer(&self, file: &str, target_path: &str, staged: &std::path::Path) -> Result<()> {
        self.source.download_file(file, staged).await?;
        self.target.upload_file(staged, target_path).await?;
        Ok(())
    }

    /// 顺序同步一批文件
    pub async fn sync_many(&self, files: &[String], source_root: &str, target_root: &str) -> SyncResult {
        let mut results = SyncResult::new();
        for file in files {
            let ok = self.sync_one(file, source_root, target_root).await;
            results.insert(file.clone(), ok);
        }
        results
    }

    /// Like [`sync_many`](Self::sync_many) with up to `concurrency` transfers in flight.
    pub async fn sync_concurrent(
        &self, files: &[String], source_root: &str, target_root: &str, concurrency: usize,
    ) -> SyncResult {
        stream::iter(files)
            .map(|file| async move {
                let ok = self.sync_one(file, source_root, target_root).await;
                (file.clone(), ok)
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }
}
