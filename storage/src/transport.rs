use std::io;

use crate::common::StorageEntry;

/// 协议层原语
///
/// One implementation per protocol. Paths are absolute POSIX strings on the
/// endpoint. Errors carry an `io::ErrorKind` that callers rely on:
/// `NotFound` for missing paths, everything else is a transport failure.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Establishes (or validates) the underlying session.
    async fn connect(&self) -> io::Result<()> {
        Ok(())
    }

    async fn stat(&self, path: &str) -> io::Result<StorageEntry>;

    /// Direct children of `path`, excluding `.` and `..`.
    async fn read_dir(&self, path: &str) -> io::Result<Vec<StorageEntry>>;

    /// Creates a single directory. Parents must already exist.
    async fn create_dir(&self, path: &str) -> io::Result<()>;

    /// Reads at most `len` bytes starting at `offset`.
    async fn read_chunk(&self, path: &str, offset: u64, len: u64) -> io::Result<Vec<u8>>;

    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Writes `data` at `offset`. Offset zero creates or truncates the file.
    async fn write_chunk(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<()>;

    async fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    async fn remove_file(&self, path: &str) -> io::Result<()>;

    /// 递归遍历目录树：先输出当前目录的文件，再按名称顺序进入子目录
    ///
    /// Symlinks are reported but never followed.
    async fn walk(&self, root: &str) -> io::Result<Vec<StorageEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![root.to_string()];

        while let Some(dir) = pending.pop() {
            let mut children = self.read_dir(&dir).await?;
            children.sort_by(|a, b| a.name.cmp(&b.name));

            let mut subdirs = Vec::new();
            for child in children {
                if child.is_dir && !child.is_symlink {
                    subdirs.push(child.path.clone());
                }
                entries.push(child);
            }

            // 逆序入栈，保证按名称顺序出栈
            pending.extend(subdirs.into_iter().rev());
        }

        Ok(entries)
    }
}
