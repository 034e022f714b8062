use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SEPARATOR: char = '/';

/// 统一的文件系统条目类型，所有传输层共用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// 文件或目录的名称
    pub name: String,
    /// 端点上的绝对路径（POSIX风格）
    pub path: String,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    /// 文件大小（字节）
    pub size: u64,
    /// 最后修改时间
    pub modified: SystemTime,
}

impl StorageEntry {
    pub fn file(path: &str, size: u64) -> Self {
        Self {
            name: file_name(path).to_string(),
            path: path.to_string(),
            is_dir: false,
            is_file: true,
            is_symlink: false,
            size,
            modified: UNIX_EPOCH,
        }
    }

    pub fn dir(path: &str) -> Self {
        Self {
            name: file_name(path).to_string(),
            path: path.to_string(),
            is_dir: true,
            is_file: false,
            is_symlink: false,
            size: 0,
            modified: UNIX_EPOCH,
        }
    }
}

pub fn seconds_to_systemtime(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

/// Last path component; `/` for the root.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit(SEPARATOR).next().unwrap_or(trimmed)
}

/// POSIX `dirname` for absolute paths. Returns `None` for the root itself.
pub fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind(SEPARATOR) {
        Some(0) => Some("/".to_string()),
        Some(pos) => Some(trimmed[..pos].to_string()),
        None => None,
    }
}

/// Joins a relative path onto an absolute base.
pub fn join_path(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches(SEPARATOR);
    let relative = relative.trim_start_matches(SEPARATOR);
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", relative),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, relative),
    }
}

/// 计算 `path` 相对 `root` 的路径
///
/// The root itself and paths outside `root` have no relative form. When `root`
/// is `/` this only strips the leading separator.
pub fn relative_path(path: &str, root: &str) -> Option<String> {
    let root = root.trim_end_matches(SEPARATOR);
    let rest = if root.is_empty() {
        path.strip_prefix(SEPARATOR)?
    } else {
        path.strip_prefix(root)?.strip_prefix(SEPARATOR)?
    };

    let rest = rest.trim_matches(SEPARATOR);
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Every ancestor-or-self of `path`, from the top down: `/a/b` gives `["/a", "/a/b"]`.
pub fn cumulative_segments(path: &str) -> Vec<String> {
    let mut current = String::new();
    path.split(SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(|part| {
            current.push(SEPARATOR);
            current.push_str(part);
            current.clone()
        })
        .collect()
}

/// Hidden sibling name used while a transfer is in flight.
pub fn partial_path(path: &str) -> String {
    tagged_sibling(path, "partial")
}

/// Where an upload moves the file it replaces until the replacement is in place.
pub fn backup_path(path: &str) -> String {
    tagged_sibling(path, "replaced")
}

fn tagged_sibling(path: &str, tag: &str) -> String {
    let suffix: u32 = rand::random();
    let name = format!(".{}.{}-{:08x}", file_name(path), tag, suffix);
    match parent_path(path) {
        Some(parent) => join_path(&parent, &name),
        None => name,
    }
}
