#![allow(dead_code)]

use std::fs;
use tempfile::TempDir;

pub const MIB: usize = 1024 * 1024;

/// 创建测试用的临时目录结构
pub fn create_test_structure() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("dir1/subdir1")).unwrap();
    fs::create_dir_all(root.join("dir2")).unwrap();
    fs::create_dir_all(root.join("empty_dir")).unwrap();

    fs::write(root.join("file1.txt"), b"content1").unwrap();
    fs::write(root.join("file2.txt"), b"content2").unwrap();
    fs::write(root.join("dir1/file3.txt"), b"content3").unwrap();
    fs::write(root.join("dir1/subdir1/file4.txt"), b"content4").unwrap();
    fs::write(root.join("dir2/file5.txt"), b"content5").unwrap();
    fs::write(root.join("empty_file.txt"), b"").unwrap();

    temp_dir
}

/// Deterministic, non-repeating-per-chunk payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
