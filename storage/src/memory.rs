//! In-memory endpoint tree. Records every primitive call and supports fault
//! injection, which makes chunking and failure paths observable.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::{Mutex, MutexGuard};

use crate::common::{parent_path, StorageEntry};
use crate::transport::Transport;

/// A recorded primitive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Stat(String),
    ReadDir(String),
    CreateDir(String),
    ReadChunk { path: String, offset: u64, len: u64 },
    ReadFile(String),
    WriteChunk { path: String, offset: u64, len: u64 },
    Rename { from: String, to: String },
    RemoveFile(String),
}

/// Injected failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `stat` of this exact path fails with a permission error.
    Stat(String),
    /// Any `write_chunk` at this offset fails.
    WriteAt(u64),
    /// `create_dir` of this path fails and leaves nothing behind.
    CreateDir(String),
    /// `create_dir` of this path creates the directory but still reports an error,
    /// as when a concurrent writer wins the race.
    CreateDirRace(String),
    /// `read_file` / `read_chunk` of this path fail.
    Read(String),
    /// `rename` fails when the source path contains this text.
    RenameFrom(String),
    /// Every call fails with `ConnectionRefused`.
    Unreachable,
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    ops: Vec<Op>,
    faults: HashSet<FailPoint>,
}

pub struct MemoryTransport {
    state: Mutex<State>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))
}

fn injected(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected failure: {}", what))
}

impl MemoryTransport {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            state: Mutex::new(State {
                nodes,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not hide the tree from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a file, creating missing parent directories.
    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        let mut parent = parent_path(path);
        while let Some(dir) = parent {
            parent = parent_path(&dir);
            state.nodes.entry(dir).or_insert(Node::Dir);
        }
        state.nodes.insert(path.to_string(), Node::File(data.into()));
    }

    pub fn insert_dir(&self, path: &str) {
        let mut state = self.lock();
        let mut current = Some(path.to_string());
        while let Some(dir) = current {
            current = parent_path(&dir);
            state.nodes.entry(dir).or_insert(Node::Dir);
        }
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.lock().nodes.get(path), Some(Node::Dir))
    }

    /// All stored paths, directories included, in sorted order.
    pub fn paths(&self) -> Vec<String> {
        self.lock().nodes.keys().cloned().collect()
    }

    pub fn fail(&self, point: FailPoint) {
        self.lock().faults.insert(point);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Records the call and applies the `Unreachable` fault.
    fn begin(&self, op: Op) -> io::Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.ops.push(op);
        if state.faults.contains(&FailPoint::Unreachable) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "endpoint unreachable",
            ));
        }
        Ok(state)
    }

    fn entry(path: &str, node: &Node) -> StorageEntry {
        match node {
            Node::Dir => StorageEntry::dir(path),
            Node::File(data) => StorageEntry::file(path, data.len() as u64),
        }
    }

    fn require_parent_dir(state: &State, path: &str) -> io::Result<()> {
        match parent_path(path) {
            Some(parent) => match state.nodes.get(&parent) {
                Some(Node::Dir) => Ok(()),
                _ => Err(not_found(&parent)),
            },
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> io::Result<()> {
        self.begin(Op::Stat("/".to_string())).map(|_| ())
    }

    async fn stat(&self, path: &str) -> io::Result<StorageEntry> {
        let state = self.begin(Op::Stat(path.to_string()))?;
        if state.faults.contains(&FailPoint::Stat(path.to_string())) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected stat failure: {}", path),
            ));
        }
        state
            .nodes
            .get(path)
            .map(|node| Self::entry(path, node))
            .ok_or_else(|| not_found(path))
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<StorageEntry>> {
        let state = self.begin(Op::ReadDir(path.to_string()))?;
        match state.nodes.get(path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => {
                return Err(io::Error::new(io::ErrorKind::Other, "not a directory"))
            }
            None => return Err(not_found(path)),
        }

        Ok(state
            .nodes
            .iter()
            .filter(|(key, _)| key.as_str() != "/" && parent_path(key).as_deref() == Some(path))
            .map(|(key, node)| Self::entry(key, node))
            .collect())
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        let mut state = self.begin(Op::CreateDir(path.to_string()))?;
        if state.faults.contains(&FailPoint::CreateDir(path.to_string())) {
            return Err(injected(path));
        }
        if state.faults.contains(&FailPoint::CreateDirRace(path.to_string())) {
            state.nodes.insert(path.to_string(), Node::Dir);
            return Err(injected(path));
        }
        if state.nodes.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("failure creating {}", path),
            ));
        }
        Self::require_parent_dir(&state, path)?;
        state.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn read_chunk(&self, path: &str, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let state = self.begin(Op::ReadChunk {
            path: path.to_string(),
            offset,
            len,
        })?;
        if state.faults.contains(&FailPoint::Read(path.to_string())) {
            return Err(injected(path));
        }
        match state.nodes.get(path) {
            Some(Node::File(data)) => {
                let start = (offset as usize).min(data.len());
                let end = (start + len as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            _ => Err(not_found(path)),
        }
    }

    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        let state = self.begin(Op::ReadFile(path.to_string()))?;
        if state.faults.contains(&FailPoint::Read(path.to_string())) {
            return Err(injected(path));
        }
        match state.nodes.get(path) {
            Some(Node::File(data)) => Ok(data.clone()),
            _ => Err(not_found(path)),
        }
    }

    async fn write_chunk(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut state = self.begin(Op::WriteChunk {
            path: path.to_string(),
            offset,
            len: data.len() as u64,
        })?;
        if state.faults.contains(&FailPoint::WriteAt(offset)) {
            return Err(injected(&format!("{} at offset {}", path, offset)));
        }
        Self::require_parent_dir(&state, path)?;

        if offset == 0 {
            state.nodes.insert(path.to_string(), Node::File(data.to_vec()));
            return Ok(());
        }

        match state.nodes.get_mut(path) {
            Some(Node::File(existing)) => {
                let offset = offset as usize;
                if existing.len() < offset {
                    existing.resize(offset, 0);
                }
                existing.truncate(offset);
                existing.extend_from_slice(data);
                Ok(())
            }
            _ => Err(not_found(path)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut state = self.begin(Op::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })?;
        let injected_rename = state.faults.iter().any(|fault| match fault {
            FailPoint::RenameFrom(pattern) => from.contains(pattern.as_str()),
            _ => false,
        });
        if injected_rename {
            return Err(injected(&format!("rename of {}", from)));
        }
        // SFTP v3 semantics: the destination must not exist
        if state.nodes.contains_key(to) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("failure renaming onto {}", to),
            ));
        }
        Self::require_parent_dir(&state, to)?;
        let node = state.nodes.remove(from).ok_or_else(|| not_found(from))?;
        state.nodes.insert(to.to_string(), node);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> io::Result<()> {
        let mut state = self.begin(Op::RemoveFile(path.to_string()))?;
        match state.nodes.get(path) {
            Some(Node::File(_)) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(io::Error::new(io::ErrorKind::Other, "is a directory")),
            None => Err(not_found(path)),
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("paths", &self.paths())
            .finish()
    }
}
