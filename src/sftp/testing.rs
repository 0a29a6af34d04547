//! In-memory session handle for tests
//!
//! Behaves like a strict SFTP server: `rmdir` on a non-empty directory answers
//! `SSH_FX_FAILURE`, missing parents answer `SSH_FX_NO_SUCH_FILE`. Every call
//! is logged in order so tests can assert on the exact sequence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh_sftp::protocol::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::HandleError;
use super::handle::{ConnectionErrorCode, LastError, ProgressFn, RawEntry, SessionHandle};
use super::path_utils::{normalize_remote_path, remote_parent};

const CHUNK: usize = 4;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
    /// Symlink whose target does not exist
    DanglingLink,
}

type FileHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    calls: Vec<String>,
    last: LastError,
    failures: HashMap<(String, String), HandleError>,
    unnamed: HashSet<String>,
    free_space: Option<u64>,
    closed: bool,
}

pub struct MemorySession {
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
    file_hook: Mutex<Option<FileHook>>,
}

impl MemorySession {
    pub fn new() -> Arc<Self> {
        let mut state = State::default();
        state.nodes.insert("/".to_string(), Node::Dir);
        Arc::new(Self {
            state: Mutex::new(state),
            latency: Mutex::new(None),
            file_hook: Mutex::new(None),
        })
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.state.lock();
        insert_with_parents(&mut state.nodes, &normalize_remote_path(path), Node::Dir);
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock();
        insert_with_parents(
            &mut state.nodes,
            &normalize_remote_path(path),
            Node::File(content.to_vec()),
        );
    }

    pub fn add_dangling_link(&self, path: &str) {
        let mut state = self.state.lock();
        insert_with_parents(&mut state.nodes, &normalize_remote_path(path), Node::DanglingLink);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state
            .lock()
            .nodes
            .contains_key(&normalize_remote_path(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.state.lock().nodes.get(&normalize_remote_path(path)),
            Some(Node::Dir)
        )
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().nodes.get(&normalize_remote_path(path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Names of the direct children of `path`, sorted
    pub fn children(&self, path: &str) -> Vec<String> {
        let state = self.state.lock();
        child_paths(&state.nodes, &normalize_remote_path(path))
            .into_iter()
            .filter_map(|p| p.rsplit('/').next().map(str::to_string))
            .collect()
    }

    /// Make the next `op` call on `path` fail with `error`
    pub fn fail_once(&self, op: &str, path: &str, error: HandleError) {
        self.state
            .lock()
            .failures
            .insert((op.to_string(), normalize_remote_path(path)), error);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn set_free_space(&self, bytes: Option<u64>) {
        self.state.lock().free_space = bytes;
    }

    /// Listing `dir` will also yield an entry whose name cannot be decoded
    pub fn add_unnamed_entry(&self, dir: &str) {
        self.state
            .lock()
            .unnamed
            .insert(normalize_remote_path(dir));
    }

    /// Called with the destination path each time a file finishes streaming
    pub fn on_file_complete(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.file_hook.lock() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn enter(&self, op: &str, path: &str) -> Result<(), HandleError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls.push(format!("{} {}", op, path));
        if state.closed {
            return Err(record(&mut state, HandleError::Closed));
        }
        match state
            .failures
            .remove(&(op.to_string(), normalize_remote_path(path)))
        {
            Some(error) => Err(record(&mut state, error)),
            None => Ok(()),
        }
    }

    fn file_done(&self, path: &str) {
        if let Some(hook) = self.file_hook.lock().as_ref() {
            hook(path);
        }
    }

    fn fail<T>(&self, error: HandleError) -> Result<T, HandleError> {
        Err(record(&mut self.state.lock(), error))
    }
}

fn record(state: &mut State, error: HandleError) -> HandleError {
    state.last = LastError::from_handle_error(&error);
    error
}

fn insert_with_parents(nodes: &mut BTreeMap<String, Node>, path: &str, node: Node) {
    let mut parent = remote_parent(path);
    while let Some(p) = parent {
        nodes.entry(p.clone()).or_insert(Node::Dir);
        parent = remote_parent(&p);
    }
    nodes.insert(path.to_string(), node);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Dir,
    File,
}

fn node_kind(nodes: &BTreeMap<String, Node>, path: &str) -> Option<Kind> {
    nodes.get(path).map(|node| match node {
        Node::Dir => Kind::Dir,
        Node::File(_) | Node::DanglingLink => Kind::File,
    })
}

fn child_paths(nodes: &BTreeMap<String, Node>, dir: &str) -> Vec<String> {
    nodes
        .keys()
        .filter(|p| p.as_str() != dir && remote_parent(p).as_deref() == Some(dir))
        .cloned()
        .collect()
}

fn no_such_file(path: &str) -> HandleError {
    HandleError::status(StatusCode::NoSuchFile, format!("No such file: {}", path))
}

fn failure(message: &str) -> HandleError {
    HandleError::status(StatusCode::Failure, message)
}

#[async_trait]
impl SessionHandle for MemorySession {
    async fn list_directory(&self, path: &str) -> Result<Vec<RawEntry>, HandleError> {
        self.enter("list", path).await?;
        let path = normalize_remote_path(path);
        let mut state = self.state.lock();
        match node_kind(&state.nodes, &path) {
            Some(Kind::Dir) => {}
            Some(Kind::File) => return Err(record(&mut state, failure("Not a directory"))),
            None => return Err(record(&mut state, no_such_file(&path))),
        }
        let mut entries: Vec<RawEntry> = child_paths(&state.nodes, &path)
            .into_iter()
            .map(|p| {
                let node = &state.nodes[&p];
                RawEntry {
                    name: p.rsplit('/').next().map(str::to_string),
                    is_dir: matches!(node, Node::Dir),
                    is_symlink: matches!(node, Node::DanglingLink),
                    permissions: Some(0o644),
                    size: match node {
                        Node::File(data) => Some(data.len() as u64),
                        Node::Dir | Node::DanglingLink => None,
                    },
                    modified: None,
                }
            })
            .collect();
        if state.unnamed.contains(&path) {
            entries.push(RawEntry::default());
        }
        Ok(entries)
    }

    async fn file_exists(&self, path: &str) -> bool {
        if self.enter("stat", path).await.is_err() {
            return false;
        }
        matches!(
            self.state.lock().nodes.get(&normalize_remote_path(path)),
            Some(Node::File(_) | Node::DanglingLink)
        )
    }

    async fn directory_exists(&self, path: &str) -> bool {
        if self.enter("stat", path).await.is_err() {
            return false;
        }
        self.is_dir(path)
    }

    async fn remove_file(&self, path: &str) -> Result<(), HandleError> {
        self.enter("remove_file", path).await?;
        let path = normalize_remote_path(path);
        let mut state = self.state.lock();
        match node_kind(&state.nodes, &path) {
            Some(Kind::File) => {
                state.nodes.remove(&path);
                Ok(())
            }
            Some(Kind::Dir) => Err(record(&mut state, failure("Is a directory"))),
            None => Err(record(&mut state, no_such_file(&path))),
        }
    }

    async fn remove_directory(&self, path: &str) -> Result<(), HandleError> {
        self.enter("remove_directory", path).await?;
        let path = normalize_remote_path(path);
        let mut state = self.state.lock();
        let empty = child_paths(&state.nodes, &path).is_empty();
        match node_kind(&state.nodes, &path) {
            Some(Kind::Dir) if !empty => Err(record(&mut state, failure("Directory not empty"))),
            Some(Kind::Dir) => {
                state.nodes.remove(&path);
                Ok(())
            }
            Some(Kind::File) => Err(record(&mut state, failure("Not a directory"))),
            None => Err(record(&mut state, no_such_file(&path))),
        }
    }

    async fn create_directory(&self, path: &str) -> Result<(), HandleError> {
        self.enter("create_directory", path).await?;
        let path = normalize_remote_path(path);
        let mut state = self.state.lock();
        if state.nodes.contains_key(&path) {
            return Err(record(&mut state, failure("File exists")));
        }
        let parent_is_dir = remote_parent(&path)
            .map_or(false, |p| node_kind(&state.nodes, &p) == Some(Kind::Dir));
        if !parent_is_dir {
            return Err(record(&mut state, no_such_file(&path)));
        }
        state.nodes.insert(path, Node::Dir);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), HandleError> {
        self.enter("rename", from).await?;
        let from = normalize_remote_path(from);
        let to = normalize_remote_path(to);
        let mut state = self.state.lock();
        if !state.nodes.contains_key(&from) {
            return Err(record(&mut state, no_such_file(&from)));
        }
        if state.nodes.contains_key(&to) {
            return Err(record(&mut state, failure("Destination exists")));
        }
        let prefix = format!("{}/", from);
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|p| **p == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = state.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                state.nodes.insert(new, node);
            }
        }
        Ok(())
    }

    async fn copy_remote(
        &self,
        from: &str,
        to: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError> {
        self.enter("copy", from).await?;
        let from = normalize_remote_path(from);
        let to = normalize_remote_path(to);
        let node = self.state.lock().nodes.get(&from).cloned();
        match node {
            Some(Node::Dir) => {
                self.create_directory(&to).await?;
                let children = child_paths(&self.state.lock().nodes, &from);
                let mut total = 0;
                for child in children {
                    let name = child.rsplit('/').next().unwrap_or_default().to_string();
                    let target = format!("{}/{}", to, name);
                    total += Box::pin(self.copy_remote(&child, &target, progress)).await?;
                }
                Ok(total)
            }
            Some(Node::File(data)) => {
                let mut moved = 0u64;
                for chunk in data.chunks(CHUNK) {
                    moved += chunk.len() as u64;
                    if !progress(moved) {
                        return self.fail(HandleError::Cancelled);
                    }
                }
                self.state.lock().nodes.insert(to.clone(), Node::File(data));
                self.file_done(&to);
                Ok(moved)
            }
            Some(Node::DanglingLink) | None => self.fail(no_such_file(&from)),
        }
    }

    async fn read_file(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError> {
        self.enter("read", path).await?;
        let data = match self.read(path) {
            Some(data) => data,
            None => return self.fail(no_such_file(path)),
        };
        let mut moved = 0u64;
        for chunk in data.chunks(CHUNK) {
            sink.write_all(chunk).await?;
            moved += chunk.len() as u64;
            if !progress(moved) {
                return self.fail(HandleError::Cancelled);
            }
        }
        sink.flush().await?;
        self.file_done(path);
        Ok(moved)
    }

    async fn write_file(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        path: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError> {
        self.enter("write", path).await?;
        let path = normalize_remote_path(path);
        {
            let mut state = self.state.lock();
            let parent_is_dir = remote_parent(&path)
                .map_or(false, |p| node_kind(&state.nodes, &p) == Some(Kind::Dir));
            if !parent_is_dir {
                return Err(record(&mut state, no_such_file(&path)));
            }
            // Opening for write creates the (still empty) file
            state.nodes.insert(path.clone(), Node::File(Vec::new()));
        }
        let mut data = Vec::new();
        let mut buf = [0u8; CHUNK];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            self.state
                .lock()
                .nodes
                .insert(path.clone(), Node::File(data.clone()));
            if !progress(data.len() as u64) {
                return self.fail(HandleError::Cancelled);
            }
        }
        self.file_done(&path);
        Ok(data.len() as u64)
    }

    async fn free_space(&self, _path: &str) -> Option<u64> {
        self.state.lock().free_space
    }

    fn last_connection_error(&self) -> Option<ConnectionErrorCode> {
        self.state.lock().last.connection
    }

    fn last_protocol_error(&self) -> Option<StatusCode> {
        self.state.lock().last.protocol
    }

    async fn close(&self) -> Result<(), HandleError> {
        self.state.lock().closed = true;
        Ok(())
    }
}
