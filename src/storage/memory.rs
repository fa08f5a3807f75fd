//! An in-memory storage backend.
//!
//! The reference backend: a tree of files and directories held entirely in
//! memory.  Directories enumerate in name order (the map is a `BTreeMap`, so
//! listings are deterministic), and writers stage their bytes until `close`.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

use super::{
    DirHandle, DirStream, EntryKind, EntryMeta, FileHandle, FileWriter, Snapshot, StorageError,
    StorageResult,
};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

/// The contents of one tree node.
enum Node {
    File(FileNode),
    Dir(DirNode),
}

struct FileNode {
    data: Vec<u8>,
    mtime_ms: u64,
}

type DirNode = BTreeMap<String, Arc<Mutex<Node>>>;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A directory in the in-memory tree.
#[derive(Clone)]
pub struct MemoryDir {
    node: Arc<Mutex<Node>>,
}

impl MemoryDir {
    /// Creates a fresh, empty directory tree.
    pub fn new() -> Self {
        MemoryDir {
            node: Arc::new(Mutex::new(Node::Dir(BTreeMap::new()))),
        }
    }

    /// Installs a file with the given contents, replacing any existing
    /// entry.  A convenience for seeding test and demo trees.
    pub fn install_file(&self, name: &str, data: &[u8]) {
        let mut guard = self.lock();
        if let Node::Dir(children) = &mut *guard {
            children.insert(
                String::from(name),
                Arc::new(Mutex::new(Node::File(FileNode {
                    data: data.to_vec(),
                    mtime_ms: now_ms(),
                }))),
            );
        }
    }

    /// Installs an empty subdirectory and returns a handle onto it.
    pub fn install_dir(&self, name: &str) -> MemoryDir {
        let child = Arc::new(Mutex::new(Node::Dir(BTreeMap::new())));
        let mut guard = self.lock();
        if let Node::Dir(children) = &mut *guard {
            children.insert(String::from(name), child.clone());
        }
        MemoryDir { node: child }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Node> {
        // A poisoned lock means another thread panicked mid-mutation; the
        // tree is test/host data, so propagating the panic is fine.
        self.node.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for MemoryDir {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirHandle for MemoryDir {
    async fn open_file(&self, name: &str, create: bool) -> StorageResult<Arc<dyn FileHandle>> {
        let mut guard = self.lock();
        let children = match &mut *guard {
            Node::Dir(children) => children,
            Node::File(_) => return Err(StorageError::TypeMismatch),
        };
        if let Some(child) = children.get(name) {
            return match &*child.lock().unwrap_or_else(|poison| poison.into_inner()) {
                Node::File(_) => Ok(Arc::new(MemoryFile {
                    node: child.clone(),
                })),
                Node::Dir(_) => Err(StorageError::TypeMismatch),
            };
        }
        if !create {
            return Err(StorageError::NotFound);
        }
        let child = Arc::new(Mutex::new(Node::File(FileNode {
            data: Vec::new(),
            mtime_ms: now_ms(),
        })));
        children.insert(String::from(name), child.clone());
        Ok(Arc::new(MemoryFile { node: child }))
    }

    async fn open_dir(&self, name: &str, create: bool) -> StorageResult<Arc<dyn DirHandle>> {
        let mut guard = self.lock();
        let children = match &mut *guard {
            Node::Dir(children) => children,
            Node::File(_) => return Err(StorageError::TypeMismatch),
        };
        if let Some(child) = children.get(name) {
            return match &*child.lock().unwrap_or_else(|poison| poison.into_inner()) {
                Node::Dir(_) => Ok(Arc::new(MemoryDir {
                    node: child.clone(),
                })),
                Node::File(_) => Err(StorageError::TypeMismatch),
            };
        }
        if !create {
            return Err(StorageError::NotFound);
        }
        let child = Arc::new(Mutex::new(Node::Dir(BTreeMap::new())));
        children.insert(String::from(name), child.clone());
        Ok(Arc::new(MemoryDir { node: child }))
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> StorageResult<()> {
        let mut guard = self.lock();
        let children = match &mut *guard {
            Node::Dir(children) => children,
            Node::File(_) => return Err(StorageError::TypeMismatch),
        };
        let child = children.get(name).ok_or(StorageError::NotFound)?;
        {
            let child = child.lock().unwrap_or_else(|poison| poison.into_inner());
            if let Node::Dir(grandchildren) = &*child {
                if !grandchildren.is_empty() && !recursive {
                    return Err(StorageError::NotEmpty);
                }
            }
        }
        children.remove(name);
        Ok(())
    }

    async fn entries(&self) -> StorageResult<Box<dyn DirStream>> {
        let guard = self.lock();
        let children = match &*guard {
            Node::Dir(children) => children,
            Node::File(_) => return Err(StorageError::TypeMismatch),
        };
        let listing = children
            .iter()
            .map(|(name, child)| {
                let kind = match &*child.lock().unwrap_or_else(|poison| poison.into_inner()) {
                    Node::File(_) => EntryKind::File,
                    Node::Dir(_) => EntryKind::Directory,
                };
                EntryMeta {
                    name: name.clone(),
                    kind,
                }
            })
            .collect();
        Ok(Box::new(MemoryDirStream { listing }))
    }
}

struct MemoryDirStream {
    listing: VecDeque<EntryMeta>,
}

#[async_trait]
impl DirStream for MemoryDirStream {
    async fn next(&mut self) -> StorageResult<Option<EntryMeta>> {
        Ok(self.listing.pop_front())
    }
}

/// A file in the in-memory tree.
pub struct MemoryFile {
    node: Arc<Mutex<Node>>,
}

#[async_trait]
impl FileHandle for MemoryFile {
    async fn snapshot(&self) -> StorageResult<Box<dyn Snapshot>> {
        let guard = self.node.lock().unwrap_or_else(|poison| poison.into_inner());
        match &*guard {
            Node::File(file) => Ok(Box::new(MemorySnapshot {
                data: Arc::new(file.data.clone()),
                mtime_ms: file.mtime_ms,
            })),
            Node::Dir(_) => Err(StorageError::TypeMismatch),
        }
    }

    async fn create_writer(
        &self,
        keep_existing_data: bool,
    ) -> StorageResult<Box<dyn FileWriter>> {
        let staged = if keep_existing_data {
            let guard = self.node.lock().unwrap_or_else(|poison| poison.into_inner());
            match &*guard {
                Node::File(file) => file.data.clone(),
                Node::Dir(_) => return Err(StorageError::TypeMismatch),
            }
        } else {
            Vec::new()
        };
        Ok(Box::new(MemoryWriter {
            node: self.node.clone(),
            staged,
        }))
    }
}

struct MemorySnapshot {
    data: Arc<Vec<u8>>,
    mtime_ms: u64,
}

#[async_trait]
impl Snapshot for MemorySnapshot {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn last_modified_ms(&self) -> u64 {
        self.mtime_ms
    }

    async fn read_at(&self, offset: u64, max: usize) -> StorageResult<Vec<u8>> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(max).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }
}

struct MemoryWriter {
    node: Arc<Mutex<Node>>,
    staged: Vec<u8>,
}

#[async_trait]
impl FileWriter for MemoryWriter {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<u64> {
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.staged.len() {
            self.staged.resize(end, 0);
        }
        self.staged[offset..end].copy_from_slice(data);
        Ok(data.len() as u64)
    }

    async fn truncate(&mut self, size: u64) -> StorageResult<()> {
        self.staged.resize(size as usize, 0);
        Ok(())
    }

    async fn close(self: Box<Self>) -> StorageResult<()> {
        let mut guard = self.node.lock().unwrap_or_else(|poison| poison.into_inner());
        match &mut *guard {
            Node::File(file) => {
                file.data = self.staged;
                file.mtime_ms = now_ms();
                Ok(())
            }
            Node::Dir(_) => Err(StorageError::TypeMismatch),
        }
    }

    fn abort(self: Box<Self>) {}
}
