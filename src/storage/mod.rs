//! The storage abstraction.
//!
//! The runtime treats its backing store purely behaviourally: a tree of
//! directory and file handles with asynchronous open/read/write/truncate/
//! enumerate/remove operations.  Backends may be an in-memory tree (see
//! [`memory`]), a host filesystem, or a browser-supplied directory handle;
//! the call handlers never assume which.
//!
//! Writers are *staged*: bytes handed to a [`FileWriter`] become observable
//! to subsequent snapshots only once the writer is closed.  Dropping or
//! aborting a writer discards the staged data.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

pub mod memory;

use crate::types::ErrNo;
use async_trait::async_trait;
use err_derive::Error;
use std::sync::Arc;

/// Backend operations either return a result of type `T` or a classified
/// storage error.
pub type StorageResult<T> = Result<T, StorageError>;

/// The failure modes a backing store may report.  Each maps onto exactly one
/// WASI `errno`; `TypeMismatch` is refined at the call site, where it is
/// known whether a file or a directory was expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No entry with the requested name exists.
    #[error(display = "entry not found")]
    NotFound,
    /// An entry exists, but it is a file where a directory was expected or
    /// vice versa.
    #[error(display = "entry has a different kind")]
    TypeMismatch,
    /// The backing store refused the operation.
    #[error(display = "access denied by the backing store")]
    AccessDenied,
    /// A non-recursive removal hit a non-empty directory.
    #[error(display = "directory is not empty")]
    NotEmpty,
    /// The operation was cancelled mid-flight.
    #[error(display = "operation aborted")]
    Aborted,
    /// The backend cannot express the operation at all.
    #[error(display = "operation not supported by the backing store")]
    Unsupported,
}

impl From<StorageError> for ErrNo {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound => ErrNo::NoEnt,
            // Call sites that know the expected kind refine this to
            // IsDir/NotDir before the error reaches the guest.
            StorageError::TypeMismatch => ErrNo::Inval,
            StorageError::AccessDenied => ErrNo::Access,
            StorageError::NotEmpty => ErrNo::NotEmpty,
            StorageError::Aborted => ErrNo::Canceled,
            StorageError::Unsupported => ErrNo::NoSys,
        }
    }
}

/// The kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One directory entry as reported by enumeration, in backend order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub name: String,
    pub kind: EntryKind,
}

/// A directory capability.
#[async_trait]
pub trait DirHandle: Send + Sync {
    /// Opens the file named `name` directly under this directory, creating
    /// it when `create` is set and it does not exist.  An existing directory
    /// of that name is a `TypeMismatch`.
    async fn open_file(&self, name: &str, create: bool) -> StorageResult<Arc<dyn FileHandle>>;

    /// Opens the directory named `name` directly under this directory,
    /// creating it when `create` is set.  An existing file of that name is a
    /// `TypeMismatch`.
    async fn open_dir(&self, name: &str, create: bool) -> StorageResult<Arc<dyn DirHandle>>;

    /// Removes the entry named `name`.  Removing a non-empty directory
    /// requires `recursive`.
    async fn remove_entry(&self, name: &str, recursive: bool) -> StorageResult<()>;

    /// Starts a fresh enumeration of this directory.
    async fn entries(&self) -> StorageResult<Box<dyn DirStream>>;
}

/// An in-progress directory enumeration.
#[async_trait]
pub trait DirStream: Send {
    /// The next entry, or `None` once the listing is exhausted.
    async fn next(&mut self) -> StorageResult<Option<EntryMeta>>;
}

/// A file capability.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// Takes a read view of the file as it stands now.  Later writes do not
    /// alter an existing snapshot.
    async fn snapshot(&self) -> StorageResult<Box<dyn Snapshot>>;

    /// Opens a writer.  With `keep_existing_data` the staged contents start
    /// from the current file bytes, otherwise from empty.
    async fn create_writer(&self, keep_existing_data: bool)
        -> StorageResult<Box<dyn FileWriter>>;
}

/// An immutable read view of a file.
#[async_trait]
pub trait Snapshot: Send + Sync {
    fn size(&self) -> u64;

    /// Last-modified time in milliseconds since the epoch.
    fn last_modified_ms(&self) -> u64;

    /// Reads up to `max` bytes starting at `offset`.  Short reads only occur
    /// at end of file.
    async fn read_at(&self, offset: u64, max: usize) -> StorageResult<Vec<u8>>;
}

/// A staged writer on a file.
#[async_trait]
pub trait FileWriter: Send {
    /// Writes `data` at byte position `offset`, zero-filling any gap beyond
    /// the current staged length.  Returns the number of bytes written.
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<u64>;

    /// Resizes the staged contents; growth zero-fills.
    async fn truncate(&mut self, size: u64) -> StorageResult<()>;

    /// Commits the staged contents to the backing store.
    async fn close(self: Box<Self>) -> StorageResult<()>;

    /// Discards the staged contents.
    fn abort(self: Box<Self>);
}
