//! The WASI preview-1 call handlers.
//!
//! [`Bindings`] wraps the open-file table, the standard streams and the
//! process metadata behind the strictly-typed WASI API, and converts wasm
//! number-and-address parameters into properly typed parameters and
//! Rust-style error handling into C-style return codes.
//!
//! The WebAssembly engine stays outside this crate: it implements
//! [`MemoryHandler`] over its linear memory, registers every import named by
//! [`WasiApiName`] under [`Bindings::WASI_SNAPSHOT_MODULE_NAME`], checks the
//! import types against [`WasiApiName::signature`], and funnels each trap
//! into [`Bindings::dispatch`].
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

#![allow(non_camel_case_types, clippy::too_many_arguments)]

use crate::abi::{AbiType, MemoryHandler, Pack, StringCollection, WasmValue};
use crate::fs::{
    expect_file, open_resolved, FdTable, NewHandle, OpenHandle, OpenKind, FIRST_PREOPEN_FD,
};
use crate::platform;
use crate::storage::{DirHandle, EntryKind, FileHandle, Snapshot};
use crate::types::{
    Advice, ClockId, DirEnt, ErrNo, Event, EventType, Fd, FdFlags, FdStat, FileStat,
    FileSystemResult, FileType, IoVec, LookupFlags, OpenFlags, Prestat, Rights, SubClockFlags,
    Subscription, SubscriptionUnion, Timestamp, Whence,
};
use crate::wasi::strace::Strace;
use crate::{CancelToken, Config};
use err_derive::Error;
use log::warn;
use num::FromPrimitive;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use strum_macros::{EnumString, IntoStaticStr};

////////////////////////////////////////////////////////////////////////////////
// The import table.
////////////////////////////////////////////////////////////////////////////////

/// List of the WASI API.  Converts between primitive numbers and enum values
/// via the `primitive` derives, and between the lowercase import names and
/// enum values via `strum`.
#[derive(
    IntoStaticStr,
    EnumString,
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum WasiApiName {
    ARGS_GET = 1,
    ARGS_SIZES_GET,
    ENVIRON_GET,
    ENVIRON_SIZES_GET,
    CLOCK_RES_GET,
    CLOCK_TIME_GET,
    FD_ADVISE,
    FD_ALLOCATE,
    FD_CLOSE,
    FD_DATASYNC,
    FD_FDSTAT_GET,
    FD_FDSTAT_SET_FLAGS,
    FD_FDSTAT_SET_RIGHTS,
    FD_FILESTAT_GET,
    FD_FILESTAT_SET_SIZE,
    FD_FILESTAT_SET_TIMES,
    FD_PREAD,
    FD_PRESTAT_GET,
    FD_PRESTAT_DIR_NAME,
    FD_PWRITE,
    FD_READ,
    FD_READDIR,
    FD_RENUMBER,
    FD_SEEK,
    FD_SYNC,
    FD_TELL,
    FD_WRITE,
    PATH_CREATE_DIRECTORY,
    PATH_FILESTAT_GET,
    PATH_FILESTAT_SET_TIMES,
    PATH_LINK,
    PATH_OPEN,
    PATH_READLINK,
    PATH_REMOVE_DIRECTORY,
    PATH_RENAME,
    PATH_SYMLINK,
    PATH_UNLINK_FILE,
    POLL_ONEOFF,
    PROC_EXIT,
    PROC_RAISE,
    SCHED_YIELD,
    RANDOM_GET,
    SOCK_RECV,
    SOCK_SEND,
    SOCK_SHUTDOWN,
    #[strum(disabled)]
    _LAST,
}

impl WasiApiName {
    /// Every real import, in declaration order.
    pub fn all() -> impl Iterator<Item = WasiApiName> {
        (1..WasiApiName::_LAST as u64).filter_map(WasiApiName::from_u64)
    }

    /// The import's name as the guest spells it.
    pub fn import_name(self) -> &'static str {
        self.into()
    }
}

// Representation types of the WASI values in the wasm32 ABI.  Pointers,
// lengths, descriptors and flag words travel as I32; rights masks, offsets,
// sizes, timestamps and cookies travel as I64.
const POINTER: AbiType = AbiType::I32;
const SIZE: AbiType = AbiType::I32;
const FD: AbiType = AbiType::I32;
const FLAGS: AbiType = AbiType::I32;
const RIGHTS: AbiType = AbiType::I64;
const FILESIZE: AbiType = AbiType::I64;
const FILEDELTA: AbiType = AbiType::I64;
const TIMESTAMP: AbiType = AbiType::I64;
const DIRCOOKIE: AbiType = AbiType::I64;
const ERRNO: AbiType = AbiType::I32;

impl WasiApiName {
    /// The parameter list and return type of the import, for engine-side
    /// registration and type checking.  Every import returns an `errno`
    /// except `proc_exit`, which does not return at all.
    pub fn signature(self) -> (Vec<AbiType>, Option<AbiType>) {
        let params = match self {
            WasiApiName::ARGS_GET => vec![POINTER, POINTER],
            WasiApiName::ARGS_SIZES_GET => vec![POINTER, POINTER],
            WasiApiName::ENVIRON_GET => vec![POINTER, POINTER],
            WasiApiName::ENVIRON_SIZES_GET => vec![POINTER, POINTER],
            WasiApiName::CLOCK_RES_GET => vec![FLAGS, POINTER],
            WasiApiName::CLOCK_TIME_GET => vec![FLAGS, TIMESTAMP, POINTER],
            WasiApiName::FD_ADVISE => vec![FD, FILESIZE, FILESIZE, FLAGS],
            WasiApiName::FD_ALLOCATE => vec![FD, FILESIZE, FILESIZE],
            WasiApiName::FD_CLOSE => vec![FD],
            WasiApiName::FD_DATASYNC => vec![FD],
            WasiApiName::FD_FDSTAT_GET => vec![FD, POINTER],
            WasiApiName::FD_FDSTAT_SET_FLAGS => vec![FD, FLAGS],
            WasiApiName::FD_FDSTAT_SET_RIGHTS => vec![FD, RIGHTS, RIGHTS],
            WasiApiName::FD_FILESTAT_GET => vec![FD, POINTER],
            WasiApiName::FD_FILESTAT_SET_SIZE => vec![FD, FILESIZE],
            WasiApiName::FD_FILESTAT_SET_TIMES => vec![FD, TIMESTAMP, TIMESTAMP, FLAGS],
            WasiApiName::FD_PREAD => vec![FD, POINTER, SIZE, FILESIZE, POINTER],
            WasiApiName::FD_PRESTAT_GET => vec![FD, POINTER],
            WasiApiName::FD_PRESTAT_DIR_NAME => vec![FD, POINTER, SIZE],
            WasiApiName::FD_PWRITE => vec![FD, POINTER, SIZE, FILESIZE, POINTER],
            WasiApiName::FD_READ => vec![FD, POINTER, SIZE, POINTER],
            WasiApiName::FD_READDIR => vec![FD, POINTER, SIZE, DIRCOOKIE, POINTER],
            WasiApiName::FD_RENUMBER => vec![FD, FD],
            WasiApiName::FD_SEEK => vec![FD, FILEDELTA, FLAGS, POINTER],
            WasiApiName::FD_SYNC => vec![FD],
            WasiApiName::FD_TELL => vec![FD, POINTER],
            WasiApiName::FD_WRITE => vec![FD, POINTER, SIZE, POINTER],
            WasiApiName::PATH_CREATE_DIRECTORY => vec![FD, POINTER, SIZE],
            WasiApiName::PATH_FILESTAT_GET => vec![FD, FLAGS, POINTER, SIZE, POINTER],
            WasiApiName::PATH_FILESTAT_SET_TIMES => {
                vec![FD, FLAGS, POINTER, SIZE, TIMESTAMP, TIMESTAMP, FLAGS]
            }
            WasiApiName::PATH_LINK => vec![FD, FLAGS, POINTER, SIZE, FD, POINTER, SIZE],
            WasiApiName::PATH_OPEN => {
                vec![FD, FLAGS, POINTER, SIZE, FLAGS, RIGHTS, RIGHTS, FLAGS, POINTER]
            }
            WasiApiName::PATH_READLINK => vec![FD, POINTER, SIZE, POINTER, SIZE, POINTER],
            WasiApiName::PATH_REMOVE_DIRECTORY => vec![FD, POINTER, SIZE],
            WasiApiName::PATH_RENAME => vec![FD, POINTER, SIZE, FD, POINTER, SIZE],
            WasiApiName::PATH_SYMLINK => vec![POINTER, SIZE, FD, POINTER, SIZE],
            WasiApiName::PATH_UNLINK_FILE => vec![FD, POINTER, SIZE],
            WasiApiName::POLL_ONEOFF => vec![POINTER, POINTER, SIZE, POINTER],
            WasiApiName::PROC_EXIT => vec![SIZE],
            WasiApiName::PROC_RAISE => vec![FLAGS],
            WasiApiName::SCHED_YIELD => vec![],
            WasiApiName::RANDOM_GET => vec![POINTER, SIZE],
            WasiApiName::SOCK_RECV => vec![FD, POINTER, SIZE, FLAGS, POINTER, POINTER],
            WasiApiName::SOCK_SEND => vec![FD, POINTER, SIZE, FLAGS, POINTER],
            WasiApiName::SOCK_SHUTDOWN => vec![FD, FLAGS],
            WasiApiName::_LAST => vec![],
        };
        let ret = if self == WasiApiName::PROC_EXIT {
            None
        } else {
            Some(ERRNO)
        };
        (params, ret)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Fatal host errors.
////////////////////////////////////////////////////////////////////////////////

/// A fatal, runtime condition that terminates guest execution immediately.
/// These never reach the wasm program as an `errno`: they either indicate a
/// malformed guest (bad import arguments) or carry the out-of-band exit
/// signal raised by `proc_exit`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FatalError {
    /// The guest invoked an import this runtime does not provide.
    #[error(display = "FatalError: unknown host import '{}'.", _0)]
    UnknownHostFunction(String),
    /// The engine passed an argument list that does not match the import's
    /// signature.  The engine should have rejected the module at link time.
    #[error(
        display = "FatalError: bad arguments passed to host function '{:?}'.",
        function_name
    )]
    BadArgumentsToHostFunction {
        /// The name of the host function that was being invoked.
        function_name: WasiApiName,
    },
    /// The guest called `proc_exit`; the payload is the process exit code.
    /// This unwinds the call stack without resuming the guest.
    #[error(display = "FatalError: guest exited with code {}.", _0)]
    Exit(u32),
}

impl FatalError {
    /// The exit code carried by an `Exit` signal, if that is what this is.
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            FatalError::Exit(code) => Some(*code),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// The bindings value.
////////////////////////////////////////////////////////////////////////////////

/// All host-side state for one guest run: the open-file table, the packed
/// process metadata, the standard streams and the clocks.  There is no
/// global state anywhere in the runtime; dropping the `Bindings` releases
/// every capability the guest ever had.
pub struct Bindings {
    /// The open-file table, preopens included.
    fdtable: FdTable,
    /// argv, with the program name prepended at position 0.
    argv: StringCollection,
    /// `KEY=VALUE` environment entries.
    environ: StringCollection,
    stdin: Box<dyn crate::stream::InputStream>,
    stdout: Box<dyn crate::stream::OutputStream>,
    stderr: Box<dyn crate::stream::OutputStream>,
    /// Observed by long-running handlers; cancellation aborts them with
    /// `Canceled`.
    cancel: CancelToken,
    /// Origin of the guest's monotonic clock.
    monotonic_origin: Instant,
    /// The exit code, if the program has called `proc_exit`.
    exit_code: Option<u32>,
    enable_strace: bool,
}

impl Bindings {
    /// The name of the wasm program's entry point.
    pub const ENTRY_POINT_NAME: &'static str = "_start";
    /// The name of the wasm program's linear memory export.
    pub const LINEAR_MEMORY_NAME: &'static str = "memory";
    /// The module name under which every import must be registered.
    pub const WASI_SNAPSHOT_MODULE_NAME: &'static str = "wasi_snapshot_preview1";

    /// Builds the bindings for one guest run.  Every configuration field is
    /// captured here, once; nothing reloads at runtime.
    pub fn new(config: Config) -> Self {
        let Config {
            preopens,
            stdin,
            stdout,
            stderr,
            program_name,
            arguments,
            environment,
            enable_strace,
            cancel,
        } = config;
        let argv = StringCollection::new(
            std::iter::once(program_name.as_str()).chain(arguments.iter().map(String::as_str)),
        );
        let environ = StringCollection::new(
            environment
                .iter()
                .map(|(key, value)| format!("{}={}", key, value)),
        );
        Bindings {
            fdtable: FdTable::new(preopens),
            argv,
            environ,
            stdin,
            stdout,
            stderr,
            cancel: cancel.unwrap_or_default(),
            monotonic_origin: Instant::now(),
            exit_code: None,
            enable_strace,
        }
    }

    /// The exit code recorded by `proc_exit`, if any.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// The first descriptor beyond the preopen range.
    pub fn first_non_preopen_fd(&self) -> u32 {
        self.fdtable.first_non_preopen_fd()
    }

    fn strace(&self, func: &str) -> Strace {
        Strace::func(self.enable_strace, func)
    }

    fn monotonic_ns(&self) -> u64 {
        self.monotonic_origin.elapsed().as_nanos() as u64
    }

    /// Converts a raw guest integer to its typed enumeration, or fails the
    /// call with `Inval`.
    fn decode_wasi_arg<T: FromPrimitive>(arg: u64) -> FileSystemResult<T> {
        T::from_u64(arg).ok_or(ErrNo::Inval)
    }

    ////////////////////////////////////////////////////////////////////////
    // Process metadata.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) fn args_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        argv_pointers: u32,
        argv_buf: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("args_get");
        let result = memory_ref.write_string_collection(&self.argv, argv_pointers, argv_buf);
        strace.arg_dots();
        strace.result(result)
    }

    pub(crate) fn args_sizes_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        count_address: u32,
        size_address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("args_sizes_get");
        let result = (|| {
            memory_ref.write_u32(count_address, self.argv.count())?;
            memory_ref.write_u32(size_address, self.argv.byte_len())
        })();
        strace.arg_p_u32(memory_ref, count_address);
        strace.arg_p_u32(memory_ref, size_address);
        strace.result(result)
    }

    pub(crate) fn environ_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        environ_pointers: u32,
        environ_buf: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("environ_get");
        let result =
            memory_ref.write_string_collection(&self.environ, environ_pointers, environ_buf);
        strace.arg_dots();
        strace.result(result)
    }

    pub(crate) fn environ_sizes_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        count_address: u32,
        size_address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("environ_sizes_get");
        let result = (|| {
            memory_ref.write_u32(count_address, self.environ.count())?;
            memory_ref.write_u32(size_address, self.environ.byte_len())
        })();
        strace.arg_p_u32(memory_ref, count_address);
        strace.arg_p_u32(memory_ref, size_address);
        strace.result(result)
    }

    pub(crate) fn proc_exit<M: MemoryHandler>(&mut self, _: &mut M, exit_code: u32) {
        let mut strace = self.strace("proc_exit");
        strace.arg_dec(exit_code);
        let _ = strace.result(Ok(()));
        self.exit_code = Some(exit_code);
    }

    pub(crate) fn proc_raise<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        signal: u8,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("proc_raise");
        strace.arg_dec(signal);
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn sched_yield<M: MemoryHandler>(&mut self, _: &mut M) -> FileSystemResult<()> {
        // The host is cooperative already; yielding is trivially satisfied.
        let mut strace = self.strace("sched_yield");
        strace.result(Ok(()))
    }

    pub(crate) fn random_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        buf_address: u32,
        length: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("random_get");
        let result = (|| {
            let mut bytes = vec![0u8; length as usize];
            platform::fill_random(&mut bytes)?;
            memory_ref.write_buffer(buf_address, &bytes)
        })();
        strace.arg_buffer(memory_ref, buf_address, length);
        strace.result(result)
    }

    ////////////////////////////////////////////////////////////////////////
    // Clocks.
    ////////////////////////////////////////////////////////////////////////

    fn clock_now(&self, clock_id: ClockId) -> FileSystemResult<u64> {
        match clock_id {
            ClockId::RealTime => Ok(platform::wall_clock_ns()),
            ClockId::Monotonic => Ok(self.monotonic_ns()),
            ClockId::ProcessCpuTime | ClockId::ThreadCpuTime => Err(ErrNo::NoSys),
        }
    }

    pub(crate) fn clock_res_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        clock_id: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("clock_res_get");
        let result = (|| {
            let clock_id: ClockId = Self::decode_wasi_arg(clock_id as u64)?;
            match clock_id {
                ClockId::RealTime | ClockId::Monotonic => {
                    memory_ref.write_u64(address, platform::CLOCK_RESOLUTION_NS)
                }
                _ => Err(ErrNo::NoSys),
            }
        })();
        strace.arg_dec(clock_id);
        strace.arg_p_u64(memory_ref, address);
        strace.result(result)
    }

    pub(crate) fn clock_time_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        clock_id: u32,
        precision: u64,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("clock_time_get");
        let result = (|| {
            let clock_id: ClockId = Self::decode_wasi_arg(clock_id as u64)?;
            let now = self.clock_now(clock_id)?;
            memory_ref.write_u64(address, now)
        })();
        strace.arg_dec(clock_id);
        strace.arg_dec(precision);
        strace.arg_p_u64(memory_ref, address);
        strace.result(result)
    }

    ////////////////////////////////////////////////////////////////////////
    // Pre-open inspection.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) fn fd_prestat_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_prestat_get");
        let result = (|| {
            let preopen = self.fdtable.get_preopen(Fd(fd))?;
            let prestat = Prestat {
                name_len: preopen.mount.len() as u32,
            };
            memory_ref.pack(address, &prestat)
        })();
        strace.arg_dec(fd);
        strace.arg_p_u64(memory_ref, address);
        strace.result(result)
    }

    pub(crate) fn fd_prestat_dir_name<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        buf_address: u32,
        size: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_prestat_dir_name");
        let result = (|| {
            let preopen = self.fdtable.get_preopen(Fd(fd))?;
            let name = preopen.mount.as_bytes();
            if name.len() > size as usize {
                return Err(ErrNo::NameTooLong);
            }
            memory_ref.write_buffer(buf_address, name)
        })();
        strace.arg_dec(fd);
        strace.arg_path(memory_ref, buf_address, size);
        strace.result(result)
    }

    ////////////////////////////////////////////////////////////////////////
    // File descriptor lifecycle.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) async fn path_open<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        dir_fd: u32,
        dir_flags: u32,
        path_address: u32,
        path_length: u32,
        oflags: u16,
        rights_base: u64,
        rights_inheriting: u64,
        fd_flags: u16,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_open");
        let result = async {
            let path = memory_ref.read_cstring(path_address, path_length)?;
            let _dir_flags = LookupFlags::from_bits_truncate(dir_flags);
            let _rights_base = Rights::from_bits_truncate(rights_base);
            let _rights_inheriting = Rights::from_bits_truncate(rights_inheriting);
            let mut fd_flags = FdFlags::from_bits(fd_flags).ok_or(ErrNo::Inval)?;
            if fd_flags.contains(FdFlags::NONBLOCK) {
                // The backing store is always blocking from the guest's
                // point of view.
                warn!("path_open: clearing NONBLOCK on {:?}", path);
                fd_flags.remove(FdFlags::NONBLOCK);
            }
            if !fd_flags.is_empty() {
                return Err(ErrNo::NoSys);
            }
            let oflags = OpenFlags::from_bits(oflags).ok_or(ErrNo::Inval)?;
            let kind = if oflags.contains(OpenFlags::DIRECTORY) {
                OpenKind::Dir
            } else {
                OpenKind::Any
            };
            let (preopen_fd, relative) = self.fdtable.locate(Fd(dir_fd), &path)?;
            let new_fd = self.fdtable.open(preopen_fd, &relative, oflags, kind).await?;
            memory_ref.write_u32(address, new_fd.into())
        }
        .await;
        strace.arg_dec(dir_fd);
        strace.arg_hex(dir_flags);
        strace.arg_path(memory_ref, path_address, path_length);
        strace.arg_hex(oflags);
        strace.arg_rights(rights_base);
        strace.arg_rights(rights_inheriting);
        strace.arg_hex(fd_flags);
        strace.arg_p_u32(memory_ref, address);
        strace.result(result)
    }

    pub(crate) async fn fd_close<M: MemoryHandler>(
        &mut self,
        _memory_ref: &M,
        fd: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_close");
        let result = self.fdtable.close(Fd(fd)).await;
        strace.arg_dec(fd);
        strace.result(result)
    }

    pub(crate) async fn fd_renumber<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        old_fd: u32,
        new_fd: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_renumber");
        let result = self.fdtable.renumber(Fd(old_fd), Fd(new_fd)).await;
        strace.arg_dec(old_fd);
        strace.arg_dec(new_fd);
        strace.result(result)
    }

    ////////////////////////////////////////////////////////////////////////
    // I/O.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) async fn fd_read<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        iovec_base: u32,
        iovec_count: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_read");
        let result = async {
            let iovecs = memory_ref.unpack_array::<IoVec>(iovec_base, iovec_count)?;
            let mut total_read: u32 = 0;
            if fd == 0 {
                for iovec in &iovecs {
                    let bytes = self.stdin.read(iovec.len as usize);
                    memory_ref.write_buffer(iovec.buf, &bytes)?;
                    total_read += bytes.len() as u32;
                    if (bytes.len() as u32) < iovec.len {
                        break;
                    }
                }
            } else {
                let file = self.fdtable.get_file(Fd(fd))?;
                for iovec in &iovecs {
                    let position = file.position();
                    let bytes = file.read_at(position, iovec.len as usize).await?;
                    memory_ref.write_buffer(iovec.buf, &bytes)?;
                    file.set_position(position + bytes.len() as u64);
                    total_read += bytes.len() as u32;
                    if (bytes.len() as u32) < iovec.len {
                        break;
                    }
                }
            }
            memory_ref.write_u32(address, total_read)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_iovec(result, memory_ref, iovec_base, iovec_count, address);
        strace.arg_p_u32(memory_ref, address);
        strace.result(result)
    }

    pub(crate) async fn fd_write<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        iovec_base: u32,
        iovec_count: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_write");
        let result = async {
            let iovecs = memory_ref.unpack_array::<IoVec>(iovec_base, iovec_count)?;
            let mut total_written: u32 = 0;
            if fd == 1 || fd == 2 {
                let stream = if fd == 1 {
                    &mut self.stdout
                } else {
                    &mut self.stderr
                };
                for iovec in &iovecs {
                    let bytes = memory_ref.read_buffer(iovec.buf, iovec.len)?;
                    stream.write(&bytes);
                    total_written += bytes.len() as u32;
                }
            } else {
                let cancel = self.cancel.clone();
                let file = self.fdtable.get_file(Fd(fd))?;
                if cancel.is_cancelled() {
                    // Discard the staged writer; only committed bytes stay.
                    file.abort();
                    return Err(ErrNo::Canceled);
                }
                for iovec in &iovecs {
                    let bytes = memory_ref.read_buffer(iovec.buf, iovec.len)?;
                    let position = file.position();
                    let written = file.write_at(position, &bytes).await?;
                    file.set_position(position + written);
                    total_written += written as u32;
                }
            }
            memory_ref.write_u32(address, total_written)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_iovec(result, memory_ref, iovec_base, iovec_count, address);
        strace.arg_p_u32(memory_ref, address);
        strace.result(result)
    }

    pub(crate) async fn fd_pread<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        iovec_base: u32,
        iovec_count: u32,
        offset: u64,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_pread");
        let result = async {
            let iovecs = memory_ref.unpack_array::<IoVec>(iovec_base, iovec_count)?;
            let file = self.fdtable.get_file(Fd(fd))?;
            let mut offset = offset;
            let mut total_read: u32 = 0;
            for iovec in &iovecs {
                let bytes = file.read_at(offset, iovec.len as usize).await?;
                memory_ref.write_buffer(iovec.buf, &bytes)?;
                offset += bytes.len() as u64;
                total_read += bytes.len() as u32;
                if (bytes.len() as u32) < iovec.len {
                    break;
                }
            }
            memory_ref.write_u32(address, total_read)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_iovec(result, memory_ref, iovec_base, iovec_count, address);
        strace.arg_dec(offset);
        strace.arg_p_u32(memory_ref, address);
        strace.result(result)
    }

    pub(crate) async fn fd_pwrite<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        iovec_base: u32,
        iovec_count: u32,
        offset: u64,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_pwrite");
        let result = async {
            let iovecs = memory_ref.unpack_array::<IoVec>(iovec_base, iovec_count)?;
            let file = self.fdtable.get_file(Fd(fd))?;
            let mut offset = offset;
            let mut total_written: u32 = 0;
            for iovec in &iovecs {
                let bytes = memory_ref.read_buffer(iovec.buf, iovec.len)?;
                let written = file.write_at(offset, &bytes).await?;
                offset += written;
                total_written += written as u32;
            }
            memory_ref.write_u32(address, total_written)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_iovec(result, memory_ref, iovec_base, iovec_count, address);
        strace.arg_dec(offset);
        strace.arg_p_u32(memory_ref, address);
        strace.result(result)
    }

    pub(crate) async fn fd_seek<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        offset: i64,
        whence: u8,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_seek");
        let result = async {
            let whence: Whence = Self::decode_wasi_arg(whence as u64)?;
            let file = self.fdtable.get_file(Fd(fd))?;
            let base = match whence {
                Whence::Start => 0,
                Whence::Current => file.position(),
                Whence::End => file.size().await?,
            };
            let new_position = if offset >= 0 {
                base.checked_add(offset as u64).ok_or(ErrNo::Inval)?
            } else {
                base.checked_sub(offset.unsigned_abs()).ok_or(ErrNo::Inval)?
            };
            file.set_position(new_position);
            memory_ref.write_u64(address, new_position)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_dec(offset);
        strace.arg_dec(whence);
        strace.arg_p_u64(memory_ref, address);
        strace.result(result)
    }

    pub(crate) fn fd_tell<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_tell");
        let result = (|| {
            let file = self.fdtable.get_file(Fd(fd))?;
            memory_ref.write_u64(address, file.position())
        })();
        strace.arg_dec(fd);
        strace.arg_p_u64(memory_ref, address);
        strace.result(result)
    }

    ////////////////////////////////////////////////////////////////////////
    // Status queries.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) fn fd_fdstat_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_fdstat_get");
        let result = (|| {
            let file_type = if fd < FIRST_PREOPEN_FD {
                FileType::CharacterDevice
            } else {
                match self.fdtable.get(Fd(fd))? {
                    OpenHandle::File(_) => FileType::RegularFile,
                    OpenHandle::Dir(_) => FileType::Directory,
                }
            };
            let stat = FdStat {
                file_type,
                flags: FdFlags::empty(),
                rights_base: Rights::all(),
                rights_inheriting: Rights::all() & !Rights::PATH_SYMLINK,
            };
            memory_ref.pack(address, &stat)
        })();
        strace.arg_dec(fd);
        strace.arg_dots();
        strace.result(result)
    }

    pub(crate) fn fd_fdstat_set_flags<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
        flags: u16,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_fdstat_set_flags");
        strace.arg_dec(fd);
        strace.arg_hex(flags);
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn fd_fdstat_set_rights<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
        rights_base: u64,
        rights_inheriting: u64,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_fdstat_set_rights");
        strace.arg_dec(fd);
        strace.arg_rights(rights_base);
        strace.arg_rights(rights_inheriting);
        strace.result(Err(ErrNo::NoSys))
    }

    /// The filestat for a directory: zero size, zero times.
    fn directory_filestat() -> FileStat {
        FileStat {
            file_type: FileType::Directory,
            ..FileStat::default()
        }
    }

    pub(crate) async fn fd_filestat_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_filestat_get");
        let result = async {
            let stat = if fd < FIRST_PREOPEN_FD {
                FileStat {
                    file_type: FileType::CharacterDevice,
                    ..FileStat::default()
                }
            } else {
                match self.fdtable.get(Fd(fd))? {
                    OpenHandle::Dir(_) => Self::directory_filestat(),
                    OpenHandle::File(file) => {
                        let (size, mtime_ms) = file.stat().await?;
                        let mtime = Timestamp::from_millis(mtime_ms);
                        FileStat {
                            file_type: FileType::RegularFile,
                            file_size: size,
                            atime: mtime,
                            mtime,
                            ctime: mtime,
                            ..FileStat::default()
                        }
                    }
                }
            };
            memory_ref.pack(address, &stat)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_dots();
        strace.result(result)
    }

    pub(crate) async fn path_filestat_get<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        flags: u32,
        path_address: u32,
        path_length: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_filestat_get");
        let result = async {
            let path = memory_ref.read_cstring(path_address, path_length)?;
            let _flags = LookupFlags::from_bits_truncate(flags);
            let (preopen_fd, relative) = self.fdtable.locate(Fd(fd), &path)?;
            let resolved = self.fdtable.resolve(preopen_fd, &relative).await?;
            let handle = open_resolved(
                &resolved.parent,
                resolved.name.as_deref(),
                OpenFlags::empty(),
                OpenKind::Any,
            )
            .await?;
            let stat = match handle {
                NewHandle::Dir(_) => Self::directory_filestat(),
                NewHandle::File(file) => {
                    let snapshot = file.snapshot().await.map_err(expect_file)?;
                    let mtime = Timestamp::from_millis(snapshot.last_modified_ms());
                    FileStat {
                        file_type: FileType::RegularFile,
                        file_size: snapshot.size(),
                        atime: mtime,
                        mtime,
                        ctime: mtime,
                        ..FileStat::default()
                    }
                }
            };
            memory_ref.pack(address, &stat)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_hex(flags);
        strace.arg_path(memory_ref, path_address, path_length);
        strace.arg_dots();
        strace.result(result)
    }

    pub(crate) fn path_filestat_set_times<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        flags: u32,
        path_address: u32,
        path_length: u32,
        atime: u64,
        mtime: u64,
        fst_flags: u16,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_filestat_set_times");
        strace.arg_dec(fd);
        strace.arg_hex(flags);
        strace.arg_path(memory_ref, path_address, path_length);
        strace.arg_dec(atime);
        strace.arg_dec(mtime);
        strace.arg_hex(fst_flags);
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn fd_filestat_set_times<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
        atime: u64,
        mtime: u64,
        fst_flags: u16,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_filestat_set_times");
        strace.arg_dec(fd);
        strace.arg_dec(atime);
        strace.arg_dec(mtime);
        strace.arg_hex(fst_flags);
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) async fn fd_filestat_set_size<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
        size: u64,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_filestat_set_size");
        let result = async {
            let file = self.fdtable.get_file(Fd(fd))?;
            file.set_size(size).await
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_dec(size);
        strace.result(result)
    }

    pub(crate) async fn fd_datasync<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_datasync");
        let result = async {
            let file = self.fdtable.get_file(Fd(fd))?;
            file.flush().await
        }
        .await;
        strace.arg_dec(fd);
        strace.result(result)
    }

    pub(crate) async fn fd_sync<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_sync");
        let result = async {
            match self.fdtable.get(Fd(fd))? {
                OpenHandle::File(file) => file.flush().await,
                // Directories have nothing staged to push down.
                OpenHandle::Dir(_) => Ok(()),
            }
        }
        .await;
        strace.arg_dec(fd);
        strace.result(result)
    }

    pub(crate) fn fd_advise<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
        offset: u64,
        len: u64,
        advice: u8,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_advise");
        let result = (|| {
            let _advice: Advice = Self::decode_wasi_arg(advice as u64)?;
            self.fdtable.get(Fd(fd))?;
            Ok(())
        })();
        strace.arg_dec(fd);
        strace.arg_dec(offset);
        strace.arg_dec(len);
        strace.arg_dec(advice);
        strace.result(result)
    }

    pub(crate) fn fd_allocate<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        fd: u32,
        offset: u64,
        len: u64,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_allocate");
        strace.arg_dec(fd);
        strace.arg_dec(offset);
        strace.arg_dec(len);
        strace.result(Err(ErrNo::NoSys))
    }

    ////////////////////////////////////////////////////////////////////////
    // Directory operations.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) async fn path_create_directory<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        path_address: u32,
        path_length: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_create_directory");
        let result = async {
            let path = memory_ref.read_cstring(path_address, path_length)?;
            let (preopen_fd, relative) = self.fdtable.locate(Fd(fd), &path)?;
            let resolved = self.fdtable.resolve(preopen_fd, &relative).await?;
            open_resolved(
                &resolved.parent,
                resolved.name.as_deref(),
                OpenFlags::CREATE | OpenFlags::EXCL | OpenFlags::DIRECTORY,
                OpenKind::Dir,
            )
            .await?;
            Ok(())
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_path(memory_ref, path_address, path_length);
        strace.result(result)
    }

    pub(crate) async fn path_remove_directory<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        path_address: u32,
        path_length: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_remove_directory");
        let result = async {
            let path = memory_ref.read_cstring(path_address, path_length)?;
            let (preopen_fd, relative) = self.fdtable.locate(Fd(fd), &path)?;
            let resolved = self.fdtable.resolve(preopen_fd, &relative).await?;
            // An empty resolved name denotes the preopen root, which is a
            // capability, not a removable entry.
            let name = resolved.name.ok_or(ErrNo::Access)?;
            resolved
                .parent
                .open_dir(&name, false)
                .await
                .map_err(crate::fs::expect_dir)?;
            resolved
                .parent
                .remove_entry(&name, false)
                .await
                .map_err(ErrNo::from)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_path(memory_ref, path_address, path_length);
        strace.result(result)
    }

    pub(crate) async fn path_unlink_file<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        path_address: u32,
        path_length: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_unlink_file");
        let result = async {
            let path = memory_ref.read_cstring(path_address, path_length)?;
            let (preopen_fd, relative) = self.fdtable.locate(Fd(fd), &path)?;
            let resolved = self.fdtable.resolve(preopen_fd, &relative).await?;
            let name = resolved.name.ok_or(ErrNo::Access)?;
            resolved
                .parent
                .open_file(&name, false)
                .await
                .map_err(expect_file)?;
            resolved
                .parent
                .remove_entry(&name, false)
                .await
                .map_err(ErrNo::from)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_path(memory_ref, path_address, path_length);
        strace.result(result)
    }

    pub(crate) async fn fd_readdir<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        buf_address: u32,
        buf_len: u32,
        cookie: u64,
        used_address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("fd_readdir");
        let result = async {
            let cancel = self.cancel.clone();
            let dir = self.fdtable.get_dir(Fd(fd))?;
            dir.seek_to(cookie).await?;
            let mut used: u32 = 0;
            let mut next_cookie = cookie;
            loop {
                if cancel.is_cancelled() {
                    return Err(ErrNo::Canceled);
                }
                let entry = match dir.next_entry().await? {
                    Some(entry) => entry,
                    None => break,
                };
                let name = entry.name.as_bytes().to_vec();
                let entry_len = DirEnt::SIZE + name.len() as u32;
                if used + entry_len > buf_len {
                    // The entry does not fit; park it for the next call.
                    dir.push_back(entry);
                    break;
                }
                next_cookie += 1;
                let dirent = DirEnt {
                    next: next_cookie,
                    inode: 0,
                    name_len: name.len() as u32,
                    file_type: match entry.kind {
                        EntryKind::File => FileType::RegularFile,
                        EntryKind::Directory => FileType::Directory,
                    },
                };
                memory_ref.pack(buf_address + used, &dirent)?;
                memory_ref.write_buffer(buf_address + used + DirEnt::SIZE, &name)?;
                used += entry_len;
            }
            memory_ref.write_u32(used_address, used)
        }
        .await;
        strace.arg_dec(fd);
        strace.arg_dots();
        strace.arg_dec(cookie);
        strace.arg_p_u32(memory_ref, used_address);
        strace.result(result)
    }

    ////////////////////////////////////////////////////////////////////////
    // Unsupported path operations.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) fn path_link<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        old_fd: u32,
        old_flags: u32,
        old_address: u32,
        old_path_len: u32,
        new_fd: u32,
        new_address: u32,
        new_path_len: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_link");
        strace.arg_dec(old_fd);
        strace.arg_hex(old_flags);
        strace.arg_path(memory_ref, old_address, old_path_len);
        strace.arg_dec(new_fd);
        strace.arg_path(memory_ref, new_address, new_path_len);
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn path_readlink<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        fd: u32,
        path_address: u32,
        path_length: u32,
        _buf: u32,
        _buf_len: u32,
        _address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_readlink");
        strace.arg_dec(fd);
        strace.arg_path(memory_ref, path_address, path_length);
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn path_rename<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        old_fd: u32,
        old_address: u32,
        old_path_len: u32,
        new_fd: u32,
        new_address: u32,
        new_path_len: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_rename");
        strace.arg_dec(old_fd);
        strace.arg_path(memory_ref, old_address, old_path_len);
        strace.arg_dec(new_fd);
        strace.arg_path(memory_ref, new_address, new_path_len);
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn path_symlink<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        old_address: u32,
        old_path_len: u32,
        fd: u32,
        new_address: u32,
        new_path_len: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("path_symlink");
        strace.arg_path(memory_ref, old_address, old_path_len);
        strace.arg_dec(fd);
        strace.arg_path(memory_ref, new_address, new_path_len);
        strace.result(Err(ErrNo::NoSys))
    }

    ////////////////////////////////////////////////////////////////////////
    // Polling.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) async fn poll_oneoff<M: MemoryHandler>(
        &mut self,
        memory_ref: &mut M,
        subscriptions_address: u32,
        events_address: u32,
        size: u32,
        address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("poll_oneoff");
        let result = async {
            if size == 0 {
                return Err(ErrNo::Inval);
            }
            let subscriptions =
                memory_ref.unpack_array::<Subscription>(subscriptions_address, size)?;
            let cancel = self.cancel.clone();
            let mut events: Vec<Event> = Vec::new();
            let mut clocks: Vec<(u64, u64, u64)> = Vec::new();
            for subscription in &subscriptions {
                match &subscription.u {
                    SubscriptionUnion::Clock(clock) => {
                        let timeout = clock.timeout.as_nanos();
                        let wait = if clock.flags.contains(SubClockFlags::ABSTIME) {
                            match self.clock_now(clock.clock_id) {
                                Ok(now) => timeout.saturating_sub(now),
                                // An absolute timeout on an unreadable clock
                                // cannot be waited for; report it like the
                                // unsupported fd subscriptions below.
                                Err(errno) => {
                                    events.push(Event {
                                        userdata: subscription.userdata,
                                        error: errno,
                                        ty: EventType::Clock,
                                        fd_state: None,
                                    });
                                    continue;
                                }
                            }
                        } else {
                            timeout
                        };
                        clocks.push((subscription.userdata, wait, clock.precision.as_nanos()));
                    }
                    // No asynchronous fd readiness exists; report the
                    // subscription itself as unsupported.
                    SubscriptionUnion::FdRead(_) => events.push(Event {
                        userdata: subscription.userdata,
                        error: ErrNo::NoSys,
                        ty: EventType::FdRead,
                        fd_state: None,
                    }),
                    SubscriptionUnion::FdWrite(_) => events.push(Event {
                        userdata: subscription.userdata,
                        error: ErrNo::NoSys,
                        ty: EventType::FdWrite,
                        fd_state: None,
                    }),
                }
            }
            if events.is_empty() && !clocks.is_empty() {
                clocks.sort_by_key(|(_, wait, _)| *wait);
                let shortest = clocks.first().map(|(_, wait, _)| *wait).unwrap_or(0);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_nanos(shortest)) => (),
                    _ = cancel.cancelled() => return Err(ErrNo::Canceled),
                }
                for (userdata, wait, precision) in &clocks {
                    if *wait <= shortest.saturating_add(*precision) {
                        events.push(Event {
                            userdata: *userdata,
                            error: ErrNo::Success,
                            ty: EventType::Clock,
                            fd_state: None,
                        });
                    }
                }
            }
            for (index, event) in events.iter().enumerate() {
                memory_ref.pack(events_address + (index as u32) * Event::SIZE, event)?;
            }
            memory_ref.write_u32(address, events.len() as u32)
        }
        .await;
        strace.arg_dots();
        strace.arg_dots();
        strace.arg_dec(size);
        strace.arg_p_u32(memory_ref, address);
        strace.result(result)
    }

    ////////////////////////////////////////////////////////////////////////
    // Sockets.
    ////////////////////////////////////////////////////////////////////////

    pub(crate) fn sock_recv<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        socket: u32,
        _ri_address: u32,
        _ri_len: u32,
        _ri_flags: u16,
        _ro_data_len: u32,
        _ro_flags: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("sock_recv");
        strace.arg_dec(socket);
        strace.arg_dots();
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn sock_send<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        socket: u32,
        _si_address: u32,
        _si_len: u32,
        _si_flags: u16,
        _address: u32,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("sock_send");
        strace.arg_dec(socket);
        strace.arg_dots();
        strace.result(Err(ErrNo::NoSys))
    }

    pub(crate) fn sock_shutdown<M: MemoryHandler>(
        &mut self,
        _: &mut M,
        socket: u32,
        sd_flags: u8,
    ) -> FileSystemResult<()> {
        let mut strace = self.strace("sock_shutdown");
        strace.arg_dec(socket);
        strace.arg_hex(sd_flags);
        strace.result(Err(ErrNo::NoSys))
    }

    ////////////////////////////////////////////////////////////////////////
    // Dispatch.
    ////////////////////////////////////////////////////////////////////////

    /// Invokes the handler for `name`, decoding `args` against its
    /// signature.  Returns the `errno` to hand back to the guest, or a
    /// [`FatalError`] that the engine must not convert into an `errno`, in
    /// particular the `Exit` signal raised by `proc_exit`.
    pub async fn dispatch<M: MemoryHandler>(
        &mut self,
        name: WasiApiName,
        memory_ref: &mut M,
        args: &[WasmValue],
    ) -> Result<ErrNo, FatalError> {
        let bad_args = FatalError::BadArgumentsToHostFunction {
            function_name: name,
        };
        let (params, _) = name.signature();
        if args.len() != params.len() {
            return Err(bad_args);
        }
        let u32_arg = |index: usize| args[index].as_u32().ok_or(bad_args.clone());
        let u64_arg = |index: usize| args[index].as_u64().ok_or(bad_args.clone());
        let i64_arg = |index: usize| args[index].as_i64().ok_or(bad_args.clone());

        let result = match name {
            WasiApiName::ARGS_GET => self.args_get(memory_ref, u32_arg(0)?, u32_arg(1)?),
            WasiApiName::ARGS_SIZES_GET => {
                self.args_sizes_get(memory_ref, u32_arg(0)?, u32_arg(1)?)
            }
            WasiApiName::ENVIRON_GET => self.environ_get(memory_ref, u32_arg(0)?, u32_arg(1)?),
            WasiApiName::ENVIRON_SIZES_GET => {
                self.environ_sizes_get(memory_ref, u32_arg(0)?, u32_arg(1)?)
            }
            WasiApiName::CLOCK_RES_GET => self.clock_res_get(memory_ref, u32_arg(0)?, u32_arg(1)?),
            WasiApiName::CLOCK_TIME_GET => {
                self.clock_time_get(memory_ref, u32_arg(0)?, u64_arg(1)?, u32_arg(2)?)
            }
            WasiApiName::FD_ADVISE => self.fd_advise(
                memory_ref,
                u32_arg(0)?,
                u64_arg(1)?,
                u64_arg(2)?,
                u32_arg(3)? as u8,
            ),
            WasiApiName::FD_ALLOCATE => {
                self.fd_allocate(memory_ref, u32_arg(0)?, u64_arg(1)?, u64_arg(2)?)
            }
            WasiApiName::FD_CLOSE => self.fd_close(memory_ref, u32_arg(0)?).await,
            WasiApiName::FD_DATASYNC => self.fd_datasync(memory_ref, u32_arg(0)?).await,
            WasiApiName::FD_FDSTAT_GET => self.fd_fdstat_get(memory_ref, u32_arg(0)?, u32_arg(1)?),
            WasiApiName::FD_FDSTAT_SET_FLAGS => {
                self.fd_fdstat_set_flags(memory_ref, u32_arg(0)?, u32_arg(1)? as u16)
            }
            WasiApiName::FD_FDSTAT_SET_RIGHTS => {
                self.fd_fdstat_set_rights(memory_ref, u32_arg(0)?, u64_arg(1)?, u64_arg(2)?)
            }
            WasiApiName::FD_FILESTAT_GET => {
                self.fd_filestat_get(memory_ref, u32_arg(0)?, u32_arg(1)?).await
            }
            WasiApiName::FD_FILESTAT_SET_SIZE => {
                self.fd_filestat_set_size(memory_ref, u32_arg(0)?, u64_arg(1)?).await
            }
            WasiApiName::FD_FILESTAT_SET_TIMES => self.fd_filestat_set_times(
                memory_ref,
                u32_arg(0)?,
                u64_arg(1)?,
                u64_arg(2)?,
                u32_arg(3)? as u16,
            ),
            WasiApiName::FD_PREAD => {
                self.fd_pread(
                    memory_ref,
                    u32_arg(0)?,
                    u32_arg(1)?,
                    u32_arg(2)?,
                    u64_arg(3)?,
                    u32_arg(4)?,
                )
                .await
            }
            WasiApiName::FD_PRESTAT_GET => {
                self.fd_prestat_get(memory_ref, u32_arg(0)?, u32_arg(1)?)
            }
            WasiApiName::FD_PRESTAT_DIR_NAME => {
                self.fd_prestat_dir_name(memory_ref, u32_arg(0)?, u32_arg(1)?, u32_arg(2)?)
            }
            WasiApiName::FD_PWRITE => {
                self.fd_pwrite(
                    memory_ref,
                    u32_arg(0)?,
                    u32_arg(1)?,
                    u32_arg(2)?,
                    u64_arg(3)?,
                    u32_arg(4)?,
                )
                .await
            }
            WasiApiName::FD_READ => {
                self.fd_read(memory_ref, u32_arg(0)?, u32_arg(1)?, u32_arg(2)?, u32_arg(3)?)
                    .await
            }
            WasiApiName::FD_READDIR => {
                self.fd_readdir(
                    memory_ref,
                    u32_arg(0)?,
                    u32_arg(1)?,
                    u32_arg(2)?,
                    u64_arg(3)?,
                    u32_arg(4)?,
                )
                .await
            }
            WasiApiName::FD_RENUMBER => {
                self.fd_renumber(memory_ref, u32_arg(0)?, u32_arg(1)?).await
            }
            WasiApiName::FD_SEEK => {
                self.fd_seek(
                    memory_ref,
                    u32_arg(0)?,
                    i64_arg(1)?,
                    u32_arg(2)? as u8,
                    u32_arg(3)?,
                )
                .await
            }
            WasiApiName::FD_SYNC => self.fd_sync(memory_ref, u32_arg(0)?).await,
            WasiApiName::FD_TELL => self.fd_tell(memory_ref, u32_arg(0)?, u32_arg(1)?),
            WasiApiName::FD_WRITE => {
                self.fd_write(memory_ref, u32_arg(0)?, u32_arg(1)?, u32_arg(2)?, u32_arg(3)?)
                    .await
            }
            WasiApiName::PATH_CREATE_DIRECTORY => {
                self.path_create_directory(memory_ref, u32_arg(0)?, u32_arg(1)?, u32_arg(2)?)
                    .await
            }
            WasiApiName::PATH_FILESTAT_GET => {
                self.path_filestat_get(
                    memory_ref,
                    u32_arg(0)?,
                    u32_arg(1)?,
                    u32_arg(2)?,
                    u32_arg(3)?,
                    u32_arg(4)?,
                )
                .await
            }
            WasiApiName::PATH_FILESTAT_SET_TIMES => self.path_filestat_set_times(
                memory_ref,
                u32_arg(0)?,
                u32_arg(1)?,
                u32_arg(2)?,
                u32_arg(3)?,
                u64_arg(4)?,
                u64_arg(5)?,
                u32_arg(6)? as u16,
            ),
            WasiApiName::PATH_LINK => self.path_link(
                memory_ref,
                u32_arg(0)?,
                u32_arg(1)?,
                u32_arg(2)?,
                u32_arg(3)?,
                u32_arg(4)?,
                u32_arg(5)?,
                u32_arg(6)?,
            ),
            WasiApiName::PATH_OPEN => {
                self.path_open(
                    memory_ref,
                    u32_arg(0)?,
                    u32_arg(1)?,
                    u32_arg(2)?,
                    u32_arg(3)?,
                    u32_arg(4)? as u16,
                    u64_arg(5)?,
                    u64_arg(6)?,
                    u32_arg(7)? as u16,
                    u32_arg(8)?,
                )
                .await
            }
            WasiApiName::PATH_READLINK => self.path_readlink(
                memory_ref,
                u32_arg(0)?,
                u32_arg(1)?,
                u32_arg(2)?,
                u32_arg(3)?,
                u32_arg(4)?,
                u32_arg(5)?,
            ),
            WasiApiName::PATH_REMOVE_DIRECTORY => {
                self.path_remove_directory(memory_ref, u32_arg(0)?, u32_arg(1)?, u32_arg(2)?)
                    .await
            }
            WasiApiName::PATH_RENAME => self.path_rename(
                memory_ref,
                u32_arg(0)?,
                u32_arg(1)?,
                u32_arg(2)?,
                u32_arg(3)?,
                u32_arg(4)?,
                u32_arg(5)?,
            ),
            WasiApiName::PATH_SYMLINK => self.path_symlink(
                memory_ref,
                u32_arg(0)?,
                u32_arg(1)?,
                u32_arg(2)?,
                u32_arg(3)?,
                u32_arg(4)?,
            ),
            WasiApiName::PATH_UNLINK_FILE => {
                self.path_unlink_file(memory_ref, u32_arg(0)?, u32_arg(1)?, u32_arg(2)?)
                    .await
            }
            WasiApiName::POLL_ONEOFF => {
                self.poll_oneoff(memory_ref, u32_arg(0)?, u32_arg(1)?, u32_arg(2)?, u32_arg(3)?)
                    .await
            }
            WasiApiName::PROC_EXIT => {
                let code = u32_arg(0)?;
                self.proc_exit(memory_ref, code);
                return Err(FatalError::Exit(code));
            }
            WasiApiName::PROC_RAISE => self.proc_raise(memory_ref, u32_arg(0)? as u8),
            WasiApiName::SCHED_YIELD => self.sched_yield(memory_ref),
            WasiApiName::RANDOM_GET => self.random_get(memory_ref, u32_arg(0)?, u32_arg(1)?),
            WasiApiName::SOCK_RECV => self.sock_recv(
                memory_ref,
                u32_arg(0)?,
                u32_arg(1)?,
                u32_arg(2)?,
                u32_arg(3)? as u16,
                u32_arg(4)?,
                u32_arg(5)?,
            ),
            WasiApiName::SOCK_SEND => self.sock_send(
                memory_ref,
                u32_arg(0)?,
                u32_arg(1)?,
                u32_arg(2)?,
                u32_arg(3)? as u16,
                u32_arg(4)?,
            ),
            WasiApiName::SOCK_SHUTDOWN => {
                self.sock_shutdown(memory_ref, u32_arg(0)?, u32_arg(1)? as u8)
            }
            WasiApiName::_LAST => {
                return Err(FatalError::UnknownHostFunction(String::from("_LAST")))
            }
        };
        Ok(match result {
            Ok(()) => ErrNo::Success,
            Err(errno) => errno,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::VecMemory;
    use crate::storage::memory::MemoryDir;
    use crate::stream::{ByteSource, Discard};
    use std::str::FromStr;
    use std::sync::Arc;

    fn bindings_with_sandbox() -> (Bindings, MemoryDir) {
        let root = MemoryDir::new();
        let config = Config {
            preopens: vec![(String::from("/sandbox"), Arc::new(root.clone()) as _)],
            stdin: Box::new(ByteSource::empty()),
            stdout: Box::new(Discard),
            stderr: Box::new(Discard),
            program_name: String::from("guest"),
            arguments: vec![],
            environment: vec![],
            enable_strace: false,
            cancel: None,
        };
        (Bindings::new(config), root)
    }

    #[test]
    fn import_names_round_trip_through_strum() {
        assert_eq!(
            WasiApiName::from_str("fd_readdir").unwrap(),
            WasiApiName::FD_READDIR
        );
        assert_eq!(WasiApiName::PATH_OPEN.import_name(), "path_open");
        assert!(WasiApiName::from_str("fd_mystery").is_err());
    }

    #[test]
    fn every_import_has_a_signature() {
        for name in WasiApiName::all() {
            let (params, ret) = name.signature();
            if name == WasiApiName::PROC_EXIT {
                assert!(ret.is_none());
                assert_eq!(params.len(), 1);
            } else {
                assert_eq!(ret, Some(AbiType::I32));
            }
        }
        assert_eq!(WasiApiName::all().count(), 45);
    }

    #[tokio::test]
    async fn dispatch_rejects_argument_count_mismatches() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(1024);
        let result = bindings
            .dispatch(WasiApiName::FD_CLOSE, &mut memory, &[])
            .await;
        assert_eq!(
            result,
            Err(FatalError::BadArgumentsToHostFunction {
                function_name: WasiApiName::FD_CLOSE
            })
        );
    }

    #[tokio::test]
    async fn dispatch_rejects_argument_type_mismatches() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(1024);
        let result = bindings
            .dispatch(WasiApiName::FD_CLOSE, &mut memory, &[WasmValue::I64(3)])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn closing_an_unknown_descriptor_is_badf() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(1024);
        let errno = bindings
            .dispatch(WasiApiName::FD_CLOSE, &mut memory, &[WasmValue::I32(99)])
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::BadF);
    }

    #[tokio::test]
    async fn standard_streams_report_as_character_devices() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(1024);
        let errno = bindings
            .dispatch(
                WasiApiName::FD_FDSTAT_GET,
                &mut memory,
                &[WasmValue::I32(1), WasmValue::I32(0)],
            )
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::Success);
        assert_eq!(memory.read_buffer(0, 1).unwrap()[0], 2);
        // The inheriting mask withholds the symlink right.
        let inheriting = memory.read_u64(16).unwrap();
        assert_eq!(inheriting & Rights::PATH_SYMLINK.bits(), 0);
    }

    #[tokio::test]
    async fn prestat_inspection_reports_the_mount_path() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(1024);
        let errno = bindings
            .dispatch(
                WasiApiName::FD_PRESTAT_GET,
                &mut memory,
                &[WasmValue::I32(3), WasmValue::I32(0)],
            )
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::Success);
        assert_eq!(memory.read_buffer(0, 1).unwrap()[0], 0);
        assert_eq!(memory.read_u32(4).unwrap(), 8);

        let errno = bindings
            .dispatch(
                WasiApiName::FD_PRESTAT_DIR_NAME,
                &mut memory,
                &[WasmValue::I32(3), WasmValue::I32(64), WasmValue::I32(8)],
            )
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::Success);
        assert_eq!(memory.read_buffer(64, 8).unwrap(), b"/sandbox");

        // Probing past the preopen range is how guests discover its end.
        let errno = bindings
            .dispatch(
                WasiApiName::FD_PRESTAT_GET,
                &mut memory,
                &[WasmValue::I32(4), WasmValue::I32(0)],
            )
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::BadF);
    }

    #[tokio::test]
    async fn unsupported_fdflags_are_nosys_and_nonblock_is_cleared() {
        let (mut bindings, root) = bindings_with_sandbox();
        root.install_file("f", b"");
        let mut memory = VecMemory::new(1024);
        memory.write_buffer(0, b"f").unwrap();
        let open_args = |fdflags: u16| {
            vec![
                WasmValue::I32(3),
                WasmValue::I32(0),
                WasmValue::I32(0),
                WasmValue::I32(1),
                WasmValue::I32(0),
                WasmValue::I64(0),
                WasmValue::I64(0),
                WasmValue::I32(fdflags as i32),
                WasmValue::I32(512),
            ]
        };
        // NONBLOCK alone is tolerated.
        let errno = bindings
            .dispatch(WasiApiName::PATH_OPEN, &mut memory, &open_args(1 << 2))
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::Success);
        // APPEND is not.
        let errno = bindings
            .dispatch(WasiApiName::PATH_OPEN, &mut memory, &open_args(1 << 0))
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::NoSys);
    }

    #[tokio::test]
    async fn random_get_fills_guest_memory() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(1024);
        let errno = bindings
            .dispatch(
                WasiApiName::RANDOM_GET,
                &mut memory,
                &[WasmValue::I32(0), WasmValue::I32(64)],
            )
            .await
            .unwrap();
        assert_eq!(errno, ErrNo::Success);
        let bytes = memory.read_buffer(0, 64).unwrap();
        assert!(bytes.iter().any(|&byte| byte != 0));
    }

    #[tokio::test]
    async fn clock_time_get_is_monotonic() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(64);
        let args = vec![WasmValue::I32(1), WasmValue::I64(0), WasmValue::I32(0)];
        bindings
            .dispatch(WasiApiName::CLOCK_TIME_GET, &mut memory, &args)
            .await
            .unwrap();
        let first = memory.read_u64(0).unwrap();
        bindings
            .dispatch(WasiApiName::CLOCK_TIME_GET, &mut memory, &args)
            .await
            .unwrap();
        let second = memory.read_u64(0).unwrap();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn sched_yield_succeeds_and_proc_raise_does_not() {
        let (mut bindings, _) = bindings_with_sandbox();
        let mut memory = VecMemory::new(64);
        assert_eq!(
            bindings
                .dispatch(WasiApiName::SCHED_YIELD, &mut memory, &[])
                .await
                .unwrap(),
            ErrNo::Success
        );
        assert_eq!(
            bindings
                .dispatch(WasiApiName::PROC_RAISE, &mut memory, &[WasmValue::I32(9)])
                .await
                .unwrap(),
            ErrNo::NoSys
        );
    }
}
