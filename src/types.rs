//! Strictly-typed WASI preview-1 values.
//!
//! Everything the guest and host exchange through the system-call ABI is
//! described here: the `errno` space, descriptor and flag words, and the
//! C-layout structures that cross linear memory.  Numeric values follow the
//! published `wasi_snapshot_preview1` witx definitions.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;

////////////////////////////////////////////////////////////////////////////////
// Results.
////////////////////////////////////////////////////////////////////////////////

/// Handlers either return a result of type `T` or a defined error code.  The
/// return code `ErrNo::Success` is implicit if `Ok(result)` is ever returned;
/// the result `Err(ErrNo::Success)` should never be constructed.
pub type FileSystemResult<T> = Result<T, ErrNo>;

////////////////////////////////////////////////////////////////////////////////
// Error codes.
////////////////////////////////////////////////////////////////////////////////

/// The WASI `errno` space, a 16-bit error code returned by every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum ErrNo {
    Success = 0,
    TooBig = 1,
    Access = 2,
    AddrInUse = 3,
    AddrNotAvail = 4,
    AfNoSupport = 5,
    Again = 6,
    Already = 7,
    BadF = 8,
    BadMsg = 9,
    Busy = 10,
    Canceled = 11,
    Child = 12,
    ConnAborted = 13,
    ConnRefused = 14,
    ConnReset = 15,
    DeadLk = 16,
    DestAddrReq = 17,
    Dom = 18,
    DQuot = 19,
    Exist = 20,
    Fault = 21,
    FBig = 22,
    HostUnreach = 23,
    IdRm = 24,
    IlSeq = 25,
    InProgress = 26,
    Intr = 27,
    Inval = 28,
    Io = 29,
    IsConn = 30,
    IsDir = 31,
    Loop = 32,
    MFile = 33,
    MLink = 34,
    MsgSize = 35,
    MultiHop = 36,
    NameTooLong = 37,
    NetDown = 38,
    NetReset = 39,
    NetUnreach = 40,
    NFile = 41,
    NoBufS = 42,
    NoDev = 43,
    NoEnt = 44,
    NoExec = 45,
    NoLck = 46,
    NoLink = 47,
    NoMem = 48,
    NoMsg = 49,
    NoProtoOpt = 50,
    NoSpc = 51,
    NoSys = 52,
    NotConn = 53,
    NotDir = 54,
    NotEmpty = 55,
    NotRecoverable = 56,
    NotSock = 57,
    NotSup = 58,
    NoTty = 59,
    NxIo = 60,
    Overflow = 61,
    OwnerDead = 62,
    Perm = 63,
    Pipe = 64,
    Proto = 65,
    ProtoNoSupport = 66,
    ProtoType = 67,
    Range = 68,
    RoFs = 69,
    SPipe = 70,
    Srch = 71,
    Stale = 72,
    TimedOut = 73,
    TxtBsy = 74,
    XDev = 75,
    NotCapable = 76,
}

impl fmt::Display for ErrNo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ErrNo {}

// Cursor reads and writes inside the marshalling layer use `?` freely; a
// short or failed buffer access is an `Io` fault from the guest's viewpoint.
impl From<std::io::Error> for ErrNo {
    fn from(_: std::io::Error) -> Self {
        ErrNo::Io
    }
}

impl From<std::num::TryFromIntError> for ErrNo {
    fn from(_: std::num::TryFromIntError) -> Self {
        ErrNo::Inval
    }
}

////////////////////////////////////////////////////////////////////////////////
// Scalar newtypes and enumerations.
////////////////////////////////////////////////////////////////////////////////

/// A file descriptor: an index into the open-file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(pub u32);

impl From<u32> for Fd {
    fn from(raw: u32) -> Self {
        Fd(raw)
    }
}

impl From<Fd> for u32 {
    fn from(fd: Fd) -> Self {
        fd.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size of a file, or of a region within a file, in bytes.
pub type FileSize = u64;
/// A signed offset applied to a file position by `fd_seek`.
pub type FileDelta = i64;
/// Continuation token for paginated directory enumeration.  The value is the
/// position of the next entry to emit.
pub type DirCookie = u64;

/// A point in time or a duration, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    /// Millisecond clocks (storage backends report mtimes this way) widen
    /// into the nanosecond timestamp space.
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Timestamp(nanos)
    }
}

/// The kind of an open file or directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

/// Seek base for `fd_seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Whence {
    Start = 0,
    Current = 1,
    End = 2,
}

/// Clock selector for `clock_time_get` and clock subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ClockId {
    RealTime = 0,
    Monotonic = 1,
    ProcessCpuTime = 2,
    ThreadCpuTime = 3,
}

/// Usage advice for `fd_advise`.  The runtime validates the tag and otherwise
/// ignores it: the storage abstraction has no advisory surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Advice {
    Normal = 0,
    Sequential = 1,
    Random = 2,
    WillNeed = 3,
    DontNeed = 4,
    NoReuse = 5,
}

/// The kind of event a `poll_oneoff` subscription waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum EventType {
    Clock = 0,
    FdRead = 1,
    FdWrite = 2,
}

bitflags! {
    /// Per-descriptor capability bits.  The table grants all rights on every
    /// descriptor; the bits exist so `fd_fdstat_get` can answer honestly.
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
    }
}

bitflags! {
    /// Open flags for `path_open`.
    pub struct OpenFlags: u16 {
        const CREATE = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags! {
    /// Descriptor flags for `path_open` and `fd_fdstat_get`.
    pub struct FdFlags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    /// Path lookup flags.  `SYMLINK_FOLLOW` is accepted and ignored: the
    /// runtime has no symbolic links to follow.
    pub struct LookupFlags: u32 {
        const SYMLINK_FOLLOW = 1 << 0;
    }
}

bitflags! {
    /// Flags on a clock subscription.
    pub struct SubClockFlags: u16 {
        const ABSTIME = 1 << 0;
    }
}

bitflags! {
    /// Flags on an fd-readwrite event.
    pub struct EventRwFlags: u16 {
        const HANGUP = 1 << 0;
    }
}

////////////////////////////////////////////////////////////////////////////////
// ABI structures.
////////////////////////////////////////////////////////////////////////////////

/// A scatter/gather buffer descriptor in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub buf: u32,
    pub len: u32,
}

/// The result of `fd_prestat_get`: the only pre-opened resource type is a
/// directory, identified by the byte length of its mount path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prestat {
    pub name_len: u32,
}

/// The result of `fd_fdstat_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdStat {
    pub file_type: FileType,
    pub flags: FdFlags,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

/// The result of `fd_filestat_get` and `path_filestat_get`.
///
/// `device` and `inode` are always zero: the runtime has no hard links, so
/// guests must not use inode equality for object identity.  `num_links` is
/// likewise zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub device: u64,
    pub inode: u64,
    pub file_type: FileType,
    pub num_links: u64,
    pub file_size: FileSize,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl Default for FileType {
    fn default() -> Self {
        FileType::Unknown
    }
}

/// The fixed-size header of a directory entry emitted by `fd_readdir`.  The
/// entry name follows the header immediately, unaligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEnt {
    pub next: DirCookie,
    pub inode: u64,
    pub name_len: u32,
    pub file_type: FileType,
}

/// A `poll_oneoff` subscription: caller userdata plus a tagged union over
/// the subscription kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub userdata: u64,
    pub u: SubscriptionUnion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionUnion {
    Clock(SubscriptionClock),
    FdRead(SubscriptionFdReadwrite),
    FdWrite(SubscriptionFdReadwrite),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionClock {
    pub clock_id: ClockId,
    pub timeout: Timestamp,
    pub precision: Timestamp,
    pub flags: SubClockFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionFdReadwrite {
    pub fd: Fd,
}

/// A `poll_oneoff` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub userdata: u64,
    pub error: ErrNo,
    pub ty: EventType,
    pub fd_state: Option<EventFdState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFdState {
    pub file_size: FileSize,
    pub flags: EventRwFlags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn errno_round_trips_through_the_wire_representation() {
        assert_eq!(ErrNo::from_u16(0), Some(ErrNo::Success));
        assert_eq!(ErrNo::from_u16(8), Some(ErrNo::BadF));
        assert_eq!(ErrNo::from_u16(44), Some(ErrNo::NoEnt));
        assert_eq!(ErrNo::from_u16(76), Some(ErrNo::NotCapable));
        assert_eq!(ErrNo::from_u16(77), None);
    }

    #[test]
    fn whence_matches_the_witx_numbering() {
        assert_eq!(Whence::from_u8(0), Some(Whence::Start));
        assert_eq!(Whence::from_u8(1), Some(Whence::Current));
        assert_eq!(Whence::from_u8(2), Some(Whence::End));
        assert_eq!(Whence::from_u8(3), None);
    }

    #[test]
    fn millisecond_timestamps_widen_to_nanoseconds() {
        assert_eq!(Timestamp::from_millis(1).as_nanos(), 1_000_000);
        assert_eq!(Timestamp::from_millis(0).as_nanos(), 0);
    }
}
