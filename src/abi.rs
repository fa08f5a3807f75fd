//! The ABI marshalling layer.
//!
//! Reads and writes C-ABI-compatible values in the guest's linear memory:
//! little-endian primitives, length-prefixed UTF-8 strings, packed structs
//! and the tagged unions used by `poll_oneoff`.  All guest addressing is an
//! `(address: u32)` into a [`MemoryHandler`]; no raw pointer into the
//! instance's memory is ever held, because the guest may grow (and thereby
//! relocate) its memory between calls.
//!
//! Struct offsets are hand-packed and pinned by tests against the
//! deterministic layout algorithm in [`layout`], which reproduces C's default
//! rules: round each field offset up to the field's alignment, advance by its
//! size, and round the total up to the struct's alignment.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

use crate::types::{
    ClockId, DirEnt, ErrNo, Event, EventType, FdStat, FileStat, FileSystemResult, IoVec, Prestat,
    SubClockFlags, Subscription, SubscriptionClock, SubscriptionFdReadwrite, SubscriptionUnion,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};
use std::{
    convert::TryFrom,
    io::{Cursor, Seek, SeekFrom},
    mem::size_of,
};

////////////////////////////////////////////////////////////////////////////////
// Guest memory access.
////////////////////////////////////////////////////////////////////////////////

/// The memory handler for interacting with the wasm linear memory space.  An
/// execution engine must implement `write_buffer` and `read_buffer`; the
/// typed accessors are derived from those two.
///
/// NOTE: addresses are `u32` because that is what a wasm32 engine hands us.
pub trait MemoryHandler {
    /// Write `buffer` to guest memory at `address`.
    fn write_buffer(&mut self, address: u32, buffer: &[u8]) -> FileSystemResult<()>;

    /// Read `length` bytes of guest memory starting at `address`.
    fn read_buffer(&self, address: u32, length: u32) -> FileSystemResult<Vec<u8>>;

    /// Reads a string of `length` bytes at `address`, decoding UTF-8.
    fn read_cstring(&self, address: u32, length: u32) -> FileSystemResult<String> {
        let bytes = self.read_buffer(address, length)?;
        String::from_utf8(bytes).map_err(|_| ErrNo::IlSeq)
    }

    /// Encodes `value` as UTF-8 at `address`.  Fails with `NoMem` if the
    /// encoding does not fit into `capacity` bytes.
    fn write_cstring(&mut self, address: u32, value: &str, capacity: u32) -> FileSystemResult<()> {
        let bytes = value.as_bytes();
        if bytes.len() > capacity as usize {
            return Err(ErrNo::NoMem);
        }
        self.write_buffer(address, bytes)
    }

    fn read_u16(&self, address: u32) -> FileSystemResult<u16> {
        let bytes = self.read_buffer(address, 2)?;
        let mut rdr = Cursor::new(bytes);
        Ok(rdr.read_u16::<LittleEndian>()?)
    }

    fn read_u32(&self, address: u32) -> FileSystemResult<u32> {
        let bytes = self.read_buffer(address, 4)?;
        let mut rdr = Cursor::new(bytes);
        Ok(rdr.read_u32::<LittleEndian>()?)
    }

    fn read_u64(&self, address: u32) -> FileSystemResult<u64> {
        let bytes = self.read_buffer(address, 8)?;
        let mut rdr = Cursor::new(bytes);
        Ok(rdr.read_u64::<LittleEndian>()?)
    }

    fn write_u16(&mut self, address: u32, number: u16) -> FileSystemResult<()> {
        self.write_buffer(address, &u16::to_le_bytes(number))
    }

    fn write_u32(&mut self, address: u32, number: u32) -> FileSystemResult<()> {
        self.write_buffer(address, &u32::to_le_bytes(number))
    }

    fn write_u64(&mut self, address: u32, number: u64) -> FileSystemResult<()> {
        self.write_buffer(address, &u64::to_le_bytes(number))
    }

    /// Reads an `Unpack` structure from `address`.
    fn unpack<T: Unpack>(&self, address: u32) -> FileSystemResult<T> {
        let bytes = self.read_buffer(address, T::SIZE)?;
        T::unpack(&bytes)
    }

    /// Reads a contiguous array of `count` `Unpack` structures.
    fn unpack_array<T: Unpack>(&self, address: u32, count: u32) -> FileSystemResult<Vec<T>> {
        (0..count)
            .map(|index| self.unpack(address + index * T::SIZE))
            .collect()
    }

    /// Writes a `Pack` structure to `address`.
    fn pack<T: Pack>(&mut self, address: u32, value: &T) -> FileSystemResult<()> {
        let mut bytes = vec![0u8; T::SIZE as usize];
        value.pack(&mut bytes)?;
        self.write_buffer(address, &bytes)
    }

    /// Publishes a [`StringCollection`]: the packed buffer goes to
    /// `buf_address` and the per-string start addresses go to the pointer
    /// array at `pointers_address`, one `u32` each.
    fn write_string_collection(
        &mut self,
        collection: &StringCollection,
        pointers_address: u32,
        buf_address: u32,
    ) -> FileSystemResult<()> {
        for (index, offset) in collection.offsets.iter().enumerate() {
            let slot = pointers_address + (index as u32) * size_of::<u32>() as u32;
            self.write_u32(slot, buf_address + offset)?;
        }
        self.write_buffer(buf_address, &collection.packed)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Packing and unpacking.
////////////////////////////////////////////////////////////////////////////////

/// Decode a structure from its guest-side byte representation.
pub trait Unpack: Sized {
    /// Size in bytes of the structure in the wasm memory space.  Note that
    /// this is generally different from the host `size_of`, which is in a
    /// different memory space with different pointer sizes.
    const SIZE: u32;

    fn unpack(bytes: &[u8]) -> FileSystemResult<Self>;
}

/// Encode a structure into its guest-side byte representation.  `bytes` must
/// be exactly `SIZE` long; padding bytes are left zeroed.
pub trait Pack {
    const SIZE: u32;

    fn pack(&self, bytes: &mut [u8]) -> FileSystemResult<()>;
}

impl Unpack for IoVec {
    const SIZE: u32 = 8;

    fn unpack(bytes: &[u8]) -> FileSystemResult<Self> {
        if bytes.len() != Self::SIZE as usize {
            return Err(ErrNo::Inval);
        }
        let mut rdr = Cursor::new(bytes);
        let buf = rdr.read_u32::<LittleEndian>()?;
        let len = rdr.read_u32::<LittleEndian>()?;
        Ok(IoVec { buf, len })
    }
}

impl Unpack for Subscription {
    const SIZE: u32 = 48;

    fn unpack(bytes: &[u8]) -> FileSystemResult<Self> {
        if bytes.len() != Self::SIZE as usize {
            return Err(ErrNo::Inval);
        }
        let mut rdr = Cursor::new(bytes);
        let userdata = rdr.read_u64::<LittleEndian>()?;
        // The union tag is a u8 padded out to the union's 8-byte alignment.
        let tag = rdr.read_u8()?;
        rdr.seek(SeekFrom::Start(16))?;
        let u = match tag {
            0 => {
                let clock_id = rdr.read_u32::<LittleEndian>()?;
                let clock_id = ClockId::from_u32(clock_id).ok_or(ErrNo::Inval)?;
                rdr.seek(SeekFrom::Start(24))?;
                let timeout = rdr.read_u64::<LittleEndian>()?.into();
                let precision = rdr.read_u64::<LittleEndian>()?.into();
                let flags = rdr.read_u16::<LittleEndian>()?;
                let flags = SubClockFlags::from_bits_truncate(flags);
                SubscriptionUnion::Clock(SubscriptionClock {
                    clock_id,
                    timeout,
                    precision,
                    flags,
                })
            }
            1 | 2 => {
                let fd = rdr.read_u32::<LittleEndian>()?.into();
                let fd_rw = SubscriptionFdReadwrite { fd };
                if tag == 1 {
                    SubscriptionUnion::FdRead(fd_rw)
                } else {
                    SubscriptionUnion::FdWrite(fd_rw)
                }
            }
            _otherwise => return Err(ErrNo::Inval),
        };
        Ok(Subscription { userdata, u })
    }
}

impl Pack for Event {
    const SIZE: u32 = 32;

    fn pack(&self, bytes: &mut [u8]) -> FileSystemResult<()> {
        let mut wtr = Cursor::new(bytes);
        wtr.write_u64::<LittleEndian>(self.userdata)?;
        wtr.write_u16::<LittleEndian>(self.error.to_u16().ok_or(ErrNo::Inval)?)?;
        wtr.write_u8(self.ty.to_u8().ok_or(ErrNo::Inval)?)?;
        wtr.seek(SeekFrom::Start(16))?;
        if let Some(state) = self.fd_state {
            wtr.write_u64::<LittleEndian>(state.file_size)?;
            wtr.write_u16::<LittleEndian>(state.flags.bits())?;
        }
        Ok(())
    }
}

impl Pack for Prestat {
    const SIZE: u32 = 8;

    fn pack(&self, bytes: &mut [u8]) -> FileSystemResult<()> {
        let mut wtr = Cursor::new(bytes);
        // Tag 0: the only preopen resource type is a directory.
        wtr.write_u8(0)?;
        wtr.seek(SeekFrom::Start(4))?;
        wtr.write_u32::<LittleEndian>(self.name_len)?;
        Ok(())
    }
}

impl Pack for FdStat {
    const SIZE: u32 = 24;

    fn pack(&self, bytes: &mut [u8]) -> FileSystemResult<()> {
        let mut wtr = Cursor::new(bytes);
        wtr.write_u8(self.file_type.to_u8().ok_or(ErrNo::Inval)?)?;
        wtr.seek(SeekFrom::Start(2))?;
        wtr.write_u16::<LittleEndian>(self.flags.bits())?;
        wtr.seek(SeekFrom::Start(8))?;
        wtr.write_u64::<LittleEndian>(self.rights_base.bits())?;
        wtr.write_u64::<LittleEndian>(self.rights_inheriting.bits())?;
        Ok(())
    }
}

impl Pack for FileStat {
    const SIZE: u32 = 64;

    fn pack(&self, bytes: &mut [u8]) -> FileSystemResult<()> {
        let mut wtr = Cursor::new(bytes);
        wtr.write_u64::<LittleEndian>(self.device)?;
        wtr.write_u64::<LittleEndian>(self.inode)?;
        wtr.write_u8(self.file_type.to_u8().ok_or(ErrNo::Inval)?)?;
        wtr.seek(SeekFrom::Start(24))?;
        wtr.write_u64::<LittleEndian>(self.num_links)?;
        wtr.write_u64::<LittleEndian>(self.file_size)?;
        wtr.write_u64::<LittleEndian>(self.atime.as_nanos())?;
        wtr.write_u64::<LittleEndian>(self.mtime.as_nanos())?;
        wtr.write_u64::<LittleEndian>(self.ctime.as_nanos())?;
        Ok(())
    }
}

impl Pack for DirEnt {
    const SIZE: u32 = 24;

    fn pack(&self, bytes: &mut [u8]) -> FileSystemResult<()> {
        let mut wtr = Cursor::new(bytes);
        wtr.write_u64::<LittleEndian>(self.next)?;
        wtr.write_u64::<LittleEndian>(self.inode)?;
        wtr.write_u32::<LittleEndian>(self.name_len)?;
        wtr.write_u8(self.file_type.to_u8().ok_or(ErrNo::Inval)?)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// String collections.
////////////////////////////////////////////////////////////////////////////////

/// A NUL-terminated concatenation of strings together with the byte offset of
/// each string within the packed buffer.  Built once per guest run for `argv`
/// and `environ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringCollection {
    pub offsets: Vec<u32>,
    pub packed: Vec<u8>,
}

impl StringCollection {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut offsets = Vec::new();
        let mut packed = Vec::new();
        for item in items {
            offsets.push(packed.len() as u32);
            packed.extend_from_slice(item.as_ref().as_bytes());
            packed.push(0);
        }
        StringCollection { offsets, packed }
    }

    /// Number of strings in the collection.
    pub fn count(&self) -> u32 {
        self.offsets.len() as u32
    }

    /// Total byte length of the packed buffer, terminators included.
    pub fn byte_len(&self) -> u32 {
        self.packed.len() as u32
    }
}

////////////////////////////////////////////////////////////////////////////////
// Layout computation.
////////////////////////////////////////////////////////////////////////////////

/// Deterministic C-style layout computation.  Only tests consume this today;
/// the packed offsets above are the layout's output, frozen by hand.
pub mod layout {
    /// `(size, align)` of a field.
    pub type Field = (u32, u32);

    /// Computes the offset of every field, plus the total size and alignment
    /// of the struct.
    pub fn struct_layout(fields: &[Field]) -> (Vec<u32>, u32, u32) {
        let mut offset = 0u32;
        let mut align = 1u32;
        let mut offsets = Vec::with_capacity(fields.len());
        for &(field_size, field_align) in fields {
            offset = round_up(offset, field_align);
            offsets.push(offset);
            offset += field_size;
            align = align.max(field_align);
        }
        (offsets, round_up(offset, align), align)
    }

    /// Computes the layout of a tagged union: `[tag, pad, union]` where the
    /// union body is `max(variant size)` rounded to `max(variant align)`.
    /// Returns `(union offset, total size)`.
    pub fn union_layout(tag: Field, variants: &[Field]) -> (u32, u32) {
        let body_align = variants.iter().map(|v| v.1).max().unwrap_or(1);
        let body_size = variants.iter().map(|v| v.0).max().unwrap_or(0);
        let body_size = round_up(body_size, body_align);
        let body_offset = round_up(tag.0, body_align);
        (body_offset, body_offset + body_size)
    }

    fn round_up(value: u32, align: u32) -> u32 {
        let align = align.max(1);
        value.div_ceil(align) * align
    }
}

////////////////////////////////////////////////////////////////////////////////
// Dispatch value carriers.
////////////////////////////////////////////////////////////////////////////////

/// The engine-agnostic representation type of one wasm32 ABI slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    I32,
    I64,
}

/// A single argument handed across the import boundary by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmValue {
    I32(i32),
    I64(i64),
}

impl WasmValue {
    /// Pointers, lengths, descriptors and flag words all travel as `i32`
    /// reinterpreted as unsigned.
    pub fn as_u32(self) -> Option<u32> {
        match self {
            WasmValue::I32(value) => Some(value as u32),
            WasmValue::I64(_) => None,
        }
    }

    pub fn as_u64(self) -> Option<u64> {
        match self {
            WasmValue::I64(value) => Some(value as u64),
            WasmValue::I32(_) => None,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            WasmValue::I64(value) => Some(value),
            WasmValue::I32(_) => None,
        }
    }

    pub fn ty(self) -> AbiType {
        match self {
            WasmValue::I32(_) => AbiType::I32,
            WasmValue::I64(_) => AbiType::I64,
        }
    }
}

/// A `Vec<u8>`-backed guest memory, for embedders without a real instance
/// (and for the test suites).
#[derive(Debug, Clone)]
pub struct VecMemory {
    bytes: Vec<u8>,
}

impl VecMemory {
    pub fn new(size: usize) -> Self {
        VecMemory {
            bytes: vec![0u8; size],
        }
    }
}

impl MemoryHandler for VecMemory {
    fn write_buffer(&mut self, address: u32, buffer: &[u8]) -> FileSystemResult<()> {
        let start = address as usize;
        let end = start.checked_add(buffer.len()).ok_or(ErrNo::Fault)?;
        if end > self.bytes.len() {
            return Err(ErrNo::Fault);
        }
        self.bytes[start..end].copy_from_slice(buffer);
        Ok(())
    }

    fn read_buffer(&self, address: u32, length: u32) -> FileSystemResult<Vec<u8>> {
        let start = address as usize;
        let end = start
            .checked_add(usize::try_from(length)?)
            .ok_or(ErrNo::Fault)?;
        if end > self.bytes.len() {
            return Err(ErrNo::Fault);
        }
        Ok(self.bytes[start..end].to_vec())
    }
}
