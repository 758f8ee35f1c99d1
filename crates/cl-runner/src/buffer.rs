//! Device buffers owned by a [`Runner`].
//!
//! A [`Buffer`] is a plain `Copy` token. The native memory object stays in
//! the owning runner's [`BufferTable`], so a token can never outlive or
//! escape its runner: a token from another runner is rejected with
//! [`OpenClError::ForeignBuffer`], a released one with
//! [`OpenClError::UnknownBuffer`].
//!
//! Non-blocking writes copy the caller's data into a staging area owned by
//! the runner. The copy is dropped at the next synchronisation point, and
//! the queue is drained early once the staged bytes would pass
//! [`RunnerConfig::max_staged_bytes`](crate::RunnerConfig::max_staged_bytes).

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::ptr;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::ClDriver;
use crate::error::{OpenClError, Result};
use crate::runner::{Runner, RunnerId};

/// `cl_mem_flags` with the OpenCL bit values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MemFlags(u64);

impl MemFlags {
    pub const READ_WRITE: Self = Self(1 << 0);
    pub const WRITE_ONLY: Self = Self(1 << 1);
    pub const READ_ONLY: Self = Self(1 << 2);
    pub const USE_HOST_PTR: Self = Self(1 << 3);
    pub const ALLOC_HOST_PTR: Self = Self(1 << 4);
    pub const COPY_HOST_PTR: Self = Self(1 << 5);

    const ACCESS: [Self; 3] = [Self::READ_WRITE, Self::WRITE_ONLY, Self::READ_ONLY];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Number of access-mode bits set. OpenCL accepts at most one.
    pub fn access_modes(self) -> usize {
        Self::ACCESS.iter().filter(|m| self.contains(**m)).count()
    }

    /// Whether the flags ask the driver to read from a host pointer.
    pub const fn uses_host_data(self) -> bool {
        self.0 & (Self::USE_HOST_PTR.0 | Self::COPY_HOST_PTR.0) != 0
    }
}

impl BitOr for MemFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MemFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(MemFlags, &str); 6] = [
            (MemFlags::READ_WRITE, "READ_WRITE"),
            (MemFlags::WRITE_ONLY, "WRITE_ONLY"),
            (MemFlags::READ_ONLY, "READ_ONLY"),
            (MemFlags::USE_HOST_PTR, "USE_HOST_PTR"),
            (MemFlags::ALLOC_HOST_PTR, "ALLOC_HOST_PTR"),
            (MemFlags::COPY_HOST_PTR, "COPY_HOST_PTR"),
        ];
        let set: Vec<&str> =
            NAMES.iter().filter(|(flag, _)| self.contains(*flag)).map(|(_, name)| *name).collect();
        if set.is_empty() {
            write!(f, "MemFlags(0)")
        } else {
            write!(f, "MemFlags({})", set.join(" | "))
        }
    }
}

/// Kernel-side access to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl From<AccessMode> for MemFlags {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::ReadOnly => MemFlags::READ_ONLY,
            AccessMode::WriteOnly => MemFlags::WRITE_ONLY,
            AccessMode::ReadWrite => MemFlags::READ_WRITE,
        }
    }
}

/// Handle to a device buffer owned by one [`Runner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer {
    id: u64,
    runner: RunnerId,
    size: usize,
    flags: MemFlags,
}

impl Buffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    pub fn runner(&self) -> RunnerId {
        self.runner
    }
}

/// Live native buffers of one runner, keyed by token id in creation order.
pub struct BufferTable<D: ClDriver> {
    runner: RunnerId,
    next_id: u64,
    mems: BTreeMap<u64, D::Mem>,
}

impl<D: ClDriver> fmt::Debug for BufferTable<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferTable")
            .field("runner", &self.runner)
            .field("live", &self.mems.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<D: ClDriver> BufferTable<D> {
    pub(crate) fn new(runner: RunnerId) -> Self {
        Self { runner, next_id: 0, mems: BTreeMap::new() }
    }

    pub(crate) fn insert(&mut self, mem: D::Mem, size: usize, flags: MemFlags) -> Buffer {
        self.next_id += 1;
        self.mems.insert(self.next_id, mem);
        Buffer { id: self.next_id, runner: self.runner, size, flags }
    }

    fn check_owner(&self, buffer: &Buffer) -> Result<()> {
        if buffer.runner == self.runner {
            Ok(())
        } else {
            Err(OpenClError::ForeignBuffer(buffer.id))
        }
    }

    pub(crate) fn get(&self, buffer: &Buffer) -> Result<&D::Mem> {
        self.check_owner(buffer)?;
        self.mems.get(&buffer.id).ok_or(OpenClError::UnknownBuffer(buffer.id))
    }

    pub(crate) fn remove(&mut self, buffer: &Buffer) -> Result<D::Mem> {
        self.check_owner(buffer)?;
        self.mems.remove(&buffer.id).ok_or(OpenClError::UnknownBuffer(buffer.id))
    }

    /// Take every live buffer, oldest first.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = D::Mem> + use<D> {
        std::mem::take(&mut self.mems).into_values()
    }

    pub fn len(&self) -> usize {
        self.mems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mems.is_empty()
    }
}

/// Host copies backing non-blocking writes that may still be on the queue.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    copies: Vec<Vec<u8>>,
    bytes: usize,
}

impl Staging {
    /// Keep a copy of `data` and return the retained bytes.
    fn push(&mut self, data: &[u8]) -> &[u8] {
        self.bytes += data.len();
        self.copies.push(data.to_vec());
        self.copies.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Drop every copy. Only sound once the queue has drained.
    pub(crate) fn clear(&mut self) {
        self.copies.clear();
        self.bytes = 0;
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

/// Byte range `offset..offset + len` checked against a buffer's size.
fn transfer_range(op: &'static str, buffer: &Buffer, offset: usize, len: usize) -> Result<()> {
    if len == 0 {
        return Err(OpenClError::EmptyTransfer { op });
    }
    match offset.checked_add(len) {
        Some(end) if end <= buffer.size => Ok(()),
        end => Err(OpenClError::TransferOutOfBounds {
            op,
            offset,
            end: end.unwrap_or(usize::MAX),
            size: buffer.size,
        }),
    }
}

impl<D: ClDriver> Runner<D> {
    /// Allocate a buffer initialised with a copy of `data`.
    ///
    /// `COPY_HOST_PTR` is always added; later changes to `data` never reach
    /// the device. Use [`create_buffer_aliased`](Self::create_buffer_aliased)
    /// for `USE_HOST_PTR`.
    pub fn create_buffer<T: Pod>(&mut self, flags: MemFlags, data: &[T]) -> Result<Buffer> {
        self.ensure_live()?;
        if data.is_empty() {
            return Err(OpenClError::EmptyBuffer);
        }
        if flags.contains(MemFlags::USE_HOST_PTR) {
            return Err(OpenClError::InvalidArgument(
                "USE_HOST_PTR requires create_buffer_aliased".into(),
            ));
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        // SAFETY: with COPY_HOST_PTR the driver only reads `bytes` during the call.
        let host_ptr = bytes.as_ptr().cast_mut().cast();
        unsafe { self.allocate(flags | MemFlags::COPY_HOST_PTR, bytes.len(), host_ptr) }
    }

    /// Allocate a buffer that aliases `data` through `USE_HOST_PTR`.
    ///
    /// # Safety
    ///
    /// `data` must stay alive and in place until the buffer is released or
    /// the runner is released. Host reads and writes of `data` must be
    /// ordered against queued commands by the caller (for example with
    /// [`finish`](Self::finish)).
    pub unsafe fn create_buffer_aliased<T: Pod>(
        &mut self,
        flags: MemFlags,
        data: &mut [T],
    ) -> Result<Buffer> {
        self.ensure_live()?;
        if data.is_empty() {
            return Err(OpenClError::EmptyBuffer);
        }
        let flags = flags.without(MemFlags::COPY_HOST_PTR) | MemFlags::USE_HOST_PTR;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        // SAFETY: forwarded to the caller.
        unsafe { self.allocate(flags, bytes.len(), bytes.as_mut_ptr().cast()) }
    }

    /// Allocate `byte_size` uninitialised bytes.
    pub fn create_empty_buffer(&mut self, flags: MemFlags, byte_size: usize) -> Result<Buffer> {
        self.ensure_live()?;
        if byte_size == 0 {
            return Err(OpenClError::ZeroSizedBuffer);
        }
        if flags.uses_host_data() {
            return Err(OpenClError::InvalidArgument(
                "an empty buffer cannot take host data flags".into(),
            ));
        }
        // SAFETY: no host pointer is involved.
        unsafe { self.allocate(flags, byte_size, ptr::null_mut()) }
    }

    unsafe fn allocate(
        &mut self,
        flags: MemFlags,
        size: usize,
        host_ptr: *mut c_void,
    ) -> Result<Buffer> {
        let (driver, handles) = self.live_mut()?;
        // SAFETY: `host_ptr` obligations are carried by the callers above.
        let mem = unsafe { driver.create_buffer(&handles.context, flags, size, host_ptr) }
            .map_err(|status| OpenClError::Allocation { size, status })?;
        let buffer = handles.buffers.insert(mem, size, flags);
        debug!(buffer = buffer.id, size, ?flags, "buffer created");
        Ok(buffer)
    }

    /// Blocking read of `target.len()` elements starting `offset` bytes into `buffer`.
    pub fn read_buffer<T: Pod>(
        &mut self,
        offset: usize,
        buffer: &Buffer,
        target: &mut [T],
    ) -> Result<()> {
        const OP: &str = "clEnqueueReadBuffer";
        let (driver, handles) = self.live_mut()?;
        let mem = handles.buffers.get(buffer)?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(target);
        transfer_range(OP, buffer, offset, bytes.len())?;
        driver
            .enqueue_read(&handles.queue, mem, offset, bytes)
            .map_err(|status| OpenClError::Transfer { op: OP, status })?;
        // A completed blocking read implies every earlier command finished.
        handles.staged.clear();
        Ok(())
    }

    /// Write `data` starting `offset` bytes into `buffer`.
    ///
    /// With `blocking == false` the call returns once the write is queued;
    /// queue order still places it before every later command. If the
    /// staged copies would then exceed the configured limit, the queue is
    /// drained first.
    pub fn write_buffer<T: Pod>(
        &mut self,
        offset: usize,
        buffer: &Buffer,
        data: &[T],
        blocking: bool,
    ) -> Result<()> {
        const OP: &str = "clEnqueueWriteBuffer";
        let limit = self.config().max_staged_bytes;
        let (driver, handles) = self.live_mut()?;
        let mem = handles.buffers.get(buffer)?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        transfer_range(OP, buffer, offset, bytes.len())?;
        if blocking {
            // SAFETY: the call returns only after the driver has consumed `bytes`.
            unsafe { driver.enqueue_write(&handles.queue, mem, true, offset, bytes) }
                .map_err(|status| OpenClError::Transfer { op: OP, status })?;
            handles.staged.clear();
        } else {
            if !handles.staged.is_empty() && handles.staged.bytes() + bytes.len() > limit {
                debug!(staged = handles.staged.bytes(), limit, "draining queue before staging");
                driver
                    .finish(&handles.queue)
                    .map_err(|status| OpenClError::Transfer { op: "clFinish", status })?;
                handles.staged.clear();
            }
            let staged = handles.staged.push(bytes);
            // SAFETY: the staged copy is heap-owned by the runner and is only
            // dropped after a synchronisation point.
            unsafe { driver.enqueue_write(&handles.queue, mem, false, offset, staged) }
                .map_err(|status| OpenClError::Transfer { op: OP, status })?;
        }
        debug!(buffer = buffer.id, offset, len = bytes.len(), blocking, "buffer write queued");
        Ok(())
    }

    /// Release one buffer and forget its token.
    pub fn release_buffer(&mut self, buffer: Buffer) -> Result<()> {
        let (driver, handles) = self.live_mut()?;
        let mem = handles.buffers.remove(&buffer)?;
        let mut failures = crate::error::ReleaseFailures::new();
        failures.record("clReleaseMemObject", driver.release_mem(mem));
        debug!(buffer = buffer.id, "buffer released");
        failures.into_result()
    }
}
