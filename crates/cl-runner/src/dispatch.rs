//! Kernel argument binding and NDRange dispatch.
//!
//! Arguments bind positionally: slot `i` receives `args[i]`. Whether the
//! count and sizes match the kernel's parameters is checked by the driver,
//! not here, and a mismatch surfaces as [`OpenClError::ArgumentBinding`]
//! or [`OpenClError::Dispatch`].

use std::ffi::c_void;

use bytemuck::Pod;
use thiserror::Error;
use tracing::debug;

use crate::buffer::{Buffer, BufferTable};
use crate::driver::{ClDriver, NdRange};
use crate::error::{OpenClError, Result};
use crate::runner::Runner;

/// One positional kernel argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelArg {
    /// A buffer owned by the dispatching runner; binds its `cl_mem` handle.
    Buffer(Buffer),
    /// A by-value argument, stored as its raw bytes.
    Value(Vec<u8>),
    /// `__local` scratch memory of the given byte size.
    Local(usize),
}

impl KernelArg {
    pub fn buffer(buffer: &Buffer) -> Self {
        Self::Buffer(*buffer)
    }

    /// Copy the bytes of a plain-old-data value.
    pub fn value<T: Pod>(value: T) -> Self {
        Self::Value(bytemuck::bytes_of(&value).to_vec())
    }

    pub fn local(bytes: usize) -> Self {
        Self::Local(bytes)
    }

    /// Argument size in bytes as passed to `clSetKernelArg`.
    pub fn size(&self) -> usize {
        match self {
            Self::Buffer(_) => size_of::<*mut c_void>(),
            Self::Value(bytes) => bytes.len(),
            Self::Local(bytes) => *bytes,
        }
    }
}

impl From<&Buffer> for KernelArg {
    fn from(buffer: &Buffer) -> Self {
        Self::buffer(buffer)
    }
}

/// Why a [`WorkGeometry`] was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("work_dim {0} is outside 1..=3")]
    WorkDim(u32),
    #[error("{field} has {len} entries but work_dim is {work_dim}")]
    Length { field: &'static str, len: usize, work_dim: u32 },
    #[error("{field}[{index}] = {value} does not fit in usize")]
    Overflow { field: &'static str, index: usize, value: u64 },
    #[error("local[{index}] is zero")]
    ZeroLocal { index: usize },
}

/// Global offset, global size and optional local size of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkGeometry {
    pub global_offset: Option<Vec<u64>>,
    pub global: Vec<u64>,
    /// `None` lets the driver pick the work-group size.
    pub local: Option<Vec<u64>>,
}

impl WorkGeometry {
    pub fn new(global: &[u64]) -> Self {
        Self { global_offset: None, global: global.to_vec(), local: None }
    }

    pub fn with_offset(mut self, offset: &[u64]) -> Self {
        self.global_offset = Some(offset.to_vec());
        self
    }

    pub fn with_local(mut self, local: &[u64]) -> Self {
        self.local = Some(local.to_vec());
        self
    }

    pub fn dimensions(&self) -> usize {
        self.global.len()
    }

    /// Check the shape against `work_dim` and convert to native sizes.
    pub fn validate(&self, work_dim: u32) -> std::result::Result<NdRange, GeometryError> {
        if !(1..=3).contains(&work_dim) {
            return Err(GeometryError::WorkDim(work_dim));
        }
        let convert = |field: &'static str, extents: &[u64]| {
            if extents.len() != work_dim as usize {
                return Err(GeometryError::Length { field, len: extents.len(), work_dim });
            }
            extents
                .iter()
                .enumerate()
                .map(|(index, &value)| {
                    usize::try_from(value)
                        .map_err(|_| GeometryError::Overflow { field, index, value })
                })
                .collect::<std::result::Result<Vec<usize>, _>>()
        };

        let global = convert("global", &self.global)?;
        let global_offset =
            self.global_offset.as_deref().map(|o| convert("global_offset", o)).transpose()?;
        let local = self.local.as_deref().map(|l| convert("local", l)).transpose()?;
        if let Some(index) = local.as_ref().and_then(|l| l.iter().position(|&n| n == 0)) {
            return Err(GeometryError::ZeroLocal { index });
        }
        Ok(NdRange { work_dim, global_offset, global, local })
    }
}

fn bind_args<D: ClDriver>(
    driver: &D,
    buffers: &BufferTable<D>,
    name: &str,
    kernel: &D::Kernel,
    args: &[KernelArg],
) -> Result<()> {
    for (index, arg) in args.iter().enumerate() {
        let index = u32::try_from(index)
            .map_err(|_| OpenClError::InvalidArgument(format!("too many arguments for '{name}'")))?;
        let bound = match arg {
            KernelArg::Buffer(buffer) => driver.set_arg_mem(kernel, index, buffers.get(buffer)?),
            KernelArg::Value(bytes) => driver.set_arg_bytes(kernel, index, bytes),
            KernelArg::Local(size) => driver.set_arg_local(kernel, index, *size),
        };
        bound.map_err(|status| OpenClError::ArgumentBinding {
            kernel: name.to_owned(),
            index,
            status,
        })?;
    }
    Ok(())
}

impl<D: ClDriver> Runner<D> {
    /// Bind `args` to the slots of kernel `name`, slot `i` taking `args[i]`.
    pub fn set_kernel_args(&mut self, name: &str, args: &[KernelArg]) -> Result<()> {
        let (driver, handles) = self.live_mut()?;
        let program = handles.program.as_ref().ok_or(OpenClError::NotCompiled)?;
        bind_args(driver, &handles.buffers, name, program.kernel(name)?, args)
    }

    /// Bind `args`, enqueue kernel `name` over `geometry`, and with `wait`
    /// block until this invocation has completed.
    ///
    /// The geometry is validated before any native call. Without `wait`
    /// the call returns once the kernel is queued; later commands on this
    /// runner still observe its results.
    pub fn dispatch(
        &mut self,
        name: &str,
        work_dim: u32,
        geometry: &WorkGeometry,
        args: &[KernelArg],
        wait: bool,
    ) -> Result<()> {
        let (driver, handles) = self.live_mut()?;
        let program = handles.program.as_ref().ok_or(OpenClError::NotCompiled)?;
        let kernel = program.kernel(name)?;
        let range = geometry.validate(work_dim).map_err(|e| OpenClError::InvalidGeometry {
            kernel: name.to_owned(),
            reason: e.to_string(),
        })?;

        bind_args(driver, &handles.buffers, name, kernel, args)?;

        let dispatch_error =
            |op, status| OpenClError::Dispatch { kernel: name.to_owned(), op, status };
        let event = driver
            .enqueue_kernel(&handles.queue, kernel, &range)
            .map_err(|status| dispatch_error("clEnqueueNDRangeKernel", status))?;
        debug!(
            kernel = name,
            global = ?range.global,
            local = ?range.local,
            wait,
            "kernel enqueued"
        );

        let waited = if wait { driver.wait_event(&event) } else { Ok(()) };
        let released = driver.release_event(event);
        waited.map_err(|status| dispatch_error("clWaitForEvents", status))?;
        released.map_err(|status| dispatch_error("clReleaseEvent", status))?;

        if wait {
            // In-order queue: every earlier write has completed too.
            handles.staged.clear();
        }
        Ok(())
    }
}
