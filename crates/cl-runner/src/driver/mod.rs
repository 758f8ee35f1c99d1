//! The native call surface used by [`Runner`](crate::Runner).
//!
//! [`ClDriver`] lists exactly the OpenCL entry points the runner needs.
//! Handles are associated types, and every `release_*` method takes its
//! handle by value, so a released handle cannot be named again.
//!
//! Two drivers ship with the crate:
//! - [`OpenClDriver`] talks to the ICD loader through `cl3`.
//! - [`MockDriver`] emulates one in-order device in host memory.

use std::ffi::c_void;

use crate::buffer::MemFlags;
use crate::catalog::DeviceDescriptor;
use crate::status::ClStatus;

pub mod mock;
pub mod opencl;

pub use mock::{MockDriver, MockLaunch, MockLaunchRecord};
pub use opencl::OpenClDriver;

/// Result of a single native call.
pub type ClResult<T> = std::result::Result<T, ClStatus>;

/// Validated N-dimensional range handed to [`ClDriver::enqueue_kernel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    pub work_dim: u32,
    pub global_offset: Option<Vec<usize>>,
    pub global: Vec<usize>,
    pub local: Option<Vec<usize>>,
}

/// Native OpenCL operations, one method per entry point.
pub trait ClDriver {
    type Context;
    type Queue;
    type Program;
    type Kernel;
    type Mem;
    type Event;

    /// `clCreateContext` scoped to the device's platform.
    fn create_context(&self, device: &DeviceDescriptor) -> ClResult<Self::Context>;

    /// `clCreateCommandQueue`, in-order, optionally with profiling.
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &DeviceDescriptor,
        profiling: bool,
    ) -> ClResult<Self::Queue>;

    /// `clCreateProgramWithSource` with all sources as one program.
    fn create_program(&self, context: &Self::Context, sources: &[&str])
    -> ClResult<Self::Program>;

    /// `clBuildProgram` for the one device only.
    fn build_program(
        &self,
        program: &Self::Program,
        device: &DeviceDescriptor,
        options: &str,
    ) -> ClResult<()>;

    /// `clGetProgramBuildInfo(CL_PROGRAM_BUILD_LOG)`.
    fn build_log(&self, program: &Self::Program, device: &DeviceDescriptor) -> ClResult<String>;

    /// `clCreateKernel`.
    fn create_kernel(&self, program: &Self::Program, name: &str) -> ClResult<Self::Kernel>;

    /// `clCreateBuffer`.
    ///
    /// # Safety
    ///
    /// When `host_ptr` is non-null it must point to at least `size` readable
    /// bytes. With [`MemFlags::USE_HOST_PTR`] that memory must also stay
    /// valid until the returned buffer is released.
    unsafe fn create_buffer(
        &self,
        context: &Self::Context,
        flags: MemFlags,
        size: usize,
        host_ptr: *mut c_void,
    ) -> ClResult<Self::Mem>;

    /// Blocking `clEnqueueReadBuffer`.
    fn enqueue_read(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        offset: usize,
        target: &mut [u8],
    ) -> ClResult<()>;

    /// `clEnqueueWriteBuffer`.
    ///
    /// # Safety
    ///
    /// When `blocking` is false, `data` must stay valid and unmodified until
    /// the queue reaches a synchronisation point.
    unsafe fn enqueue_write(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        blocking: bool,
        offset: usize,
        data: &[u8],
    ) -> ClResult<()>;

    /// `clSetKernelArg` with a by-value payload.
    fn set_arg_bytes(&self, kernel: &Self::Kernel, index: u32, bytes: &[u8]) -> ClResult<()>;

    /// `clSetKernelArg` with a buffer handle.
    fn set_arg_mem(&self, kernel: &Self::Kernel, index: u32, mem: &Self::Mem) -> ClResult<()>;

    /// `clSetKernelArg` with a null value, reserving `size` bytes of local memory.
    fn set_arg_local(&self, kernel: &Self::Kernel, index: u32, size: usize) -> ClResult<()>;

    /// `clEnqueueNDRangeKernel`, returning the invocation's event.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        range: &NdRange,
    ) -> ClResult<Self::Event>;

    /// `clWaitForEvents` on a single event.
    fn wait_event(&self, event: &Self::Event) -> ClResult<()>;

    /// `clFinish`.
    fn finish(&self, queue: &Self::Queue) -> ClResult<()>;

    fn release_event(&self, event: Self::Event) -> ClResult<()>;
    fn release_kernel(&self, kernel: Self::Kernel) -> ClResult<()>;
    fn release_program(&self, program: Self::Program) -> ClResult<()>;
    fn release_mem(&self, mem: Self::Mem) -> ClResult<()>;
    fn release_queue(&self, queue: Self::Queue) -> ClResult<()>;
    fn release_context(&self, context: Self::Context) -> ClResult<()>;
}
