//! [`ClDriver`] backed by the system OpenCL ICD loader.
//!
//! Calls go through `cl3`, the FFI layer underneath `opencl3`. The
//! `opencl3` RAII wrappers release in `Drop` and discard the status code,
//! while the runner needs every release status, so handles here are plain
//! newtypes released explicitly by the owner.

use std::ffi::{CString, c_void};
use std::ptr;

use cl3::context::CL_CONTEXT_PLATFORM;
use cl3::program::CL_PROGRAM_BUILD_LOG;
use opencl3::command_queue::CL_QUEUE_PROFILING_ENABLE;
use opencl3::types::{
    CL_BLOCKING, CL_NON_BLOCKING, cl_command_queue, cl_context, cl_context_properties, cl_event,
    cl_kernel, cl_mem, cl_program,
};

use super::{ClDriver, ClResult, NdRange};
use crate::buffer::MemFlags;
use crate::catalog::DeviceDescriptor;
use crate::status::ClStatus;

/// Owned `cl_context`.
#[derive(Debug)]
pub struct ClContext(cl_context);

/// Owned `cl_command_queue`.
#[derive(Debug)]
pub struct ClQueue(cl_command_queue);

/// Owned `cl_program`.
#[derive(Debug)]
pub struct ClProgram(cl_program);

/// Owned `cl_kernel`.
#[derive(Debug)]
pub struct ClKernel(cl_kernel);

/// Owned `cl_mem`.
#[derive(Debug)]
pub struct ClMem(cl_mem);

/// Owned `cl_event`.
#[derive(Debug)]
pub struct ClEvent(cl_event);

/// The production driver. Stateless; all state lives in the handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenClDriver;

impl ClDriver for OpenClDriver {
    type Context = ClContext;
    type Queue = ClQueue;
    type Program = ClProgram;
    type Kernel = ClKernel;
    type Mem = ClMem;
    type Event = ClEvent;

    fn create_context(&self, device: &DeviceDescriptor) -> ClResult<ClContext> {
        let properties: [cl_context_properties; 3] = [
            CL_CONTEXT_PLATFORM as cl_context_properties,
            device.platform.as_raw() as cl_context_properties,
            0,
        ];
        let context = cl3::context::create_context(
            &[device.id.as_raw()],
            properties.as_ptr(),
            None,
            ptr::null_mut(),
        )?;
        Ok(ClContext(context))
    }

    #[allow(deprecated)]
    fn create_queue(
        &self,
        context: &ClContext,
        device: &DeviceDescriptor,
        profiling: bool,
    ) -> ClResult<ClQueue> {
        let properties = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        let queue = unsafe {
            cl3::command_queue::create_command_queue(context.0, device.id.as_raw(), properties)
        }?;
        Ok(ClQueue(queue))
    }

    fn create_program(&self, context: &ClContext, sources: &[&str]) -> ClResult<ClProgram> {
        let program = cl3::program::create_program_with_source(context.0, sources)?;
        Ok(ClProgram(program))
    }

    fn build_program(
        &self,
        program: &ClProgram,
        device: &DeviceDescriptor,
        options: &str,
    ) -> ClResult<()> {
        let options = CString::new(options).map_err(|_| ClStatus::INVALID_BUILD_OPTIONS)?;
        cl3::program::build_program(
            program.0,
            &[device.id.as_raw()],
            &options,
            None,
            ptr::null_mut(),
        )?;
        Ok(())
    }

    fn build_log(&self, program: &ClProgram, device: &DeviceDescriptor) -> ClResult<String> {
        let info = cl3::program::get_program_build_info(
            program.0,
            device.id.as_raw(),
            CL_PROGRAM_BUILD_LOG,
        )?;
        let log: String = info.into();
        Ok(log.trim_end_matches('\0').to_owned())
    }

    fn create_kernel(&self, program: &ClProgram, name: &str) -> ClResult<ClKernel> {
        let name = CString::new(name).map_err(|_| ClStatus::INVALID_KERNEL_NAME)?;
        let kernel = cl3::kernel::create_kernel(program.0, &name)?;
        Ok(ClKernel(kernel))
    }

    unsafe fn create_buffer(
        &self,
        context: &ClContext,
        flags: MemFlags,
        size: usize,
        host_ptr: *mut c_void,
    ) -> ClResult<ClMem> {
        let mem = unsafe { cl3::memory::create_buffer(context.0, flags.bits(), size, host_ptr) }?;
        Ok(ClMem(mem))
    }

    fn enqueue_read(
        &self,
        queue: &ClQueue,
        mem: &ClMem,
        offset: usize,
        target: &mut [u8],
    ) -> ClResult<()> {
        let event = unsafe {
            cl3::command_queue::enqueue_read_buffer(
                queue.0,
                mem.0,
                CL_BLOCKING,
                offset,
                target.len(),
                target.as_mut_ptr().cast::<c_void>(),
                0,
                ptr::null(),
            )
        }?;
        unsafe { cl3::event::release_event(event) }?;
        Ok(())
    }

    unsafe fn enqueue_write(
        &self,
        queue: &ClQueue,
        mem: &ClMem,
        blocking: bool,
        offset: usize,
        data: &[u8],
    ) -> ClResult<()> {
        let blocking = if blocking { CL_BLOCKING } else { CL_NON_BLOCKING };
        let event = unsafe {
            cl3::command_queue::enqueue_write_buffer(
                queue.0,
                mem.0,
                blocking,
                offset,
                data.len(),
                data.as_ptr().cast::<c_void>(),
                0,
                ptr::null(),
            )
        }?;
        unsafe { cl3::event::release_event(event) }?;
        Ok(())
    }

    fn set_arg_bytes(&self, kernel: &ClKernel, index: u32, bytes: &[u8]) -> ClResult<()> {
        unsafe {
            cl3::kernel::set_kernel_arg(
                kernel.0,
                index,
                bytes.len(),
                bytes.as_ptr().cast::<c_void>(),
            )
        }?;
        Ok(())
    }

    fn set_arg_mem(&self, kernel: &ClKernel, index: u32, mem: &ClMem) -> ClResult<()> {
        unsafe {
            cl3::kernel::set_kernel_arg(
                kernel.0,
                index,
                std::mem::size_of::<cl_mem>(),
                ptr::from_ref(&mem.0).cast::<c_void>(),
            )
        }?;
        Ok(())
    }

    fn set_arg_local(&self, kernel: &ClKernel, index: u32, size: usize) -> ClResult<()> {
        unsafe { cl3::kernel::set_kernel_arg(kernel.0, index, size, ptr::null()) }?;
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &ClQueue,
        kernel: &ClKernel,
        range: &NdRange,
    ) -> ClResult<ClEvent> {
        let offset = range.global_offset.as_ref().map_or(ptr::null(), |o| o.as_ptr());
        let local = range.local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        let event = unsafe {
            cl3::command_queue::enqueue_nd_range_kernel(
                queue.0,
                kernel.0,
                range.work_dim,
                offset,
                range.global.as_ptr(),
                local,
                0,
                ptr::null(),
            )
        }?;
        Ok(ClEvent(event))
    }

    fn wait_event(&self, event: &ClEvent) -> ClResult<()> {
        cl3::event::wait_for_events(&[event.0])?;
        Ok(())
    }

    fn finish(&self, queue: &ClQueue) -> ClResult<()> {
        cl3::command_queue::finish(queue.0)?;
        Ok(())
    }

    fn release_event(&self, event: ClEvent) -> ClResult<()> {
        unsafe { cl3::event::release_event(event.0) }?;
        Ok(())
    }

    fn release_kernel(&self, kernel: ClKernel) -> ClResult<()> {
        unsafe { cl3::kernel::release_kernel(kernel.0) }?;
        Ok(())
    }

    fn release_program(&self, program: ClProgram) -> ClResult<()> {
        unsafe { cl3::program::release_program(program.0) }?;
        Ok(())
    }

    fn release_mem(&self, mem: ClMem) -> ClResult<()> {
        unsafe { cl3::memory::release_mem_object(mem.0) }?;
        Ok(())
    }

    fn release_queue(&self, queue: ClQueue) -> ClResult<()> {
        unsafe { cl3::command_queue::release_command_queue(queue.0) }?;
        Ok(())
    }

    fn release_context(&self, context: ClContext) -> ClResult<()> {
        unsafe { cl3::context::release_context(context.0) }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_name_with_nul_is_rejected_locally() {
        let program = ClProgram(ptr::null_mut());
        let err = OpenClDriver.create_kernel(&program, "bad\0name").unwrap_err();
        assert_eq!(err, ClStatus::INVALID_KERNEL_NAME);
    }

    #[test]
    fn build_options_with_nul_are_rejected_locally() {
        let program = ClProgram(ptr::null_mut());
        let err =
            OpenClDriver.build_program(&program, &DeviceDescriptor::mock(), "-D X\0").unwrap_err();
        assert_eq!(err, ClStatus::INVALID_BUILD_OPTIONS);
    }
}
