//! In-process [`ClDriver`] that emulates a single in-order device.
//!
//! Buffers are host byte vectors. Kernels resolve against the program
//! source text (`kernel void <name>(`), and their behaviour is a Rust
//! closure registered with [`MockDriver::register_kernel`]; kernels without
//! a closure run as no-ops. A program fails to build when its source
//! contains an `#error` directive or unbalanced braces, and the build log
//! then reads like a compiler diagnostic.
//!
//! Every native call is appended to a journal ([`MockDriver::calls`]) and
//! any call can be made to fail once with [`MockDriver::fail_next`].
//! `USE_HOST_PTR` buffers are copied at creation; aliasing is not emulated.
//!
//! Clones share state, so a test can keep a handle to the driver it moved
//! into a runner.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use bytemuck::Pod;

use super::{ClDriver, ClResult, NdRange};
use crate::buffer::MemFlags;
use crate::catalog::DeviceDescriptor;
use crate::status::ClStatus;

/// Behaviour of a mock kernel.
pub type MockKernelFn = dyn Fn(&mut MockLaunch<'_>) -> ClResult<()>;

#[derive(Debug)]
pub struct MockContext(u64);
#[derive(Debug)]
pub struct MockQueue(u64);
#[derive(Debug)]
pub struct MockProgram(u64);
#[derive(Debug)]
pub struct MockKernel(u64);
#[derive(Debug)]
pub struct MockMem(u64);
#[derive(Debug)]
pub struct MockEvent(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
enum MockArg {
    Bytes(Vec<u8>),
    Mem(u64),
    Local(usize),
}

#[derive(Debug)]
struct ProgramState {
    source: String,
    built: bool,
    log: String,
}

#[derive(Debug)]
struct KernelState {
    name: String,
    args: BTreeMap<u32, MockArg>,
}

/// One recorded kernel invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockLaunchRecord {
    pub kernel: String,
    pub range: NdRange,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    calls: Vec<&'static str>,
    faults: Vec<(&'static str, ClStatus)>,
    live: BTreeMap<u64, &'static str>,
    programs: HashMap<u64, ProgramState>,
    kernels: HashMap<u64, KernelState>,
    mems: HashMap<u64, Vec<u8>>,
    behaviours: HashMap<String, Rc<MockKernelFn>>,
    launches: Vec<MockLaunchRecord>,
}

impl MockState {
    /// Journal the call and consume a pending fault for it, if any.
    fn enter(&mut self, op: &'static str) -> ClResult<()> {
        self.calls.push(op);
        match self.faults.iter().position(|(fault_op, _)| *fault_op == op) {
            Some(pos) => Err(self.faults.remove(pos).1),
            None => Ok(()),
        }
    }

    fn alloc(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        self.next_handle
    }

    fn retire(&mut self, id: u64, kind: &'static str, invalid: ClStatus) -> ClResult<()> {
        match self.live.get(&id) {
            Some(k) if *k == kind => {
                self.live.remove(&id);
                Ok(())
            }
            _ => Err(invalid),
        }
    }
}

/// Emulated OpenCL device. See the module docs.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Rc<RefCell<MockState>>,
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MockDriver")
            .field("calls", &state.calls.len())
            .field("live_handles", &state.live.len())
            .finish()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behaviour of the kernel called `name`.
    ///
    /// The closure must not call back into the driver.
    pub fn register_kernel(
        &self,
        name: &str,
        behaviour: impl Fn(&mut MockLaunch<'_>) -> ClResult<()> + 'static,
    ) {
        self.state.borrow_mut().behaviours.insert(name.to_owned(), Rc::new(behaviour));
    }

    /// Make the next call to `op` (e.g. `"clReleaseMemObject"`) fail with `status`.
    pub fn fail_next(&self, op: &'static str, status: ClStatus) {
        self.state.borrow_mut().faults.push((op, status));
    }

    /// Every native call made so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.clone()
    }

    /// Calls made so far that match `op`.
    pub fn count(&self, op: &str) -> usize {
        self.state.borrow().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Handles created and not yet released.
    pub fn live_handles(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Live handles of one kind: `"context"`, `"queue"`, `"program"`,
    /// `"kernel"`, `"mem"` or `"event"`.
    pub fn live(&self, kind: &str) -> usize {
        self.state.borrow().live.values().filter(|k| **k == kind).count()
    }

    /// Kernel invocations in submission order.
    pub fn launches(&self) -> Vec<MockLaunchRecord> {
        self.state.borrow().launches.clone()
    }
}

/// Find `#error` directives and brace imbalance, returning a diagnostic log.
fn diagnose(source: &str) -> Option<String> {
    let mut log = String::new();
    for (line_no, line) in source.lines().enumerate() {
        if let Some(col) = line.find("#error") {
            let message = line[col + "#error".len()..].trim();
            log.push_str(&format!("<kernel>:{}:{}: error: {message}\n", line_no + 1, col + 2));
            log.push_str(&format!("{line}\n"));
        }
    }
    let depth = source.chars().fold(0i64, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    });
    if depth > 0 {
        log.push_str("<kernel>: error: expected '}' at end of input\n");
    } else if depth < 0 {
        log.push_str("<kernel>: error: extraneous closing brace ('}')\n");
    }
    if log.is_empty() {
        None
    } else {
        log.push_str("1 error generated.\n");
        Some(log)
    }
}

fn declares_kernel(source: &str, name: &str) -> bool {
    let needle = format!("void {name}(");
    source.match_indices(&needle).any(|(pos, _)| source[..pos].trim_end().ends_with("kernel"))
}

impl ClDriver for MockDriver {
    type Context = MockContext;
    type Queue = MockQueue;
    type Program = MockProgram;
    type Kernel = MockKernel;
    type Mem = MockMem;
    type Event = MockEvent;

    fn create_context(&self, _device: &DeviceDescriptor) -> ClResult<MockContext> {
        let mut state = self.state.borrow_mut();
        state.enter("clCreateContext")?;
        Ok(MockContext(state.alloc("context")))
    }

    fn create_queue(
        &self,
        context: &MockContext,
        _device: &DeviceDescriptor,
        _profiling: bool,
    ) -> ClResult<MockQueue> {
        let mut state = self.state.borrow_mut();
        state.enter("clCreateCommandQueue")?;
        if !state.live.contains_key(&context.0) {
            return Err(ClStatus::INVALID_CONTEXT);
        }
        Ok(MockQueue(state.alloc("queue")))
    }

    fn create_program(&self, _context: &MockContext, sources: &[&str]) -> ClResult<MockProgram> {
        let mut state = self.state.borrow_mut();
        state.enter("clCreateProgramWithSource")?;
        if sources.is_empty() {
            return Err(ClStatus::INVALID_VALUE);
        }
        let id = state.alloc("program");
        let program = ProgramState { source: sources.concat(), built: false, log: String::new() };
        state.programs.insert(id, program);
        Ok(MockProgram(id))
    }

    fn build_program(
        &self,
        program: &MockProgram,
        _device: &DeviceDescriptor,
        _options: &str,
    ) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clBuildProgram")?;
        let program = state.programs.get_mut(&program.0).ok_or(ClStatus::INVALID_PROGRAM)?;
        match diagnose(&program.source) {
            Some(log) => {
                program.log = log;
                Err(ClStatus::BUILD_PROGRAM_FAILURE)
            }
            None => {
                program.built = true;
                Ok(())
            }
        }
    }

    fn build_log(&self, program: &MockProgram, _device: &DeviceDescriptor) -> ClResult<String> {
        let mut state = self.state.borrow_mut();
        state.enter("clGetProgramBuildInfo")?;
        state.programs.get(&program.0).map(|p| p.log.clone()).ok_or(ClStatus::INVALID_PROGRAM)
    }

    fn create_kernel(&self, program: &MockProgram, name: &str) -> ClResult<MockKernel> {
        let mut state = self.state.borrow_mut();
        state.enter("clCreateKernel")?;
        let program = state.programs.get(&program.0).ok_or(ClStatus::INVALID_PROGRAM)?;
        if !program.built {
            return Err(ClStatus::INVALID_PROGRAM_EXECUTABLE);
        }
        if !declares_kernel(&program.source, name) {
            return Err(ClStatus::INVALID_KERNEL_NAME);
        }
        let id = state.alloc("kernel");
        state.kernels.insert(id, KernelState { name: name.to_owned(), args: BTreeMap::new() });
        Ok(MockKernel(id))
    }

    unsafe fn create_buffer(
        &self,
        _context: &MockContext,
        flags: MemFlags,
        size: usize,
        host_ptr: *mut c_void,
    ) -> ClResult<MockMem> {
        let mut state = self.state.borrow_mut();
        state.enter("clCreateBuffer")?;
        if size == 0 {
            return Err(ClStatus::INVALID_BUFFER_SIZE);
        }
        if flags.access_modes() > 1 {
            return Err(ClStatus::INVALID_VALUE);
        }
        let wants_host =
            flags.contains(MemFlags::COPY_HOST_PTR) || flags.contains(MemFlags::USE_HOST_PTR);
        if wants_host == host_ptr.is_null() {
            return Err(ClStatus::INVALID_HOST_PTR);
        }
        let contents = if wants_host {
            // SAFETY: the caller guarantees `size` readable bytes at `host_ptr`.
            unsafe { std::slice::from_raw_parts(host_ptr.cast::<u8>(), size) }.to_vec()
        } else {
            vec![0; size]
        };
        let id = state.alloc("mem");
        state.mems.insert(id, contents);
        Ok(MockMem(id))
    }

    fn enqueue_read(
        &self,
        _queue: &MockQueue,
        mem: &MockMem,
        offset: usize,
        target: &mut [u8],
    ) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clEnqueueReadBuffer")?;
        let contents = state.mems.get(&mem.0).ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        let src = offset
            .checked_add(target.len())
            .and_then(|end| contents.get(offset..end))
            .ok_or(ClStatus::INVALID_VALUE)?;
        target.copy_from_slice(src);
        Ok(())
    }

    unsafe fn enqueue_write(
        &self,
        _queue: &MockQueue,
        mem: &MockMem,
        _blocking: bool,
        offset: usize,
        data: &[u8],
    ) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clEnqueueWriteBuffer")?;
        let contents = state.mems.get_mut(&mem.0).ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        let dst = offset
            .checked_add(data.len())
            .and_then(|end| contents.get_mut(offset..end))
            .ok_or(ClStatus::INVALID_VALUE)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn set_arg_bytes(&self, kernel: &MockKernel, index: u32, bytes: &[u8]) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clSetKernelArg")?;
        if bytes.is_empty() {
            return Err(ClStatus::INVALID_ARG_SIZE);
        }
        let kernel = state.kernels.get_mut(&kernel.0).ok_or(ClStatus::INVALID_KERNEL)?;
        kernel.args.insert(index, MockArg::Bytes(bytes.to_vec()));
        Ok(())
    }

    fn set_arg_mem(&self, kernel: &MockKernel, index: u32, mem: &MockMem) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clSetKernelArg")?;
        if !state.mems.contains_key(&mem.0) {
            return Err(ClStatus::INVALID_MEM_OBJECT);
        }
        let kernel = state.kernels.get_mut(&kernel.0).ok_or(ClStatus::INVALID_KERNEL)?;
        kernel.args.insert(index, MockArg::Mem(mem.0));
        Ok(())
    }

    fn set_arg_local(&self, kernel: &MockKernel, index: u32, size: usize) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clSetKernelArg")?;
        if size == 0 {
            return Err(ClStatus::INVALID_ARG_SIZE);
        }
        let kernel = state.kernels.get_mut(&kernel.0).ok_or(ClStatus::INVALID_KERNEL)?;
        kernel.args.insert(index, MockArg::Local(size));
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        _queue: &MockQueue,
        kernel: &MockKernel,
        range: &NdRange,
    ) -> ClResult<MockEvent> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.enter("clEnqueueNDRangeKernel")?;
        if !(1..=3).contains(&range.work_dim) {
            return Err(ClStatus::INVALID_WORK_DIMENSION);
        }
        let kernel = state.kernels.get(&kernel.0).ok_or(ClStatus::INVALID_KERNEL)?;
        let name = kernel.name.clone();
        let args = kernel.args.clone();
        state.launches.push(MockLaunchRecord { kernel: name.clone(), range: range.clone() });

        if let Some(behaviour) = state.behaviours.get(&name).cloned() {
            let mut launch = MockLaunch { range, args: &args, mems: &mut state.mems };
            behaviour(&mut launch)?;
        }
        Ok(MockEvent(state.alloc("event")))
    }

    fn wait_event(&self, event: &MockEvent) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clWaitForEvents")?;
        if state.live.contains_key(&event.0) { Ok(()) } else { Err(ClStatus::INVALID_EVENT) }
    }

    fn finish(&self, _queue: &MockQueue) -> ClResult<()> {
        self.state.borrow_mut().enter("clFinish")
    }

    fn release_event(&self, event: MockEvent) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clReleaseEvent")?;
        state.retire(event.0, "event", ClStatus::INVALID_EVENT)
    }

    fn release_kernel(&self, kernel: MockKernel) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clReleaseKernel")?;
        state.retire(kernel.0, "kernel", ClStatus::INVALID_KERNEL)?;
        state.kernels.remove(&kernel.0);
        Ok(())
    }

    fn release_program(&self, program: MockProgram) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clReleaseProgram")?;
        state.retire(program.0, "program", ClStatus::INVALID_PROGRAM)?;
        state.programs.remove(&program.0);
        Ok(())
    }

    fn release_mem(&self, mem: MockMem) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clReleaseMemObject")?;
        state.retire(mem.0, "mem", ClStatus::INVALID_MEM_OBJECT)?;
        state.mems.remove(&mem.0);
        Ok(())
    }

    fn release_queue(&self, queue: MockQueue) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clReleaseCommandQueue")?;
        state.retire(queue.0, "queue", ClStatus::INVALID_COMMAND_QUEUE)
    }

    fn release_context(&self, context: MockContext) -> ClResult<()> {
        let mut state = self.state.borrow_mut();
        state.enter("clReleaseContext")?;
        state.retire(context.0, "context", ClStatus::INVALID_CONTEXT)
    }
}

/// View of one kernel invocation handed to a registered mock kernel.
pub struct MockLaunch<'a> {
    range: &'a NdRange,
    args: &'a BTreeMap<u32, MockArg>,
    mems: &'a mut HashMap<u64, Vec<u8>>,
}

impl MockLaunch<'_> {
    pub fn work_dim(&self) -> u32 {
        self.range.work_dim
    }

    /// Global extent of dimension `dim`, or 1 beyond `work_dim`.
    pub fn global_size(&self, dim: usize) -> usize {
        self.range.global.get(dim).copied().unwrap_or(1)
    }

    /// Global offset of dimension `dim`, 0 when absent.
    pub fn global_offset(&self, dim: usize) -> usize {
        self.range.global_offset.as_ref().and_then(|o| o.get(dim).copied()).unwrap_or(0)
    }

    /// Every global id of a 1-dimensional launch, offset applied.
    pub fn global_ids(&self) -> std::ops::Range<usize> {
        let start = self.global_offset(0);
        start..start + self.global_size(0)
    }

    /// Bytes reserved for a `__local` argument.
    pub fn local_size(&self, index: u32) -> ClResult<usize> {
        match self.args.get(&index) {
            Some(MockArg::Local(size)) => Ok(*size),
            _ => Err(ClStatus::INVALID_KERNEL_ARGS),
        }
    }

    /// By-value argument at slot `index`.
    pub fn scalar<T: Pod>(&self, index: u32) -> ClResult<T> {
        match self.args.get(&index) {
            Some(MockArg::Bytes(bytes)) => {
                bytemuck::try_pod_read_unaligned(bytes).map_err(|_| ClStatus::INVALID_ARG_SIZE)
            }
            _ => Err(ClStatus::INVALID_KERNEL_ARGS),
        }
    }

    fn mem_id(&self, index: u32) -> ClResult<u64> {
        match self.args.get(&index) {
            Some(MockArg::Mem(id)) => Ok(*id),
            _ => Err(ClStatus::INVALID_KERNEL_ARGS),
        }
    }

    /// Whole contents of the buffer bound at slot `index`.
    pub fn read<T: Pod>(&self, index: u32) -> ClResult<Vec<T>> {
        let id = self.mem_id(index)?;
        let bytes = self.mems.get(&id).ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        let elem = std::mem::size_of::<T>();
        if elem == 0 || bytes.len() % elem != 0 {
            return Err(ClStatus::INVALID_ARG_SIZE);
        }
        Ok(bytes.chunks_exact(elem).map(bytemuck::pod_read_unaligned).collect())
    }

    /// Overwrite elements of the buffer bound at slot `index`, starting at
    /// element `start`.
    pub fn write<T: Pod>(&mut self, index: u32, start: usize, values: &[T]) -> ClResult<()> {
        let id = self.mem_id(index)?;
        let bytes = self.mems.get_mut(&id).ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        let src: &[u8] = bytemuck::cast_slice(values);
        let offset = start * std::mem::size_of::<T>();
        let dst = offset
            .checked_add(src.len())
            .and_then(|end| bytes.get_mut(offset..end))
            .ok_or(ClStatus::OUT_OF_RESOURCES)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnose_reports_error_directive_with_position() {
        let log = diagnose("kernel void k() {\n  #error missing semicolon\n}").unwrap();
        assert!(log.contains("<kernel>:2:4: error: missing semicolon"));
        assert!(log.ends_with("1 error generated.\n"));
    }

    #[test]
    fn diagnose_reports_unbalanced_braces() {
        assert!(diagnose("kernel void k() {").unwrap().contains("expected '}'"));
        assert!(diagnose("kernel void k() {}}").unwrap().contains("extraneous"));
        assert!(diagnose("kernel void k() { }").is_none());
    }

    #[test]
    fn kernel_declaration_lookup() {
        let src = "__kernel void square(__global int* a) {}\nvoid helper(int x) {}";
        assert!(declares_kernel(src, "square"));
        assert!(!declares_kernel(src, "helper"));
        assert!(!declares_kernel(src, "cube"));
    }

    #[test]
    fn faults_fire_once() {
        let driver = MockDriver::new();
        driver.fail_next("clCreateContext", ClStatus::OUT_OF_HOST_MEMORY);
        let device = DeviceDescriptor::mock();
        assert_eq!(driver.create_context(&device).unwrap_err(), ClStatus::OUT_OF_HOST_MEMORY);
        let ctx = driver.create_context(&device).unwrap();
        assert_eq!(driver.live("context"), 1);
        driver.release_context(ctx).unwrap();
        assert_eq!(driver.live_handles(), 0);
        assert_eq!(driver.count("clCreateContext"), 2);
    }
}
