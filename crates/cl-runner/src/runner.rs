//! The [`Runner`]: one device, one context, one in-order queue.
//!
//! A runner owns every native handle it creates. [`Runner::release`] frees
//! them in dependency order (kernels, program, buffers, queue, context),
//! attempting every release even after a failure, and reports all failures
//! at once. After release every operation fails with
//! [`OpenClError::Released`] without touching native state. Dropping an
//! unreleased runner performs the same release and logs failures.
//!
//! Calls against one runner must be serialised by the caller. The queue is
//! in-order, so commands execute in submission order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::buffer::{BufferTable, Staging};
use crate::catalog::{Catalog, DeviceDescriptor};
use crate::config::RunnerConfig;
use crate::driver::{ClDriver, OpenClDriver};
use crate::error::{OpenClError, ReleaseFailures, Result};
use crate::program::CompiledProgram;

/// Process-unique runner identity, stamped into every [`Buffer`](crate::Buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerId(u64);

impl RunnerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runner#{}", self.0)
    }
}

/// Where a runner is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    /// Context and queue exist; no program.
    Created,
    /// A program and its kernels are resolved.
    Compiled,
    /// Terminal. Every native handle has been released.
    Released,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Compiled => "compiled",
            Self::Released => "released",
        })
    }
}

/// Native state of a live runner.
pub(crate) struct Handles<D: ClDriver> {
    pub(crate) context: D::Context,
    pub(crate) queue: D::Queue,
    pub(crate) program: Option<CompiledProgram<D>>,
    pub(crate) buffers: BufferTable<D>,
    pub(crate) staged: Staging,
}

/// Executes kernels on a single OpenCL device.
pub struct Runner<D: ClDriver = OpenClDriver> {
    id: RunnerId,
    driver: D,
    device: DeviceDescriptor,
    config: RunnerConfig,
    handles: Option<Handles<D>>,
}

impl<D: ClDriver> fmt::Debug for Runner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("id", &self.id)
            .field("device", &self.device.display_name())
            .field("state", &self.state())
            .field("buffers", &self.buffer_count())
            .finish()
    }
}

impl Runner<OpenClDriver> {
    /// Create a runner on `device` with the default configuration.
    pub fn new(device: DeviceDescriptor) -> Result<Self> {
        Self::with_driver(OpenClDriver, device, RunnerConfig::default())
    }

    pub fn with_config(device: DeviceDescriptor, config: RunnerConfig) -> Result<Self> {
        Self::with_driver(OpenClDriver, device, config)
    }

    /// Create a runner on the device picked by `config.device`.
    pub fn from_catalog(catalog: &Catalog, config: RunnerConfig) -> Result<Self> {
        let device = catalog.select(config.device).cloned().ok_or_else(|| {
            OpenClError::InvalidArgument(format!("no OpenCL device at {}", config.device))
        })?;
        Self::with_config(device, config)
    }
}

impl<D: ClDriver> Runner<D> {
    /// Create a context for `device`'s platform and an in-order queue on it.
    ///
    /// If the queue cannot be created the context is released before the
    /// error is returned.
    pub fn with_driver(driver: D, device: DeviceDescriptor, config: RunnerConfig) -> Result<Self> {
        let context = driver
            .create_context(&device)
            .map_err(|status| OpenClError::ContextCreation { op: "clCreateContext", status })?;

        let queue = match driver.create_queue(&context, &device, config.profiling) {
            Ok(queue) => queue,
            Err(status) => {
                if let Err(release) = driver.release_context(context) {
                    warn!("clReleaseContext failed after queue creation error: {release}");
                }
                return Err(OpenClError::ContextCreation { op: "clCreateCommandQueue", status });
            }
        };

        let id = RunnerId::next();
        info!(
            runner = %id,
            device = device.display_name(),
            profiling = config.profiling,
            "runner created"
        );
        Ok(Self {
            id,
            driver,
            device,
            config,
            handles: Some(Handles {
                context,
                queue,
                program: None,
                buffers: BufferTable::new(id),
                staged: Staging::default(),
            }),
        })
    }

    pub fn id(&self) -> RunnerId {
        self.id
    }

    /// The device this runner is bound to for its whole life.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn state(&self) -> RunnerState {
        match &self.handles {
            None => RunnerState::Released,
            Some(h) if h.program.is_some() => RunnerState::Compiled,
            Some(_) => RunnerState::Created,
        }
    }

    pub fn is_released(&self) -> bool {
        self.handles.is_none()
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.handles.as_ref().map_or(0, |h| h.buffers.len())
    }

    /// Bytes held for non-blocking writes that have not reached a sync point.
    pub fn staged_bytes(&self) -> usize {
        self.handles.as_ref().map_or(0, |h| h.staged.bytes())
    }

    pub(crate) fn program(&self) -> Option<&CompiledProgram<D>> {
        self.handles.as_ref()?.program.as_ref()
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_released() { Err(OpenClError::Released) } else { Ok(()) }
    }

    /// Split borrow of the driver and the live handles.
    pub(crate) fn live_mut(&mut self) -> Result<(&D, &mut Handles<D>)> {
        let handles = self.handles.as_mut().ok_or(OpenClError::Released)?;
        Ok((&self.driver, handles))
    }

    /// Block until every queued command has completed.
    pub fn finish(&mut self) -> Result<()> {
        let (driver, handles) = self.live_mut()?;
        driver
            .finish(&handles.queue)
            .map_err(|status| OpenClError::Transfer { op: "clFinish", status })?;
        handles.staged.clear();
        Ok(())
    }

    /// Release every native resource.
    ///
    /// Every release is attempted. If any fail, the error lists all of
    /// them in order. A second call returns [`OpenClError::Released`].
    pub fn release(&mut self) -> Result<()> {
        let handles = self.handles.take().ok_or(OpenClError::Released)?;
        let failures = teardown(&self.driver, handles);
        if failures.is_empty() {
            info!(runner = %self.id, "runner released");
        } else {
            warn!(runner = %self.id, "runner released with {failures}");
        }
        failures.into_result()
    }
}

impl<D: ClDriver> Drop for Runner<D> {
    fn drop(&mut self) {
        if let Some(handles) = self.handles.take() {
            debug!(runner = %self.id, "releasing runner on drop");
            for failure in teardown(&self.driver, handles).iter() {
                warn!(runner = %self.id, "release on drop: {failure}");
            }
        }
    }
}

/// Drain the queue, then release kernels, program, buffers, queue and context.
fn teardown<D: ClDriver>(driver: &D, handles: Handles<D>) -> ReleaseFailures {
    let Handles { context, queue, program, mut buffers, staged } = handles;
    let mut failures = ReleaseFailures::new();

    failures.record("clFinish", driver.finish(&queue));

    if let Some(program) = program {
        program.release(driver, &mut failures);
    }
    for mem in buffers.drain() {
        failures.record("clReleaseMemObject", driver.release_mem(mem));
    }
    failures.record("clReleaseCommandQueue", driver.release_queue(queue));
    // Pending writes may still read the copies until the queue is gone.
    drop(staged);
    failures.record("clReleaseContext", driver.release_context(context));
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::error::ErrorKind;
    use crate::status::ClStatus;

    fn mock_runner() -> (MockDriver, Runner<MockDriver>) {
        let driver = MockDriver::new();
        let runner =
            Runner::with_driver(driver.clone(), DeviceDescriptor::mock(), RunnerConfig::default())
                .unwrap();
        (driver, runner)
    }

    #[test]
    fn runner_ids_are_unique() {
        let (_, a) = mock_runner();
        let (_, b) = mock_runner();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn fresh_runner_is_created_with_no_buffers() {
        let (driver, runner) = mock_runner();
        assert_eq!(runner.state(), RunnerState::Created);
        assert_eq!(runner.buffer_count(), 0);
        assert_eq!(driver.calls(), ["clCreateContext", "clCreateCommandQueue"]);
    }

    #[test]
    fn queue_failure_releases_context() {
        let driver = MockDriver::new();
        driver.fail_next("clCreateCommandQueue", ClStatus::OUT_OF_RESOURCES);
        let err =
            Runner::with_driver(driver.clone(), DeviceDescriptor::mock(), RunnerConfig::default())
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextCreation);
        assert_eq!(err.status(), Some(ClStatus::OUT_OF_RESOURCES));
        assert!(err.to_string().starts_with("clCreateCommandQueue failed"));
        assert_eq!(driver.live_handles(), 0);
        assert_eq!(driver.calls().last(), Some(&"clReleaseContext"));
    }

    #[test]
    fn context_failure_is_reported() {
        let driver = MockDriver::new();
        driver.fail_next("clCreateContext", ClStatus::DEVICE_NOT_FOUND);
        let err = Runner::with_driver(driver, DeviceDescriptor::mock(), RunnerConfig::default())
            .unwrap_err();
        assert!(matches!(err, OpenClError::ContextCreation { op: "clCreateContext", .. }));
    }

    #[test]
    fn drop_releases_everything() {
        let (driver, runner) = mock_runner();
        drop(runner);
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn failed_drain_still_releases_queue_and_context() {
        let (driver, mut runner) = mock_runner();
        let buffer = runner.create_empty_buffer(crate::MemFlags::READ_WRITE, 16).unwrap();
        runner.write_buffer(0, &buffer, &[7u32; 4], false).unwrap();
        assert_eq!(runner.staged_bytes(), 16);

        driver.fail_next("clFinish", ClStatus::OUT_OF_RESOURCES);
        let err = runner.release().unwrap_err();
        let OpenClError::Release { failures } = &err else {
            panic!("expected Release, got {err:?}")
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures.last().map(|f| f.op), Some("clFinish"));

        let calls = driver.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(tail, ["clReleaseMemObject", "clReleaseCommandQueue", "clReleaseContext"]);
        assert_eq!(driver.live_handles(), 0);
        assert_eq!(runner.staged_bytes(), 0);
    }

    #[test]
    fn released_runner_fails_fast() {
        let (driver, mut runner) = mock_runner();
        runner.release().unwrap();
        driver.clear_calls();
        assert!(matches!(runner.finish(), Err(OpenClError::Released)));
        assert!(matches!(runner.release(), Err(OpenClError::Released)));
        assert_eq!(runner.state(), RunnerState::Released);
        assert!(driver.calls().is_empty());
    }
}
