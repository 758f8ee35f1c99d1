//! Run OpenCL kernels on a single device.
//!
//! - [`catalog`]: best-effort enumeration of platforms and devices.
//! - [`Runner`]: one context and one in-order queue bound to a device, with
//!   ordered, total-effort release of everything it owns.
//! - [`Runner::compile_kernels`]: build sources and resolve kernels, with
//!   the full compiler log on failure.
//! - [`Buffer`]: device memory owned by a runner, plus blocking and
//!   non-blocking transfers.
//! - [`Runner::dispatch`]: positional argument binding and NDRange launch.
//!
//! Native calls go through the [`ClDriver`] trait. [`OpenClDriver`] is the
//! real ICD-backed implementation; [`MockDriver`] emulates a device in host
//! memory.
//!
//! ```no_run
//! use cl_runner::{KernelArg, MemFlags, Runner, WorkGeometry, catalog, kernels};
//!
//! # fn main() -> cl_runner::Result<()> {
//! let catalog = catalog::enumerate();
//! let device = catalog.first_device().cloned().expect("no OpenCL device");
//! let mut runner = Runner::new(device)?;
//! runner.compile_kernels(&[kernels::SQUARE_SOURCE], &["square"], "")?;
//!
//! let input: Vec<i32> = (1..=10).collect();
//! let src = runner.create_buffer(MemFlags::READ_ONLY, &input)?;
//! let dst = runner.create_empty_buffer(MemFlags::WRITE_ONLY, input.len() * 4)?;
//! let args = [KernelArg::buffer(&src), KernelArg::buffer(&dst)];
//! runner.dispatch("square", 1, &WorkGeometry::new(&[10]), &args, true)?;
//!
//! let mut out = vec![0i32; 10];
//! runner.read_buffer(0, &dst, &mut out)?;
//! runner.release()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod kernels;
mod program;
pub mod runner;
pub mod status;

pub use buffer::{AccessMode, Buffer, BufferTable, MemFlags};
pub use catalog::{Catalog, DeviceDescriptor, DeviceType, EnumerationError, PlatformInfo, enumerate};
pub use config::{DeviceSelector, RunnerConfig};
pub use dispatch::{GeometryError, KernelArg, WorkGeometry};
pub use driver::{ClDriver, MockDriver, NdRange, OpenClDriver};
pub use error::{ErrorKind, OpenClError, ReleaseFailure, ReleaseFailures, Result};
pub use runner::{Runner, RunnerId, RunnerState};
pub use status::ClStatus;
