//! Program compilation and kernel resolution.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::driver::ClDriver;
use crate::error::{OpenClError, ReleaseFailures, Result};
use crate::runner::Runner;

/// A built program and its resolved kernels, keyed by name.
pub(crate) struct CompiledProgram<D: ClDriver> {
    program: D::Program,
    kernels: BTreeMap<String, D::Kernel>,
}

impl<D: ClDriver> fmt::Debug for CompiledProgram<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProgram").field("kernels", &self.kernels.keys()).finish()
    }
}

impl<D: ClDriver> CompiledProgram<D> {
    pub(crate) fn kernel(&self, name: &str) -> Result<&D::Kernel> {
        self.kernels.get(name).ok_or_else(|| OpenClError::UnknownKernel(name.to_owned()))
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    /// Release every kernel, then the program.
    pub(crate) fn release(self, driver: &D, failures: &mut ReleaseFailures) {
        for (_, kernel) in self.kernels {
            failures.record("clReleaseKernel", driver.release_kernel(kernel));
        }
        failures.record("clReleaseProgram", driver.release_program(self.program));
    }
}

fn validate_request(sources: &[&str], kernel_names: &[&str]) -> Result<()> {
    if sources.is_empty() {
        return Err(OpenClError::InvalidArgument("no kernel sources given".into()));
    }
    let mut seen = HashSet::new();
    for name in kernel_names {
        if name.is_empty() {
            return Err(OpenClError::InvalidArgument("empty kernel name".into()));
        }
        if !seen.insert(*name) {
            return Err(OpenClError::InvalidArgument(format!("kernel '{name}' requested twice")));
        }
    }
    Ok(())
}

impl<D: ClDriver> Runner<D> {
    /// Build `sources` as one program for this runner's device and resolve
    /// `kernel_names` in it.
    ///
    /// `options` follow the configured build options. On a build failure the
    /// error carries the compiler log. A prior program is released first.
    pub fn compile_kernels(
        &mut self,
        sources: &[&str],
        kernel_names: &[&str],
        options: &str,
    ) -> Result<()> {
        self.ensure_live()?;
        validate_request(sources, kernel_names)?;
        let options = self.config().compiler_options(options);
        let device = self.device().clone();
        let (driver, handles) = self.live_mut()?;

        if let Some(previous) = handles.program.take() {
            debug!("releasing previous program before recompiling");
            let mut failures = ReleaseFailures::new();
            previous.release(driver, &mut failures);
            failures.into_result()?;
        }

        let program = driver
            .create_program(&handles.context, sources)
            .map_err(|status| OpenClError::Compile { op: "clCreateProgramWithSource", status })?;

        debug!(sources = sources.len(), options = %options, "building program");
        if let Err(status) = driver.build_program(&program, &device, &options) {
            let log = driver.build_log(&program, &device);
            if let Err(release) = driver.release_program(program) {
                warn!("clReleaseProgram failed after build error: {release}");
            }
            let log = log
                .map_err(|status| OpenClError::Compile { op: "clGetProgramBuildInfo", status })?;
            debug!("build log:\n{log}");
            return Err(OpenClError::Build { status, log });
        }

        let mut kernels = BTreeMap::new();
        for name in kernel_names {
            match driver.create_kernel(&program, name) {
                Ok(kernel) => {
                    kernels.insert((*name).to_owned(), kernel);
                }
                Err(status) => {
                    let mut failures = ReleaseFailures::new();
                    CompiledProgram::<D> { program, kernels }.release(driver, &mut failures);
                    for failure in failures.iter() {
                        warn!("cleanup after kernel lookup failure: {failure}");
                    }
                    return Err(OpenClError::KernelNotFound { name: (*name).to_owned(), status });
                }
            }
        }

        debug!(kernels = ?kernel_names, "program compiled");
        handles.program = Some(CompiledProgram { program, kernels });
        Ok(())
    }

    /// Names of the resolved kernels, sorted. Empty before compilation.
    pub fn kernel_names(&self) -> Vec<String> {
        self.program().map(|p| p.names().map(str::to_owned).collect()).unwrap_or_default()
    }

    pub fn has_kernel(&self, name: &str) -> bool {
        self.program().is_some_and(|p| p.kernel(name).is_ok())
    }
}
