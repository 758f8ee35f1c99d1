//! Error types for runner lifecycle, compilation, transfers and dispatch.

use std::fmt;

use thiserror::Error;

use crate::status::ClStatus;

/// Specialized result type for runner operations.
pub type Result<T> = std::result::Result<T, OpenClError>;

/// Broad failure category, one per entry of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ContextCreation,
    Build,
    Compile,
    Allocation,
    Transfer,
    ArgumentBinding,
    Dispatch,
    ResourceRelease,
    /// The runner was released, never compiled, or was handed a handle it
    /// does not own.
    Lifecycle,
    InvalidArgument,
}

/// Errors raised by [`Runner`](crate::Runner) operations.
#[derive(Debug, Error)]
pub enum OpenClError {
    /// Context or command queue creation failed.
    #[error("{op} failed: {status}")]
    ContextCreation { op: &'static str, status: ClStatus },

    /// The device compiler rejected the program. `log` is the full build log.
    #[error("clBuildProgram failed: {status}\n{log}")]
    Build { status: ClStatus, log: String },

    /// Program creation or build-log retrieval failed.
    #[error("{op} failed: {status}")]
    Compile { op: &'static str, status: ClStatus },

    /// A requested kernel name could not be resolved in the built program.
    #[error("clCreateKernel failed for '{name}': {status}")]
    KernelNotFound { name: String, status: ClStatus },

    /// `CreateBuffer` was given no source data.
    #[error("clCreateBuffer: source is empty")]
    EmptyBuffer,

    /// `CreateEmptyBuffer` was asked for zero bytes.
    #[error("clCreateBuffer: requested size is zero")]
    ZeroSizedBuffer,

    /// The device could not allocate the buffer.
    #[error("clCreateBuffer failed for {size} bytes: {status}")]
    Allocation { size: usize, status: ClStatus },

    /// A read or write was given an empty host slice.
    #[error("{op}: host slice is empty")]
    EmptyTransfer { op: &'static str },

    /// A read or write would run past the end of the device buffer.
    #[error("{op}: range {offset}..{end} exceeds buffer size {size}")]
    TransferOutOfBounds { op: &'static str, offset: usize, end: usize, size: usize },

    /// The device reported a transfer failure.
    #[error("{op} failed: {status}")]
    Transfer { op: &'static str, status: ClStatus },

    /// `clSetKernelArg` rejected an argument.
    #[error("clSetKernelArg failed for '{kernel}' slot {index}: {status}")]
    ArgumentBinding { kernel: String, index: u32, status: ClStatus },

    /// The requested work geometry is malformed; no device call was made.
    #[error("invalid work geometry for '{kernel}': {reason}")]
    InvalidGeometry { kernel: String, reason: String },

    /// Enqueueing or waiting on a kernel invocation failed.
    #[error("{op} failed for '{kernel}': {status}")]
    Dispatch { kernel: String, op: &'static str, status: ClStatus },

    /// One or more native releases failed. Every resource was still attempted.
    #[error("resource release incomplete: {failures}")]
    Release { failures: ReleaseFailures },

    /// The runner has already been released.
    #[error("runner used after release")]
    Released,

    /// A kernel was requested before any program was compiled.
    #[error("no program compiled on this runner")]
    NotCompiled,

    /// The kernel name was not part of the compiled program.
    #[error("unknown kernel '{0}'")]
    UnknownKernel(String),

    /// The buffer was already released from this runner.
    #[error("buffer #{0} is not live on this runner")]
    UnknownBuffer(u64),

    /// The buffer belongs to a different runner.
    #[error("buffer #{0} belongs to another runner")]
    ForeignBuffer(u64),

    /// Caller-supplied input was rejected before reaching the driver.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl OpenClError {
    /// The taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextCreation { .. } => ErrorKind::ContextCreation,
            Self::Build { .. } => ErrorKind::Build,
            Self::Compile { .. } | Self::KernelNotFound { .. } => ErrorKind::Compile,
            Self::EmptyBuffer | Self::ZeroSizedBuffer | Self::Allocation { .. } => {
                ErrorKind::Allocation
            }
            Self::EmptyTransfer { .. }
            | Self::TransferOutOfBounds { .. }
            | Self::Transfer { .. } => ErrorKind::Transfer,
            Self::ArgumentBinding { .. } => ErrorKind::ArgumentBinding,
            Self::InvalidGeometry { .. } | Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::Release { .. } => ErrorKind::ResourceRelease,
            Self::Released
            | Self::NotCompiled
            | Self::UnknownKernel(_)
            | Self::UnknownBuffer(_)
            | Self::ForeignBuffer(_) => ErrorKind::Lifecycle,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// The native status code, when the failure came from the driver.
    pub fn status(&self) -> Option<ClStatus> {
        match self {
            Self::ContextCreation { status, .. }
            | Self::Build { status, .. }
            | Self::Compile { status, .. }
            | Self::KernelNotFound { status, .. }
            | Self::Allocation { status, .. }
            | Self::Transfer { status, .. }
            | Self::ArgumentBinding { status, .. }
            | Self::Dispatch { status, .. } => Some(*status),
            Self::Release { failures } => failures.last().map(|f| f.status),
            _ => None,
        }
    }

    /// The compiler diagnostic log, for build failures.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::Build { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// A single native release that did not return `CL_SUCCESS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseFailure {
    pub op: &'static str,
    pub status: ClStatus,
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.status)
    }
}

/// Ordered list of release failures collected during a best-effort release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseFailures(Vec<ReleaseFailure>);

impl ReleaseFailures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one release call.
    pub fn record(&mut self, op: &'static str, result: std::result::Result<(), ClStatus>) {
        if let Err(status) = result {
            self.0.push(ReleaseFailure { op, status });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The last failure encountered, mirroring the native "last error" convention.
    pub fn last(&self) -> Option<&ReleaseFailure> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReleaseFailure> {
        self.0.iter()
    }

    /// `Ok(())` when nothing failed, otherwise [`OpenClError::Release`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() { Ok(()) } else { Err(OpenClError::Release { failures: self }) }
    }
}

impl fmt::Display for ReleaseFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.last() {
            None => write!(f, "no failures"),
            Some(last) => write!(f, "{} failure(s), last {last}", self.0.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_carries_full_log() {
        let log = "program.cl:3:5: error: use of undeclared identifier 'x'\n    x = 1;\n    ^";
        let err = OpenClError::Build { status: ClStatus::BUILD_PROGRAM_FAILURE, log: log.into() };
        let msg = err.to_string();
        assert!(msg.contains("CL_BUILD_PROGRAM_FAILURE (-11)"));
        assert!(msg.ends_with(log));
        assert_eq!(err.build_log(), Some(log));
        assert_eq!(err.kind(), ErrorKind::Build);
    }

    #[test]
    fn native_errors_name_the_operation() {
        let err = OpenClError::Transfer {
            op: "clEnqueueReadBuffer",
            status: ClStatus::INVALID_MEM_OBJECT,
        };
        assert_eq!(err.to_string(), "clEnqueueReadBuffer failed: CL_INVALID_MEM_OBJECT (-38)");
        assert_eq!(err.status(), Some(ClStatus::INVALID_MEM_OBJECT));
    }

    #[test]
    fn release_failures_keep_order_and_expose_last() {
        let mut failures = ReleaseFailures::new();
        failures.record("clReleaseKernel", Ok(()));
        failures.record("clReleaseMemObject", Err(ClStatus::INVALID_MEM_OBJECT));
        failures.record("clReleaseContext", Err(ClStatus::INVALID_CONTEXT));
        assert_eq!(failures.len(), 2);
        assert_eq!(failures.last().map(|f| f.op), Some("clReleaseContext"));

        let err = failures.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceRelease);
        assert_eq!(err.status(), Some(ClStatus::INVALID_CONTEXT));
        assert!(err.to_string().contains("2 failure(s), last clReleaseContext"));
    }

    #[test]
    fn empty_failures_are_ok() {
        assert!(ReleaseFailures::new().into_result().is_ok());
    }

    #[test]
    fn lifecycle_errors_have_no_status() {
        for err in [
            OpenClError::Released,
            OpenClError::NotCompiled,
            OpenClError::UnknownKernel("square".into()),
            OpenClError::ForeignBuffer(3),
        ] {
            assert_eq!(err.kind(), ErrorKind::Lifecycle);
            assert_eq!(err.status(), None);
        }
    }
}
