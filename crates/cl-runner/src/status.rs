//! Native OpenCL status codes.
//!
//! Every native failure surfaced by this crate carries the raw `cl_int`
//! returned by the driver. [`ClStatus`] keeps that integer and renders it
//! with its symbolic name so log lines and error messages stay readable.

use std::fmt;

use opencl3::error_codes::{
    CL_BUILD_PROGRAM_FAILURE, CL_DEVICE_NOT_FOUND, CL_INVALID_ARG_INDEX, CL_INVALID_ARG_SIZE,
    CL_INVALID_ARG_VALUE, CL_INVALID_BUFFER_SIZE, CL_INVALID_BUILD_OPTIONS,
    CL_INVALID_COMMAND_QUEUE, CL_INVALID_CONTEXT, CL_INVALID_DEVICE, CL_INVALID_EVENT,
    CL_INVALID_HOST_PTR, CL_INVALID_KERNEL, CL_INVALID_KERNEL_ARGS, CL_INVALID_KERNEL_NAME,
    CL_INVALID_MEM_OBJECT, CL_INVALID_PROGRAM, CL_INVALID_PROGRAM_EXECUTABLE, CL_INVALID_VALUE,
    CL_INVALID_WORK_DIMENSION, CL_INVALID_WORK_GROUP_SIZE, CL_MEM_OBJECT_ALLOCATION_FAILURE,
    CL_OUT_OF_HOST_MEMORY, CL_OUT_OF_RESOURCES, CL_SUCCESS, ClError, error_text,
};
use opencl3::types::cl_int;

/// A raw OpenCL status code (`CL_SUCCESS` is `0`, failures are negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClStatus(pub cl_int);

impl ClStatus {
    pub const SUCCESS: Self = Self(CL_SUCCESS);
    pub const DEVICE_NOT_FOUND: Self = Self(CL_DEVICE_NOT_FOUND);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Self = Self(CL_MEM_OBJECT_ALLOCATION_FAILURE);
    pub const OUT_OF_RESOURCES: Self = Self(CL_OUT_OF_RESOURCES);
    pub const OUT_OF_HOST_MEMORY: Self = Self(CL_OUT_OF_HOST_MEMORY);
    pub const BUILD_PROGRAM_FAILURE: Self = Self(CL_BUILD_PROGRAM_FAILURE);
    pub const INVALID_VALUE: Self = Self(CL_INVALID_VALUE);
    pub const INVALID_DEVICE: Self = Self(CL_INVALID_DEVICE);
    pub const INVALID_CONTEXT: Self = Self(CL_INVALID_CONTEXT);
    pub const INVALID_COMMAND_QUEUE: Self = Self(CL_INVALID_COMMAND_QUEUE);
    pub const INVALID_HOST_PTR: Self = Self(CL_INVALID_HOST_PTR);
    pub const INVALID_MEM_OBJECT: Self = Self(CL_INVALID_MEM_OBJECT);
    pub const INVALID_BUILD_OPTIONS: Self = Self(CL_INVALID_BUILD_OPTIONS);
    pub const INVALID_PROGRAM: Self = Self(CL_INVALID_PROGRAM);
    pub const INVALID_PROGRAM_EXECUTABLE: Self = Self(CL_INVALID_PROGRAM_EXECUTABLE);
    pub const INVALID_KERNEL_NAME: Self = Self(CL_INVALID_KERNEL_NAME);
    pub const INVALID_KERNEL: Self = Self(CL_INVALID_KERNEL);
    pub const INVALID_ARG_INDEX: Self = Self(CL_INVALID_ARG_INDEX);
    pub const INVALID_ARG_VALUE: Self = Self(CL_INVALID_ARG_VALUE);
    pub const INVALID_ARG_SIZE: Self = Self(CL_INVALID_ARG_SIZE);
    pub const INVALID_KERNEL_ARGS: Self = Self(CL_INVALID_KERNEL_ARGS);
    pub const INVALID_WORK_DIMENSION: Self = Self(CL_INVALID_WORK_DIMENSION);
    pub const INVALID_WORK_GROUP_SIZE: Self = Self(CL_INVALID_WORK_GROUP_SIZE);
    pub const INVALID_EVENT: Self = Self(CL_INVALID_EVENT);
    pub const INVALID_BUFFER_SIZE: Self = Self(CL_INVALID_BUFFER_SIZE);

    /// The raw integer code.
    pub const fn code(self) -> cl_int {
        self.0
    }

    /// Symbolic name from the OpenCL headers, or `None` for vendor-specific codes.
    pub fn name(self) -> Option<&'static str> {
        match error_text(self.0) {
            "UNKNOWN_ERROR" => None,
            name => Some(name),
        }
    }

    pub const fn is_success(self) -> bool {
        self.0 == CL_SUCCESS
    }
}

impl fmt::Display for ClStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "CL status {}", self.0),
        }
    }
}

impl From<ClError> for ClStatus {
    fn from(err: ClError) -> Self {
        Self(err.0)
    }
}

impl From<cl_int> for ClStatus {
    fn from(code: cl_int) -> Self {
        Self(code)
    }
}
