//! Platform and device enumeration.
//!
//! Enumeration is best-effort: a query that fails for one field, one device
//! or one platform leaves that entry `None`, records an [`EnumerationError`]
//! and moves on to the siblings. Callers treat a missing field as "unknown",
//! never as a hard failure.

use std::fmt;

use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_CUSTOM,
    CL_DEVICE_TYPE_GPU, Device,
};
use opencl3::platform::{Platform, get_platforms};
use opencl3::types::{cl_device_id, cl_device_type, cl_platform_id};
use tracing::debug;

use crate::config::DeviceSelector;
use crate::status::ClStatus;

/// Opaque native platform identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformId(pub(crate) cl_platform_id);

/// Opaque native device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub(crate) cl_device_id);

// SAFETY: platform and device ids are process-wide immutable handles owned
// by the ICD loader; they are never freed by this crate.
unsafe impl Send for PlatformId {}
unsafe impl Sync for PlatformId {}
unsafe impl Send for DeviceId {}
unsafe impl Sync for DeviceId {}

impl PlatformId {
    pub(crate) fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn as_raw(self) -> cl_platform_id {
        self.0
    }
}

impl DeviceId {
    pub(crate) fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn as_raw(self) -> cl_device_id {
        self.0
    }
}

/// Device type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Gpu,
    Cpu,
    Accelerator,
    Custom,
    Other,
}

impl DeviceType {
    /// Classify a `cl_device_type` bitfield. GPU wins over CPU when a driver
    /// reports both.
    pub fn from_bits(bits: cl_device_type) -> Self {
        if bits & CL_DEVICE_TYPE_GPU != 0 {
            Self::Gpu
        } else if bits & CL_DEVICE_TYPE_CPU != 0 {
            Self::Cpu
        } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
            Self::Accelerator
        } else if bits & CL_DEVICE_TYPE_CUSTOM != 0 {
            Self::Custom
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "GPU"),
            Self::Cpu => write!(f, "CPU"),
            Self::Accelerator => write!(f, "Accelerator"),
            Self::Custom => write!(f, "Custom"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// Immutable capability record for one device.
///
/// Every queried field is optional; `None` means the driver query failed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub platform: PlatformId,
    pub device_type: Option<DeviceType>,
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub driver_version: Option<String>,
    pub profile: Option<String>,
    pub version: Option<String>,
    /// Maximum clock frequency in MHz.
    pub max_clock_frequency: Option<u32>,
    pub max_mem_alloc_size: Option<u64>,
    pub global_mem_size: Option<u64>,
    pub max_compute_units: Option<u32>,
    pub max_work_group_size: Option<usize>,
    pub max_work_item_dimensions: Option<u32>,
    /// One entry per dimension, length equals `max_work_item_dimensions`.
    pub max_work_item_sizes: Option<Vec<usize>>,
}

impl DeviceDescriptor {
    /// A fully populated descriptor with null native ids, for driving a
    /// [`MockDriver`](crate::driver::MockDriver).
    pub fn mock() -> Self {
        Self {
            id: DeviceId::null(),
            platform: PlatformId::null(),
            device_type: Some(DeviceType::Gpu),
            name: Some("Mock Compute Device".into()),
            vendor: Some("MockVendor".into()),
            driver_version: Some("1.0.0".into()),
            profile: Some("FULL_PROFILE".into()),
            version: Some("OpenCL 1.2 mock".into()),
            max_clock_frequency: Some(1500),
            max_mem_alloc_size: Some(1 << 30),
            global_mem_size: Some(4 << 30),
            max_compute_units: Some(16),
            max_work_group_size: Some(256),
            max_work_item_dimensions: Some(3),
            max_work_item_sizes: Some(vec![256, 256, 64]),
        }
    }

    /// Device name, or `"<unknown>"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unknown>")
    }
}

/// One platform and the devices it exposes.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformInfo {
    pub id: PlatformId,
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub profile: Option<String>,
    pub version: Option<String>,
    pub devices: Vec<DeviceDescriptor>,
}

/// A query that failed during enumeration. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationError {
    /// What was being queried, e.g. `"platform 0 / device 1: max_work_item_sizes"`.
    pub scope: String,
    pub status: ClStatus,
}

impl fmt::Display for EnumerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope, self.status)
    }
}

/// Snapshot of every platform and device visible through the ICD loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub platforms: Vec<PlatformInfo>,
    /// Queries that failed while building this snapshot.
    pub errors: Vec<EnumerationError>,
}

impl Catalog {
    pub fn platforms(&self) -> &[PlatformInfo] {
        &self.platforms
    }

    /// All devices across all platforms, in enumeration order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.platforms.iter().flat_map(|p| p.devices.iter())
    }

    pub fn first_device(&self) -> Option<&DeviceDescriptor> {
        self.devices().next()
    }

    /// Look up a device by platform and device index.
    pub fn select(&self, selector: DeviceSelector) -> Option<&DeviceDescriptor> {
        self.platforms.get(selector.platform_index)?.devices.get(selector.device_index)
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.iter().all(|p| p.devices.is_empty())
    }
}

/// Enumerate every platform and every device of any type.
pub fn enumerate() -> Catalog {
    let mut catalog = Catalog::default();

    let platforms = match get_platforms() {
        Ok(platforms) => platforms,
        Err(e) => {
            let status = ClStatus::from(e);
            debug!("clGetPlatformIDs failed: {status}");
            catalog.errors.push(EnumerationError { scope: "clGetPlatformIDs".into(), status });
            return catalog;
        }
    };

    for (platform_index, platform) in platforms.iter().enumerate() {
        let info = enumerate_platform(platform_index, platform, &mut catalog.errors);
        catalog.platforms.push(info);
    }

    debug!(
        "enumerated {} platform(s), {} device(s), {} failed queries",
        catalog.platforms.len(),
        catalog.devices().count(),
        catalog.errors.len()
    );
    catalog
}

/// Record a failed query and turn it into `None`.
fn probe<T>(
    scope: &str,
    field: &str,
    result: opencl3::Result<T>,
    errors: &mut Vec<EnumerationError>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            let status = ClStatus::from(e);
            debug!("{scope}: {field} query failed: {status}");
            errors.push(EnumerationError { scope: format!("{scope}: {field}"), status });
            None
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_owned())
}

fn enumerate_platform(
    index: usize,
    platform: &Platform,
    errors: &mut Vec<EnumerationError>,
) -> PlatformInfo {
    let scope = format!("platform {index}");
    let name = probe(&scope, "name", platform.name(), errors);
    debug!("scanning OpenCL platform {index}: {}", name.as_deref().unwrap_or("<unknown>"));

    let mut info = PlatformInfo {
        id: PlatformId(platform.id()),
        name,
        vendor: probe(&scope, "vendor", platform.vendor(), errors),
        profile: probe(&scope, "profile", platform.profile(), errors),
        version: trimmed(probe(&scope, "version", platform.version(), errors)),
        devices: Vec::new(),
    };

    let listed = platform.get_devices(CL_DEVICE_TYPE_ALL);
    let device_ids = probe(&scope, "device ids", listed, errors).unwrap_or_default();

    for (device_index, device_id) in device_ids.into_iter().enumerate() {
        let scope = format!("platform {index} / device {device_index}");
        info.devices.push(describe_device(&scope, info.id, device_id, errors));
    }
    info
}

fn describe_device(
    scope: &str,
    platform: PlatformId,
    device_id: cl_device_id,
    errors: &mut Vec<EnumerationError>,
) -> DeviceDescriptor {
    let device = Device::new(device_id);
    let descriptor = DeviceDescriptor {
        id: DeviceId(device_id),
        platform,
        device_type: probe(scope, "type", device.dev_type(), errors).map(DeviceType::from_bits),
        name: probe(scope, "name", device.name(), errors),
        vendor: probe(scope, "vendor", device.vendor(), errors),
        driver_version: probe(scope, "driver_version", device.driver_version(), errors),
        profile: probe(scope, "profile", device.profile(), errors),
        version: trimmed(probe(scope, "version", device.version(), errors)),
        max_clock_frequency: probe(
            scope,
            "max_clock_frequency",
            device.max_clock_frequency(),
            errors,
        ),
        max_mem_alloc_size: probe(scope, "max_mem_alloc_size", device.max_mem_alloc_size(), errors),
        global_mem_size: probe(scope, "global_mem_size", device.global_mem_size(), errors),
        max_compute_units: probe(scope, "max_compute_units", device.max_compute_units(), errors),
        max_work_group_size: probe(
            scope,
            "max_work_group_size",
            device.max_work_group_size(),
            errors,
        ),
        max_work_item_dimensions: probe(
            scope,
            "max_work_item_dimensions",
            device.max_work_item_dimensions(),
            errors,
        ),
        max_work_item_sizes: probe(
            scope,
            "max_work_item_sizes",
            device.max_work_item_sizes(),
            errors,
        ),
    };
    debug!(
        "found {} device: {} (vendor: {})",
        descriptor.device_type.map(|t| t.to_string()).unwrap_or_else(|| "unknown".into()),
        descriptor.display_name(),
        descriptor.vendor.as_deref().unwrap_or("<unknown>")
    );
    descriptor
}
