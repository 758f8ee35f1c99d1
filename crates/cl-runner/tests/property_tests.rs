//! Property-based tests for the runner against the mock device.
//!
//! - **Round trip**: any non-empty write reads back unchanged.
//! - **Empty transfers** are always rejected, for every element type.
//! - **Geometry**: any length mismatch with `work_dim` is rejected before
//!   the driver sees a call.
//! - **Argument packing**: a by-value argument is exactly the value's bytes.

use cl_runner::{
    DeviceDescriptor, ErrorKind, KernelArg, MemFlags, MockDriver, OpenClError, Runner,
    RunnerConfig, WorkGeometry, kernels,
};
use proptest::prelude::*;

fn mock_runner() -> (MockDriver, Runner<MockDriver>) {
    let driver = MockDriver::new();
    kernels::install_reference_kernels(&driver);
    let runner =
        Runner::with_driver(driver.clone(), DeviceDescriptor::mock(), RunnerConfig::default())
            .unwrap();
    (driver, runner)
}

// ── Transfers ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn blocking_write_then_read_round_trips(
        data in prop::collection::vec(any::<u32>(), 1..256),
        lead in 0_usize..16,
    ) {
        let (_, mut runner) = mock_runner();
        let size = (lead + data.len()) * 4;
        let buffer = runner.create_empty_buffer(MemFlags::READ_WRITE, size).unwrap();
        runner.write_buffer(lead * 4, &buffer, &data, true).unwrap();

        let mut out = vec![0u32; data.len()];
        runner.read_buffer(lead * 4, &buffer, &mut out).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn create_buffer_copies_any_bytes(data in prop::collection::vec(any::<u8>(), 1..512)) {
        let (_, mut runner) = mock_runner();
        let buffer = runner.create_buffer(MemFlags::READ_ONLY, &data).unwrap();
        prop_assert_eq!(buffer.size(), data.len());

        let mut out = vec![0u8; data.len()];
        runner.read_buffer(0, &buffer, &mut out).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn transfers_past_the_end_are_rejected(
        size in 1_usize..256,
        offset in 0_usize..512,
        len in 1_usize..256,
    ) {
        prop_assume!(offset + len > size);
        let (driver, mut runner) = mock_runner();
        let buffer = runner.create_empty_buffer(MemFlags::READ_WRITE, size).unwrap();
        driver.clear_calls();

        let err = runner.write_buffer(offset, &buffer, &vec![0u8; len], true).unwrap_err();
        let is_out_of_bounds = matches!(err, OpenClError::TransferOutOfBounds { .. });
        prop_assert!(is_out_of_bounds);
        prop_assert!(driver.calls().is_empty());
    }
}

#[test]
fn empty_transfers_fail_for_every_element_type() {
    fn check<T: bytemuck::Pod>(runner: &mut Runner<MockDriver>) {
        let err = runner.create_buffer::<T>(MemFlags::READ_ONLY, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        let buffer = runner.create_empty_buffer(MemFlags::READ_WRITE, 64).unwrap();
        let err = runner.write_buffer::<T>(0, &buffer, &[], true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
        let err = runner.read_buffer::<T>(0, &buffer, &mut []).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
    }
    let (_, mut runner) = mock_runner();
    check::<u8>(&mut runner);
    check::<i32>(&mut runner);
    check::<f32>(&mut runner);
    check::<f64>(&mut runner);
    check::<[u16; 3]>(&mut runner);
}

// ── Geometry ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn mismatched_global_is_rejected_without_device_calls(
        work_dim in 1_u32..=3,
        global in prop::collection::vec(1_u64..1024, 0..6),
    ) {
        prop_assume!(global.len() != work_dim as usize);
        let (driver, mut runner) = mock_runner();
        runner.compile_kernels(&[kernels::SQUARE_SOURCE], &["square"], "").unwrap();
        driver.clear_calls();

        let geometry = WorkGeometry::new(&global);
        let err = runner.dispatch("square", work_dim, &geometry, &[], true).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Dispatch);
        prop_assert!(driver.calls().is_empty());
    }

    #[test]
    fn matching_geometry_validates(global in prop::collection::vec(1_u64..4096, 1..=3)) {
        let work_dim = global.len() as u32;
        let range = WorkGeometry::new(&global).validate(work_dim).unwrap();
        prop_assert_eq!(range.work_dim, work_dim);
        prop_assert_eq!(range.global.len(), global.len());
        prop_assert!(range.local.is_none());
    }

    #[test]
    fn mismatched_local_is_rejected(
        global in prop::collection::vec(1_u64..4096, 1..=3),
        local_len in 0_usize..5,
    ) {
        prop_assume!(local_len != global.len());
        let geometry = WorkGeometry::new(&global).with_local(&vec![1; local_len]);
        prop_assert!(geometry.validate(global.len() as u32).is_err());
    }
}

// ── Argument packing ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn value_argument_is_the_value_bytes(v in any::<u64>(), f in any::<f32>()) {
        prop_assert_eq!(KernelArg::value(v), KernelArg::Value(v.to_ne_bytes().to_vec()));
        prop_assert_eq!(KernelArg::value(f).size(), 4);
    }
}
