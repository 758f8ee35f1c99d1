//! Argument binding and kernel dispatch against the mock device.

use cl_runner::driver::MockLaunchRecord;
use cl_runner::{
    ClStatus, DeviceDescriptor, ErrorKind, KernelArg, MemFlags, MockDriver, NdRange, OpenClError,
    Runner, RunnerConfig, WorkGeometry, kernels,
};

fn compiled_runner() -> (MockDriver, Runner<MockDriver>) {
    let driver = MockDriver::new();
    kernels::install_reference_kernels(&driver);
    let mut runner =
        Runner::with_driver(driver.clone(), DeviceDescriptor::mock(), RunnerConfig::default())
            .unwrap();
    let sources: Vec<&str> = kernels::all_kernel_sources().iter().map(|(_, src)| *src).collect();
    let names: Vec<&str> = kernels::all_kernel_sources().iter().map(|(name, _)| *name).collect();
    runner.compile_kernels(&sources, &names, "").unwrap();
    (driver, runner)
}

// ── End to end ──────────────────────────────────────────────────────────────

#[test]
fn squares_ten_integers() {
    let (driver, mut runner) = compiled_runner();
    let input: Vec<i32> = (1..=10).collect();
    let src = runner.create_buffer(MemFlags::READ_ONLY, &input).unwrap();
    let dst = runner.create_empty_buffer(MemFlags::WRITE_ONLY, input.len() * 4).unwrap();

    runner
        .dispatch(
            "square",
            1,
            &WorkGeometry::new(&[10]),
            &[KernelArg::buffer(&src), KernelArg::buffer(&dst)],
            true,
        )
        .unwrap();

    let mut output = vec![0i32; 10];
    runner.read_buffer(0, &dst, &mut output).unwrap();
    assert_eq!(output, [1, 4, 9, 16, 25, 36, 49, 64, 81, 100]);

    assert_eq!(
        driver.launches(),
        [MockLaunchRecord {
            kernel: "square".into(),
            range: NdRange { work_dim: 1, global_offset: None, global: vec![10], local: None },
        }]
    );
    assert_eq!(driver.count("clWaitForEvents"), 1);
    assert_eq!(driver.live("event"), 0);
    runner.release().unwrap();
    assert_eq!(driver.live_handles(), 0);
}

#[test]
fn non_blocking_pipeline_keeps_queue_order() {
    let (driver, mut runner) = compiled_runner();
    let n = 6u32;
    let x = runner.create_empty_buffer(MemFlags::READ_ONLY, 6 * 4).unwrap();
    let y = runner.create_empty_buffer(MemFlags::READ_WRITE, 6 * 4).unwrap();

    runner.write_buffer(0, &x, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], false).unwrap();
    runner.write_buffer(0, &y, &[1.0f32; 6], false).unwrap();
    let args = [
        KernelArg::value(2.0f32),
        KernelArg::buffer(&x),
        KernelArg::buffer(&y),
        KernelArg::value(n),
    ];
    runner.dispatch("saxpy", 1, &WorkGeometry::new(&[8]), &args, false).unwrap();

    let mut out = [0.0f32; 6];
    runner.read_buffer(0, &y, &mut out).unwrap();
    assert_eq!(out, [3.0, 5.0, 7.0, 9.0, 11.0, 13.0]);
    assert_eq!(driver.count("clWaitForEvents"), 0);
}

#[test]
fn local_memory_argument_is_bound_by_size() {
    let (_, mut runner) = compiled_runner();
    let input: Vec<f32> = (1..=8).map(|v| v as f32).collect();
    let src = runner.create_buffer(MemFlags::READ_ONLY, &input).unwrap();
    let partial = runner.create_empty_buffer(MemFlags::WRITE_ONLY, 2 * 4).unwrap();

    let args = [
        KernelArg::buffer(&src),
        KernelArg::buffer(&partial),
        KernelArg::local(4 * size_of::<f32>()),
        KernelArg::value(8u32),
    ];
    let geometry = WorkGeometry::new(&[8]).with_local(&[4]);
    runner.dispatch("reduce_sum", 1, &geometry, &args, true).unwrap();

    let mut sums = [0.0f32; 2];
    runner.read_buffer(0, &partial, &mut sums).unwrap();
    assert_eq!(sums, [10.0, 26.0]);
}

#[test]
fn global_offset_is_forwarded() {
    let (driver, mut runner) = compiled_runner();
    let input = [2i32; 8];
    let src = runner.create_buffer(MemFlags::READ_ONLY, &input).unwrap();
    let dst = runner.create_buffer(MemFlags::READ_WRITE, &[0i32; 8]).unwrap();
    let geometry = WorkGeometry::new(&[4]).with_offset(&[4]);
    runner
        .dispatch("square", 1, &geometry, &[KernelArg::buffer(&src), KernelArg::buffer(&dst)], true)
        .unwrap();

    let mut out = [0i32; 8];
    runner.read_buffer(0, &dst, &mut out).unwrap();
    assert_eq!(out, [0, 0, 0, 0, 4, 4, 4, 4]);
    assert_eq!(driver.launches()[0].range.global_offset, Some(vec![4]));
}

// ── Geometry ────────────────────────────────────────────────────────────────

#[test]
fn geometry_mismatch_fails_before_any_device_call() {
    let (driver, mut runner) = compiled_runner();
    let buffer = runner.create_empty_buffer(MemFlags::READ_WRITE, 40).unwrap();
    driver.clear_calls();

    let args = [KernelArg::buffer(&buffer), KernelArg::buffer(&buffer)];
    let err = runner.dispatch("square", 2, &WorkGeometry::new(&[10]), &args, true).unwrap_err();
    assert!(matches!(err, OpenClError::InvalidGeometry { ref kernel, .. } if kernel == "square"));
    assert_eq!(err.kind(), ErrorKind::Dispatch);
    assert!(err.to_string().contains("global has 1 entries but work_dim is 2"));

    let err = runner.dispatch("square", 4, &WorkGeometry::new(&[1, 1, 1, 1]), &args, true);
    assert!(matches!(err, Err(OpenClError::InvalidGeometry { .. })));
    assert!(driver.calls().is_empty());
    assert!(driver.launches().is_empty());
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn dispatch_before_compile_and_unknown_kernel() {
    let driver = MockDriver::new();
    let mut runner =
        Runner::with_driver(driver, DeviceDescriptor::mock(), RunnerConfig::default()).unwrap();
    let geometry = WorkGeometry::new(&[1]);
    assert!(matches!(
        runner.dispatch("square", 1, &geometry, &[], true),
        Err(OpenClError::NotCompiled)
    ));
    assert!(matches!(runner.set_kernel_args("square", &[]), Err(OpenClError::NotCompiled)));

    let (_, mut runner) = compiled_runner();
    let err = runner.dispatch("cube", 1, &geometry, &[], true).unwrap_err();
    assert!(matches!(err, OpenClError::UnknownKernel(ref name) if name == "cube"));
}

#[test]
fn argument_binding_failure_names_slot() {
    let (driver, mut runner) = compiled_runner();
    let buffer = runner.create_empty_buffer(MemFlags::READ_WRITE, 40).unwrap();
    driver.fail_next("clSetKernelArg", ClStatus::INVALID_ARG_SIZE);
    driver.fail_next("clSetKernelArg", ClStatus::INVALID_ARG_SIZE);

    // The first queued fault fires on slot 0; the second on the retry's slot 0.
    let err = runner.set_kernel_args("square", &[KernelArg::buffer(&buffer)]).unwrap_err();
    assert!(matches!(err, OpenClError::ArgumentBinding { index: 0, .. }));
    assert_eq!(err.kind(), ErrorKind::ArgumentBinding);

    let args = [KernelArg::buffer(&buffer), KernelArg::buffer(&buffer)];
    let err = runner.dispatch("square", 1, &WorkGeometry::new(&[10]), &args, true).unwrap_err();
    assert!(matches!(err, OpenClError::ArgumentBinding { index: 0, .. }));
    assert_eq!(err.status(), Some(ClStatus::INVALID_ARG_SIZE));
    assert!(driver.launches().is_empty());
}

#[test]
fn zero_sized_value_is_rejected_by_the_driver() {
    let (_, mut runner) = compiled_runner();
    let err = runner.set_kernel_args("saxpy", &[KernelArg::Value(Vec::new())]).unwrap_err();
    assert_eq!(err.status(), Some(ClStatus::INVALID_ARG_SIZE));
}

#[test]
fn foreign_buffer_argument_is_rejected() {
    let (_, mut runner) = compiled_runner();
    let (_, mut other) = compiled_runner();
    let foreign = other.create_empty_buffer(MemFlags::READ_WRITE, 40).unwrap();
    let err = runner.set_kernel_args("square", &[KernelArg::from(&foreign)]).unwrap_err();
    assert!(matches!(err, OpenClError::ForeignBuffer(_)));
}

#[test]
fn missing_arguments_surface_from_kernel_execution() {
    let (_, mut runner) = compiled_runner();
    let src = runner.create_buffer(MemFlags::READ_ONLY, &[3i32; 4]).unwrap();
    let err = runner
        .dispatch("square", 1, &WorkGeometry::new(&[4]), &[KernelArg::buffer(&src)], true)
        .unwrap_err();
    assert!(matches!(err, OpenClError::Dispatch { op: "clEnqueueNDRangeKernel", .. }));
    assert_eq!(err.status(), Some(ClStatus::INVALID_KERNEL_ARGS));
}

#[test]
fn wait_failure_is_a_dispatch_error_and_event_is_released() {
    let (driver, mut runner) = compiled_runner();
    let src = runner.create_buffer(MemFlags::READ_ONLY, &[3i32; 4]).unwrap();
    let dst = runner.create_empty_buffer(MemFlags::WRITE_ONLY, 16).unwrap();
    driver.fail_next("clWaitForEvents", ClStatus::OUT_OF_RESOURCES);
    let args = [KernelArg::buffer(&src), KernelArg::buffer(&dst)];
    let err = runner.dispatch("square", 1, &WorkGeometry::new(&[4]), &args, true).unwrap_err();
    assert!(matches!(err, OpenClError::Dispatch { op: "clWaitForEvents", .. }));
    assert_eq!(driver.live("event"), 0);
}
