//! Square ten integers on the first OpenCL device.
//!
//! ```text
//! RUST_LOG=cl_runner=debug CL_RUNNER_DEVICE=0:0 cargo run -p cl-runner --example square
//! ```

use anyhow::{Context, Result, bail};
use cl_runner::{KernelArg, MemFlags, Runner, RunnerConfig, WorkGeometry, catalog, kernels};

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    setup_logging();

    let catalog = catalog::enumerate();
    for (p, platform) in catalog.platforms().iter().enumerate() {
        println!(
            "platform {p}: {} ({})",
            platform.name.as_deref().unwrap_or("<unknown>"),
            platform.version.as_deref().unwrap_or("?")
        );
        for (d, device) in platform.devices.iter().enumerate() {
            let kind = device.device_type.map_or_else(|| "?".to_owned(), |t| t.to_string());
            println!(
                "  device {p}:{d}: {} [{kind}] {} CUs, {} MiB",
                device.display_name(),
                device.max_compute_units.unwrap_or(0),
                device.global_mem_size.unwrap_or(0) >> 20
            );
        }
    }
    for error in &catalog.errors {
        println!("  (query failed: {error})");
    }
    if catalog.is_empty() {
        bail!("no OpenCL devices");
    }

    let config = RunnerConfig::from_env()?;
    let mut runner = Runner::from_catalog(&catalog, config)?;
    runner
        .compile_kernels(&[kernels::SQUARE_SOURCE], &["square"], "")
        .context("compiling square kernel")?;

    let input: Vec<i32> = (1..=10).collect();
    let src = runner.create_buffer(MemFlags::READ_ONLY, &input)?;
    let dst = runner.create_empty_buffer(MemFlags::WRITE_ONLY, input.len() * size_of::<i32>())?;
    let args = [KernelArg::buffer(&src), KernelArg::buffer(&dst)];
    runner.dispatch("square", 1, &WorkGeometry::new(&[input.len() as u64]), &args, true)?;

    let mut output = vec![0i32; input.len()];
    runner.read_buffer(0, &dst, &mut output)?;
    println!("result: {output:?}");

    let expected: Vec<i32> = input.iter().map(|v| v * v).collect();
    runner.release()?;
    if output != expected {
        bail!("expected {expected:?}");
    }
    Ok(())
}
