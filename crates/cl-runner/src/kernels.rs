//! Bundled OpenCL C kernels.
//!
//! Each constant holds the full source of one kernel entry point, compiled
//! at runtime through [`Runner::compile_kernels`](crate::Runner::compile_kernels).
//! [`install_reference_kernels`] registers host implementations of the
//! same kernels on a [`MockDriver`] so programs built from these sources
//! produce real results without a device.

use crate::driver::{MockDriver, MockLaunch};
use crate::status::ClStatus;

/// Squares each element: `out[i] = in[i] * in[i]`.
pub const SQUARE_SOURCE: &str = r#"
__kernel void square(__global const int* in, __global int* out)
{
    const size_t i = get_global_id(0);
    out[i] = in[i] * in[i];
}
"#;

/// Element-wise sum of two float vectors, bounded by `n`.
pub const VECTOR_ADD_SOURCE: &str = r#"
__kernel void vector_add(
    __global const float* a,
    __global const float* b,
    __global float*       out,
    const uint n)
{
    const uint i = get_global_id(0);
    if (i >= n) return;
    out[i] = a[i] + b[i];
}
"#;

/// `y[i] = alpha * x[i] + y[i]`, bounded by `n`.
pub const SAXPY_SOURCE: &str = r#"
__kernel void saxpy(
    const float           alpha,
    __global const float* x,
    __global float*       y,
    const uint n)
{
    const uint i = get_global_id(0);
    if (i >= n) return;
    y[i] = fma(alpha, x[i], y[i]);
}
"#;

/// Work-group partial sums through `__local` scratch.
///
/// Each group writes one partial sum to `partial[get_group_id(0)]`.
/// The scratch argument must hold `get_local_size(0)` floats.
pub const REDUCE_SUM_SOURCE: &str = r#"
__kernel void reduce_sum(
    __global const float* input,
    __global float*       partial,
    __local float*        scratch,
    const uint n)
{
    const uint gid = get_global_id(0);
    const uint lid = get_local_id(0);
    const uint wg  = get_local_size(0);

    scratch[lid] = gid < n ? input[gid] : 0.0f;
    barrier(CLK_LOCAL_MEM_FENCE);

    for (uint stride = wg / 2; stride > 0; stride >>= 1) {
        if (lid < stride) scratch[lid] += scratch[lid + stride];
        barrier(CLK_LOCAL_MEM_FENCE);
    }
    if (lid == 0) partial[get_group_id(0)] = scratch[0];
}
"#;

/// `(kernel name, source)` for every bundled kernel.
pub fn all_kernel_sources() -> [(&'static str, &'static str); 4] {
    [
        ("square", SQUARE_SOURCE),
        ("vector_add", VECTOR_ADD_SOURCE),
        ("saxpy", SAXPY_SOURCE),
        ("reduce_sum", REDUCE_SUM_SOURCE),
    ]
}

fn square(launch: &mut MockLaunch<'_>) -> Result<(), ClStatus> {
    let input = launch.read::<i32>(0)?;
    for i in launch.global_ids() {
        let v = *input.get(i).ok_or(ClStatus::OUT_OF_RESOURCES)?;
        launch.write(1, i, &[v.wrapping_mul(v)])?;
    }
    Ok(())
}

fn vector_add(launch: &mut MockLaunch<'_>) -> Result<(), ClStatus> {
    let (a, b) = (launch.read::<f32>(0)?, launch.read::<f32>(1)?);
    let n = launch.scalar::<u32>(3)? as usize;
    for i in launch.global_ids().filter(|&i| i < n) {
        let sum = a.get(i).zip(b.get(i)).map(|(x, y)| x + y).ok_or(ClStatus::OUT_OF_RESOURCES)?;
        launch.write(2, i, &[sum])?;
    }
    Ok(())
}

fn saxpy(launch: &mut MockLaunch<'_>) -> Result<(), ClStatus> {
    let alpha = launch.scalar::<f32>(0)?;
    let (x, mut y) = (launch.read::<f32>(1)?, launch.read::<f32>(2)?);
    let n = launch.scalar::<u32>(3)? as usize;
    for i in launch.global_ids().filter(|&i| i < n) {
        let xi = *x.get(i).ok_or(ClStatus::OUT_OF_RESOURCES)?;
        let yi = y.get_mut(i).ok_or(ClStatus::OUT_OF_RESOURCES)?;
        *yi = alpha.mul_add(xi, *yi);
    }
    launch.write(2, 0, &y)
}

fn reduce_sum(launch: &mut MockLaunch<'_>) -> Result<(), ClStatus> {
    let input = launch.read::<f32>(0)?;
    let scratch_floats = launch.local_size(2)? / size_of::<f32>();
    let n = launch.scalar::<u32>(3)? as usize;
    let global = launch.global_size(0);
    if scratch_floats == 0 || global % scratch_floats != 0 {
        return Err(ClStatus::INVALID_WORK_GROUP_SIZE);
    }
    for group in 0..global / scratch_floats {
        let start = group * scratch_floats;
        let sum: f32 = (start..start + scratch_floats)
            .filter(|&i| i < n)
            .filter_map(|i| input.get(i))
            .sum();
        launch.write(1, group, &[sum])?;
    }
    Ok(())
}

/// Register host implementations of every bundled kernel on `driver`.
///
/// `reduce_sum` takes its work-group size from the `__local` argument.
pub fn install_reference_kernels(driver: &MockDriver) {
    driver.register_kernel("square", square);
    driver.register_kernel("vector_add", vector_add);
    driver.register_kernel("saxpy", saxpy);
    driver.register_kernel("reduce_sum", reduce_sum);
}
