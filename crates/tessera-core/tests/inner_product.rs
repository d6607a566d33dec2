//! Integration tests for the generalized inner product
//!
//! Covers every entry point against the sequential fold, operands from both
//! memory spaces, and backend failures surfacing unchanged.

use tessera_backends::{
    Backend, BackendError, BufferHandle, CpuBackend, CpuBackendConfig, DeviceInfo, Kernel, LaunchConfig,
};
use tessera_core::ops::{Func, Multiplies, Plus};
use tessera_core::{
    inner_product, inner_product_in, inner_product_with, inner_product_with_in, Context, ContextConfig, DeviceBuffer,
    Error, HostBuffer, InnerProduct,
};

fn context(threads: usize, min_chunk_len: usize) -> tessera_core::Result<Context> {
    Context::from_config(
        ContextConfig::default()
            .with_threads(threads)
            .with_min_chunk_len(min_chunk_len),
    )
}

fn sequential(a: &[i64], b: &[i64], init: i64) -> i64 {
    a.iter().zip(b).fold(init, |acc, (&x, &y)| acc + x * y)
}

/// Deterministic pseudo-random values in `[-1000, 1000)`
fn values(n: usize, seed: u64) -> Vec<i64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) % 2000) as i64 - 1000
        })
        .collect()
}

#[test]
fn test_fibonacci_weighted_sum() -> tessera_core::Result<()> {
    tessera_tracing::init_test_tracing();

    let a: Vec<i32> = (1..=10).collect();
    let b = vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55];

    assert_eq!(inner_product(&a, &b, 0)?, 1209);

    let ctx = context(4, 1)?;
    assert_eq!(inner_product_in(&ctx, &a, &b, 0)?, 1209);
    Ok(())
}

#[test]
fn test_sum_of_squares() -> tessera_core::Result<()> {
    tessera_tracing::init_test_tracing();

    let v = vec![-5, 0, 2, 3, 2, 4, -2, 1, 2, 3];
    assert_eq!(inner_product(&v, &v, 0)?, 76);

    let ctx = context(3, 3)?;
    let device = DeviceBuffer::from_slice_in(&v, &ctx)?;
    assert_eq!(inner_product_in(&ctx, &device, &device, 0)?, 76);
    Ok(())
}

#[test]
fn test_empty_input_returns_init() -> tessera_core::Result<()> {
    let empty: Vec<i64> = Vec::new();
    assert_eq!(inner_product(&empty, &empty, 42)?, 42);
    assert_eq!(inner_product_with(&empty, &[7], -3, Plus, Multiplies)?, -3);

    let ctx = context(2, 1)?;
    let device = DeviceBuffer::<i64>::new_in(&ctx);
    assert_eq!(inner_product_in(&ctx, &device, &device, 9)?, 9);
    assert_eq!(inner_product_with_in(&ctx, &device, &empty, 8, Plus, Multiplies)?, 8);
    assert_eq!(InnerProduct::new(&empty, &device, 7).context(&ctx).run()?, 7);
    assert_eq!(ctx.transfer_stats().total(), 0);
    Ok(())
}

#[test]
fn test_all_entry_points_agree() -> tessera_core::Result<()> {
    tessera_tracing::init_test_tracing();

    let ctx = context(4, 16)?;
    let a = values(1000, 1);
    let b = values(1000, 2);
    let expected = sequential(&a, &b, 17);

    assert_eq!(inner_product_in(&ctx, &a, &b, 17)?, expected);
    assert_eq!(inner_product(&a, &b, 17)?, expected);
    assert_eq!(inner_product_with_in(&ctx, &a, &b, 17, Plus, Multiplies)?, expected);
    assert_eq!(inner_product_with(&a, &b, 17, Plus, Multiplies)?, expected);
    assert_eq!(InnerProduct::new(&a, &b, 17).context(&ctx).run()?, expected);
    assert_eq!(InnerProduct::new(&a, &b, 17).run()?, expected);
    assert_eq!(
        inner_product_with_in(
            &ctx,
            &a,
            &b,
            17,
            Func(|x: i64, y: i64| x + y),
            Func(|x: i64, y: i64| x * y)
        )?,
        expected
    );
    Ok(())
}

#[test]
fn test_matches_sequential_fold_across_plans() -> tessera_core::Result<()> {
    for threads in [1, 2, 3, 8] {
        for min_chunk_len in [1, 2, 7, 64, 4096] {
            let ctx = context(threads, min_chunk_len)?;
            for n in [1, 2, 3, 10, 31, 100, 257, 1024] {
                let a = values(n, n as u64);
                let b = values(n + 5, n as u64 + 99);
                let plan = ctx.reduction_plan(n);
                assert_eq!(
                    inner_product_in(&ctx, &a, &b, -11)?,
                    sequential(&a, &b[..n], -11),
                    "threads={threads} min_chunk_len={min_chunk_len} n={n} plan={plan:?}"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn test_floating_point_within_tolerance() -> tessera_core::Result<()> {
    let ctx = context(4, 32)?;
    let a: Vec<f64> = (0..5000).map(|i| (i as f64 * 0.37).sin()).collect();
    let b: Vec<f64> = (0..5000).map(|i| (i as f64 * 0.11).cos()).collect();
    let expected: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();

    let result = inner_product_in(&ctx, &a, &b, 0.0)?;
    assert!((result - expected).abs() < 1e-9, "{result} vs {expected}");
    Ok(())
}

#[test]
fn test_operands_from_both_spaces() -> tessera_core::Result<()> {
    let ctx = context(2, 8)?;
    let other = context(2, 8)?;
    let a = values(200, 5);
    let b = values(200, 6);
    let expected = sequential(&a, &b, 0);

    let host_a = HostBuffer::from_slice(&a)?;
    let device_a = DeviceBuffer::from_slice_in(&a, &ctx)?;
    let device_b = DeviceBuffer::from_slice_in(&b, &ctx)?;
    let foreign_b = DeviceBuffer::from_slice_in(&b, &other)?;

    assert_eq!(inner_product_in(&ctx, &host_a, &device_b, 0)?, expected);
    assert_eq!(inner_product_in(&ctx, &device_a, &b, 0)?, expected);
    assert_eq!(inner_product_in(&ctx, &device_a, &foreign_b, 0)?, expected);

    ctx.reset_transfer_stats();
    assert_eq!(inner_product_in(&ctx, &device_a, &device_b, 0)?, expected);
    assert_eq!(ctx.transfer_stats().total(), 0);

    let window = sequential(&a[50..150], &b[50..150], 0);
    assert_eq!(inner_product_in(&ctx, &device_a.slice(50..150), &device_b.slice(50..), 0)?, window);
    assert_eq!(inner_product_in(&ctx, &host_a.slice(50..150), &foreign_b.slice(50..150), 0)?, window);
    Ok(())
}

#[test]
fn test_user_operators_with_distinct_types() -> tessera_core::Result<()> {
    let ctx = context(3, 4)?;
    let flags = vec![1u8, 0, 1, 1, 0, 1, 0, 0, 1, 1, 1, 0];
    let weights: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();

    let selected = inner_product_with_in(
        &ctx,
        &flags,
        &weights,
        0.0f64,
        Plus,
        Func(|flag: u8, w: f32| if flag == 1 { f64::from(w) } else { 0.0 }),
    )?;
    let expected: f64 = flags
        .iter()
        .zip(&weights)
        .filter(|(f, _)| **f == 1)
        .map(|(_, &w)| f64::from(w))
        .sum();
    assert_eq!(selected, expected);

    let count = InnerProduct::new(&flags, &weights, 0usize)
        .context(&ctx)
        .combine_with(|flag, w| usize::from(flag == 1 && w > 1.0))
        .run()?;
    assert_eq!(count, 5);
    Ok(())
}

#[test]
#[should_panic(expected = "second sequence")]
fn test_short_second_operand_panics() {
    let a = [1, 2, 3];
    let b = [1, 2];
    let _ = inner_product(&a, &b, 0);
}

// ================================================================================================
// Backend failures
// ================================================================================================

/// Backend with no usable device
struct OfflineBackend;

impl Backend for OfflineBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "offline".to_string(),
            compute_units: 4,
            max_allocation_bytes: usize::MAX,
            max_blocks: 64,
        }
    }

    fn allocate_buffer(&mut self, _size: usize) -> tessera_backends::Result<BufferHandle> {
        Err(BackendError::unavailable("device lost"))
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> tessera_backends::Result<()> {
        Err(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn write_buffer(&mut self, handle: BufferHandle, _offset: usize, _data: &[u8]) -> tessera_backends::Result<()> {
        Err(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn read_buffer(&self, handle: BufferHandle, _offset: usize, _data: &mut [u8]) -> tessera_backends::Result<()> {
        Err(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        _src_offset: usize,
        _dst: BufferHandle,
        _dst_offset: usize,
        _size: usize,
    ) -> tessera_backends::Result<()> {
        Err(BackendError::InvalidBufferHandle(src.id()))
    }

    fn buffer_size(&self, handle: BufferHandle) -> tessera_backends::Result<usize> {
        Err(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn launch(&self, _config: &LaunchConfig, _args: &[BufferHandle], _kernel: &Kernel<'_>) -> tessera_backends::Result<()> {
        Err(BackendError::unavailable("device lost"))
    }
}

/// CPU backend whose launches always fail
struct FailingLaunchBackend {
    inner: CpuBackend,
}

impl Backend for FailingLaunchBackend {
    fn device_info(&self) -> DeviceInfo {
        self.inner.device_info()
    }

    fn allocate_buffer(&mut self, size: usize) -> tessera_backends::Result<BufferHandle> {
        self.inner.allocate_buffer(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> tessera_backends::Result<()> {
        self.inner.free_buffer(handle)
    }

    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> tessera_backends::Result<()> {
        self.inner.write_buffer(handle, offset, data)
    }

    fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> tessera_backends::Result<()> {
        self.inner.read_buffer(handle, offset, data)
    }

    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        size: usize,
    ) -> tessera_backends::Result<()> {
        self.inner.copy_buffer(src, src_offset, dst, dst_offset, size)
    }

    fn buffer_size(&self, handle: BufferHandle) -> tessera_backends::Result<usize> {
        self.inner.buffer_size(handle)
    }

    fn launch(&self, _config: &LaunchConfig, _args: &[BufferHandle], _kernel: &Kernel<'_>) -> tessera_backends::Result<()> {
        Err(BackendError::execution_error("kernel faulted"))
    }
}

#[test]
fn test_allocation_failure_propagates_unchanged() -> tessera_core::Result<()> {
    let ctx = Context::with_backend(Box::new(OfflineBackend), ContextConfig::default())?;

    let err = inner_product_in(&ctx, &[1, 2, 3], &[4, 5, 6], 0).unwrap_err();
    match err {
        Error::Backend(BackendError::DeviceUnavailable(msg)) => assert_eq!(msg, "device lost"),
        other => panic!("expected DeviceUnavailable, got {other:?}"),
    }

    // Nothing to stage, so the backend is never consulted.
    let empty: [i32; 0] = [];
    assert_eq!(inner_product_in(&ctx, &empty, &empty, 5)?, 5);
    Ok(())
}

#[test]
fn test_launch_failure_propagates_and_releases_staging() -> tessera_core::Result<()> {
    let cpu = CpuBackend::with_config(CpuBackendConfig {
        threads: Some(2),
        ..CpuBackendConfig::default()
    })?;
    let observer = cpu.clone();
    let ctx = Context::with_backend(Box::new(FailingLaunchBackend { inner: cpu }), ContextConfig::default())?;

    let result = inner_product_with_in(&ctx, &[1.0f32, 2.0], &[3.0f32, 4.0], 0.0f32, Plus, Multiplies);
    assert!(matches!(
        result,
        Err(Error::Backend(BackendError::ExecutionError(ref msg))) if msg == "kernel faulted"
    ));
    assert!(result.unwrap_err().as_backend_error().is_some());
    assert_eq!(observer.buffer_count(), 0);
    Ok(())
}
