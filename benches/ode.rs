//! Micro-benchmarks for the flow-matching engine: masks, ODE solvers and
//! full sampling with a trivial velocity model.
//!
//! Run with: `cargo bench -- ode`

use anyhow::Result;
use candle_core::{Device, Tensor};
use cfm_tts::generation::{
    mask_from_frac_lengths, odeint, time_grid, SampleOptions, SampleRequest, SamplingPipeline,
};
use cfm_tts::models::VelocityInput;
use cfm_tts::{OdeMethod, SamplingContext};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn bench_span_mask(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut group = c.benchmark_group("span_mask");

    for batch in [8usize, 64] {
        let lens: Vec<usize> = (0..batch).map(|i| 200 + i * 10).collect();
        let max_len = lens.iter().copied().max().unwrap_or(0);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("batch_{batch}")),
            &batch,
            |b, _| {
                let mut ctx = SamplingContext::new(Some(42));
                b.iter(|| {
                    mask_from_frac_lengths(black_box(&lens), (0.7, 1.0), max_len, &mut ctx, &device)
                        .unwrap()
                });
            },
        );
    }
    group.finish();
}

fn bench_odeint(c: &mut Criterion) {
    let device = Device::Cpu;
    let y0 = Tensor::randn(0f32, 1.0, (1, 512, 100), &device).unwrap();
    let mut group = c.benchmark_group("odeint");

    for method in [OdeMethod::Euler, OdeMethod::Midpoint] {
        let t = time_grid(32, Some(-1.0));
        group.bench_with_input(
            BenchmarkId::from_parameter(method.as_str()),
            &method,
            |b, &method| {
                b.iter(|| {
                    odeint(
                        method,
                        |_t, y: &Tensor| -> Result<Tensor> { Ok((y * -0.5)?) },
                        black_box(&y0),
                        &t,
                    )
                    .unwrap()
                });
            },
        );
    }
    group.finish();
}

fn bench_sample(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let device = Device::Cpu;
    let model = |input: &VelocityInput<'_>| -> Result<Tensor> { Ok((input.x - input.cond)?) };
    let pipeline = SamplingPipeline::new(&model, 100, 24000, 256);
    let cond = Tensor::randn(0f32, 1.0, (2, 200, 100), &device).unwrap();
    let text = Tensor::ones((2, 50), candle_core::DType::I64, &device).unwrap();
    let mut group = c.benchmark_group("sample");

    for steps in [8usize, 32] {
        let options = SampleOptions {
            steps,
            seed: Some(0),
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("steps_{steps}")),
            &steps,
            |b, _| {
                let mut ctx = SamplingContext::new(Some(0));
                b.iter(|| {
                    let request =
                        SampleRequest::new(cond.clone(), text.clone()).with_duration(400);
                    pipeline.sample(request, &options, &mut ctx).unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_span_mask, bench_odeint, bench_sample);
criterion_main!(benches);
