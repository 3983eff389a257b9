use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use mpp_core::{MarkId, RngHandle};
use mpp_mark::{Configuration, EnergyStack, Extent, Mark, Point3, VoxelContext};

use mpp_optim::{EnergyModel, MaxIterations, NullFeedback, Optimizer, RunConfig, RunOptions};

fn sample_stack() -> EnergyStack {
    let marks: Vec<Mark> = (0..8)
        .map(|i| {
            let x = 8.0 + 12.0 * (i % 4) as f64;
            let y = 10.0 + 16.0 * (i / 4) as f64;
            Mark::ellipse(MarkId::from_raw(i), Point3::new(x, y, 0.0), [4.0, 3.0], 0.4 * i as f64)
                .unwrap()
        })
        .collect();
    EnergyStack::synthetic(
        Extent::new(56, 40, 1),
        &marks,
        0.1,
        0.9,
        0.05,
        &mut RngHandle::from_seed(9),
    )
    .unwrap()
}

fn bench_loop(c: &mut Criterion) {
    let config = RunConfig::default();
    let model = EnergyModel::new(
        config.build_scheme(),
        VoxelContext::new(Arc::new(sample_stack()), config.region.clone()),
    );
    let optimizer = Optimizer::new(
        config.build_kernels().unwrap(),
        model,
        Arc::new(config.schedule.clone()),
    )
    .unwrap()
    .with_options(RunOptions {
        audit_interval: 0,
        ..RunOptions::default()
    });

    c.bench_function("mpp_loop_1000", |b| {
        b.iter(|| {
            let state = optimizer.run(
                Configuration::new(),
                &mut MaxIterations { limit: 1_000 },
                &mut NullFeedback,
                &mut RngHandle::from_seed(42),
            );
            assert!(state.failure.is_none());
        })
    });
}

criterion_group!(benches, bench_loop);
criterion_main!(benches);
