use std::sync::Arc;

use mpp_core::{MarkId, RngHandle};
use mpp_mark::{Configuration, EnergyStack, Extent, Mark, Point3, RegionScheme, VoxelContext};
use mpp_optim::energy::{ConstantCost, OverlapPenalty, RegionContrast};
use mpp_optim::kernel::{BirthKernel, DeathKernel, MoveKernel, Perturbation};
use mpp_optim::{
    EnergyModel, EnergyScheme, Kernel, KernelSet, MaxIterations, Optimizer, RecordingFeedback,
    RunOptions, ScheduleConfig,
};
use proptest::prelude::*;

fn disc(raw: u64, x: f64, y: f64, radius: f64) -> Mark {
    Mark::ellipse(MarkId::from_raw(raw), Point3::new(x, y, 0.0), [radius, radius * 0.8], 0.3).unwrap()
}

fn model() -> EnergyModel {
    let truth = vec![disc(0, 10.0, 10.0, 4.0), disc(1, 26.0, 20.0, 5.0), disc(2, 14.0, 27.0, 3.0)];
    let stack = EnergyStack::synthetic(
        Extent::new(36, 36, 1),
        &truth,
        0.1,
        0.9,
        0.05,
        &mut RngHandle::from_seed(3),
    )
    .unwrap();
    let scheme = EnergyScheme::new()
        .with_individual(1.0, Arc::new(RegionContrast { channel: 0 }))
        .with_individual(0.05, Arc::new(ConstantCost { value: 1.0 }))
        .with_pairwise(1.5, Arc::new(OverlapPenalty))
        .with_pairwise(0.1, Arc::new(ConstantCost { value: 1.0 }));
    EnergyModel::new(scheme, VoxelContext::new(Arc::new(stack), RegionScheme::default()))
}

fn kernels() -> KernelSet {
    KernelSet::new()
        .with(
            "birth",
            1.0,
            Kernel::Birth(BirthKernel {
                radius_range: [2.0, 6.0],
                intensity: 6.0,
            }),
        )
        .unwrap()
        .with("death", 1.0, Kernel::Death(DeathKernel { intensity: 6.0 }))
        .unwrap()
        .with(
            "translate",
            1.0,
            Kernel::Move(MoveKernel {
                perturbation: Perturbation::Translate { max_shift: 2.0 },
                min_radius: 0.5,
            }),
        )
        .unwrap()
        .with(
            "resize",
            0.5,
            Kernel::Move(MoveKernel {
                perturbation: Perturbation::Resize { max_scale: 1.3 },
                min_radius: 1.0,
            }),
        )
        .unwrap()
        .with(
            "rotate",
            0.5,
            Kernel::Move(MoveKernel {
                perturbation: Perturbation::Rotate { max_angle: 0.5 },
                min_radius: 0.5,
            }),
        )
        .unwrap()
}

fn optimizer() -> Optimizer {
    let schedule = ScheduleConfig::Geometric {
        initial: 0.5,
        ratio: 0.99,
        minimum: 0.02,
    };
    Optimizer::new(kernels(), model(), Arc::new(schedule))
        .unwrap()
        .with_options(RunOptions {
            audit_interval: 1,
            ..RunOptions::default()
        })
}

fn seeded_start() -> Configuration {
    Configuration::from_marks([disc(0, 9.0, 11.0, 3.0), disc(1, 12.0, 12.0, 3.0)]).unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * 1.0_f64.max(a.abs()).max(b.abs())
}

#[test]
fn running_total_matches_recomputation_after_every_iteration() {
    let optimizer = optimizer();
    let mut feedback = RecordingFeedback::new();
    let state = optimizer.run(
        seeded_start(),
        &mut MaxIterations { limit: 400 },
        &mut feedback,
        &mut RngHandle::from_seed(11),
    );
    assert!(state.failure.is_none(), "{:?}", state.failure);
    assert_eq!(state.iterations, 400);
    let recomputed = optimizer.model().recompute(&state.current).unwrap();
    assert!(close(recomputed, state.current_energy));
    assert!(state.statistics.totals().accepted.count > 0);
}

#[test]
fn accepted_records_chain_energy_by_delta() {
    let optimizer = optimizer();
    let start = seeded_start();
    let initial = optimizer.model().recompute(&start).unwrap();
    let mut feedback = RecordingFeedback::new();
    optimizer.run(
        start,
        &mut MaxIterations { limit: 250 },
        &mut feedback,
        &mut RngHandle::from_seed(5),
    );
    let mut previous = initial;
    for record in &feedback.records {
        let expected = if record.accepted {
            previous + record.delta.unwrap()
        } else {
            previous
        };
        assert!(close(expected, record.energy), "iteration {}", record.iteration);
        previous = record.energy;
    }
}

#[test]
fn best_energy_never_increases_and_matches_snapshot() {
    let optimizer = optimizer();
    let mut feedback = RecordingFeedback::new();
    let state = optimizer.run(
        Configuration::new(),
        &mut MaxIterations { limit: 300 },
        &mut feedback,
        &mut RngHandle::from_seed(21),
    );
    let bests: Vec<f64> = feedback.records.iter().map(|record| record.best_energy).collect();
    assert!(bests.windows(2).all(|pair| pair[1] <= pair[0]));
    assert!(bests.iter().zip(&feedback.records).all(|(best, record)| *best <= record.energy));
    let best = optimizer.model().recompute(&state.best).unwrap();
    assert!(close(best, state.best_energy));
    assert_eq!(state.best_energy, *bests.last().unwrap());
}

#[test]
fn live_configuration_keeps_voxelizations_warm() {
    let optimizer = optimizer();
    let state = optimizer.run(
        seeded_start(),
        &mut MaxIterations { limit: 150 },
        &mut RecordingFeedback::new(),
        &mut RngHandle::from_seed(8),
    );
    assert!(state.current.iter().all(|memo| memo.is_cached()));
    assert!(state.best.iter().all(|memo| !memo.is_cached()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn incremental_total_survives_any_seed(seed in any::<u64>(), limit in 1u64..120) {
        let optimizer = optimizer();
        let state = optimizer.run(
            seeded_start(),
            &mut MaxIterations { limit },
            &mut RecordingFeedback::new(),
            &mut RngHandle::from_seed(seed),
        );
        prop_assert!(state.failure.is_none());
        let recomputed = optimizer.model().recompute(&state.current).unwrap();
        prop_assert!(close(recomputed, state.current_energy));
        prop_assert!(state.current.verify().is_ok());
    }
}
