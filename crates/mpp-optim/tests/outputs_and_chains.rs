use std::fs;
use std::sync::Arc;

use mpp_core::{MarkId, RngHandle};
use mpp_mark::{Configuration, EnergyStack, Extent, Mark, Point3, VoxelContext};
use mpp_optim::feedback::CSV_HEADER;
use mpp_optim::{
    best_chain, chain_seed, run_chains, CsvFeedback, EnergyModel, FeedbackFanout,
    FeedbackReceiver, LogFeedback, MaxIterations, NullFeedback, Optimizer, PeriodicFeedback,
    RecordingFeedback, RunConfig, RunReport, TerminationCondition,
};
use tempfile::tempdir;

const CONFIG: &str = r#"
iterations: 120
chains: 3
audit_interval: 40
energy_failure: skip
schedule: { type: geometric, initial: 0.8, ratio: 0.98, minimum: 0.05 }
kernels:
  - name: birth
    weight: 1.0
    kind: { type: birth, radius_range: [2.0, 4.0], intensity: 4.0 }
  - name: death
    weight: 1.0
    kind: { type: death, intensity: 4.0 }
  - name: shift
    weight: 1.0
    kind: { type: move, perturbation: { mode: translate, max_shift: 1.5 } }
energy:
  individual:
    - { weight: 1.0, term: { type: region-contrast, channel: 0 } }
    - { weight: 0.05, term: { type: constant-cost, value: 1.0 } }
  pairwise:
    - { weight: 2.0, term: { type: overlap-penalty } }
region:
  shell_width: 1.5
termination:
  stagnation: { window: 500 }
seed_policy:
  master_seed: 2024
  label: outputs
feedback:
  log_every: 25
"#;

fn optimizer(config: &RunConfig) -> Optimizer {
    let truth = [
        Mark::ellipse(MarkId::from_raw(0), Point3::new(8.0, 9.0, 0.0), [3.0, 2.5], 0.0).unwrap(),
        Mark::ellipse(MarkId::from_raw(1), Point3::new(20.0, 18.0, 0.0), [3.5, 3.0], 1.0).unwrap(),
    ];
    let stack = EnergyStack::synthetic(
        Extent::new(28, 28, 1),
        &truth,
        0.0,
        1.0,
        0.02,
        &mut RngHandle::from_seed(config.seed_policy.master_seed),
    )
    .unwrap();
    let model = EnergyModel::new(
        config.build_scheme(),
        VoxelContext::new(Arc::new(stack), config.region.clone()),
    );
    Optimizer::new(config.build_kernels().unwrap(), model, Arc::new(config.schedule.clone()))
        .unwrap()
        .with_options(config.options.clone())
}

#[test]
fn yaml_config_drives_the_loop() {
    let config = RunConfig::from_yaml_str(CONFIG).unwrap();
    assert_eq!(config.chains, 3);
    assert_eq!(config.options.audit_interval, 40);
    assert_eq!(config.region.histogram_bins, 16);
    assert_eq!(config.build_termination().len(), 2);

    let optimizer = optimizer(&config);
    assert_eq!(optimizer.kernels().names(), vec!["birth", "death", "shift"]);
    let mut termination = config.build_termination();
    let mut feedback = RecordingFeedback::new();
    let state = optimizer.run(
        Configuration::new(),
        &mut termination,
        &mut feedback,
        &mut RngHandle::from_seed(chain_seed(config.seed_policy.master_seed, 0)),
    );
    assert!(state.failure.is_none());
    assert_eq!(state.iterations, 120);
}

#[test]
fn csv_feedback_writes_header_and_one_row_per_iteration() {
    let config = RunConfig::from_yaml_str(CONFIG).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("iterations.csv");
    let mut feedback = FeedbackFanout::new()
        .with(CsvFeedback::new(&path))
        .with(PeriodicFeedback::new(10, LogFeedback::new("csv-test")));
    let state = optimizer(&config).run(
        Configuration::new(),
        &mut MaxIterations { limit: 30 },
        &mut feedback,
        &mut RngHandle::from_seed(4),
    );
    assert_eq!(state.feedback_failures, 0);
    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 31);
    assert!(lines[0].starts_with("iteration,kernel,proposed,accepted"));
    assert!(lines[1].starts_with("0,"));
    assert!(lines[30].starts_with("29,"));
}

#[test]
fn csv_rows_quote_kernel_names_with_separators() {
    let yaml = CONFIG.replace("name: birth", "name: \"birth, wide\"");
    let config = RunConfig::from_yaml_str(&yaml).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("iterations.csv");
    let mut feedback = CsvFeedback::new(&path);
    let state = optimizer(&config).run(
        Configuration::new(),
        &mut MaxIterations { limit: 40 },
        &mut feedback,
        &mut RngHandle::from_seed(8),
    );
    assert_eq!(state.feedback_failures, 0);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    assert_eq!(reader.headers().unwrap().len(), CSV_HEADER.len());
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 40);
    assert!(rows.iter().all(|row| row.len() == CSV_HEADER.len()));
    assert!(rows.iter().any(|row| &row[1] == "birth, wide"));
    assert!(fs::read_to_string(&path).unwrap().contains("\"birth, wide\""));
}

#[test]
fn csv_failures_are_counted_not_fatal() {
    let config = RunConfig::from_yaml_str(CONFIG).unwrap();
    let dir = tempdir().unwrap();
    // A directory cannot be opened as a file.
    let mut feedback = CsvFeedback::new(dir.path());
    let state = optimizer(&config).run(
        Configuration::new(),
        &mut MaxIterations { limit: 5 },
        &mut feedback,
        &mut RngHandle::from_seed(4),
    );
    assert!(state.failure.is_none());
    assert_eq!(state.iterations, 5);
    assert_eq!(state.feedback_failures, 6);
}

fn chains(config: &RunConfig) -> Vec<mpp_optim::ChainOutcome> {
    let termination = |_chain: usize| -> Box<dyn TerminationCondition> {
        Box::new(config.build_termination())
    };
    let feedback = |_chain: usize| -> Box<dyn FeedbackReceiver> { Box::new(NullFeedback) };
    run_chains(
        &optimizer(config),
        &Configuration::new(),
        config.seed_policy.master_seed,
        config.chains,
        termination,
        feedback,
    )
}

#[test]
fn chains_are_independent_and_reproducible() {
    let config = RunConfig::from_yaml_str(CONFIG).unwrap();
    let first = chains(&config);
    let second = chains(&config);
    assert_eq!(first.len(), 3);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.chain, b.chain);
        assert_eq!(a.seed, chain_seed(2024, a.chain));
        assert_eq!(a.trajectory_hash, b.trajectory_hash);
        assert_eq!(a.state.best_energy, b.state.best_energy);
    }
    assert_ne!(first[0].seed, first[1].seed);
    assert_ne!(first[0].trajectory_hash, first[1].trajectory_hash);

    let best = best_chain(&first).unwrap();
    assert!(first
        .iter()
        .all(|outcome| best.state.best_energy <= outcome.state.best_energy));
}

#[test]
fn report_round_trips_through_json() {
    let config = RunConfig::from_yaml_str(CONFIG).unwrap();
    let outcomes = chains(&config);
    let report = RunReport::from_outcomes(&config, &outcomes).unwrap();
    assert_eq!(report.master_seed, 2024);
    assert_eq!(report.seed_label.as_deref(), Some("outputs"));
    assert_eq!(report.chains.len(), 3);
    assert_eq!(report.statistics.kernels().len(), 3);
    let selected = &outcomes[report.selected_chain];
    assert_eq!(report.best_marks.len(), selected.state.best.len());

    let dir = tempdir().unwrap();
    let path = dir.path().join("out").join("report.json");
    report.write(&path).unwrap();
    let loaded = RunReport::load(&path).unwrap();
    assert_eq!(loaded.selected_chain, report.selected_chain);
    assert_eq!(loaded.statistics, report.statistics);
    assert_eq!(loaded.config.kernels.len(), 3);
    assert_eq!(loaded.best_marks.len(), report.best_marks.len());
    let hashes = |report: &RunReport| -> Vec<String> {
        report.chains.iter().map(|chain| chain.trajectory_hash.clone()).collect()
    };
    assert_eq!(hashes(&loaded), hashes(&report));
    match (loaded.best_energy, report.best_energy) {
        (Some(a), Some(b)) => assert!((a - b).abs() <= 1e-12 * 1.0_f64.max(b.abs())),
        (a, b) => assert_eq!(a, b),
    }
}

#[test]
fn report_requires_a_chain() {
    let config = RunConfig::default();
    let err = RunReport::from_outcomes(&config, &[]).unwrap_err();
    assert_eq!(err.info().code, "no-chains");
}
