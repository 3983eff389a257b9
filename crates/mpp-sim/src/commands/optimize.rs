use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use log::{info, warn};
use mpp_mark::{Configuration, EnergyStack, Mark, VoxelContext};
use mpp_optim::{
    best_chain, run_chains, CsvFeedback, EnergyModel, FeedbackFanout, FeedbackReceiver,
    LogFeedback, Optimizer, PeriodicFeedback, RunConfig, RunReport, TerminationCondition,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML configuration describing the run.
    #[arg(long)]
    pub config: PathBuf,
    /// Stack JSON produced by `mpp-sim synth` or an external tool.
    #[arg(long)]
    pub stack: PathBuf,
    /// Output directory for run artefacts.
    #[arg(long)]
    pub out: PathBuf,
    /// Optional JSON list of marks to start from instead of an empty configuration.
    #[arg(long)]
    pub initial: Option<PathBuf>,
    /// Overrides the configured master seed.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Overrides the configured number of chains.
    #[arg(long)]
    pub chains: Option<usize>,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(&args.out)?;
    let config = load_config(args)?;
    let stack = EnergyStack::from_json(&fs::read_to_string(&args.stack)?)?;
    let initial = match &args.initial {
        Some(path) => {
            let marks: Vec<Mark> = serde_json::from_str(&fs::read_to_string(path)?)?;
            Configuration::from_marks(marks)?
        }
        None => Configuration::new(),
    };

    let model = EnergyModel::new(
        config.build_scheme(),
        VoxelContext::new(Arc::new(stack), config.region.clone()),
    );
    let optimizer = Optimizer::new(config.build_kernels()?, model, Arc::new(config.schedule.clone()))?
        .with_options(config.options.clone());

    let chain_dir = args.out.join("chains");
    let termination = |_chain: usize| -> Box<dyn TerminationCondition> {
        Box::new(config.build_termination())
    };
    let feedback = |chain: usize| -> Box<dyn FeedbackReceiver> {
        let mut fanout = FeedbackFanout::new();
        if config.feedback.log_every > 0 {
            fanout = fanout.with(PeriodicFeedback::new(
                config.feedback.log_every,
                LogFeedback::new(format!("chain {chain}")),
            ));
        }
        if config.feedback.csv {
            fanout = fanout.with(CsvFeedback::new(chain_csv(&chain_dir, chain)));
        }
        Box::new(fanout)
    };
    let outcomes = run_chains(
        &optimizer,
        &initial,
        config.seed_policy.master_seed,
        config.chains,
        termination,
        feedback,
    );

    for outcome in &outcomes {
        if let Some(err) = &outcome.state.failure {
            warn!("chain {} stopped early: {err}", outcome.chain);
        }
    }
    let report = RunReport::from_outcomes(&config, &outcomes)?;
    report.write(&args.out.join("report.json"))?;
    if config.feedback.csv {
        let selected = chain_csv(&chain_dir, report.selected_chain);
        if selected.exists() {
            fs::copy(&selected, args.out.join("iterations.csv"))?;
        }
    }

    match best_chain(&outcomes) {
        Some(best) => info!(
            "best chain {}: energy {:.6} with {} marks after {} iterations",
            best.chain,
            best.state.best_energy,
            best.state.best.len(),
            best.state.iterations
        ),
        None => return Err("every chain failed; see report.json".into()),
    }
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<RunConfig, Box<dyn Error>> {
    let mut config = RunConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        config.seed_policy.master_seed = seed;
    }
    if let Some(chains) = args.chains {
        config.chains = chains;
    }
    config.validate()?;
    Ok(config)
}

fn chain_csv(dir: &Path, chain: usize) -> PathBuf {
    dir.join(format!("chain-{chain}.csv"))
}
