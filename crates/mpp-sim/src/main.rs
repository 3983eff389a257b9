use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    optimize::{self, RunArgs},
    synth::{self, SynthArgs},
};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "mpp-sim", about = "Marked point process optimizer CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Paint random ellipses on a noisy background and write the stack as JSON.
    Synth(SynthArgs),
    /// Optimize a configuration against a stack and write the run artefacts.
    Run(RunArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Synth(args) => synth::run(&args),
        Command::Run(args) => optimize::run(&args),
    }
}
