use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use log::info;
use mpp_core::{MarkId, RngHandle};
use mpp_mark::{EnergyStack, Extent, Mark, Orientation, Point3};

#[derive(Args, Debug)]
pub struct SynthArgs {
    /// Destination of the stack JSON.
    #[arg(long)]
    pub out: PathBuf,
    /// Optional destination of the painted marks as JSON.
    #[arg(long)]
    pub truth: Option<PathBuf>,
    /// Seed for mark placement and noise.
    #[arg(long, default_value_t = 2024)]
    pub seed: u64,
    /// Number of marks to paint.
    #[arg(long, default_value_t = 6)]
    pub marks: usize,
    /// Grid size as X Y Z; Z = 1 paints ellipses, otherwise ellipsoids.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [64usize, 64, 1])]
    pub size: Vec<usize>,
    /// Smallest painted radius.
    #[arg(long, default_value_t = 3.0)]
    pub min_radius: f64,
    /// Largest painted radius.
    #[arg(long, default_value_t = 7.0)]
    pub max_radius: f64,
    /// Amplitude of the uniform noise.
    #[arg(long, default_value_t = 0.1)]
    pub noise: f64,
}

pub fn run(args: &SynthArgs) -> Result<(), Box<dyn Error>> {
    let (stack, marks) = build(args)?;
    write_text(&args.out, &stack.to_json()?)?;
    if let Some(path) = &args.truth {
        write_text(path, &serde_json::to_string_pretty(&marks)?)?;
    }
    info!(
        "wrote {}x{}x{} stack with {} marks to {}",
        stack.extent().x,
        stack.extent().y,
        stack.extent().z,
        marks.len(),
        args.out.display()
    );
    Ok(())
}

pub fn build(args: &SynthArgs) -> Result<(EnergyStack, Vec<Mark>), Box<dyn Error>> {
    let [x, y, z] = match args.size.as_slice() {
        [x, y, z] => [*x, *y, *z],
        _ => return Err("--size expects three values".into()),
    };
    let extent = Extent::new(x, y, z);
    if extent.volume() == 0 {
        return Err("--size must be positive along every axis".into());
    }
    if !(args.min_radius > 0.0 && args.max_radius >= args.min_radius) {
        return Err("radii must satisfy 0 < min-radius <= max-radius".into());
    }
    let mut rng = RngHandle::from_seed(args.seed);
    let mut marks = Vec::with_capacity(args.marks);
    let mut id = MarkId::from_raw(0);
    for _ in 0..args.marks {
        let centre = Point3::new(
            rng.next_range(0.0, (x - 1) as f64),
            rng.next_range(0.0, (y - 1) as f64),
            if extent.is_planar() {
                0.0
            } else {
                rng.next_range(0.0, (z - 1) as f64)
            },
        );
        let mut radius = || rng.next_range(args.min_radius, args.max_radius);
        let mark = if extent.is_planar() {
            let radii = [radius(), radius()];
            Mark::ellipse(id, centre, radii, rng.next_range(0.0, std::f64::consts::PI))?
        } else {
            let radii = [radius(), radius(), radius()];
            let orientation = Orientation {
                yaw: rng.next_range(0.0, std::f64::consts::PI),
                pitch: rng.next_range(0.0, std::f64::consts::PI),
                roll: 0.0,
            };
            Mark::ellipsoid(id, centre, radii, orientation)?
        };
        marks.push(mark);
        id = id.next();
    }
    let stack = EnergyStack::synthetic(extent, &marks, 0.1, 0.9, args.noise, &mut rng)?;
    Ok((stack, marks))
}

fn write_text(path: &Path, contents: &str) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
