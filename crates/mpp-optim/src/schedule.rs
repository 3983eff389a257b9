use serde::{Deserialize, Serialize};

/// Maps an iteration index to a temperature. Implementations must be
/// monotonically non-increasing in `iteration`.
pub trait AnnealingSchedule: Send + Sync {
    /// Temperature used for `iteration`.
    fn temperature(&self, iteration: u64) -> f64;
}

impl<F> AnnealingSchedule for F
where
    F: Fn(u64) -> f64 + Send + Sync,
{
    fn temperature(&self, iteration: u64) -> f64 {
        self(iteration)
    }
}

/// Built-in schedules selectable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScheduleConfig {
    /// Fixed temperature.
    Constant {
        /// Temperature for every iteration.
        temperature: f64,
    },
    /// `max(initial * ratio^iteration, minimum)`.
    Geometric {
        /// Starting temperature.
        initial: f64,
        /// Cooling factor per iteration, clamped into `(0, 1]`.
        #[serde(default = "default_ratio")]
        ratio: f64,
        /// Temperature floor.
        #[serde(default = "default_minimum")]
        minimum: f64,
    },
    /// Linear interpolation from `initial` to `target` over `iterations`,
    /// constant afterwards.
    Linear {
        /// Starting temperature.
        initial: f64,
        /// Final temperature.
        target: f64,
        /// Number of iterations to reach `target`.
        iterations: u64,
    },
}

fn default_ratio() -> f64 {
    0.999
}

fn default_minimum() -> f64 {
    1e-4
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig::Geometric {
            initial: 1.0,
            ratio: default_ratio(),
            minimum: default_minimum(),
        }
    }
}

impl AnnealingSchedule for ScheduleConfig {
    fn temperature(&self, iteration: u64) -> f64 {
        match *self {
            ScheduleConfig::Constant { temperature } => temperature,
            ScheduleConfig::Geometric {
                initial,
                ratio,
                minimum,
            } => {
                let ratio = ratio.clamp(f64::MIN_POSITIVE, 1.0);
                let exponent = iteration.min(i32::MAX as u64) as i32;
                (initial * ratio.powi(exponent)).max(minimum)
            }
            ScheduleConfig::Linear {
                initial,
                target,
                iterations,
            } => {
                if iterations == 0 || target >= initial {
                    return target.min(initial);
                }
                let progress = (iteration as f64 / iterations as f64).min(1.0);
                initial + (target - initial) * progress
            }
        }
    }
}
