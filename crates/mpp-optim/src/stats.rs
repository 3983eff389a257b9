use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What became of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The kernel produced no proposal (or its evaluation was skipped).
    NotProposed,
    /// The proposal was accepted.
    Accepted,
    /// The proposal was rejected.
    Rejected,
}

/// Running count and summed execution time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Number of recorded iterations.
    pub count: u64,
    /// Summed execution time in nanoseconds.
    pub total_nanos: u64,
}

impl TimeBucket {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total_nanos = self
            .total_nanos
            .saturating_add(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    fn merge(&mut self, other: &TimeBucket) {
        self.count += other.count;
        self.total_nanos = self.total_nanos.saturating_add(other.total_nanos);
    }

    /// Mean execution time, zero when empty.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_nanos / self.count)
        }
    }
}

/// Outcome buckets of one kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelStats {
    /// Kernel name.
    pub name: String,
    /// Iterations without a proposal.
    pub not_proposed: TimeBucket,
    /// Accepted proposals.
    pub accepted: TimeBucket,
    /// Rejected proposals.
    pub rejected: TimeBucket,
}

impl KernelStats {
    fn bucket_mut(&mut self, outcome: Outcome) -> &mut TimeBucket {
        match outcome {
            Outcome::NotProposed => &mut self.not_proposed,
            Outcome::Accepted => &mut self.accepted,
            Outcome::Rejected => &mut self.rejected,
        }
    }

    /// Bucket for `outcome`.
    pub fn bucket(&self, outcome: Outcome) -> &TimeBucket {
        match outcome {
            Outcome::NotProposed => &self.not_proposed,
            Outcome::Accepted => &self.accepted,
            Outcome::Rejected => &self.rejected,
        }
    }

    /// Iterations attributed to this kernel.
    pub fn executions(&self) -> u64 {
        self.not_proposed.count + self.accepted.count + self.rejected.count
    }

    /// Accepted over proposed (accepted + rejected), zero when nothing was proposed.
    pub fn acceptance_rate(&self) -> f64 {
        let proposed = self.accepted.count + self.rejected.count;
        if proposed == 0 {
            0.0
        } else {
            self.accepted.count as f64 / proposed as f64
        }
    }
}

/// Caller-owned execution statistics, one entry per kernel identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelStatistics {
    kernels: Vec<KernelStats>,
}

impl KernelStatistics {
    /// Creates empty statistics for the named kernels.
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            kernels: names
                .into_iter()
                .map(|name| KernelStats {
                    name,
                    ..KernelStats::default()
                })
                .collect(),
        }
    }

    /// Records one iteration. Unknown kernel identifiers are ignored.
    pub fn record(&mut self, kernel: usize, outcome: Outcome, elapsed: Duration) {
        if let Some(stats) = self.kernels.get_mut(kernel) {
            stats.bucket_mut(outcome).record(elapsed);
        }
    }

    /// Statistics for kernel `id`.
    pub fn kernel(&self, id: usize) -> Option<&KernelStats> {
        self.kernels.get(id)
    }

    /// Statistics for every kernel in identifier order.
    pub fn kernels(&self) -> &[KernelStats] {
        &self.kernels
    }

    /// Sums across all kernels.
    pub fn totals(&self) -> KernelStats {
        let mut totals = KernelStats {
            name: "total".to_string(),
            ..KernelStats::default()
        };
        for stats in &self.kernels {
            totals.not_proposed.merge(&stats.not_proposed);
            totals.accepted.merge(&stats.accepted);
            totals.rejected.merge(&stats.rejected);
        }
        totals
    }
}
