use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides after every iteration whether the loop keeps going.
pub trait TerminationCondition: Send {
    /// Returns `true` to run another iteration. `iteration` counts the
    /// iterations completed so far; `score` is the current energy.
    fn continue_iterations(&mut self, iteration: u64, score: f64, configuration_size: usize) -> bool;
}

/// Continues while fewer than `limit` iterations have completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxIterations {
    /// Number of iterations to run.
    pub limit: u64,
}

impl TerminationCondition for MaxIterations {
    fn continue_iterations(&mut self, iteration: u64, _score: f64, _size: usize) -> bool {
        iteration < self.limit
    }
}

/// Stops once the energy drops below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyBelow {
    /// Energy regarded as good enough.
    pub threshold: f64,
}

impl TerminationCondition for EnergyBelow {
    fn continue_iterations(&mut self, _iteration: u64, score: f64, _size: usize) -> bool {
        score >= self.threshold
    }
}

/// Stops when the energy has not improved by at least `min_improvement`
/// within the last `window` iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct Stagnation {
    window: u64,
    min_improvement: f64,
    best: f64,
    last_improvement: u64,
}

impl Stagnation {
    /// Creates the condition.
    pub fn new(window: u64, min_improvement: f64) -> Self {
        Self {
            window,
            min_improvement,
            best: f64::INFINITY,
            last_improvement: 0,
        }
    }
}

impl TerminationCondition for Stagnation {
    fn continue_iterations(&mut self, iteration: u64, score: f64, _size: usize) -> bool {
        if self.best.is_infinite() || score < self.best - self.min_improvement {
            self.best = score;
            self.last_improvement = iteration;
        }
        iteration - self.last_improvement < self.window
    }
}

/// Stops once `limit` wall-clock time has elapsed since the first check.
#[derive(Debug, Clone)]
pub struct WallClockLimit {
    limit: Duration,
    started: Option<Instant>,
}

impl WallClockLimit {
    /// Creates the condition.
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: None,
        }
    }
}

impl TerminationCondition for WallClockLimit {
    fn continue_iterations(&mut self, _iteration: u64, _score: f64, _size: usize) -> bool {
        let started = *self.started.get_or_insert_with(Instant::now);
        started.elapsed() < self.limit
    }
}

/// Condition that an outside party (a UI stop button, a signal handler, a
/// parallel chain) can flip through a [`TerminationTrigger`].
#[derive(Debug, Clone, Default)]
pub struct TriggerTerminationCondition {
    flag: Arc<AtomicBool>,
}

/// Handle that forces a [`TriggerTerminationCondition`] to stop.
#[derive(Debug, Clone)]
pub struct TerminationTrigger {
    flag: Arc<AtomicBool>,
}

impl TerminationTrigger {
    /// Requests termination at the next check.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once triggered.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl TriggerTerminationCondition {
    /// Creates an untriggered condition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle sharing this condition's flag.
    pub fn handle(&self) -> TerminationTrigger {
        TerminationTrigger {
            flag: Arc::clone(&self.flag),
        }
    }

    /// Requests termination at the next check.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl TerminationCondition for TriggerTerminationCondition {
    fn continue_iterations(&mut self, _iteration: u64, _score: f64, _size: usize) -> bool {
        !self.flag.load(Ordering::SeqCst)
    }
}

/// Continues only while every sub-condition continues. Every sub-condition
/// is consulted on each check so stateful ones observe every iteration.
#[derive(Default)]
pub struct AllOf {
    conditions: Vec<Box<dyn TerminationCondition>>,
}

impl AllOf {
    /// Creates an empty composite, which always continues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sub-condition.
    pub fn with(mut self, condition: impl TerminationCondition + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    /// Adds a boxed sub-condition.
    pub fn push(&mut self, condition: Box<dyn TerminationCondition>) {
        self.conditions.push(condition);
    }

    /// Number of sub-conditions.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Returns `true` when there are no sub-conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl TerminationCondition for AllOf {
    fn continue_iterations(&mut self, iteration: u64, score: f64, configuration_size: usize) -> bool {
        self.conditions.iter_mut().fold(true, |keep_going, condition| {
            condition.continue_iterations(iteration, score, configuration_size) && keep_going
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_iterations_counts_completed_iterations() {
        let mut condition = MaxIterations { limit: 50 };
        assert!(condition.continue_iterations(0, 0.0, 0));
        assert!(condition.continue_iterations(49, 0.0, 0));
        assert!(!condition.continue_iterations(50, 0.0, 0));
    }

    #[test]
    fn trigger_stops_next_check() {
        let mut condition = TriggerTerminationCondition::new();
        let handle = condition.handle();
        assert!(condition.continue_iterations(3, -1.0, 2));
        handle.trigger();
        assert!(handle.is_triggered());
        assert!(!condition.continue_iterations(4, -1.0, 2));
    }

    #[test]
    fn stagnation_needs_real_improvement() {
        let mut condition = Stagnation::new(3, 0.5);
        assert!(condition.continue_iterations(0, 10.0, 0));
        assert!(condition.continue_iterations(1, 9.8, 0));
        assert!(condition.continue_iterations(2, 9.0, 0));
        assert!(condition.continue_iterations(3, 9.0, 0));
        assert!(condition.continue_iterations(4, 9.0, 0));
        assert!(!condition.continue_iterations(5, 9.0, 0));
    }

    #[test]
    fn all_of_requires_every_condition() {
        let mut condition = AllOf::new()
            .with(MaxIterations { limit: 10 })
            .with(EnergyBelow { threshold: -5.0 });
        assert!(condition.continue_iterations(1, 0.0, 0));
        assert!(!condition.continue_iterations(1, -6.0, 0));
        assert!(!condition.continue_iterations(10, 0.0, 0));
        assert!(AllOf::new().continue_iterations(1_000, 0.0, 0));
    }

    #[test]
    fn all_of_consults_every_condition() {
        let mut condition = AllOf::new()
            .with(MaxIterations { limit: 0 })
            .with(Stagnation::new(2, 0.0));
        for iteration in 0..5 {
            assert!(!condition.continue_iterations(iteration, -(iteration as f64), 0));
        }
    }
}
