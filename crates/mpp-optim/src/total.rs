use std::collections::{BTreeMap, BTreeSet};

use mpp_core::errors::ErrorInfo;
use mpp_core::{MarkId, MppError};
use mpp_mark::VoxelizedMarkMemo;

/// Energy terms owned by one mark: its individual energy and the pairwise
/// terms it shares with marks already in the book.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    /// Mark the contribution belongs to.
    pub id: MarkId,
    /// Individual energy.
    pub individual: f64,
    /// Pairwise energies with interacting partners.
    pub pairs: Vec<(MarkId, f64)>,
}

impl Contribution {
    /// Sum of the individual and pairwise terms.
    pub fn energy(&self) -> f64 {
        self.individual + self.pairs.iter().map(|(_, value)| value).sum::<f64>()
    }
}

/// A mark waiting to enter the configuration together with its evaluated
/// energy terms and warm voxelization cache.
#[derive(Debug)]
pub struct PendingMark {
    /// Memo of the proposed mark.
    pub memo: VoxelizedMarkMemo,
    /// Energy terms it will add to the book.
    pub contribution: Contribution,
}

/// Energy change implied by a proposal.
#[derive(Debug)]
pub struct EnergyDelta {
    /// Marks whose contributions leave the book.
    pub removed: Vec<MarkId>,
    /// Marks (new or replacing removed ones) entering the book, in order.
    pub added: Vec<PendingMark>,
    /// Energy leaving with the removed marks, shared pairs counted once.
    pub removed_energy: f64,
    /// Energy arriving with the added marks.
    pub added_energy: f64,
}

impl EnergyDelta {
    /// `added_energy - removed_energy`.
    pub fn delta(&self) -> f64 {
        self.added_energy - self.removed_energy
    }
}

fn pair_key(a: MarkId, b: MarkId) -> (MarkId, MarkId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Running energy book: `total` always equals the sum of every stored
/// individual and pairwise term. Edits cost O(degree) and never recompute
/// the whole sum.
#[derive(Debug, Clone, Default)]
pub struct EnergyTotal {
    individual: BTreeMap<MarkId, f64>,
    pairs: BTreeMap<(MarkId, MarkId), f64>,
    partners: BTreeMap<MarkId, BTreeSet<MarkId>>,
    total: f64,
}

impl EnergyTotal {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current running total.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Number of marks in the book.
    pub fn len(&self) -> usize {
        self.individual.len()
    }

    /// Returns `true` when the book holds no marks.
    pub fn is_empty(&self) -> bool {
        self.individual.is_empty()
    }

    /// Number of interacting pairs in the book.
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Individual energy of `id`.
    pub fn individual(&self, id: MarkId) -> Option<f64> {
        self.individual.get(&id).copied()
    }

    /// Pairwise energy between `a` and `b`.
    pub fn pair(&self, a: MarkId, b: MarkId) -> Option<f64> {
        self.pairs.get(&pair_key(a, b)).copied()
    }

    /// Sum of absolute values of every term; the scale used by audits.
    pub fn magnitude(&self) -> f64 {
        self.individual.values().map(|v| v.abs()).sum::<f64>()
            + self.pairs.values().map(|v| v.abs()).sum::<f64>()
    }

    /// Sum of the stored terms, recomputed from the book.
    pub fn sum_of_terms(&self) -> f64 {
        self.individual.values().sum::<f64>() + self.pairs.values().sum::<f64>()
    }

    /// Energy that leaves the book when every mark in `ids` is removed.
    pub fn removal_energy(&self, ids: &[MarkId]) -> f64 {
        let set: BTreeSet<MarkId> = ids.iter().copied().collect();
        let mut energy = 0.0;
        let mut seen = BTreeSet::new();
        for id in &set {
            energy += self.individual.get(id).copied().unwrap_or(0.0);
            for partner in self.partners.get(id).into_iter().flatten() {
                let key = pair_key(*id, *partner);
                if seen.insert(key) {
                    energy += self.pairs.get(&key).copied().unwrap_or(0.0);
                }
            }
        }
        energy
    }

    /// Enters a mark. Every partner must already be in the book.
    pub fn add(&mut self, contribution: Contribution) -> Result<(), MppError> {
        let Contribution {
            id,
            individual,
            pairs,
        } = contribution;
        if self.individual.contains_key(&id) {
            return Err(MppError::Inconsistency(
                ErrorInfo::new("duplicate-energy-entry", "mark already present in energy book")
                    .with_context("mark", id.to_string()),
            ));
        }
        for (partner, _) in &pairs {
            if *partner == id || !self.individual.contains_key(partner) {
                return Err(MppError::Inconsistency(
                    ErrorInfo::new("unknown-energy-partner", "pairwise partner missing from energy book")
                        .with_context("mark", id.to_string())
                        .with_context("partner", partner.to_string()),
                ));
            }
        }
        self.individual.insert(id, individual);
        self.total += individual;
        let links = self.partners.entry(id).or_default();
        let mut new_links = Vec::with_capacity(pairs.len());
        for (partner, value) in pairs {
            if !links.insert(partner) {
                continue;
            }
            new_links.push(partner);
            self.pairs.insert(pair_key(id, partner), value);
            self.total += value;
        }
        for partner in new_links {
            self.partners.entry(partner).or_default().insert(id);
        }
        Ok(())
    }

    /// Removes a mark and every pair it takes part in, returning the energy removed.
    pub fn remove(&mut self, id: MarkId) -> Result<f64, MppError> {
        let individual = self.individual.remove(&id).ok_or_else(|| {
            MppError::Inconsistency(
                ErrorInfo::new("missing-energy-entry", "mark absent from energy book")
                    .with_context("mark", id.to_string()),
            )
        })?;
        let mut removed = individual;
        for partner in self.partners.remove(&id).unwrap_or_default() {
            if let Some(value) = self.pairs.remove(&pair_key(id, partner)) {
                removed += value;
            }
            if let Some(links) = self.partners.get_mut(&partner) {
                links.remove(&id);
            }
        }
        self.total -= removed;
        Ok(removed)
    }

    /// Replaces the terms of a mark already in the book.
    pub fn exchange(&mut self, contribution: Contribution) -> Result<f64, MppError> {
        let removed = self.remove(contribution.id)?;
        self.add(contribution)?;
        Ok(removed)
    }
}
