// SPDX-License-Identifier: Apache-2.0

//! Chain-agnostic Metropolis-Hastings pieces shared by the synthesis engine.
//!
//! Nothing in here knows about programs or abstract domains: costs are plain
//! `f64` values where lower is better, and statistics are keyed by whatever
//! mutation-kind type the caller uses.

use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Identifies one proposal in a multi-chain run as
/// `{iteration}_{round}_{chain}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundTag {
    pub iteration: usize,
    pub round: usize,
    pub chain: usize,
}

impl RoundTag {
    pub fn new(iteration: usize, round: usize, chain: usize) -> Self {
        Self {
            iteration,
            round,
            chain,
        }
    }
}

impl fmt::Display for RoundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.iteration, self.round, self.chain)
    }
}

/// Holds per-chain acceptance statistics.
#[derive(Debug)]
pub struct McmcStats<K> {
    pub proposals: usize,
    pub accepted_overall: usize,
    pub rejected_metro: usize,
    /// Rounds where the chain had no live op to mutate.
    pub idle_rounds: usize,
    pub total_oracle_time_micros: u128,
    pub accepted_edits_by_kind: HashMap<K, usize>,
}

impl<K> Default for McmcStats<K> {
    fn default() -> Self {
        McmcStats {
            proposals: 0,
            accepted_overall: 0,
            rejected_metro: 0,
            idle_rounds: 0,
            total_oracle_time_micros: 0,
            accepted_edits_by_kind: HashMap::new(),
        }
    }
}

impl<K> McmcStats<K>
where
    K: Eq + Hash + Clone,
{
    /// Merges `other` into `self` (useful for summarizing all chains of an
    /// iteration).
    pub fn merge_from(&mut self, other: McmcStats<K>) {
        self.proposals += other.proposals;
        self.accepted_overall += other.accepted_overall;
        self.rejected_metro += other.rejected_metro;
        self.idle_rounds += other.idle_rounds;
        self.total_oracle_time_micros += other.total_oracle_time_micros;
        for (k, v) in other.accepted_edits_by_kind.into_iter() {
            *self.accepted_edits_by_kind.entry(k).or_insert(0) += v;
        }
    }

    /// Records the outcome of one proposal. `kind` is `None` when the chain
    /// had nothing to mutate this round.
    pub fn record(&mut self, kind: Option<&K>, accepted: bool) {
        self.proposals += 1;
        match (kind, accepted) {
            (None, _) => self.idle_rounds += 1,
            (Some(k), true) => {
                self.accepted_overall += 1;
                *self.accepted_edits_by_kind.entry(k.clone()).or_insert(0) += 1;
            }
            (Some(_), false) => self.rejected_metro += 1,
        }
    }

    /// Fraction of proposals that were accepted, 0 when nothing was proposed.
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposals == 0 {
            0.0
        } else {
            self.accepted_overall as f64 / self.proposals as f64
        }
    }
}

/// Metropolis acceptance rule in inverse-temperature form.
///
/// Returns `beta * (current_cost - proposed_cost) > ln(p)`. A proposal that
/// is no worse than the current state is always accepted, whatever `p` is;
/// otherwise the acceptance probability is `exp(beta * (current - proposed))`
/// for `p` uniform in (0, 1].
pub fn decide(p: f64, beta: f64, current_cost: f64, proposed_cost: f64) -> bool {
    if proposed_cost <= current_cost {
        return true;
    }
    beta * (current_cost - proposed_cost) > p.ln()
}

/// Draws a uniform value in (0, 1].
///
/// We take the top 53 bits (the precision of f64's mantissa) and shift the
/// range up by one ulp so that `ln(p)` is always finite.
pub fn draw_unit<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    let raw = rng.next_u64();
    ((raw >> 11) + 1) as f64 * 2.0_f64.powi(-53)
}

/// Convenience wrapper: draws `p` from `rng` and applies [`decide`].
pub fn metropolis_accept<R: RngCore + ?Sized>(
    current_cost: f64,
    proposed_cost: f64,
    beta: f64,
    rng: &mut R,
) -> bool {
    decide(draw_unit(rng), beta, current_cost, proposed_cost)
}
