// SPDX-License-Identifier: Apache-2.0

//! One MCMC chain: a mutable program, its current cost and its own rng.

use std::fmt;

use anyhow::Result;
use rand::Rng;
use rand_pcg::Pcg64Mcg;
use xfer_mcmc::{McmcStats, decide, draw_unit};

use crate::context::SynthesizerContext;
use crate::cost::CostFn;
use crate::eval::EvalResult;
use crate::program::{MutationProgram, Program, ReturnKind};

/// Probability that a step rebuilds a whole op rather than one operand.
const REPLACE_OPERATION_PROB: f64 = 0.3;

/// Live ops tried before an operand edit falls back to rebuilding an op.
const MAX_OPERAND_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    Operation,
    Operand,
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditKind::Operation => write!(f, "operation"),
            EditKind::Operand => write!(f, "operand"),
        }
    }
}

pub struct McmcSampler {
    current: MutationProgram,
    current_cost: f64,
    current_result: Option<EvalResult>,
    cost_fn: CostFn,
    rng: Pcg64Mcg,
    pending: Option<EditKind>,
    pub stats: McmcStats<EditKind>,
}

impl McmcSampler {
    pub fn new(
        ctx: &SynthesizerContext,
        mut rng: Pcg64Mcg,
        name: &str,
        length: usize,
        returns: ReturnKind,
        cost_fn: CostFn,
    ) -> Result<Self> {
        let current = MutationProgram::construct_random(ctx, &mut rng, name, length, returns)?;
        Ok(McmcSampler {
            current,
            current_cost: 1.0,
            current_result: None,
            cost_fn,
            rng,
            pending: None,
            stats: McmcStats::default(),
        })
    }

    pub fn get_current(&self) -> &Program {
        self.current.program()
    }

    pub fn current_cost(&self) -> f64 {
        self.current_cost
    }

    pub fn current_result(&self) -> Option<&EvalResult> {
        self.current_result.as_ref()
    }

    pub fn compute_cost(&self, result: &EvalResult) -> f64 {
        (self.cost_fn)(result)
    }

    /// Records the result of the initial program without a proposal.
    pub fn set_initial_result(&mut self, result: EvalResult) {
        self.current_cost = self.compute_cost(&result);
        self.current_result = Some(result);
    }

    /// Proposes one random edit of a live op. Returns `None` (and leaves the
    /// program unchanged) when nothing is live or no replacement op could be
    /// built.
    pub fn sample_next(&mut self, ctx: &SynthesizerContext) -> Result<Option<EditKind>> {
        self.pending = None;
        let live = self.current.get_modifiable_operations(true);
        if live.is_empty() {
            return Ok(None);
        }
        let kind = if self.rng.gen_bool(REPLACE_OPERATION_PROB) {
            let idx = live[self.rng.gen_range(0..live.len())];
            self.rebuild_operation(idx, ctx)
        } else {
            let mut edited = false;
            for _ in 0..MAX_OPERAND_ATTEMPTS {
                let idx = live[self.rng.gen_range(0..live.len())];
                if self.current.replace_operand(idx, ctx, &mut self.rng, true) {
                    edited = true;
                    break;
                }
            }
            if edited {
                Some(EditKind::Operand)
            } else {
                log::trace!("operand starvation; rebuilding an op instead");
                let idx = live[self.rng.gen_range(0..live.len())];
                self.rebuild_operation(idx, ctx)
            }
        };
        self.pending = kind;
        Ok(kind)
    }

    /// Replaces op `idx` with a fresh one. When the catalog yields nothing
    /// buildable the program is left as is and the round counts as idle.
    fn rebuild_operation(&mut self, idx: usize, ctx: &SynthesizerContext) -> Option<EditKind> {
        match self
            .current
            .replace_entire_operation(idx, ctx, &mut self.rng, true)
        {
            Ok(()) => Some(EditKind::Operation),
            Err(e) => {
                log::warn!("{}: keeping op {}: {:#}", self.current.program().name, idx, e);
                None
            }
        }
    }

    /// Commits the proposal.
    pub fn accept_proposed(&mut self, result: EvalResult, cost: f64) {
        self.current.remove_history();
        self.current_cost = cost;
        self.current_result = Some(result);
        self.stats.record(self.pending.take().as_ref(), true);
    }

    /// Restores the program to its state before `sample_next`.
    pub fn reject_proposed(&mut self) {
        self.current.revert_operation();
        self.stats.record(self.pending.take().as_ref(), false);
    }

    /// Applies the Metropolis rule at inverse temperature `beta` to the
    /// proposal scored `result`, then accepts or rejects it. Returns whether
    /// it was accepted.
    pub fn settle(&mut self, result: EvalResult, beta: f64) -> bool {
        let proposed = self.compute_cost(&result);
        let p = draw_unit(&mut self.rng);
        if decide(p, beta, self.current_cost, proposed) {
            self.accept_proposed(result, proposed);
            true
        } else {
            self.reject_proposed();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::sound_and_precise_cost;
    use crate::eval::WidthResult;
    use rand::SeedableRng;

    fn scored(sound: u64, sound_dist: u64) -> EvalResult {
        EvalResult::new(vec![WidthResult {
            bitwidth: 4,
            all_cases: 10,
            sound_cases: sound,
            reference_distance: 10,
            sound_distance: sound_dist,
            ..Default::default()
        }])
    }

    fn sampler(seed: u64) -> (SynthesizerContext, McmcSampler) {
        let ctx = SynthesizerContext::new(false);
        let s = McmcSampler::new(
            &ctx,
            Pcg64Mcg::seed_from_u64(seed),
            "f",
            8,
            ReturnKind::Abstract,
            sound_and_precise_cost,
        )
        .unwrap();
        (ctx, s)
    }

    #[test]
    fn rejected_proposals_restore_the_program() {
        let (ctx, mut s) = sampler(4);
        s.set_initial_result(scored(10, 0));
        for _ in 0..200 {
            let before = s.get_current().clone();
            s.sample_next(&ctx).unwrap();
            // Strictly worse and a huge beta: always rejected.
            assert!(!s.settle(scored(0, 10), 1e9));
            assert_eq!(s.get_current(), &before);
        }
        assert_eq!(s.stats.accepted_overall, 0);
        assert_eq!(s.stats.proposals, 200);
    }

    #[test]
    fn improving_proposals_are_kept() {
        let (ctx, mut s) = sampler(5);
        s.set_initial_result(scored(0, 10));
        s.sample_next(&ctx).unwrap();
        let proposed = s.get_current().clone();
        assert!(s.settle(scored(10, 0), 1e9));
        assert_eq!(s.get_current(), &proposed);
        assert_eq!(s.current_cost(), 0.0);
        assert_eq!(s.stats.accepted_overall, 1);
        assert!(s.get_current().check_well_formed().is_ok());
    }

    #[test]
    fn programs_without_live_ops_do_not_change() {
        let ctx = SynthesizerContext::new(false);
        let mut s = McmcSampler::new(
            &ctx,
            Pcg64Mcg::seed_from_u64(0),
            "f",
            0,
            ReturnKind::Abstract,
            sound_and_precise_cost,
        )
        .unwrap();
        assert_eq!(s.sample_next(&ctx).unwrap(), None);
        s.reject_proposed();
        assert_eq!(s.stats.idle_rounds, 1);
    }

    #[test]
    fn unbuildable_replacements_leave_the_program_alone() {
        let (_, mut s) = sampler(6);
        s.set_initial_result(scored(10, 0));
        // No int operators at all: nothing can replace a live int op.
        let mut no_ints = SynthesizerContext::new(false);
        no_ints.clear_operators(crate::dsl::Kind::Int);
        let before = s.get_current().clone();
        for _ in 0..200 {
            if s.sample_next(&no_ints).unwrap().is_none() {
                assert_eq!(s.get_current(), &before);
            }
            s.reject_proposed();
            assert_eq!(s.get_current(), &before);
        }
        assert!(s.stats.idle_rounds > 0);
    }
}
