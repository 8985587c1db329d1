// SPDX-License-Identifier: Apache-2.0

//! One iteration of the search: a block of rounds over many chains whose
//! proposals are scored together, followed by a rebuild of the solution set.

use std::ops::Range;
use std::time::Instant;

use anyhow::Result;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;
use xfer_mcmc::{McmcStats, RoundTag};

use crate::context::SynthesizerContext;
use crate::cost::{CostFn, abduction_cost, precise_cost, sound_and_precise_cost};
use crate::eval::{Candidate, EvalResult};
use crate::lower::SourceLowering;
use crate::oracle::Oracle;
use crate::program::{Program, ReturnKind};
use crate::sampler::{EditKind, McmcSampler};
use crate::solution_set::{SetParams, SolutionSet};
use crate::verifier::Verifier;

/// Rounds between periodic dumps of the best-so-far records.
const REPORT_PERIOD: usize = 250;
const REPORT_OFFSET: usize = 100;

/// The operator contexts chains draw from. Only `weighted` learns between
/// iterations.
#[derive(Debug, Clone)]
pub struct SynthContexts {
    pub regular: SynthesizerContext,
    pub weighted: SynthesizerContext,
    pub cond: SynthesizerContext,
}

/// Which chains run in which mode: `sp` sound and precise, `p` precise only,
/// `c` guard abduction. The ranges are contiguous and in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLayout {
    pub sp: Range<usize>,
    pub p: Range<usize>,
    pub c: Range<usize>,
    /// Precise bodies assigned to the `c` chains, one per chain.
    pub guarded_bodies: Vec<Program>,
}

impl ChainLayout {
    pub fn num_chains(&self) -> usize {
        self.c.end
    }
}

/// Splits `num_programs` chains into modes. The precise-only range is
/// empty; abduction chains only exist while the precise pool has bodies to
/// guard, and those bodies are spread over them with the remainder going to
/// the first bodies.
pub fn mcmc_setup(solution_set: &SolutionSet, num_abd_procs: usize, num_programs: usize) -> ChainLayout {
    let p_size = 0;
    let mut c_size = num_abd_procs.min(num_programs);
    let mut sp_size = num_programs - p_size - c_size;
    let pool = solution_set.precise_pool();
    if pool.is_empty() {
        sp_size += c_size;
        c_size = 0;
    }

    let mut guarded_bodies = Vec::with_capacity(c_size);
    if c_size > 0 {
        let base = c_size / pool.len();
        let remainder = c_size % pool.len();
        for (i, body) in pool.iter().enumerate() {
            let count = base + usize::from(i < remainder);
            guarded_bodies.extend(std::iter::repeat_n(body, count).cloned());
        }
    }

    ChainLayout {
        sp: 0..sp_size,
        p: sp_size..sp_size + p_size,
        c: sp_size + p_size..sp_size + p_size + c_size,
        guarded_bodies,
    }
}

/// One candidate per chain, in chain order: plain bodies for the `sp` and
/// `p` chains, and for `c` chains the assigned precise body guarded by the
/// chain's proposal.
pub fn build_eval_list(proposals: &[&Program], layout: &ChainLayout) -> Vec<Candidate> {
    let mut list = Vec::with_capacity(proposals.len());
    for i in layout.sp.clone().chain(layout.p.clone()) {
        list.push(Candidate::new(proposals[i].clone()));
    }
    for (body, i) in layout.guarded_bodies.iter().zip(layout.c.clone()) {
        list.push(Candidate::guarded(body.clone(), proposals[i].clone()));
    }
    list
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainMode {
    SoundAndPrecise { weighted: bool },
    Precise { weighted: bool },
    Abduction,
}

impl ChainMode {
    fn for_chain(layout: &ChainLayout, i: usize) -> Self {
        let in_upper_half = |r: &Range<usize>| i >= (r.start + r.end) / 2;
        if layout.sp.contains(&i) {
            ChainMode::SoundAndPrecise {
                weighted: in_upper_half(&layout.sp),
            }
        } else if layout.p.contains(&i) {
            ChainMode::Precise {
                weighted: in_upper_half(&layout.p),
            }
        } else {
            ChainMode::Abduction
        }
    }

    fn context(self, contexts: &SynthContexts) -> &SynthesizerContext {
        match self {
            ChainMode::SoundAndPrecise { weighted: false } | ChainMode::Precise { weighted: false } => {
                &contexts.regular
            }
            ChainMode::SoundAndPrecise { weighted: true } | ChainMode::Precise { weighted: true } => {
                &contexts.weighted
            }
            ChainMode::Abduction => &contexts.cond,
        }
    }

    fn cost_fn(self) -> CostFn {
        match self {
            ChainMode::SoundAndPrecise { .. } => sound_and_precise_cost,
            ChainMode::Precise { .. } => precise_cost,
            ChainMode::Abduction => abduction_cost,
        }
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    program: Program,
    result: EvalResult,
    round: usize,
}

/// Best-so-far records of one chain. All three start from the initial
/// program, so an unsound start can stay as `sound_most_improve` until a
/// sound proposal beats its improvement.
#[derive(Debug, Clone)]
struct ChainTrackers {
    sound_most_improve: Tracked,
    most_improve: Tracked,
    lowest_cost: Tracked,
}

impl ChainTrackers {
    fn new(initial: Tracked) -> Self {
        ChainTrackers {
            sound_most_improve: initial.clone(),
            most_improve: initial.clone(),
            lowest_cost: initial,
        }
    }

    fn observe(&mut self, tracked: Tracked, cost: f64, cost_fn: CostFn) {
        let res = &tracked.result;
        if res.is_sound() && res.potential_improve() > self.sound_most_improve.result.potential_improve() {
            self.sound_most_improve = tracked.clone();
        }
        if res.unsolved_exacts() > self.most_improve.result.unsolved_exacts() {
            self.most_improve = tracked.clone();
        }
        if cost < cost_fn(&self.lowest_cost.result) {
            self.lowest_cost = tracked;
        }
    }
}

/// Knobs of one iteration.
#[derive(Debug, Clone)]
pub struct IterationParams {
    pub iteration: usize,
    /// Prefix of the names given to the chains' programs.
    pub name: String,
    pub num_programs: usize,
    pub num_abd_procs: usize,
    pub body_length: usize,
    pub cond_length: usize,
    pub num_rounds: usize,
    /// Inverse temperature of the Metropolis rule.
    pub beta: f64,
    pub set_params: SetParams,
}

fn tagged(program: &Program, tag: RoundTag) -> Program {
    let mut p = program.clone();
    p.tag = Some(tag);
    p
}

fn log_trackers(trackers: &[ChainTrackers]) {
    log::debug!("Sound transformers with most exact outputs:");
    for (i, t) in trackers.iter().enumerate() {
        if t.sound_most_improve.result.is_sound() {
            log::debug!("{}_{}\n{}", i, t.sound_most_improve.round, t.sound_most_improve.result);
        }
    }
    log::debug!("Transformers with most unsolved exact outputs:");
    for (i, t) in trackers.iter().enumerate() {
        log::debug!("{}_{}\n{}", i, t.most_improve.round, t.most_improve.result);
    }
    log::debug!("Transformers with lowest cost:");
    for (i, t) in trackers.iter().enumerate() {
        log::debug!("{}_{}\n{}", i, t.lowest_cost.round, t.lowest_cost.result);
    }
}

/// Runs `params.num_rounds` rounds of every chain and folds the harvest into
/// `solution_set`. Returns the merged chain statistics.
#[allow(clippy::too_many_arguments)]
pub fn synthesize_one_iteration(
    params: &IterationParams,
    contexts: &SynthContexts,
    rng: &mut Pcg64Mcg,
    solution_set: &mut SolutionSet,
    oracle: &dyn Oracle,
    verifier: &dyn Verifier,
    lowering: &dyn SourceLowering,
) -> Result<McmcStats<EditKind>> {
    let ith = params.iteration;
    let layout = mcmc_setup(solution_set, params.num_abd_procs, params.num_programs);
    let num_chains = layout.num_chains();
    let modes: Vec<ChainMode> = (0..num_chains).map(|i| ChainMode::for_chain(&layout, i)).collect();

    let mut samplers = Vec::with_capacity(num_chains);
    for (i, mode) in modes.iter().enumerate() {
        let chain_rng = Pcg64Mcg::from_rng(&mut *rng)?;
        let (name, length, returns) = match mode {
            ChainMode::Abduction => (
                format!("{}_cond_{}_{}", params.name, ith, i),
                params.cond_length,
                ReturnKind::Bool,
            ),
            _ => (
                format!("{}_{}_{}", params.name, ith, i),
                params.body_length,
                ReturnKind::Abstract,
            ),
        };
        samplers.push(McmcSampler::new(
            mode.context(contexts),
            chain_rng,
            &name,
            length,
            returns,
            mode.cost_fn(),
        )?);
    }

    let proposals: Vec<&Program> = samplers.iter().map(|s| s.get_current()).collect();
    let initial = solution_set.eval_improve(oracle, &build_eval_list(&proposals, &layout))?;
    let mut trackers = Vec::with_capacity(num_chains);
    for (i, (spl, res)) in samplers.iter_mut().zip(initial).enumerate() {
        let program = tagged(spl.get_current(), RoundTag::new(ith, 0, i));
        spl.set_initial_result(res.clone());
        trackers.push(ChainTrackers::new(Tracked {
            program,
            result: res,
            round: 0,
        }));
    }

    log::info!(
        "Iter {}: Start {} MCMC to sampling programs of length {}. Start {} MCMC to sample abductions. Each one is run for {} steps...",
        ith,
        num_chains - layout.c.len(),
        params.body_length,
        layout.c.len(),
        params.num_rounds
    );

    for rnd in 0..params.num_rounds {
        samplers
            .par_iter_mut()
            .zip(modes.par_iter())
            .map(|(spl, mode)| spl.sample_next(mode.context(contexts)).map(|_| ()))
            .collect::<Result<Vec<()>>>()?;

        let proposals: Vec<&Program> = samplers.iter().map(|s| s.get_current()).collect();
        let eval_list = build_eval_list(&proposals, &layout);
        let start = Instant::now();
        let results = solution_set.eval_improve(oracle, &eval_list)?;
        let used = start.elapsed();

        for (i, ((spl, res), mode)) in samplers.iter_mut().zip(results).zip(&modes).enumerate() {
            spl.stats.total_oracle_time_micros += used.as_micros();
            if spl.settle(res.clone(), params.beta) {
                let tracked = Tracked {
                    program: tagged(spl.get_current(), RoundTag::new(ith, rnd, i)),
                    result: res,
                    round: rnd,
                };
                trackers[i].observe(tracked, spl.current_cost(), mode.cost_fn());
            }
        }

        for (i, spl) in samplers.iter().enumerate() {
            if let Some(cur) = spl.current_result() {
                log::debug!(
                    "{}\t{:.2}%\t{:.2}%\t{:.3}\t{:.3}",
                    RoundTag::new(ith, rnd, i),
                    cur.sound_prop() * 100.0,
                    cur.unsolved_exact_prop() * 100.0,
                    cur.avg_distance(),
                    spl.current_cost()
                );
            }
        }
        log::debug!("Used Time: {:.2}", used.as_secs_f64());
        if rnd % REPORT_PERIOD == REPORT_OFFSET || rnd + 1 == params.num_rounds {
            log_trackers(&trackers);
        }
    }

    let mut candidates_sp = Vec::new();
    let mut candidates_p = Vec::new();
    let mut candidates_c = Vec::new();
    for i in layout.sp.clone().chain(layout.p.clone()) {
        let t = &trackers[i];
        if t.sound_most_improve.result.is_sound() && t.sound_most_improve.result.potential_improve() > 0 {
            candidates_sp.push(Candidate::new(t.sound_most_improve.program.clone()));
        }
        if !t.most_improve.result.is_sound() && t.most_improve.result.unsolved_exacts() > 0 {
            candidates_p.push(t.most_improve.program.clone());
        }
    }
    for (body, i) in layout.guarded_bodies.iter().zip(layout.c.clone()) {
        let t = &trackers[i];
        if t.sound_most_improve.result.is_sound() && t.sound_most_improve.result.potential_improve() > 0 {
            candidates_c.push(Candidate::guarded(body.clone(), t.sound_most_improve.program.clone()));
        }
    }

    let mut stats = McmcStats::default();
    for spl in samplers {
        stats.merge_from(spl.stats);
    }
    log::info!(
        "Iter {}: {} proposals, acceptance rate {:.3}, {} idle",
        ith,
        stats.proposals,
        stats.acceptance_rate(),
        stats.idle_rounds
    );

    solution_set.construct_new_solution_set(
        candidates_sp,
        candidates_p,
        candidates_c,
        oracle,
        verifier,
        lowering,
        &params.set_params,
    )?;
    Ok(stats)
}
