// SPDX-License-Identifier: Apache-2.0

//! The outer loop: iterations of chain search, weight learning in between,
//! and the final combined solution.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use xfer_mcmc::McmcStats;

use crate::config::SynthConfig;
use crate::context::SynthesizerContext;
use crate::eval::{Candidate, EvalResult};
use crate::iteration::{IterationParams, SynthContexts, synthesize_one_iteration};
use crate::lower::SourceLowering;
use crate::oracle::Oracle;
use crate::sampler::EditKind;
use crate::solution_set::SolutionSet;
use crate::verifier::Verifier;

#[derive(Debug, Clone)]
pub enum SynthesisOutcome {
    Solved {
        /// Lowered members plus a `solution` function meeting them.
        source: String,
        /// Oracle score of the combined solution.
        result: EvalResult,
        iterations: usize,
        members: Vec<Candidate>,
        perfect: bool,
    },
    NoSolution {
        iterations: usize,
    },
}

impl SynthesisOutcome {
    pub fn iterations(&self) -> usize {
        match self {
            SynthesisOutcome::Solved { iterations, .. } | SynthesisOutcome::NoSolution { iterations } => *iterations,
        }
    }
}

/// Builds the regular, weighted and condition contexts from `config`.
pub fn make_contexts(config: &SynthConfig) -> Result<SynthContexts> {
    let predicates = config.cmp_predicates()?;
    let configure = |weighted: bool| {
        let mut ctx = SynthesizerContext::new(weighted);
        ctx.set_cmp_predicates(&predicates);
        if config.full_int_ops {
            ctx.use_full_int_ops();
        } else {
            ctx.use_basic_int_ops();
        }
        ctx
    };
    let mut cond = configure(false);
    cond.use_full_bool_ops();
    Ok(SynthContexts {
        regular: configure(false),
        weighted: configure(config.weighted_dsl),
        cond,
    })
}

/// Synthesizes a transfer function for whatever concrete operation `oracle`
/// is bound to. When `output_dir` is given, the solution set is dumped to
/// `iter_{i}.txt` there after every iteration.
pub fn synthesize_transfer_function(
    name: &str,
    config: &SynthConfig,
    oracle: &dyn Oracle,
    verifier: &dyn Verifier,
    lowering: &dyn SourceLowering,
    output_dir: Option<&Path>,
) -> Result<SynthesisOutcome> {
    ensure!(config.num_iters > 0, "num_iters must be positive");
    config.validate()?;
    let mut contexts = make_contexts(config)?;
    let mut rng = Pcg64Mcg::seed_from_u64(config.seed);
    let mut solution_set = SolutionSet::new(oracle.domain());
    let mut stats: McmcStats<EditKind> = McmcStats::default();

    log::debug!("Round_ID\tSound%\tUExact%\tUDis\tCost");
    let mut iterations = 0;
    for ith in 0..config.num_iters {
        let params = IterationParams {
            iteration: ith,
            name: name.to_string(),
            num_programs: config.num_programs,
            num_abd_procs: config.num_abd_procs,
            body_length: config.program_length,
            cond_length: config.condition_length,
            num_rounds: config.num_rounds,
            beta: config.inv_temp,
            set_params: config.set_params(),
        };
        let iter_stats = synthesize_one_iteration(
            &params,
            &contexts,
            &mut rng,
            &mut solution_set,
            oracle,
            verifier,
            lowering,
        )?;
        stats.merge_from(iter_stats);
        iterations += 1;

        if config.weighted_dsl {
            solution_set.learn_weights(&mut contexts.weighted, oracle)?;
        }
        if let Some(dir) = output_dir {
            let path = dir.join(format!("iter_{}.txt", ith));
            std::fs::write(&path, solution_set.text_dump()).with_context(|| format!("writing {}", path.display()))?;
        }
        if solution_set.is_perfect() {
            log::info!("Found a perfect solution after {} iteration(s)", iterations);
            break;
        }
    }
    log::info!(
        "{}: {} proposals over {} iteration(s), acceptance rate {:.3}",
        name,
        stats.proposals,
        iterations,
        stats.acceptance_rate()
    );

    if !solution_set.has_solution() {
        log::info!("Found no solutions");
        return Ok(SynthesisOutcome::NoSolution { iterations });
    }
    let source = solution_set.generate_solution_and_source(lowering);
    let result = solution_set.evaluate_solution(oracle)?;
    log::info!(
        "last_solution\t{:.2}%\t{:.2}%\t{:.3}",
        result.sound_prop() * 100.0,
        result.exact_prop() * 100.0,
        result.avg_distance()
    );
    Ok(SynthesisOutcome::Solved {
        source,
        result,
        iterations,
        members: solution_set.members().to_vec(),
        perfect: solution_set.is_perfect(),
    })
}
