// SPDX-License-Identifier: Apache-2.0

//! An in-process oracle that enumerates every pair of abstract inputs at
//! small widths and interprets candidates directly.

use anyhow::{Result, ensure};
use rayon::prelude::*;

use crate::domain::{AbstractValue, Domain};
use crate::eval::{Candidate, EvalResult, WidthResult};
use crate::interp::{Args, ConcreteOp, Interpreter};
use crate::oracle::Oracle;

/// Widths above this make exhaustive enumeration impractical.
pub const MAX_ENUMERATION_WIDTH: u32 = 8;

/// One pair of abstract inputs and the tightest sound output for it.
#[derive(Debug, Clone)]
struct Case {
    args: Args,
    best: AbstractValue,
}

#[derive(Debug)]
struct WidthCases {
    width: u32,
    cases: Vec<Case>,
}

pub struct EnumerativeOracle {
    domain: Domain,
    widths: Vec<u32>,
    cases: Vec<WidthCases>,
}

/// Runs `candidate` on `args`: the body's output, or top when a guard is
/// present and false.
pub fn run_candidate(domain: Domain, interp: &mut Interpreter, candidate: &Candidate, args: &Args) -> AbstractValue {
    if let Some(guard) = &candidate.guard {
        if !interp.run_bool(guard, args) {
            return domain.top(interp.width());
        }
    }
    interp.run_abstract(&candidate.body, args)
}

/// Meet of all `references` on `args`, top when there are none.
pub fn run_references(domain: Domain, interp: &mut Interpreter, references: &[Candidate], args: &Args) -> AbstractValue {
    let width = interp.width();
    references.iter().fold(domain.top(width), |acc, r| {
        let out = run_candidate(domain, interp, r, args);
        domain.meet(&acc, &out, width)
    })
}

impl EnumerativeOracle {
    pub fn new(domain: Domain, op: ConcreteOp, widths: &[u32]) -> Result<Self> {
        ensure!(!widths.is_empty(), "at least one bit-width is required");
        for w in widths {
            ensure!(
                (1..=MAX_ENUMERATION_WIDTH).contains(w),
                "bit-width {} outside 1..={} for exhaustive enumeration",
                w,
                MAX_ENUMERATION_WIDTH
            );
        }
        let cases = widths
            .iter()
            .map(|w| WidthCases {
                width: *w,
                cases: Self::enumerate_cases(domain, op, *w),
            })
            .collect::<Vec<_>>();
        for wc in &cases {
            log::debug!(
                "enumerative oracle: {} {} {} cases at width {}",
                domain,
                op.name(),
                wc.cases.len(),
                wc.width
            );
        }
        Ok(EnumerativeOracle {
            domain,
            widths: widths.to_vec(),
            cases,
        })
    }

    fn enumerate_cases(domain: Domain, op: ConcreteOp, width: u32) -> Vec<Case> {
        let values = domain.enumerate(width);
        let concrete: Vec<Vec<u64>> = values.iter().map(|v| domain.concretize(v, width)).collect();
        (0..values.len())
            .into_par_iter()
            .flat_map_iter(|i| {
                let values = &values;
                let concrete = &concrete;
                (0..values.len()).filter_map(move |j| {
                    let mut best = domain.bottom(width);
                    for x in &concrete[i] {
                        for y in &concrete[j] {
                            if let Some(z) = op.apply(*x, *y, width) {
                                best = domain.join(&best, &domain.from_concrete(z, width));
                            }
                        }
                    }
                    if domain.is_bottom(&best) {
                        return None;
                    }
                    Some(Case {
                        args: [values[i], values[j]],
                        best,
                    })
                })
            })
            .collect()
    }

    fn score(&self, wc: &WidthCases, candidate: &Candidate, reference_out: &[AbstractValue]) -> WidthResult {
        let domain = self.domain;
        let width = wc.width;
        let mut interp = Interpreter::new(width);
        let mut r = WidthResult {
            bitwidth: width,
            ..Default::default()
        };
        for (case, cur) in wc.cases.iter().zip(reference_out) {
            let solved = *cur == case.best;
            let base_distance = domain.distance(cur, &case.best);
            let out = run_candidate(domain, &mut interp, candidate, &case.args);
            let met = domain.meet(cur, &out, width);
            let sound = domain.is_superset(&met, &case.best, width);
            let exact = met == case.best;
            let distance = domain.distance(&met, &case.best);

            r.all_cases += 1;
            r.sound_cases += sound as u64;
            r.exact_cases += exact as u64;
            r.distance += distance;
            r.reference_distance += base_distance;
            r.sound_distance += if sound { distance } else { base_distance };
            if !solved {
                r.unsolved_cases += 1;
                r.unsolved_sound_cases += sound as u64;
                r.unsolved_exact_cases += exact as u64;
                r.unsolved_distance += distance;
            }
        }
        r
    }
}

impl Oracle for EnumerativeOracle {
    fn evaluate(&self, candidates: &[Candidate], references: &[Candidate]) -> Result<Vec<EvalResult>> {
        let mut per_candidate: Vec<Vec<WidthResult>> = vec![Vec::with_capacity(self.cases.len()); candidates.len()];
        for wc in &self.cases {
            let reference_out: Vec<AbstractValue> = wc
                .cases
                .par_iter()
                .map_init(
                    || Interpreter::new(wc.width),
                    |interp, case| run_references(self.domain, interp, references, &case.args),
                )
                .collect();
            let scored: Vec<WidthResult> = candidates
                .par_iter()
                .map(|c| self.score(wc, c, &reference_out))
                .collect();
            for (slot, r) in per_candidate.iter_mut().zip(scored) {
                slot.push(r);
            }
        }
        Ok(per_candidate.into_iter().map(EvalResult::new).collect())
    }

    fn domain(&self) -> Domain {
        self.domain
    }

    fn bitwidths(&self) -> &[u32] {
        &self.widths
    }
}
