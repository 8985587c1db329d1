// SPDX-License-Identifier: Apache-2.0

//! The growing set of verified transfer functions whose meet is the
//! synthesized solution.

use anyhow::Result;

use crate::context::SynthesizerContext;
use crate::domain::{AbstractValue, Domain};
use crate::dsl::ConstantKind;
use crate::error::InconsistentVerdict;
use crate::eval::{Candidate, EvalResult};
use crate::interp::{Args, Interpreter};
use crate::lower::SourceLowering;
use crate::oracle::Oracle;
use crate::oracle::enumerative::run_references;
use crate::program::{Program, ReturnKind};
use crate::verifier::{Verifier, verify_up_to};

/// Minimum share of all cases a member must solve on its own for its
/// operators to feed the learned weights.
pub const LEARN_THRESHOLD: f64 = 0.005;

/// Knobs of [`SolutionSet::construct_new_solution_set`].
#[derive(Debug, Clone, Copy)]
pub struct SetParams {
    /// Size of the retained pool of precise but unsound bodies.
    pub pool_size: usize,
    pub max_verify_width: u32,
    /// An unsound verdict at or below this width, at a width the oracle
    /// evaluated, means the oracle and the verifier disagree.
    pub exhaustive_width_cutoff: u32,
}

impl Default for SetParams {
    fn default() -> Self {
        SetParams {
            pool_size: 15,
            max_verify_width: 4,
            exhaustive_width_cutoff: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Existing,
    New,
    NewGuarded,
}

/// A program returning top for `domain`.
pub fn top_program(domain: Domain) -> Program {
    let mut p = Program::with_prefix("top", ReturnKind::Abstract);
    let zero = Program::constant_ref(ConstantKind::Zero);
    let fields = match domain {
        Domain::KnownBits => [zero, zero],
        Domain::ConstantRange => [zero, Program::constant_ref(ConstantKind::AllOnes)],
    };
    p.finish_abstract(&fields);
    p
}

fn cond_name(c: &Candidate) -> &str {
    c.guard.as_ref().map(|g| g.name.as_str()).unwrap_or("None")
}

fn tag_of(p: &Program) -> String {
    p.tag.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
}

#[derive(Debug, Clone)]
pub struct SolutionSet {
    domain: Domain,
    members: Vec<Candidate>,
    precise_pool: Vec<Program>,
    is_perfect: bool,
}

impl SolutionSet {
    pub fn new(domain: Domain) -> Self {
        SolutionSet {
            domain,
            members: vec![],
            precise_pool: vec![],
            is_perfect: false,
        }
    }

    pub fn members(&self) -> &[Candidate] {
        &self.members
    }

    pub fn precise_pool(&self) -> &[Program] {
        &self.precise_pool
    }

    pub fn is_perfect(&self) -> bool {
        self.is_perfect
    }

    pub fn has_solution(&self) -> bool {
        !self.members.is_empty()
    }

    /// Scores `candidates` against the current members.
    pub fn eval_improve(&self, oracle: &dyn Oracle, candidates: &[Candidate]) -> Result<Vec<EvalResult>> {
        oracle.evaluate(candidates, &self.members)
    }

    /// Scores the members' meet on its own.
    pub fn evaluate_solution(&self, oracle: &dyn Oracle) -> Result<EvalResult> {
        let top = Candidate::new(top_program(self.domain));
        let mut results = self.eval_improve(oracle, &[top])?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Output of the combined solution on `args`.
    pub fn solution_output(&self, interp: &mut Interpreter, args: &Args) -> AbstractValue {
        run_references(self.domain, interp, &self.members, args)
    }

    fn handle_inconsistent_result(&self, candidate: &Candidate, bitwidth: u32, lowering: &dyn SourceLowering) -> anyhow::Error {
        log::error!("{}", self.domain.helper_source());
        log::error!("{}", lowering.lower(&candidate.body));
        if let Some(guard) = &candidate.guard {
            log::error!("{}", lowering.lower(guard));
        }
        log::error!("{}", candidate.body.eliminate_dead_code());
        if let Some(guard) = &candidate.guard {
            log::error!("{}", guard.eliminate_dead_code());
        }
        anyhow::Error::new(InconsistentVerdict {
            candidate: candidate.name(),
            bitwidth,
        })
    }

    /// Rebuilds the set greedily from the old members and the new sound
    /// (`new_sp`) and guarded (`new_c`) candidates, then refreshes the pool
    /// of precise bodies from the old pool and `new_p`.
    #[allow(clippy::too_many_arguments)]
    pub fn construct_new_solution_set(
        &mut self,
        new_sp: Vec<Candidate>,
        new_p: Vec<Program>,
        new_c: Vec<Candidate>,
        oracle: &dyn Oracle,
        verifier: &dyn Verifier,
        lowering: &dyn SourceLowering,
        params: &SetParams,
    ) -> Result<()> {
        log::info!("Size of new candidates: {}", new_sp.len());
        log::info!("Size of new conditional candidates: {}", new_c.len());
        let mut pool: Vec<(Candidate, Origin)> = std::mem::take(&mut self.members)
            .into_iter()
            .map(|c| (c, Origin::Existing))
            .chain(new_sp.into_iter().map(|c| (c, Origin::New)))
            .chain(new_c.into_iter().map(|c| (c, Origin::NewGuarded)))
            .collect();
        log::info!("Size of solutions: {}", pool.len());
        log::info!("Reset solution set...");
        let mut num_cond_solutions = 0;

        while !pool.is_empty() {
            let candidates: Vec<Candidate> = pool.iter().map(|(c, _)| c.clone()).collect();
            let results = self.eval_improve(oracle, &candidates)?;
            if results[0].reference_distance() == 0 {
                // Already perfect.
                break;
            }
            let mut best: Option<usize> = None;
            for (i, r) in results.iter().enumerate() {
                if !r.is_sound() {
                    continue;
                }
                if best.is_none_or(|b| r.potential_improve() > results[b].potential_improve()) {
                    best = Some(i);
                }
            }
            let Some(best) = best else {
                log::info!("No sound candidate left");
                break;
            };
            let best_result = results[best].clone();
            if best_result.potential_improve() == 0 {
                break;
            }
            // Whatever the oracle considers unsound can never be admitted.
            let mut chosen = None;
            let mut remaining = Vec::with_capacity(pool.len());
            for (i, entry) in pool.into_iter().enumerate() {
                if i == best {
                    chosen = Some(entry);
                } else if results[i].is_sound() {
                    remaining.push(entry);
                }
            }
            pool = remaining;
            let Some((cand, origin)) = chosen else {
                break;
            };

            if origin != Origin::Existing {
                let unsound_bit = verify_up_to(verifier, &cand, params.max_verify_width)?;
                if unsound_bit != 0 {
                    log::info!(
                        "Skip a unsound function at bit width {}, body: {}, cond: {}",
                        unsound_bit,
                        cand.body.name,
                        cond_name(&cand)
                    );
                    if unsound_bit <= params.exhaustive_width_cutoff && oracle.bitwidths().contains(&unsound_bit) {
                        return Err(self.handle_inconsistent_result(&cand, unsound_bit, lowering));
                    }
                    continue;
                }
            }

            let log_str = match (origin, cand.guard.is_some()) {
                (Origin::New, _) => "Add a new transformer",
                (Origin::NewGuarded, _) => "Add a new transformer (cond)",
                (Origin::Existing, false) => "Add an existing transformer",
                (Origin::Existing, true) => "Add an existing transformer (cond)",
            };
            if cand.guard.is_some() {
                num_cond_solutions += 1;
            }
            log::info!(
                "{}, body: {} ({}), cond: {}. After adding, Exact: {:.2}%, Dist: {:.2}, weighted?: {}",
                log_str,
                cand.body.name,
                tag_of(&cand.body),
                cond_name(&cand),
                best_result.exact_prop() * 100.0,
                best_result.avg_distance(),
                cand.body.from_weighted
            );
            self.members.push(cand);
        }

        log::info!("The number of solutions after reseting: {}", self.members.len());
        log::info!("The number of conditional solutions: {}", num_cond_solutions);

        let final_result = self.evaluate_solution(oracle)?;
        if final_result.unsolved_cases() == 0 {
            self.is_perfect = true;
            return Ok(());
        }

        let precise: Vec<Program> = std::mem::take(&mut self.precise_pool)
            .into_iter()
            .chain(new_p)
            .collect();
        let as_candidates: Vec<Candidate> = precise.iter().cloned().map(Candidate::new).collect();
        let results = self.eval_improve(oracle, &as_candidates)?;
        let mut ranked: Vec<(Program, EvalResult)> = precise.into_iter().zip(results).collect();
        ranked.sort_by_key(|(_, r)| std::cmp::Reverse(r.potential_improve()));
        ranked.truncate(params.pool_size);
        log::info!("Top {} Precise candidates:", params.pool_size);
        for (p, r) in &ranked {
            log::info!(
                "{}\tunsolved_exact: {:.2}%, sound: {:.2}%, dist_reduce: {} -> {}",
                p.name,
                r.unsolved_exact_prop() * 100.0,
                r.sound_prop() * 100.0,
                r.reference_distance(),
                r.sound_distance()
            );
        }
        self.precise_pool = ranked.into_iter().map(|(p, _)| p).collect();
        Ok(())
    }

    /// Feeds operator usage of members that pull their own weight into
    /// `ctx`'s weights.
    pub fn learn_weights(&self, ctx: &mut SynthesizerContext, oracle: &dyn Oracle) -> Result<()> {
        log::info!("Improvement by each individual function");
        let mut learn_from: Vec<Program> = Vec::new();
        for (i, member) in self.members.iter().enumerate() {
            let others: Vec<Candidate> = self
                .members
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, c)| c.clone())
                .collect();
            let res = oracle
                .evaluate(std::slice::from_ref(member), &others)?
                .pop()
                .unwrap_or_default();
            let to_learn = res.new_exact_prop() > LEARN_THRESHOLD;
            log::info!(
                "\tbody {}, cond {} : #exact {} -> {}, dist_improve: {}, cond?: {}, learn?: {}",
                member.body.name,
                cond_name(member),
                res.exact_cases() - res.unsolved_exacts(),
                res.exact_cases(),
                res.potential_improve(),
                member.guard.is_some(),
                to_learn
            );
            if to_learn {
                learn_from.push(member.body.eliminate_dead_code());
            }
        }
        let freq = Program::count_op_frequency(&learn_from);
        ctx.update_weights(&freq);
        log::info!("Current Weights: {}", ctx.weight_summary());
        Ok(())
    }

    /// Source of every member plus a `solution` function meeting them all.
    pub fn generate_solution_and_source(&self, lowering: &dyn SourceLowering) -> String {
        let mut out = String::new();
        out.push_str(self.domain.helper_source());
        out.push('\n');
        let mut parts = Vec::with_capacity(self.members.len());
        for (i, member) in self.members.iter().enumerate() {
            let name = format!("partial_solution_{}", i);
            let mut body = member.body.eliminate_dead_code();
            match &member.guard {
                None => {
                    body.name = name.clone();
                    out.push_str(&lowering.lower(&body));
                }
                Some(guard) => {
                    body.name = format!("{}_body", name);
                    let mut cond = guard.eliminate_dead_code();
                    cond.name = format!("{}_cond", name);
                    out.push_str(&lowering.lower(&body));
                    out.push('\n');
                    out.push_str(&lowering.lower(&cond));
                    out.push('\n');
                    out.push_str(&lowering.lower_guarded(&name, &body.name, &cond.name));
                }
            }
            out.push('\n');
            parts.push(name);
        }
        out.push_str(&lowering.lower_meet_fold("solution", &parts));
        out
    }

    /// Text dump of the members, dead code removed.
    pub fn text_dump(&self) -> String {
        let mut out = String::new();
        for member in &self.members {
            out.push_str(&member.body.eliminate_dead_code().to_string());
            out.push('\n');
            if let Some(guard) = &member.guard {
                out.push_str(&guard.eliminate_dead_code().to_string());
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Operator;
    use crate::eval::WidthResult;
    use crate::interp::ConcreteOp;
    use crate::lower::CppLowering;
    use crate::oracle::EnumerativeOracle;
    use crate::program::Op;
    use crate::verifier::ExhaustiveVerifier;
    use pretty_assertions::assert_eq;

    fn kb_fields(name: &str, zero: Option<Operator>, one: Option<Operator>) -> Program {
        let mut p = Program::with_prefix(name, ReturnKind::Abstract);
        let z = Program::constant_ref(ConstantKind::Zero);
        let zero = match zero {
            Some(op) => p.push(Op::apply(op, vec![Program::field_ref(0, 0), Program::field_ref(1, 0)], None)),
            None => z,
        };
        let one = match one {
            Some(op) => p.push(Op::apply(op, vec![Program::field_ref(0, 1), Program::field_ref(1, 1)], None)),
            None => z,
        };
        p.finish_abstract(&[zero, one]);
        p
    }

    fn setup() -> (EnumerativeOracle, ExhaustiveVerifier) {
        (
            EnumerativeOracle::new(Domain::KnownBits, ConcreteOp::And, &[3]).unwrap(),
            ExhaustiveVerifier::new(Domain::KnownBits, ConcreteOp::And),
        )
    }

    #[test]
    fn halves_combine_into_a_perfect_set() {
        let (oracle, verifier) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        let ones = Candidate::new(kb_fields("ones", None, Some(Operator::And)));
        set.construct_new_solution_set(
            vec![zeros, ones],
            vec![],
            vec![],
            &oracle,
            &verifier,
            &CppLowering,
            &SetParams::default(),
        )
        .unwrap();
        assert_eq!(set.members().len(), 2);
        assert!(set.is_perfect());
        let r = set.evaluate_solution(&oracle).unwrap();
        assert_eq!(r.exact_cases(), r.all_cases());

        let src = set.generate_solution_and_source(&CppLowering);
        assert!(src.contains("Vec<2> partial_solution_0("));
        assert!(src.contains("Vec<2> partial_solution_1("));
        assert!(src.contains("result = meet(result, partial_solution_1(lhs, rhs));"));

        let mut interp = Interpreter::new(3);
        assert_eq!(set.solution_output(&mut interp, &[[0b001, 0b100], [0b010, 0b101]]), [0b011, 0b100]);
    }

    #[test]
    fn useless_candidates_are_not_added() {
        let (oracle, verifier) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let top = Candidate::new(kb_fields("top", None, None));
        set.construct_new_solution_set(
            vec![top],
            vec![],
            vec![],
            &oracle,
            &verifier,
            &CppLowering,
            &SetParams::default(),
        )
        .unwrap();
        assert!(!set.has_solution());
        assert!(!set.is_perfect());
    }

    #[test]
    fn unsound_candidates_go_to_the_precise_pool_only() {
        let (oracle, verifier) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let greedy = kb_fields("greedy", Some(Operator::Or), Some(Operator::Or));
        set.construct_new_solution_set(
            vec![Candidate::new(greedy.clone())],
            vec![greedy],
            vec![],
            &oracle,
            &verifier,
            &CppLowering,
            &SetParams::default(),
        )
        .unwrap();
        assert!(!set.has_solution());
        assert_eq!(set.precise_pool().len(), 1);
        assert_eq!(set.precise_pool()[0].name, "greedy");
    }

    #[test]
    fn precise_pool_keeps_the_top_k() {
        let (oracle, verifier) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let params = SetParams {
            pool_size: 1,
            ..SetParams::default()
        };
        let weak = kb_fields("weak", None, Some(Operator::Or));
        let strong = kb_fields("strong", Some(Operator::Or), Some(Operator::Or));
        set.construct_new_solution_set(vec![], vec![weak, strong], vec![], &oracle, &verifier, &CppLowering, &params)
            .unwrap();
        assert_eq!(set.precise_pool().len(), 1);
        assert_eq!(set.precise_pool()[0].name, "strong");
    }

    struct LyingVerifier;

    impl Verifier for LyingVerifier {
        fn verify(&self, _: &Candidate, bitwidth: u32) -> Result<bool> {
            Ok(bitwidth != 3)
        }
    }

    #[test]
    fn verifier_disagreement_at_an_evaluated_width_is_an_error() {
        let (oracle, _) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        let err = set
            .construct_new_solution_set(
                vec![zeros],
                vec![],
                vec![],
                &oracle,
                &LyingVerifier,
                &CppLowering,
                &SetParams::default(),
            )
            .unwrap_err();
        let verdict = err.downcast_ref::<InconsistentVerdict>().unwrap();
        assert_eq!(verdict.bitwidth, 3);
    }

    #[test]
    fn unsound_verdict_above_the_cutoff_drops_the_candidate() {
        let (oracle, _) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        let params = SetParams {
            exhaustive_width_cutoff: 2,
            ..SetParams::default()
        };
        set.construct_new_solution_set(vec![zeros], vec![], vec![], &oracle, &LyingVerifier, &CppLowering, &params)
            .unwrap();
        assert!(!set.has_solution());
    }

    #[test]
    fn learn_weights_counts_useful_members() {
        let (oracle, verifier) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        let ones = Candidate::new(kb_fields("ones", None, Some(Operator::And)));
        set.construct_new_solution_set(
            vec![zeros, ones],
            vec![],
            vec![],
            &oracle,
            &verifier,
            &CppLowering,
            &SetParams::default(),
        )
        .unwrap();
        let mut ctx = SynthesizerContext::new(true);
        set.learn_weights(&mut ctx, &oracle).unwrap();
        assert_eq!(ctx.weight(Operator::Or), 2);
        assert_eq!(ctx.weight(Operator::And), 2);
        assert_eq!(ctx.weight(Operator::Xor), 1);
    }

    #[test]
    fn text_dump_lists_members() {
        let (oracle, verifier) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        set.construct_new_solution_set(vec![zeros], vec![], vec![], &oracle, &verifier, &CppLowering, &SetParams::default())
            .unwrap();
        assert!(set.text_dump().contains("func @zeros(%lhs, %rhs) -> abstract"));
    }

    #[test]
    fn solution_result_sums_width_records() {
        let (_, verifier) = setup();
        let oracle = EnumerativeOracle::new(Domain::KnownBits, ConcreteOp::And, &[2, 3]).unwrap();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        set.construct_new_solution_set(vec![zeros], vec![], vec![], &oracle, &verifier, &CppLowering, &SetParams::default())
            .unwrap();
        let r = set.evaluate_solution(&oracle).unwrap();
        let widths: Vec<u32> = r.widths().iter().map(|w| w.bitwidth).collect();
        assert_eq!(widths, vec![2, 3]);
        assert_eq!(r.all_cases(), r.widths()[0].all_cases + r.widths()[1].all_cases);
        assert_eq!(r.exact_cases(), r.widths()[0].exact_cases + r.widths()[1].exact_cases);
        assert!(r.widths()[0].all_cases < r.widths()[1].all_cases);
    }

    /// Scores like the enumerative oracle, except that candidates whose body
    /// is named `unsound_body` are reported sound on no case.
    struct ForcedUnsoundOracle {
        inner: EnumerativeOracle,
        unsound_body: &'static str,
    }

    impl Oracle for ForcedUnsoundOracle {
        fn evaluate(&self, candidates: &[Candidate], references: &[Candidate]) -> Result<Vec<EvalResult>> {
            let results = self.inner.evaluate(candidates, references)?;
            Ok(candidates
                .iter()
                .zip(results)
                .map(|(c, r)| {
                    if c.body.name != self.unsound_body {
                        return r;
                    }
                    let widths = r
                        .widths()
                        .iter()
                        .map(|w| WidthResult {
                            sound_cases: 0,
                            unsolved_sound_cases: 0,
                            ..*w
                        })
                        .collect();
                    EvalResult::new(widths)
                })
                .collect())
        }

        fn domain(&self) -> Domain {
            self.inner.domain()
        }

        fn bitwidths(&self) -> &[u32] {
            self.inner.bitwidths()
        }
    }

    #[test]
    fn candidates_the_oracle_calls_unsound_are_excluded() {
        let (inner, verifier) = setup();
        let oracle = ForcedUnsoundOracle {
            inner,
            unsound_body: "ones",
        };
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        let ones = Candidate::new(kb_fields("ones", None, Some(Operator::And)));
        set.construct_new_solution_set(
            vec![ones, zeros],
            vec![],
            vec![],
            &oracle,
            &verifier,
            &CppLowering,
            &SetParams::default(),
        )
        .unwrap();
        let names: Vec<&str> = set.members().iter().map(|c| c.body.name.as_str()).collect();
        assert_eq!(names, vec!["zeros"]);
        assert!(!set.is_perfect());
    }

    #[test]
    fn exact_cases_never_drop_across_rebuilds() {
        let (oracle, verifier) = setup();
        let mut set = SolutionSet::new(Domain::KnownBits);
        let zeros = Candidate::new(kb_fields("zeros", Some(Operator::Or), None));
        set.construct_new_solution_set(vec![zeros], vec![], vec![], &oracle, &verifier, &CppLowering, &SetParams::default())
            .unwrap();
        let before = set.evaluate_solution(&oracle).unwrap().exact_cases();
        assert!(before > 0);

        // Empty batch.
        set.construct_new_solution_set(vec![], vec![], vec![], &oracle, &verifier, &CppLowering, &SetParams::default())
            .unwrap();
        let after_empty = set.evaluate_solution(&oracle).unwrap().exact_cases();
        assert!(after_empty >= before, "{} -> {}", before, after_empty);
        assert_eq!(set.members().len(), 1);

        // Only unsound candidates.
        let greedy = kb_fields("greedy", Some(Operator::Or), Some(Operator::Or));
        let loose = kb_fields("loose", Some(Operator::Xor), Some(Operator::Xor));
        set.construct_new_solution_set(
            vec![Candidate::new(greedy), Candidate::new(loose)],
            vec![],
            vec![],
            &oracle,
            &verifier,
            &CppLowering,
            &SetParams::default(),
        )
        .unwrap();
        let after_unsound = set.evaluate_solution(&oracle).unwrap().exact_cases();
        assert!(after_unsound >= after_empty, "{} -> {}", after_empty, after_unsound);
        let names: Vec<&str> = set.members().iter().map(|c| c.body.name.as_str()).collect();
        assert_eq!(names, vec!["zeros"]);
    }
}
