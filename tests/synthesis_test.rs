// SPDX-License-Identifier: Apache-2.0

//! End-to-end synthesis of the known-bits transfer function for `and`.

use pretty_assertions::assert_eq;
use xfer_synth::dsl::Operator;
use xfer_synth::program::Op;
use xfer_synth::{
    Candidate, ConcreteOp, CppLowering, Domain, EnumerativeOracle, ExhaustiveVerifier, Oracle,
    Program, ReturnKind, SynthConfig, SynthesisOutcome, synthesize_transfer_function,
};

/// Known zeros of either side, known ones of both.
fn hand_written_known_bits_and() -> Program {
    let mut p = Program::with_prefix("kb_and", ReturnKind::Abstract);
    let zero = p.push(Op::apply(
        Operator::Or,
        vec![Program::field_ref(0, 0), Program::field_ref(1, 0)],
        None,
    ));
    let one = p.push(Op::apply(
        Operator::And,
        vec![Program::field_ref(0, 1), Program::field_ref(1, 1)],
        None,
    ));
    p.finish_abstract(&[zero, one]);
    p
}

#[test]
fn synthesizes_known_bits_and_at_width_4() {
    let _ = env_logger::builder().is_test(true).try_init();
    let oracle = EnumerativeOracle::new(Domain::KnownBits, ConcreteOp::And, &[4]).unwrap();
    let verifier = ExhaustiveVerifier::new(Domain::KnownBits, ConcreteOp::And);
    let config = SynthConfig {
        seed: 2024,
        num_iters: 8,
        num_rounds: 50,
        num_programs: 8,
        num_abd_procs: 2,
        program_length: 8,
        condition_length: 4,
        inv_temp: 200.0,
        full_int_ops: false,
        ..SynthConfig::default()
    };

    let outcome =
        synthesize_transfer_function("and", &config, &oracle, &verifier, &CppLowering, None).unwrap();
    let SynthesisOutcome::Solved {
        result, members, source, ..
    } = outcome
    else {
        panic!("expected a solution");
    };

    let reference = &oracle
        .evaluate(&[Candidate::new(hand_written_known_bits_and())], &[])
        .unwrap()[0];
    assert!(result.is_sound());
    assert!(result.exact_prop() >= 0.99, "exact: {}", result.exact_prop());
    assert_eq!(result.exact_cases(), reference.exact_cases());
    assert_eq!(result.all_cases(), reference.all_cases());
    assert!(!members.is_empty());
    assert!(source.contains("Vec<2> solution("));
}
