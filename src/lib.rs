// SPDX-License-Identifier: Apache-2.0

//! Synthesis of abstract-interpretation transfer functions by Markov chain
//! Monte Carlo search over a small typed program language.

pub mod config;
pub mod context;
pub mod cost;
pub mod domain;
pub mod dsl;
pub mod error;
pub mod eval;
pub mod interp;
pub mod iteration;
pub mod jobs;
pub mod lower;
pub mod oracle;
pub mod program;
pub mod sampler;
pub mod solution_set;
pub mod synth;
pub mod verifier;

pub use config::{ExternalCommand, ProblemFile, ProblemSpec, SynthConfig};
pub use context::SynthesizerContext;
pub use domain::{AbstractValue, Domain};
pub use error::{InconsistentVerdict, OracleProtocolError};
pub use eval::{Candidate, EvalResult, WidthResult};
pub use interp::ConcreteOp;
pub use jobs::{Job, JobReport, run_job, run_jobs};
pub use lower::{CppLowering, SourceLowering};
pub use oracle::{EnumerativeOracle, Oracle, ProcessOracle};
pub use program::{MutationProgram, Program, ReturnKind};
pub use solution_set::SolutionSet;
pub use synth::{SynthesisOutcome, synthesize_transfer_function};
pub use verifier::{ExhaustiveVerifier, ProcessVerifier, Verifier};
