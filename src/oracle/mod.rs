// SPDX-License-Identifier: Apache-2.0

//! The evaluation oracle seam.
//!
//! An oracle scores a batch of candidates against a set of reference
//! candidates (the current solution set). For each case (pair of abstract
//! inputs) the reference output is the meet of every reference's output, or
//! top when there are none; each candidate is then scored on the meet of its
//! own output with that reference output.

use anyhow::Result;

use crate::domain::Domain;
use crate::eval::{Candidate, EvalResult};

pub mod enumerative;
pub mod process;

pub use enumerative::EnumerativeOracle;
pub use process::ProcessOracle;

pub trait Oracle: Sync {
    /// One result per candidate, in input order.
    fn evaluate(&self, candidates: &[Candidate], references: &[Candidate]) -> Result<Vec<EvalResult>>;

    fn domain(&self) -> Domain;

    /// Widths every evaluation covers.
    fn bitwidths(&self) -> &[u32];
}
