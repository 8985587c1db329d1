// SPDX-License-Identifier: Apache-2.0

//! Oracle results and the candidates they score.

use std::fmt;

use serde::Serialize;

use crate::program::Program;

/// Counts for one bit-width.
///
/// "Unsolved" cases are those where the reference set's meet is not yet the
/// best abstract result; the `unsolved_*` counts restrict to those.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WidthResult {
    pub bitwidth: u32,
    pub all_cases: u64,
    pub sound_cases: u64,
    pub exact_cases: u64,
    pub distance: u64,
    pub unsolved_cases: u64,
    pub unsolved_sound_cases: u64,
    pub unsolved_exact_cases: u64,
    pub unsolved_distance: u64,
    /// Distance of the reference set alone from the best result.
    pub reference_distance: u64,
    /// Distance after meeting the candidate in, counting unsound cases at
    /// the reference distance.
    pub sound_distance: u64,
}

/// Immutable per-candidate oracle output, one record per evaluated width.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvalResult {
    widths: Vec<WidthResult>,
}

macro_rules! sum_field {
    ($name:ident) => {
        pub fn $name(&self) -> u64 {
            self.widths.iter().map(|w| w.$name).sum()
        }
    };
}

impl EvalResult {
    pub fn new(widths: Vec<WidthResult>) -> Self {
        EvalResult { widths }
    }

    pub fn widths(&self) -> &[WidthResult] {
        &self.widths
    }

    sum_field!(all_cases);
    sum_field!(sound_cases);
    sum_field!(exact_cases);
    sum_field!(distance);
    sum_field!(unsolved_cases);
    sum_field!(unsolved_sound_cases);
    sum_field!(unsolved_exact_cases);
    sum_field!(unsolved_distance);
    sum_field!(reference_distance);
    sum_field!(sound_distance);

    pub fn is_sound(&self) -> bool {
        self.sound_cases() == self.all_cases()
    }

    /// How much meeting this candidate into the reference set shrinks the
    /// total distance to the best results.
    pub fn potential_improve(&self) -> u64 {
        self.reference_distance().saturating_sub(self.sound_distance())
    }

    pub fn unsolved_exacts(&self) -> u64 {
        self.unsolved_exact_cases()
    }

    fn ratio(num: u64, den: u64) -> f64 {
        if den == 0 { 0.0 } else { num as f64 / den as f64 }
    }

    /// Fraction of all cases this candidate newly makes exact.
    pub fn new_exact_prop(&self) -> f64 {
        Self::ratio(self.unsolved_exact_cases(), self.all_cases())
    }

    pub fn exact_prop(&self) -> f64 {
        Self::ratio(self.exact_cases(), self.all_cases())
    }

    /// 1 when there are no cases.
    pub fn sound_prop(&self) -> f64 {
        if self.all_cases() == 0 {
            1.0
        } else {
            Self::ratio(self.sound_cases(), self.all_cases())
        }
    }

    pub fn unsolved_exact_prop(&self) -> f64 {
        Self::ratio(self.unsolved_exact_cases(), self.unsolved_cases())
    }

    pub fn avg_distance(&self) -> f64 {
        Self::ratio(self.distance(), self.all_cases())
    }
}

impl fmt::Display for EvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all={} sound={} exact={} dist={} unsolved={} unsolved_exact={} ref_dist={} sound_dist={}",
            self.all_cases(),
            self.sound_cases(),
            self.exact_cases(),
            self.distance(),
            self.unsolved_cases(),
            self.unsolved_exact_cases(),
            self.reference_distance(),
            self.sound_distance()
        )
    }
}

/// A transfer function body, optionally guarded. When the guard evaluates
/// to false the candidate contributes top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub body: Program,
    pub guard: Option<Program>,
}

impl Candidate {
    pub fn new(body: Program) -> Self {
        Candidate { body, guard: None }
    }

    pub fn guarded(body: Program, guard: Program) -> Self {
        Candidate {
            body,
            guard: Some(guard),
        }
    }

    pub fn name(&self) -> String {
        match &self.guard {
            Some(g) => format!("{}_if_{}", self.body.name, g.name),
            None => self.body.name.clone(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.body)?;
        if let Some(g) = &self.guard {
            writeln!(f, "{}", g)?;
        }
        Ok(())
    }
}
