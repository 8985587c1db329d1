// SPDX-License-Identifier: Apache-2.0

//! Run configuration and problem descriptions, loaded from TOML.
//!
//! A problem file has an optional `[synth]` table of search knobs and one
//! `[[problem]]` table per transfer function to synthesize:
//!
//! ```toml
//! [synth]
//! seed = 1
//! num_iters = 3
//!
//! [[problem]]
//! name = "and"
//! domain = "KnownBits"
//! concrete_op = "and"
//! bitwidths = [4]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::dsl::CmpPredicate;
use crate::interp::ConcreteOp;
use crate::lower::CppLowering;
use crate::oracle::{EnumerativeOracle, Oracle, ProcessOracle};
use crate::solution_set::SetParams;
use crate::verifier::{ExhaustiveVerifier, ProcessVerifier, Verifier};

/// Search knobs shared by every problem of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthConfig {
    pub seed: u64,
    pub num_iters: usize,
    /// Rounds per iteration.
    pub num_rounds: usize,
    /// Chains per iteration.
    pub num_programs: usize,
    /// Chains searching for guards of precise bodies. Must not exceed
    /// `num_programs`.
    pub num_abd_procs: usize,
    pub program_length: usize,
    pub condition_length: usize,
    /// Inverse temperature of the Metropolis rule.
    pub inv_temp: f64,
    /// Size of the pool of precise but unsound bodies kept for abduction.
    pub num_unsound_candidates: usize,
    /// Learn operator weights between iterations.
    pub weighted_dsl: bool,
    pub full_int_ops: bool,
    /// Compare predicates by flag number (`0 = eq` ... `9 = uge`).
    pub cmp_flags: Vec<u8>,
    /// New members are verified at widths `1..=max_verify_width`.
    pub max_verify_width: u32,
    pub exhaustive_width_cutoff: u32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            seed: 0,
            num_iters: 10,
            num_rounds: 1500,
            num_programs: 100,
            num_abd_procs: 30,
            program_length: 28,
            condition_length: 10,
            inv_temp: 200.0,
            num_unsound_candidates: 15,
            weighted_dsl: true,
            full_int_ops: true,
            cmp_flags: vec![0, 6, 7],
            max_verify_width: 4,
            exhaustive_width_cutoff: 4,
        }
    }
}

impl SynthConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_programs > 0, "num_programs must be positive");
        ensure!(
            self.num_abd_procs <= self.num_programs,
            "num_abd_procs ({}) must not exceed num_programs ({})",
            self.num_abd_procs,
            self.num_programs
        );
        ensure!(self.program_length > 0, "program_length must be positive");
        ensure!(self.condition_length > 0, "condition_length must be positive");
        ensure!(self.inv_temp > 0.0, "inv_temp must be positive");
        self.cmp_predicates()?;
        Ok(())
    }

    pub fn cmp_predicates(&self) -> Result<Vec<CmpPredicate>> {
        ensure!(!self.cmp_flags.is_empty(), "cmp_flags must not be empty");
        self.cmp_flags
            .iter()
            .map(|f| CmpPredicate::from_flag(*f).ok_or_else(|| anyhow!("unknown compare flag {}", f)))
            .collect()
    }

    pub fn set_params(&self) -> SetParams {
        SetParams {
            pool_size: self.num_unsound_candidates,
            max_verify_width: self.max_verify_width,
            exhaustive_width_cutoff: self.exhaustive_width_cutoff,
        }
    }
}

/// An external process speaking the oracle or verifier protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_bitwidths() -> Vec<u32> {
    vec![4]
}

/// One transfer function to synthesize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemSpec {
    pub name: String,
    pub domain: Domain,
    pub concrete_op: ConcreteOp,
    /// Widths the oracle evaluates at.
    #[serde(default = "default_bitwidths")]
    pub bitwidths: Vec<u32>,
    /// Evaluation engine; in-process enumeration when absent.
    #[serde(default)]
    pub engine: Option<ExternalCommand>,
    /// Soundness verifier; in-process exhaustive check when absent.
    #[serde(default)]
    pub verifier: Option<ExternalCommand>,
    /// Extra source passed to external tools ahead of the candidates.
    #[serde(default)]
    pub helper_sources: Vec<String>,
}

impl ProblemSpec {
    pub fn oracle(&self) -> Result<Box<dyn Oracle>> {
        ensure!(!self.bitwidths.is_empty(), "problem {}: no bit-widths", self.name);
        Ok(match &self.engine {
            Some(cmd) => Box::new(ProcessOracle::new(
                cmd.program.clone(),
                cmd.args.clone(),
                self.domain,
                &self.bitwidths,
                self.concrete_op.source(),
                self.helper_sources.clone(),
                CppLowering,
            )),
            None => Box::new(
                EnumerativeOracle::new(self.domain, self.concrete_op, &self.bitwidths)
                    .with_context(|| format!("problem {}", self.name))?,
            ),
        })
    }

    pub fn verifier(&self) -> Box<dyn Verifier> {
        match &self.verifier {
            Some(cmd) => Box::new(ProcessVerifier::new(
                cmd.program.clone(),
                cmd.args.clone(),
                self.domain,
                self.concrete_op.source(),
                self.helper_sources.clone(),
                CppLowering,
            )),
            None => Box::new(ExhaustiveVerifier::new(self.domain, self.concrete_op)),
        }
    }
}

/// Contents of a problem file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemFile {
    #[serde(default)]
    pub synth: SynthConfig,
    #[serde(default, rename = "problem")]
    pub problems: Vec<ProblemSpec>,
}

impl ProblemFile {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ProblemFile = toml::from_str(text).context("parsing problem file")?;
        file.synth.validate()?;
        ensure!(!file.problems.is_empty(), "problem file lists no [[problem]]");
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_fill_missing_fields() {
        let file = ProblemFile::from_toml_str(
            r#"
            [synth]
            seed = 3
            num_iters = 2

            [[problem]]
            name = "and"
            domain = "KnownBits"
            concrete_op = "and"
            "#,
        )
        .unwrap();
        assert_eq!(file.synth.seed, 3);
        assert_eq!(file.synth.num_iters, 2);
        assert_eq!(file.synth.num_rounds, SynthConfig::default().num_rounds);
        assert_eq!(file.problems.len(), 1);
        assert_eq!(file.problems[0].bitwidths, vec![4]);
        assert_eq!(file.problems[0].concrete_op, ConcreteOp::And);
        assert!(file.problems[0].engine.is_none());
    }

    #[test]
    fn engines_and_helpers_parse() {
        let file = ProblemFile::from_toml_str(
            r#"
            [[problem]]
            name = "add"
            domain = "ConstantRange"
            concrete_op = "add"
            bitwidths = [4, 8]
            engine = { program = "/opt/eval_engine", args = ["--fast"] }
            verifier = { program = "/opt/verify" }
            helper_sources = ["bool op_constraint(const Vec<2> &lhs, const Vec<2> &rhs) { return true; }"]
            "#,
        )
        .unwrap();
        let p = &file.problems[0];
        assert_eq!(p.domain, Domain::ConstantRange);
        assert_eq!(p.engine.as_ref().unwrap().args, vec!["--fast".to_string()]);
        assert!(p.verifier.as_ref().unwrap().args.is_empty());
        let oracle = p.oracle().unwrap();
        assert_eq!(oracle.bitwidths(), &[4, 8]);
    }

    #[test]
    fn invalid_files_are_rejected() {
        assert!(ProblemFile::from_toml_str("[synth]\nseed = 1\n").is_err());
        assert!(ProblemFile::from_toml_str("[synth]\nbogus = 1\n").is_err());
        let too_many_abd = "[synth]\nnum_programs = 2\nnum_abd_procs = 3\n[[problem]]\nname = \"x\"\ndomain = \"KnownBits\"\nconcrete_op = \"or\"\n";
        assert!(ProblemFile::from_toml_str(too_many_abd).is_err());
        let bad_flag = "[synth]\ncmp_flags = [12]\n[[problem]]\nname = \"x\"\ndomain = \"KnownBits\"\nconcrete_op = \"or\"\n";
        assert!(ProblemFile::from_toml_str(bad_flag).is_err());
    }

    #[test]
    fn wide_enumeration_fails_at_binding_time() {
        let p = ProblemSpec {
            name: "wide".to_string(),
            domain: Domain::KnownBits,
            concrete_op: ConcreteOp::Xor,
            bitwidths: vec![16],
            engine: None,
            verifier: None,
            helper_sources: vec![],
        };
        assert!(p.oracle().is_err());
    }

    #[test]
    fn set_params_follow_config() {
        let config = SynthConfig {
            num_unsound_candidates: 3,
            max_verify_width: 6,
            ..SynthConfig::default()
        };
        let params = config.set_params();
        assert_eq!(params.pool_size, 3);
        assert_eq!(params.max_verify_width, 6);
        assert_eq!(params.exhaustive_width_cutoff, 4);
        assert_eq!(config.cmp_predicates().unwrap().len(), 3);
    }
}
