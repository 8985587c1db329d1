// SPDX-License-Identifier: Apache-2.0

//! An oracle backed by an external evaluation engine process.
//!
//! Request (stdin), one item per line:
//!
//! ```text
//! <domain>
//! <bit-width> <bit-width> ...
//! <candidate name> <candidate name> ...
//! <reference name> <reference name> ...
//! using A::APInt;
//! <concrete op source, helper sources, lowered functions>
//! ```
//!
//! Response (stdout): for every requested width, in order, ten labeled
//! lists (`sound:` followed by `[3, 4, ]` on the next line, and so on), each
//! with one entry per candidate.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow};

use crate::domain::Domain;
use crate::error::OracleProtocolError;
use crate::eval::{Candidate, EvalResult, WidthResult};
use crate::lower::{CppLowering, SourceLowering};
use crate::oracle::Oracle;

/// Output labels in the order the engine prints them.
pub const OUTPUT_LABELS: [&str; 10] = [
    "sound",
    "precise",
    "exact",
    "num_cases",
    "unsolved_sound",
    "unsolved_precise",
    "unsolved_exact",
    "unsolved_num_cases",
    "base_precise",
    "sound_distance",
];

pub struct ProcessOracle<L: SourceLowering = CppLowering> {
    program: PathBuf,
    args: Vec<String>,
    domain: Domain,
    widths: Vec<u32>,
    /// Source of the concrete operation, including its precondition.
    concrete_source: String,
    helper_sources: Vec<String>,
    lowering: L,
}

impl<L: SourceLowering> ProcessOracle<L> {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        domain: Domain,
        widths: &[u32],
        concrete_source: String,
        helper_sources: Vec<String>,
        lowering: L,
    ) -> Self {
        ProcessOracle {
            program,
            args,
            domain,
            widths: widths.to_vec(),
            concrete_source,
            helper_sources,
            lowering,
        }
    }

    /// Lowers `candidate` under `name`: its body, its guard and a guarded
    /// wrapper when it has one.
    fn lower_candidate(&self, name: &str, candidate: &Candidate, out: &mut String) {
        match &candidate.guard {
            None => {
                let mut body = candidate.body.clone();
                body.name = name.to_string();
                out.push_str(&self.lowering.lower(&body));
            }
            Some(guard) => {
                let mut body = candidate.body.clone();
                body.name = format!("{}_body", name);
                let mut cond = guard.clone();
                cond.name = format!("{}_cond", name);
                out.push_str(&self.lowering.lower(&body));
                out.push('\n');
                out.push_str(&self.lowering.lower(&cond));
                out.push('\n');
                out.push_str(&self.lowering.lower_guarded(name, &body.name, &cond.name));
            }
        }
        out.push('\n');
    }

    pub fn build_request(&self, candidates: &[Candidate], references: &[Candidate]) -> String {
        let cand_names: Vec<String> = (0..candidates.len()).map(|i| format!("cand_{}", i)).collect();
        let ref_names: Vec<String> = (0..references.len()).map(|i| format!("ref_{}", i)).collect();
        let widths: Vec<String> = self.widths.iter().map(|w| w.to_string()).collect();
        let mut req = String::new();
        req.push_str(&format!("{}\n", self.domain.name()));
        req.push_str(&format!("{}\n", widths.join(" ")));
        req.push_str(&format!("{}\n", cand_names.join(" ")));
        req.push_str(&format!("{}\n", ref_names.join(" ")));
        req.push_str("using A::APInt;\n");
        req.push_str(&self.concrete_source);
        req.push('\n');
        for helper in &self.helper_sources {
            req.push_str(helper);
            req.push('\n');
        }
        req.push_str(self.domain.helper_source());
        req.push('\n');
        for (name, c) in cand_names.iter().zip(candidates) {
            self.lower_candidate(name, c, &mut req);
        }
        for (name, r) in ref_names.iter().zip(references) {
            self.lower_candidate(name, r, &mut req);
        }
        req
    }
}

fn protocol_error(message: String, stderr: &str) -> anyhow::Error {
    anyhow::Error::new(OracleProtocolError {
        message,
        stderr: stderr.to_string(),
    })
}

fn parse_list(line: &str) -> Option<Vec<u64>> {
    let inner = line.trim().strip_prefix('[')?.strip_suffix(']')?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.round() as u64)
            })
        })
        .collect()
}

/// Parses the engine's stdout into one result per candidate.
pub fn parse_output(stdout: &str, stderr: &str, widths: &[u32], num_candidates: usize) -> Result<Vec<EvalResult>> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let mut per_candidate: Vec<Vec<WidthResult>> = vec![Vec::new(); num_candidates];
    for width in widths {
        let mut lists: Vec<Vec<u64>> = Vec::with_capacity(OUTPUT_LABELS.len());
        for label in OUTPUT_LABELS {
            let got = lines
                .next()
                .ok_or_else(|| protocol_error(format!("missing `{}` for width {}", label, width), stderr))?;
            if got.trim_end_matches(':') != label {
                return Err(protocol_error(
                    format!("expected label `{}` for width {}, got `{}`", label, width, got),
                    stderr,
                ));
            }
            let list_line = lines
                .next()
                .ok_or_else(|| protocol_error(format!("missing list after `{}`", label), stderr))?;
            let list = parse_list(list_line)
                .ok_or_else(|| protocol_error(format!("malformed list after `{}`: `{}`", label, list_line), stderr))?;
            if list.len() != num_candidates {
                return Err(protocol_error(
                    format!(
                        "`{}` has {} entries for width {}, expected {}",
                        label,
                        list.len(),
                        width,
                        num_candidates
                    ),
                    stderr,
                ));
            }
            lists.push(list);
        }
        for (i, slot) in per_candidate.iter_mut().enumerate() {
            slot.push(WidthResult {
                bitwidth: *width,
                sound_cases: lists[0][i],
                distance: lists[1][i],
                exact_cases: lists[2][i],
                all_cases: lists[3][i],
                unsolved_sound_cases: lists[4][i],
                unsolved_distance: lists[5][i],
                unsolved_exact_cases: lists[6][i],
                unsolved_cases: lists[7][i],
                reference_distance: lists[8][i],
                sound_distance: lists[9][i],
            });
        }
    }
    Ok(per_candidate.into_iter().map(EvalResult::new).collect())
}

impl<L: SourceLowering> Oracle for ProcessOracle<L> {
    fn evaluate(&self, candidates: &[Candidate], references: &[Candidate]) -> Result<Vec<EvalResult>> {
        let request = self.build_request(candidates, references);
        log::trace!("oracle request:\n{}", request);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning evaluation engine {}", self.program.display()))?;
        child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("evaluation engine stdin unavailable"))?
            .write_all(request.as_bytes())
            .context("writing oracle request")?;
        let output = child.wait_with_output().context("waiting for evaluation engine")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(anyhow!(
                "evaluation engine {} exited with {}:\n{}",
                self.program.display(),
                output.status,
                stderr
            ));
        }
        parse_output(&stdout, &stderr, &self.widths, candidates.len())
    }

    fn domain(&self) -> Domain {
        self.domain
    }

    fn bitwidths(&self) -> &[u32] {
        &self.widths
    }
}
