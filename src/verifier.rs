// SPDX-License-Identifier: Apache-2.0

//! The soundness verifier seam, with an exhaustive in-process verifier and
//! an external-process one.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow};

use crate::domain::Domain;
use crate::error::OracleProtocolError;
use crate::eval::Candidate;
use crate::interp::{ConcreteOp, Interpreter};
use crate::lower::SourceLowering;
use crate::oracle::enumerative::{MAX_ENUMERATION_WIDTH, run_candidate};

pub trait Verifier: Sync {
    /// Whether `candidate` is sound for every input at `bitwidth`.
    fn verify(&self, candidate: &Candidate, bitwidth: u32) -> Result<bool>;
}

/// Verifies at widths `1..=max_width` in increasing order and returns the
/// first width where `candidate` is unsound, or 0 if it is sound at all of
/// them.
pub fn verify_up_to(verifier: &dyn Verifier, candidate: &Candidate, max_width: u32) -> Result<u32> {
    for width in 1..=max_width {
        if !verifier.verify(candidate, width)? {
            return Ok(width);
        }
    }
    Ok(0)
}

/// Checks every abstract input pair and every concrete pair they stand for.
pub struct ExhaustiveVerifier {
    domain: Domain,
    op: ConcreteOp,
}

impl ExhaustiveVerifier {
    pub fn new(domain: Domain, op: ConcreteOp) -> Self {
        ExhaustiveVerifier { domain, op }
    }
}

impl Verifier for ExhaustiveVerifier {
    fn verify(&self, candidate: &Candidate, bitwidth: u32) -> Result<bool> {
        if !(1..=MAX_ENUMERATION_WIDTH).contains(&bitwidth) {
            return Err(anyhow!(
                "exhaustive verification supports widths 1..={}, got {}",
                MAX_ENUMERATION_WIDTH,
                bitwidth
            ));
        }
        let domain = self.domain;
        let values = domain.enumerate(bitwidth);
        let concrete: Vec<Vec<u64>> = values.iter().map(|v| domain.concretize(v, bitwidth)).collect();
        let mut interp = Interpreter::new(bitwidth);
        for (i, lhs) in values.iter().enumerate() {
            for (j, rhs) in values.iter().enumerate() {
                let out = run_candidate(domain, &mut interp, candidate, &[*lhs, *rhs]);
                for x in &concrete[i] {
                    for y in &concrete[j] {
                        if let Some(z) = self.op.apply(*x, *y, bitwidth) {
                            if !domain.contains(&out, z) {
                                log::trace!(
                                    "{} unsound at width {}: {} {} {} = {} not in {}",
                                    candidate.name(),
                                    bitwidth,
                                    x,
                                    self.op.name(),
                                    y,
                                    z,
                                    domain.format_value(&out, bitwidth)
                                );
                                return Ok(false);
                            }
                        }
                    }
                }
            }
        }
        Ok(true)
    }
}

/// Delegates to an external verifier.
///
/// Request (stdin): domain, bit-width, body name, guard name or `-`, then
/// the concrete op, helper and lowered sources. The first non-empty stdout
/// line is `sound` or `unsound`.
pub struct ProcessVerifier<L: SourceLowering> {
    program: PathBuf,
    args: Vec<String>,
    domain: Domain,
    concrete_source: String,
    helper_sources: Vec<String>,
    lowering: L,
}

impl<L: SourceLowering> ProcessVerifier<L> {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        domain: Domain,
        concrete_source: String,
        helper_sources: Vec<String>,
        lowering: L,
    ) -> Self {
        ProcessVerifier {
            program,
            args,
            domain,
            concrete_source,
            helper_sources,
            lowering,
        }
    }

    pub fn build_request(&self, candidate: &Candidate, bitwidth: u32) -> String {
        let mut req = format!(
            "{}\n{}\n{}\n{}\n",
            self.domain.name(),
            bitwidth,
            candidate.body.name,
            candidate.guard.as_ref().map(|g| g.name.as_str()).unwrap_or("-")
        );
        req.push_str(&self.concrete_source);
        req.push('\n');
        for helper in &self.helper_sources {
            req.push_str(helper);
            req.push('\n');
        }
        req.push_str(self.domain.helper_source());
        req.push('\n');
        req.push_str(&self.lowering.lower(&candidate.body));
        if let Some(guard) = &candidate.guard {
            req.push('\n');
            req.push_str(&self.lowering.lower(guard));
        }
        req
    }
}

/// Reads the verdict from the verifier's stdout.
pub fn parse_verdict(stdout: &str, stderr: &str) -> Result<bool> {
    match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some("sound") => Ok(true),
        Some("unsound") => Ok(false),
        other => Err(anyhow::Error::new(OracleProtocolError {
            message: format!("expected `sound` or `unsound`, got {:?}", other),
            stderr: stderr.to_string(),
        })),
    }
}

impl<L: SourceLowering> Verifier for ProcessVerifier<L> {
    fn verify(&self, candidate: &Candidate, bitwidth: u32) -> Result<bool> {
        let request = self.build_request(candidate, bitwidth);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning verifier {}", self.program.display()))?;
        child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("verifier stdin unavailable"))?
            .write_all(request.as_bytes())
            .context("writing verifier request")?;
        let output = child.wait_with_output().context("waiting for verifier")?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(anyhow!(
                "verifier {} exited with {}:\n{}",
                self.program.display(),
                output.status,
                stderr
            ));
        }
        parse_verdict(&String::from_utf8_lossy(&output.stdout), &stderr)
    }
}
