// SPDX-License-Identifier: Apache-2.0

//! Runs independent synthesis problems on a worker pool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{ProblemSpec, SynthConfig};
use crate::lower::CppLowering;
use crate::synth::{SynthesisOutcome, synthesize_transfer_function};

#[derive(Debug, Clone)]
pub struct Job {
    pub problem: ProblemSpec,
    pub config: SynthConfig,
    /// Per-iteration dumps go here when set.
    pub output_dir: Option<PathBuf>,
}

/// What one job produced. Metrics are NaN when there is no solution.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub solved: bool,
    pub perfect: bool,
    pub iterations: usize,
    pub members: usize,
    pub sound_prop: f64,
    pub exact_prop: f64,
    pub avg_distance: f64,
    #[serde(skip)]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl JobReport {
    fn unsolved(name: &str, iterations: usize, note: Option<String>) -> Self {
        JobReport {
            name: name.to_string(),
            solved: false,
            perfect: false,
            iterations,
            members: 0,
            sound_prop: f64::NAN,
            exact_prop: f64::NAN,
            avg_distance: f64::NAN,
            source: None,
            note,
        }
    }
}

pub fn run_job(job: &Job) -> Result<JobReport> {
    let name = &job.problem.name;
    let oracle = job.problem.oracle()?;
    let verifier = job.problem.verifier();
    if let Some(dir) = &job.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    log::info!(
        "[xfer-synth] {}: {} over {} at widths {:?}",
        name,
        job.problem.concrete_op.name(),
        job.problem.domain,
        job.problem.bitwidths
    );
    let outcome = synthesize_transfer_function(
        name,
        &job.config,
        oracle.as_ref(),
        verifier.as_ref(),
        &CppLowering,
        job.output_dir.as_deref(),
    )?;
    Ok(match outcome {
        SynthesisOutcome::NoSolution { iterations } => {
            JobReport::unsolved(name, iterations, Some("no solution found".to_string()))
        }
        SynthesisOutcome::Solved {
            source,
            result,
            iterations,
            members,
            perfect,
        } => JobReport {
            name: name.clone(),
            solved: true,
            perfect,
            iterations,
            members: members.len(),
            sound_prop: result.sound_prop(),
            exact_prop: result.exact_prop(),
            avg_distance: result.avg_distance(),
            source: Some(source),
            note: None,
        },
    })
}

/// Runs every job on a pool of `threads` workers (all cores when `None`).
/// A failing job yields a report carrying the error instead of aborting the
/// others. Reports come back in job order.
pub fn run_jobs(jobs: &[Job], threads: Option<usize>) -> Result<Vec<JobReport>> {
    let threads = threads.unwrap_or_else(num_cpus::get).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("building worker pool")?;
    log::info!("[xfer-synth] running {} job(s) on {} thread(s)", jobs.len(), threads);
    Ok(pool.install(|| {
        jobs.par_iter()
            .map(|job| match run_job(job) {
                Ok(report) => report,
                Err(e) => {
                    log::error!("[xfer-synth] {} failed: {:#}", job.problem.name, e);
                    JobReport::unsolved(&job.problem.name, 0, Some(format!("{:#}", e)))
                }
            })
            .collect()
    }))
}
