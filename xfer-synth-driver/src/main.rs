// SPDX-License-Identifier: Apache-2.0

//! Transfer-function synthesis driver.
//!
//! Reads a TOML problem file, synthesizes a transfer function for every
//! `[[problem]]` in it on a worker pool, and writes per-problem
//! `iter_{i}.txt` dumps and `solution.cpp` plus a `summary.json` into the
//! output directory.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tempfile::Builder;
use xfer_synth::{Job, ProblemFile, run_jobs};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
struct CliArgs {
    /// Problem file (.toml) with an optional [synth] table and one or more
    /// [[problem]] tables.
    problems: PathBuf,

    /// Random seed; overrides the file's.
    #[clap(short = 'S', long, value_parser)]
    seed: Option<u64>,

    /// Number of iterations; overrides the file's.
    #[clap(long, value_parser)]
    num_iters: Option<usize>,

    /// Rounds per iteration; overrides the file's.
    #[clap(long, value_parser)]
    num_rounds: Option<usize>,

    /// Chains per iteration; overrides the file's.
    #[clap(long, value_parser)]
    num_programs: Option<usize>,

    /// Only run the problem with this name.
    #[clap(long, value_parser)]
    only: Option<String>,

    /// Problems synthesized concurrently.
    #[clap(long, value_parser, default_value_t = num_cpus::get())]
    threads: usize,

    /// Output directory. If not specified, output goes to a new temporary
    /// directory that is left in place.
    #[clap(short, long, value_parser)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = env_logger::try_init();
    let cli = CliArgs::parse();
    log::info!("xfer-synth-driver started with args: {:?}", cli);

    let mut file = ProblemFile::load(&cli.problems)?;
    if let Some(seed) = cli.seed {
        file.synth.seed = seed;
    }
    if let Some(n) = cli.num_iters {
        file.synth.num_iters = n;
    }
    if let Some(n) = cli.num_rounds {
        file.synth.num_rounds = n;
    }
    if let Some(n) = cli.num_programs {
        file.synth.num_programs = n;
    }
    file.synth.validate()?;
    if let Some(only) = &cli.only {
        file.problems.retain(|p| &p.name == only);
        if file.problems.is_empty() {
            bail!("no problem named {} in {}", only, cli.problems.display());
        }
    }

    let output_dir = match &cli.output {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            dir.clone()
        }
        None => {
            let dir = Builder::new().prefix("xfer_synth_output_").tempdir()?.keep();
            println!("No output path specified, using temp dir: {}", dir.display());
            dir
        }
    };

    let jobs: Vec<Job> = file
        .problems
        .iter()
        .map(|problem| Job {
            problem: problem.clone(),
            config: file.synth.clone(),
            output_dir: Some(output_dir.join(&problem.name)),
        })
        .collect();
    let reports = run_jobs(&jobs, Some(cli.threads))?;

    for report in &reports {
        match &report.source {
            Some(source) => {
                let path = output_dir.join(&report.name).join("solution.cpp");
                std::fs::write(&path, source).with_context(|| format!("writing {}", path.display()))?;
                println!(
                    "{}\tlast_solution\t{:.2}%\t{:.2}%\t{:.3}",
                    report.name,
                    report.sound_prop * 100.0,
                    report.exact_prop * 100.0,
                    report.avg_distance
                );
            }
            None => println!(
                "{}\tno solution: {}",
                report.name,
                report.note.as_deref().unwrap_or("-")
            ),
        }
    }

    let summary_path = output_dir.join("summary.json");
    let summary = serde_json::to_string_pretty(&reports)?;
    std::fs::write(&summary_path, summary).with_context(|| format!("writing {}", summary_path.display()))?;
    println!("Wrote {}", summary_path.display());
    Ok(())
}
