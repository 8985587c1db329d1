// SPDX-License-Identifier: Apache-2.0

use std::process::Command;

use pretty_assertions::assert_eq;

const PROBLEMS: &str = r#"
[synth]
seed = 3
num_iters = 1
num_rounds = 10
num_programs = 4
num_abd_procs = 0
program_length = 4
full_int_ops = false

[[problem]]
name = "or"
domain = "KnownBits"
concrete_op = "or"
bitwidths = [2]

[[problem]]
name = "add"
domain = "ConstantRange"
concrete_op = "add"
bitwidths = [2]
"#;

#[test]
fn driver_writes_summary_and_dumps() {
    let driver = env!("CARGO_BIN_EXE_xfer-synth-driver");
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let problems_path = temp_dir.path().join("problems.toml");
    let out_dir = temp_dir.path().join("out");
    std::fs::write(&problems_path, PROBLEMS).expect("write problems");

    let output = Command::new(driver)
        .arg(problems_path.as_os_str())
        .arg("--threads")
        .arg("2")
        .arg("--output")
        .arg(out_dir.as_os_str())
        .output()
        .expect("run driver");
    assert!(
        output.status.success(),
        "driver failed:\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let summary_text = std::fs::read_to_string(out_dir.join("summary.json")).expect("read summary");
    let summary: serde_json::Value = serde_json::from_str(&summary_text).expect("parse summary");
    let names: Vec<&str> = summary
        .as_array()
        .expect("summary is a list")
        .iter()
        .map(|r| r["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["or", "add"]);
    for report in summary.as_array().unwrap() {
        let name = report["name"].as_str().unwrap();
        assert!(out_dir.join(name).join("iter_0.txt").exists());
        if report["solved"].as_bool().unwrap() {
            let source = std::fs::read_to_string(out_dir.join(name).join("solution.cpp")).unwrap();
            assert!(source.contains("Vec<2> solution("));
        }
    }
}

#[test]
fn driver_rejects_unknown_problem() {
    let driver = env!("CARGO_BIN_EXE_xfer-synth-driver");
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let problems_path = temp_dir.path().join("problems.toml");
    std::fs::write(&problems_path, PROBLEMS).expect("write problems");

    let output = Command::new(driver)
        .arg(problems_path.as_os_str())
        .arg("--only")
        .arg("mul")
        .arg("--output")
        .arg(temp_dir.path().join("out").as_os_str())
        .output()
        .expect("run driver");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no problem named mul"));
}
