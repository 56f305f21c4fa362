// Binary tests for `ggrid`: exit codes, the --json stdout contract, and
// written outputs.
//
// Run with: cargo test -p givegrid-cli --test cli_tests -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn ggrid() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ggrid"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../resolve/tests/fixtures/basic")
}

fn fixture_config() -> String {
    fixtures_dir().join("run.toml").to_string_lossy().into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Assert stdout is a single, parseable JSON value.
fn assert_single_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    assert!(!trimmed.is_empty(), "stdout should not be empty");
    serde_json::from_str(trimmed)
        .unwrap_or_else(|e| panic!("stdout must be valid JSON.\nParse error: {e}\nstdout:\n{trimmed}"))
}

/// Copy the fixture CSVs into `dir` next to a config built from `toml`.
fn write_config(dir: &Path, toml: &str) -> PathBuf {
    for file in ["donors.csv", "donations.csv", "tax_units.csv", "distributions.csv"] {
        std::fs::copy(fixtures_dir().join(file), dir.join(file)).unwrap();
    }
    let path = dir.join("run.toml");
    std::fs::write(&path, toml).unwrap();
    path
}

// ===========================================================================
// ggrid run
// ===========================================================================

#[test]
fn run_json_to_stdout() {
    let output = ggrid()
        .args(["run", &fixture_config(), "--json"])
        .output()
        .expect("ggrid run --json");

    assert!(output.status.success(), "exit code: {:?}\nstderr: {}", output.status, stderr(&output));

    let val = assert_single_json(&output);
    assert_eq!(val["meta"]["run_name"], "basic");
    assert_eq!(val["summary"]["donors"], 5);
    assert_eq!(val["summary"]["merged_by_name"], 2);
    assert_eq!(val["summary"]["merged_by_ssn"], 1);
    assert_eq!(val["donor_map"][2]["old_donor_id"], 3);
    assert_eq!(val["donor_map"][2]["key"], "ssn");
    assert!(stderr(&output).contains("5 donors") || stderr(&output).contains("→ 5"));
}

#[test]
fn run_writes_corrected_tables() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let json = dir.path().join("result.json");

    let output = ggrid()
        .args(["run", &fixture_config()])
        .arg("--output-dir")
        .arg(&out)
        .arg("--output")
        .arg(&json)
        .output()
        .expect("ggrid run");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty(), "nothing on stdout without --json");

    let donors = std::fs::read_to_string(out.join("donors.csv")).unwrap();
    assert_eq!(donors.lines().count(), 6);
    assert!(donors.starts_with("donor_id,date_registered,"));

    let donor_map = std::fs::read_to_string(out.join("donor_map.csv")).unwrap();
    assert_eq!(donor_map, "old_donor_id,new_donor_id,key\n1,2,name\n5,6,name\n3,4,ssn\n");

    let donations = std::fs::read_to_string(out.join("donations.csv")).unwrap();
    assert!(donations.contains("108,7,2026-06-20 08:00:00,500.00,3,K7,true"));

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(value["summary"]["recurring"], 2);
}

#[test]
fn reference_flag_overrides_config() {
    let output = ggrid()
        .args(["run", &fixture_config(), "--json", "--reference", "2026-12-31"])
        .output()
        .expect("ggrid run --reference");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let val = assert_single_json(&output);
    assert_eq!(val["meta"]["reference_instant"], "2026-12-31 00:00:00");
    assert_eq!(val["summary"]["recurring"], 0);
}

#[test]
fn output_paths_from_config_are_relative_to_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
name = "relative"
reference_instant = "2026-06-30T12:00:00"

[source]
kind = "csv"
donors = "donors.csv"
donations = "donations.csv"
tax_units = "tax_units.csv"
distributions = "distributions.csv"

[output]
dir = "out"
json = "out/result.json"
"#,
    );

    let output = ggrid().arg("run").arg(&config).output().expect("ggrid run");
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(dir.path().join("out/tax_units.csv").exists());
    assert!(dir.path().join("out/result.json").exists());
}

// ===========================================================================
// Exit codes
// ===========================================================================

#[test]
fn missing_config_is_usage_error() {
    let output = ggrid()
        .args(["run", "does-not-exist.toml"])
        .output()
        .expect("ggrid run");
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("cannot read config"));
}

#[test]
fn invalid_config_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
name = "bad"

[source]
kind = "csv"
donors = "donors.csv"
donations = "donations.csv"
tax_units = "tax_units.csv"

[recurring]
agreement_payment_ids = []
"#,
    );
    let output = ggrid().arg("validate").arg(&config).output().expect("ggrid validate");
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
}

#[test]
fn missing_column_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
name = "broken"
reference_instant = "2026-06-30T12:00:00"

[source]
kind = "csv"
donors = "donors.csv"
donations = "donations.csv"
tax_units = "tax_units.csv"
"#,
    );
    let donations = std::fs::read_to_string(dir.path().join("donations.csv"))
        .unwrap()
        .replace("sum_confirmed", "amount");
    std::fs::write(dir.path().join("donations.csv"), donations).unwrap();

    let out = dir.path().join("out");
    let output = ggrid()
        .arg("run")
        .arg(&config)
        .arg("--output-dir")
        .arg(&out)
        .output()
        .expect("ggrid run");
    assert_eq!(output.status.code(), Some(4), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("sum_confirmed"));
    assert!(!out.exists(), "no output after a failed run");
}

#[test]
fn missing_source_file_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("run.toml");
    std::fs::write(
        &config,
        r#"
name = "nofiles"
[source]
kind = "csv"
donors = "donors.csv"
donations = "donations.csv"
tax_units = "tax_units.csv"
"#,
    )
    .unwrap();
    let output = ggrid().arg("run").arg(&config).output().expect("ggrid run");
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn bad_reference_is_usage_error() {
    let output = ggrid()
        .args(["run", &fixture_config(), "--reference", "tomorrow"])
        .output()
        .expect("ggrid run");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn validate_ok() {
    let output = ggrid()
        .args(["validate", &fixture_config()])
        .output()
        .expect("ggrid validate");
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("valid: \"basic\""));
}

// ===========================================================================
// ggrid classify
// ===========================================================================

#[test]
fn classify_follows_merged_ids() {
    let output = ggrid()
        .args([
            "classify",
            &fixture_config(),
            "--at",
            "2026-06-30 12:00:00",
            "--donor",
            "9",
            "--donor",
            "7",
            "--donor",
            "1",
            "--json",
        ])
        .output()
        .expect("ggrid classify");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let val = assert_single_json(&output);
    let donors = val["donors"].as_array().unwrap();
    assert_eq!(donors.len(), 3);
    assert_eq!(donors[0]["is_recurring"], true);
    assert_eq!(donors[0]["has_agreement"], false);
    assert_eq!(donors[1]["has_agreement"], true);
    assert_eq!(donors[2]["donor_id"], 1);
    assert_eq!(donors[2]["resolved_donor_id"], 2);
    assert_eq!(donors[2]["is_recurring"], false);
    assert_eq!(val["recurring"], 2);
}

#[test]
fn classify_historical_instant() {
    let output = ggrid()
        .args(["classify", &fixture_config(), "--at", "2026-05-26", "--json"])
        .output()
        .expect("ggrid classify");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let val = assert_single_json(&output);
    assert_eq!(val["reference_instant"], "2026-05-26 00:00:00");
    let recurring: Vec<i64> = val["donors"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|d| d["is_recurring"] == true)
        .map(|d| d["donor_id"].as_i64().unwrap())
        .collect();
    assert_eq!(recurring, vec![9]);
}

#[test]
fn classify_unknown_donor() {
    let output = ggrid()
        .args(["classify", &fixture_config(), "--at", "2026-06-30", "--donor", "8"])
        .output()
        .expect("ggrid classify");
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("donor 8"));
}
