use std::path::PathBuf;
use std::process::Command;

use assert_cmd::prelude::{CommandCargoExt, OutputAssertExt};
use predicates::prelude::predicate;

fn asset(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("assets")
        .join(name)
}

#[test]
fn test_that_cli_app_produces_result() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("coastsim-cli")?;
    let cyc_file = asset("two_stops.csv");
    assert!(cyc_file.exists());

    cmd.args(["--cyc-file", cyc_file.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""cycle":"two_stops""#))
        .stdout(predicate::str::contains(r#""coast_allow":false"#))
        .stdout(predicate::str::contains(r#""coast_events":0"#));

    Ok(())
}

#[test]
fn test_that_cli_app_coasts() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("coastsim-cli")?;
    let cyc_file = asset("two_stops.csv");

    cmd.args([
        "--cyc-file",
        cyc_file.to_str().unwrap(),
        "--coast",
        "--coast-brake-speed",
        "7.5",
        "--res-fmt",
        "yaml",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("coast_allow: true"))
        .stdout(predicate::str::contains("coast_events: 1"));

    Ok(())
}

#[test]
fn test_that_cli_app_reads_params_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let params_file = dir.path().join("params.yaml");
    std::fs::write(
        &params_file,
        "coast_allow: true\ncoast_start_speed_m_per_s: 17.0\n",
    )?;

    let mut cmd = Command::cargo_bin("coastsim-cli")?;
    cmd.args([
        "--cyc-file",
        asset("two_stops.csv").to_str().unwrap(),
        "--params-file",
        params_file.to_str().unwrap(),
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""coast_allow":true"#));

    Ok(())
}

#[test]
fn test_that_cli_app_rejects_bad_input() -> Result<(), Box<dyn std::error::Error>> {
    // no cycle given
    Command::cargo_bin("coastsim-cli")?.assert().failure();

    Command::cargo_bin("coastsim-cli")?
        .args(["--cyc-file", "does-not-exist.csv"])
        .assert()
        .failure();

    Command::cargo_bin("coastsim-cli")?
        .args([
            "--cyc-file",
            asset("two_stops.csv").to_str().unwrap(),
            "--coast-brake-accel",
            "1.0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("coast_brake_accel_m_per_s2"));

    Command::cargo_bin("coastsim-cli")?
        .args([
            "--cyc-file",
            asset("two_stops.csv").to_str().unwrap(),
            "--res-fmt",
            "toml",
        ])
        .assert()
        .failure();

    Ok(())
}

#[test]
fn test_that_cli_app_accepts_json_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let cyc = r#"{
        "time_s": {"v": 1, "dim": [4], "data": [0.0, 1.0, 2.0, 3.0]},
        "mps": {"v": 1, "dim": [4], "data": [0.0, 2.0, 2.0, 0.0]},
        "name": "tiny"
    }"#;
    Command::cargo_bin("coastsim-cli")?
        .args(["--cyc", cyc])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""cycle":"tiny""#))
        .stdout(predicate::str::contains(r#""duration_s":3.0"#));

    Ok(())
}
