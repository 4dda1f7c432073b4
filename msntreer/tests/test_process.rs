use std::{error::Error, fs, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("msntreer")?;

    cmd.arg("not_real.json");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));
    Ok(())
}

#[test]
fn test_unknown_format() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("msntreer")?;

    cmd.arg("./tests/data/example_trees.json").args(["-f", "xml"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'xml'"));

    let mut cmd = Command::cargo_bin("msntreer")?;
    cmd.arg("./tests/data/example_trees.txt");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("InvalidFormat"));
    Ok(())
}

#[test]
fn test_run_conversion() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let msp_path = dir.path().join("library.txt");
    let gml_path = dir.path().join("trees.gml.gz");

    let mut cmd = Command::cargo_bin("msntreer")?;
    cmd.env("RUST_LOG", "info").env("NO_COLOR", "1");
    cmd.arg("./tests/data/example_trees.json")
        .arg("-o")
        .arg(dir.path())
        .args(["-n", "example"])
        .arg("--msp")
        .arg(&msp_path)
        .arg("--save-trees")
        .arg(&gml_path);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Trees: 2"))
        .stderr(predicate::str::contains("Peak Lists: 3 | Skipped Groups: 2"))
        .stderr(predicate::str::contains(
            "Merged Peak Lists: 2 | MS1 Precursors: 3",
        ));

    for stage in ["non_merged_pls", "merged_pls", "ms1_precursors_pl"] {
        assert!(dir.path().join(format!("example_{stage}.json")).exists());
    }
    let text = fs::read_to_string(&msp_path)?;
    assert_eq!(text.matches("RECORD_TITLE: ").count(), 3);
    assert!(fs::metadata(&gml_path)?.len() > 0);

    let merged_msp = dir.path().join("merged.txt");
    let mut cmd = Command::cargo_bin("msntreer")?;
    cmd.arg("./tests/data/example_trees.json")
        .arg("--msp")
        .arg(&merged_msp)
        .args(["--msp-source", "merged"]);
    cmd.assert().success();
    let text = fs::read_to_string(&merged_msp)?;
    assert_eq!(text.matches("RECORD_TITLE: ").count(), 2);
    assert!(text.contains("<#>"));

    let mut cmd = Command::cargo_bin("msntreer")?;
    cmd.env("RUST_LOG", "info").env("NO_COLOR", "1");
    cmd.arg(&gml_path).arg("--no-merge").arg("--no-ms1");
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Merged Peak Lists: 0 | MS1 Precursors: 0"));
    Ok(())
}
