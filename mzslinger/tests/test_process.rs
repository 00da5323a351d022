use std::{error::Error, io::Write, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzslinger")?;

    cmd.arg("not_real.mzML").arg("-o").arg("-");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read not_real.mzML"))
        .stderr(predicate::str::contains("No input file could be processed"));
    Ok(())
}

#[test]
fn test_inputs_required() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzslinger")?;
    cmd.args(["-o", "-"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("required"));
    Ok(())
}

#[test]
fn test_malformed_time_range() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzslinger")?;

    cmd.arg("not_real.mzML").args(["-r", "10-z"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse time range end invalid float literal",
    ));

    let mut cmd = Command::cargo_bin("mzslinger")?;

    cmd.arg("not_real.mzML").args(["-r", "x-10"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse time range start invalid float literal",
    ));

    Ok(())
}

#[test]
fn test_malformed_adducts() -> Result<(), Box<dyn Error>> {
    let mut adducts = tempfile::NamedTempFile::new()?;
    writeln!(adducts, "result_mz,ion_name,formula,compound_name,charge")?;
    writeln!(adducts, "not-a-number,[M+H]+,C6H12O6,glucose,1")?;
    adducts.flush()?;

    let mut cmd = Command::cargo_bin("mzslinger")?;
    cmd.arg("not_real.mzML")
        .arg("--adducts")
        .arg(adducts.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read or write CSV"));
    Ok(())
}
