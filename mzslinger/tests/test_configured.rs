use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use figment::{
    providers::{Format, Toml},
    Figment,
};

use mzslinger::{AlignmentMethod, MZSlinger, MZSlingerError, TimeRange};

const CONFIG: &str = r#"
inputs = ["missing_a.mzML", "missing_b.mzML"]
ppm = 10.0
alignment = "incremental"
min_support = 1
noise_floor = 50.0

[time_range]
start = 1.5
end = 12.0
"#;

fn config_file() -> tempfile::NamedTempFile {
    let mut handle = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    handle.write_all(CONFIG.as_bytes()).unwrap();
    handle.flush().unwrap();
    handle
}

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_extract_config() {
    let handle = config_file();
    let config = Figment::new().merge(Toml::file_exact(handle.path()));
    let driver: MZSlinger = config.extract().unwrap();

    assert_eq!(driver.inputs.len(), 2);
    assert_eq!(driver.ppm, 10.0);
    assert_eq!(driver.alignment, AlignmentMethod::Incremental);
    assert_eq!(driver.min_support, Some(1));
    assert_eq!(driver.time_range, Some(TimeRange::new(1.5, 12.0)));
    // Unset keys keep their defaults
    assert_eq!(driver.max_charge, 3);
    assert_eq!(driver.output_file, PathBuf::from("-"));

    let params = driver.sample_params();
    assert_eq!(params.trace.ppm, 10.0);
    assert_eq!(params.envelope.ppm, 10.0);

    assert!(matches!(driver.main(), Err(MZSlingerError::NoSamples)));
}

#[test_log::test]
fn test_config_file_overrides_arguments() {
    let handle = config_file();
    let args = MZSlinger::parse_from([
        "mzslinger",
        "cli.mzML",
        "--max-charge",
        "5",
        "--config-file",
        handle.path().to_str().unwrap(),
    ]);
    assert_eq!(args.ppm, 20.0);
    let driver = args.configure().unwrap();
    assert_eq!(driver.ppm, 10.0);
    assert_eq!(driver.max_charge, 5);
    assert_eq!(driver.inputs[0], PathBuf::from("missing_a.mzML"));
}
