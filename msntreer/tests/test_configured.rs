use std::fs;

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_configured_run() {
    let dir = tempfile::tempdir().unwrap();
    let msp_path = dir.path().join("library.msp");

    let config = Figment::new()
        .merge(Toml::file_exact("./tests/data/configured.toml"))
        .merge(Serialized::default("output_dir", dir.path()))
        .merge(Serialized::default("msp_file", &msp_path));
    let driver: msntreer::MsnTreer = config.extract().unwrap();
    assert_eq!(driver.ppm, 10.0);
    assert!(driver.no_ms1);

    let summary = driver.main().unwrap();
    assert_eq!(summary.trees, 2);
    assert_eq!(summary.groups, 3);
    assert_eq!(summary.merged_peak_lists, 2);
    assert_eq!(summary.ms1_precursors, 0);

    assert!(dir.path().join("configured_non_merged_pls.json").exists());
    assert!(dir.path().join("configured_merged_pls.json").exists());
    assert!(!dir.path().join("configured_ms1_precursors_pl.json").exists());

    let text = fs::read_to_string(&msp_path).unwrap();
    assert_eq!(text.matches("NAME: ").count(), 3);
    assert!(text.contains("POLARITY: negative\n"));
    assert!(text.contains("MS_LEVEL: 3\n"));
}

#[test]
fn test_missing_config_file() {
    let driver = msntreer::MsnTreer {
        config_file: Some("./tests/data/not_a_config.toml".into()),
        ..Figment::new()
            .merge(Toml::file_exact("./tests/data/configured.toml"))
            .extract()
            .unwrap()
    };
    assert!(matches!(
        driver.configure(),
        Err(msntreer::MsnTreerError::ConfigError(_))
    ));
}
