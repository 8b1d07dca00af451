use proptest::prelude::*;
use sinkproof_config::{
    ConfigFormat, SinkproofConfig, load_config, parse_config, render_config, save_config,
};
use sinkproof_engine::{ExitPolicy, Grade};
use sinkproof_logging::LogFormat;
use std::fs;
use tempfile::TempDir;

#[test]
fn partial_yaml_keeps_defaults() {
    let yaml = r#"
poll:
  timeout_ms: 5000
run:
  grades: [must]
suite:
  policy: strict
logging:
  format: compact
flags:
  authentication_oidc: true
  transport_encryption: strict
"#;
    let config = parse_config(yaml, ConfigFormat::Yaml).unwrap();
    assert_eq!(config.poll.timeout_ms, 5000);
    assert_eq!(config.poll.interval_ms, 500);
    assert_eq!(config.run.grades.iter().copied().collect::<Vec<_>>(), [Grade::Must]);
    assert_eq!(config.run.maturities.len(), 3);
    assert_eq!(config.suite.policy, ExitPolicy::Strict);
    assert_eq!(config.suite.concurrency, 4);
    assert_eq!(config.logging.format, LogFormat::Compact);
    assert!(config.flags.is_oidc_enabled());
    assert!(config.flags.is_transport_encryption_strict());
}

#[test]
fn empty_files_are_default() {
    assert_eq!(
        parse_config("", ConfigFormat::Yaml).unwrap(),
        SinkproofConfig::default()
    );
    assert_eq!(
        parse_config("{}", ConfigFormat::Json).unwrap(),
        SinkproofConfig::default()
    );
}

#[test]
fn load_save_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sinkproof.yaml");
    let mut config = SinkproofConfig::default();
    config.identity.issuer = "https://issuer.example".into();
    config.suite.concurrency = 2;

    save_config(&config, &path).unwrap();
    assert!(fs::read_to_string(&path).unwrap().contains("issuer.example"));
    assert_eq!(load_config(&path).unwrap(), config);
}

#[test]
fn load_save_json_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sinkproof.json");
    let config = SinkproofConfig::default();

    save_config(&config, &path).unwrap();
    assert!(fs::read_to_string(&path).unwrap().trim_start().starts_with('{'));
    assert_eq!(load_config(&path).unwrap(), config);
}

#[test]
fn malformed_file_names_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.json"));
    assert!(format!("{err:#}").contains("failed to parse JSON config"));
}

#[test]
fn missing_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    assert!(load_config(temp_dir.path().join("absent.yaml")).is_err());
}

#[test]
fn rendered_yaml_mentions_every_section() {
    let yaml = render_config(&SinkproofConfig::default(), ConfigFormat::Yaml).unwrap();
    for section in ["poll:", "identity:", "run:", "suite:", "logging:", "flags:"] {
        assert!(yaml.contains(section), "missing {section} in {yaml}");
    }
}

proptest! {
    #[test]
    fn poll_settings_survive_yaml(interval in 1u64..10_000, timeout in 0u64..600_000) {
        let mut config = SinkproofConfig::default();
        config.poll.interval_ms = interval;
        config.poll.timeout_ms = timeout;
        let yaml = render_config(&config, ConfigFormat::Yaml).unwrap();
        let back = parse_config(&yaml, ConfigFormat::Yaml).unwrap();
        prop_assert_eq!(back.poll, config.poll);
    }
}
