use super::*;
use std::collections::HashMap;
use std::io::Write;

#[test]
fn test_defaults_match_documented_surface() {
    let config = Config::new();

    assert!(config.collector.enabled);
    assert_eq!(config.collector.base_url, "http://localhost:3001");
    assert_eq!(config.collector.timeout, Duration::from_secs(10));
    assert_eq!(config.hub.host, "localhost");
    assert_eq!(config.hub.port, 8765);
    assert_eq!(config.device.tags, vec![CURRENT_TAG, LEGACY_TAG]);
    assert_eq!(config.capture.short_page_grace, Duration::from_millis(500));
    assert_eq!(config.capture.min_content_chars, 100);
    assert!(!config.capture.unmarked_as_document);
    assert_eq!(config.delivery.queue_capacity, 32);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let toml_str = r#"
[collector]
base_url = "http://10.0.2.2:4000"
timeout = "5s"

[capture]
short_page_grace = "250ms"
"#;

    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.collector.base_url, "http://10.0.2.2:4000");
    assert_eq!(config.collector.timeout, Duration::from_secs(5));
    assert!(config.collector.enabled);
    assert_eq!(config.capture.short_page_grace, Duration::from_millis(250));
    assert_eq!(config.capture.min_content_chars, 100);
    assert_eq!(config.hub, HubConfig::default());
}

#[test]
fn test_load_reads_file_and_validates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[device]
tags = ["OptimizedCarrefour"]
discovery_interval = "0s"

[delivery]
queue_capacity = 4
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.device.tags, vec!["OptimizedCarrefour"]);
    assert_eq!(config.device.discovery_interval, Duration::ZERO);
    assert_eq!(config.delivery.queue_capacity, 4);
}

#[test]
fn test_load_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.hub.port, 8765);
}

#[test]
fn test_load_rejects_malformed_toml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[collector\nbase_url = 3").unwrap();

    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::Toml(_)));
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("PAGECAST_COLLECTOR_URL", "http://collector:9000"),
        ("PAGECAST_HUB_HOST", "0.0.0.0"),
        ("PAGECAST_HUB_PORT", "9876"),
        ("PAGECAST_TAGS", "OptimizedCarrefour, ,CrossAppTracking"),
        ("PAGECAST_LOG_LEVEL", "debug"),
    ]);

    let mut config = Config::new();
    config.merge_env_from(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.collector.base_url, "http://collector:9000");
    assert_eq!(config.hub.host, "0.0.0.0");
    assert_eq!(config.hub.port, 9876);
    assert_eq!(config.device.tags, vec!["OptimizedCarrefour", "CrossAppTracking"]);
    assert_eq!(config.log_level.as_deref(), Some("debug"));
}

#[test]
fn test_invalid_port_env_is_ignored() {
    let mut config = Config::new();
    config.merge_env_from(|key| (key == "PAGECAST_HUB_PORT").then(|| "not-a-port".to_string()));
    assert_eq!(config.hub.port, 8765);
}

#[test]
fn test_validation_errors() {
    let mut config = Config::new();
    config.device.tags.clear();
    assert!(config.validate().is_err());

    let mut config = Config::new();
    config.device.tags = vec!["Bad Tag".to_string()];
    assert!(config.validate().is_err());

    let mut config = Config::new();
    config.delivery.queue_capacity = 0;
    assert!(config.validate().is_err());

    let mut config = Config::new();
    config.collector.base_url = "localhost:3001/api".to_string();
    assert!(config.validate().is_err());

    // A disabled collector does not need a valid URL
    config.collector.enabled = false;
    assert!(config.validate().is_ok());
}
