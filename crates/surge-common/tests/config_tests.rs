use std::time::Duration;

use surge_common::{Config, TargetConfig};

#[test]
fn test_defaults_match_cli_defaults() {
    let config = Config::default();

    assert_eq!(config.target.server, "localhost:8081");
    assert_eq!(config.target.path, "/average-price");
    assert_eq!(config.load.clients, 10_000);
    assert_eq!(config.load.duration(), Duration::from_secs(10));
    assert_eq!(config.load.handshake_timeout(), Duration::from_secs(5));
    assert_eq!(config.admission.interval(), Duration::from_millis(1));
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.backoff_unit(), Duration::from_secs(1));
    assert!(!config.metrics.enabled);
}

#[test]
fn test_partial_yaml_keeps_other_defaults() {
    let yaml = r#"
target:
  server: "10.0.0.5:9000"
load:
  clients: 250
retry:
  backoff_unit_ms: 50
"#;
    let config = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(config.target.server, "10.0.0.5:9000");
    assert_eq!(config.target.path, "/average-price");
    assert_eq!(config.load.clients, 250);
    assert_eq!(config.load.duration_secs, 10);
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.backoff_unit(), Duration::from_millis(50));
    assert_eq!(config.teardown.close_timeout(), Duration::from_secs(2));
}

#[test]
fn test_empty_yaml_is_default_config() {
    let config = Config::from_yaml_str("{}").unwrap();
    assert_eq!(config.load.clients, 10_000);
    assert_eq!(config.logging.filter, "info");
}

#[test]
fn test_rejects_wrongly_typed_values() {
    let yaml = "load:\n  clients: lots\n";
    assert!(Config::from_yaml_str(yaml).is_err());
}

#[test]
fn test_websocket_url_joins_path() {
    let target = TargetConfig::default();
    assert_eq!(target.websocket_url(), "ws://localhost:8081/average-price");

    let bare = TargetConfig {
        server: "127.0.0.1:1".to_string(),
        path: "feed".to_string(),
    };
    assert_eq!(bare.websocket_url(), "ws://127.0.0.1:1/feed");
}

#[test]
fn test_progress_interval_zero_disables_progress() {
    let yaml = "admission:\n  progress_interval_ms: 0\n";
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(config.admission.progress_interval(), None);
    assert_eq!(
        Config::default().admission.progress_interval(),
        Some(Duration::from_secs(1))
    );
}

#[test]
fn test_shipped_config_file_parses() {
    let data = include_str!("../../../config/surge.yaml");
    let config = Config::from_yaml_str(data).unwrap();
    assert_eq!(config.load.clients, 10_000);
    assert_eq!(config.metrics.port, 9464);
}
