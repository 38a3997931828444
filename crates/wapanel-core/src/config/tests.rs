use super::*;
use std::time::Duration;

#[test]
fn test_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.backend.host, "127.0.0.1");
    assert_eq!(cfg.backend.default_port, 3001);
    assert!(cfg.backend.url.is_none());
    assert_eq!(cfg.discovery.base_port, 3001);
    assert_eq!(cfg.discovery.base_range, 20);
    assert_eq!(cfg.discovery.window, 2);
    assert_eq!(cfg.discovery.probe_timeout(), Duration::from_secs(3));
    assert_eq!(cfg.discovery.retry_delay(), Duration::from_secs(2));
    assert_eq!(cfg.discovery.max_rounds, 5);
    assert_eq!(cfg.discovery.health_path, "/api/status");
    assert!(cfg.discovery.persist);
    assert_eq!(cfg.realtime.path, "/socket.io/");
    assert_eq!(cfg.store.backend, "sqlite");
}

#[test]
fn test_empty_toml_uses_defaults() {
    let cfg = parse("").unwrap();
    assert_eq!(cfg.panel.name, "wapanel");
    assert_eq!(cfg.discovery.legacy_ranges, vec![[5000, 5010]]);
    assert_eq!(cfg.queue.completion_grace_secs, 5);
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let toml_str = r#"
        [discovery]
        base_port = 4000
        legacy_ranges = [[8000, 8002], [9000, 9000]]

        [realtime]
        max_reconnect_attempts = 3
    "#;
    let cfg = parse(toml_str).unwrap();
    assert_eq!(cfg.discovery.base_port, 4000);
    assert_eq!(cfg.discovery.base_range, 20);
    assert_eq!(cfg.discovery.legacy_ranges, vec![[8000, 8002], [9000, 9000]]);
    assert_eq!(cfg.realtime.max_reconnect_attempts, 3);
    assert_eq!(cfg.realtime.reconnect_delay_ms, 2000);
}

#[test]
fn test_parse_error_is_config_error() {
    let err = parse("[discovery\nbase_port = ").unwrap_err();
    assert!(matches!(err, PanelError::Config(_)));
}

#[test]
fn test_env_overrides() {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg, |key| match key {
        ENV_BACKEND_URL => Some(" http://10.0.0.5:3010 ".to_string()),
        ENV_PORT_INFO => Some("/tmp/port-info.json".to_string()),
        _ => None,
    });
    assert_eq!(cfg.backend.url.as_deref(), Some("http://10.0.0.5:3010"));
    assert_eq!(cfg.discovery.port_info, "/tmp/port-info.json");
}

#[test]
fn test_blank_env_override_ignored() {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg, |_| Some("   ".to_string()));
    assert!(cfg.backend.url.is_none());
    assert_eq!(cfg.discovery.port_info, "~/.wapanel/.port-info.json");
}

#[test]
fn test_load_missing_file_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");
    let cfg = load(path.to_str().unwrap()).unwrap();
    assert_eq!(cfg.discovery.base_port, 3001);
}

#[test]
fn test_load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[backend]\ndefault_port = 3555\n").unwrap();
    let cfg = load(path.to_str().unwrap()).unwrap();
    assert_eq!(cfg.backend.default_port, 3555);
}

#[test]
fn test_shellexpand_home() {
    let home = std::env::var("HOME").unwrap_or_default();
    if !home.is_empty() {
        assert_eq!(shellexpand("~/x/y"), format!("{home}/x/y"));
    }
    assert_eq!(shellexpand("/abs/path"), "/abs/path");
}
