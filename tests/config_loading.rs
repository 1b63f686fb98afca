use std::io::Write;

use weft_core::config::{AppConfig, ErrorPolicy, Principal};

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
listen = "0.0.0.0:6001"
routes_dir = "/srv/weft/routes"

[auth]
api_key = "shared-secret"

[[auth.tenants]]
name = "systemA"
api_key = "keyA123"

[[runners]]
name = "native"
port = 4001
command = ["weft", "runner", "--name", "native"]

[[runners]]
name = "py"
host = "10.1.0.5"
port = 5000

[engine]
on_command_error = "halt"
max_node_visits = 3

[retry]
max_retries = 4
initial_backoff_ms = 250
max_backoff_ms = 4000
call_timeout_ms = 2500
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.listen, "0.0.0.0:6001");
    assert_eq!(config.routes_dir, "/srv/weft/routes");

    assert_eq!(config.auth.api_key, "shared-secret");
    assert_eq!(config.auth.resolve("shared-secret"), Some(Principal::Default));
    assert_eq!(
        config.auth.resolve("keyA123"),
        Some(Principal::Tenant("systemA".into()))
    );

    assert_eq!(config.runners.len(), 2);
    assert_eq!(config.runners[0].name, "native");
    assert_eq!(config.runners[0].addr(), "127.0.0.1:4001");
    assert!(!config.runners[0].command.is_empty());
    assert_eq!(config.runners[1].addr(), "10.1.0.5:5000");
    assert!(config.runners[1].command.is_empty());

    assert_eq!(config.engine.on_command_error, ErrorPolicy::Halt);
    assert_eq!(config.engine.max_node_visits, 3);

    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.retry.initial_backoff_ms, 250);
    assert_eq!(config.retry.max_backoff_ms, Some(4000));
    assert_eq!(config.retry.call_timeout_ms, 2500);
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[auth]\napi_key = \"changeme\"\n")
        .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.listen, "127.0.0.1:6001");
    assert_eq!(config.routes_dir, "routes");
    assert!(config.runners.is_empty());
    assert_eq!(config.engine.on_command_error, ErrorPolicy::Continue);
    assert_eq!(config.retry.max_retries, 3);
}
