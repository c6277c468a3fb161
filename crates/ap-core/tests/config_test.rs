use ap_core::config::Config;
use std::collections::HashMap;
use std::path::PathBuf;

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.general.log_format, "human");
    assert_eq!(cfg.daemon.port, 3000);
    assert_eq!(cfg.daemon.host, "127.0.0.1");
    assert_eq!(cfg.terminal.term, "xterm-256color");
    assert_eq!(cfg.terminal.cols, 120);
    assert_eq!(cfg.terminal.rows, 30);
    assert_eq!(cfg.terminal.output_buffer_bytes, 100_000);
    assert_eq!(cfg.agent.default_timeout_ms, 30_000);
    assert!(cfg.terminal.shell.is_none());
    cfg.validate().expect("defaults validate");
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("xterm-256color"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.daemon.port, cfg.daemon.port);
    assert_eq!(parsed.terminal.max_sessions, cfg.terminal.max_sessions);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[daemon]
port = 1234

[terminal]
shell = "/bin/zsh"

[terminal.env]
EDITOR = "vi"
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.daemon.port, 1234);
    assert_eq!(cfg.terminal.shell.as_deref(), Some("/bin/zsh"));
    assert_eq!(cfg.terminal.env.get("EDITOR").map(String::as_str), Some("vi"));
    // defaults should fill in the rest
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.terminal.shell_args, vec!["-l".to_string()]);
    cfg.validate().expect("config validates");
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[agent]\ndefault_timeout_ms = 5000\n").unwrap();

    let cfg = Config::load_from(&path).expect("load from file");
    assert_eq!(cfg.agent.default_timeout_ms, 5000);
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from(dir.path().join("nope.toml")).expect_err("should fail");
    assert!(err.to_string().starts_with("io:"));
}

#[test]
fn env_overrides_apply() {
    let vars: HashMap<&str, &str> = [
        ("PORT", "8088"),
        ("WORKSPACE_ROOT", "/srv/workspace"),
        ("AGENT_PORTAL_SHELL", "/bin/sh"),
    ]
    .into_iter()
    .collect();

    let mut cfg = Config::default();
    cfg.apply_env_from(|k| vars.get(k).map(|v| v.to_string()))
        .expect("overrides apply");
    assert_eq!(cfg.daemon.port, 8088);
    assert_eq!(cfg.workspace.root, PathBuf::from("/srv/workspace"));
    assert_eq!(cfg.terminal.shell.as_deref(), Some("/bin/sh"));
}

#[test]
fn invalid_port_override_fails() {
    let mut cfg = Config::default();
    let err = cfg
        .apply_env_from(|k| (k == "PORT").then(|| "not-a-port".to_string()))
        .expect_err("should fail");
    assert!(err.to_string().contains("PORT"));
}

#[test]
fn invalid_log_format_fails_validation() {
    let mut cfg = Config::default();
    cfg.general.log_format = "xml".to_string();
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("log_format"));
}

#[test]
fn zero_buffer_fails_validation() {
    let mut cfg = Config::default();
    cfg.terminal.output_buffer_bytes = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("output_buffer_bytes"));
}
