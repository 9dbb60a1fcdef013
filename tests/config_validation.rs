//! Integration tests for configuration loading and validation.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use archivist::config::{Config, CONFIG_ENV};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Helper to create a minimal valid config for testing.
fn minimal_config() -> Config {
    Config {
        discord_bot_token: "tok".into(),
        webhook_url: "https://discord.com/api/webhooks/1/abc".into(),
        operators: vec![129413794660089869, 279064977044930571],
        data_dir: "./archivist.data".into(),
        timezone: "America/New_York".into(),
        stop_grace_secs: 15,
        disconnect_message: "Archive bot has disconnected or gone offline.".into(),
    }
}

/// A config file in its own temp dir; the dir is removed on drop.
struct TempConfig {
    path: PathBuf,
}

impl Drop for TempConfig {
    fn drop(&mut self) {
        if let Some(dir) = self.path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

fn write_temp_config(content: &str) -> TempConfig {
    let dir = std::env::temp_dir().join(format!("archivist_cfgtest_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("archivist.config.yaml");
    std::fs::write(&path, content).unwrap();
    TempConfig { path }
}

#[test]
fn test_yaml_parse_minimal() {
    let yaml = "discord_bot_token: tok\nwebhook_url: https://example.com/hook\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.discord_bot_token, "tok");
    // Defaults
    assert_eq!(config.data_dir, "./archivist.data");
    assert_eq!(config.timezone, "America/New_York");
    assert_eq!(config.stop_grace_secs, 15);
    assert!(config.operators.is_empty());
}

#[test]
fn test_yaml_parse_full() {
    let yaml = r#"
discord_bot_token: my_token
webhook_url: https://discord.com/api/webhooks/123/xyz
operators:
  - 129413794660089869
  - 279064977044930571
data_dir: /data/archivist
timezone: Asia/Shanghai
stop_grace_secs: 5
disconnect_message: gone
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.discord_bot_token, "my_token");
    assert_eq!(config.webhook_url, "https://discord.com/api/webhooks/123/xyz");
    assert_eq!(
        config.operators,
        vec![129413794660089869, 279064977044930571]
    );
    assert_eq!(config.data_dir, "/data/archivist");
    assert_eq!(config.timezone, "Asia/Shanghai");
    assert_eq!(config.stop_grace_secs, 5);
    assert_eq!(config.disconnect_message, "gone");
}

#[test]
fn test_yaml_roundtrip() {
    let config = minimal_config();
    let yaml = serde_yaml::to_string(&config).unwrap();
    let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed.discord_bot_token, config.discord_bot_token);
    assert_eq!(parsed.operators, config.operators);
    assert_eq!(parsed.timezone, config.timezone);
}

#[test]
fn test_data_dir_paths() {
    let mut config = minimal_config();
    config.data_dir = "/opt/archivist.data".into();
    assert!(config
        .log_dir()
        .ends_with(std::path::Path::new("archivist.data").join("logs")));
}

#[test]
fn test_yaml_unknown_fields_ignored() {
    let yaml = "discord_bot_token: tok\nwebhook_url: https://example.com/h\nunknown_field: value\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.discord_bot_token, "tok");
}

#[test]
fn test_from_yaml_requires_webhook() {
    let _guard = env_lock();
    let err = Config::from_yaml("discord_bot_token: tok\n").unwrap_err();
    assert!(err.to_string().contains("webhook_url"));
}

#[test]
fn test_load_from_env_path() {
    let _guard = env_lock();
    let file = write_temp_config(
        "discord_bot_token: tok\nwebhook_url: https://example.com/h\noperators: [9, 9, 1]\n",
    );
    std::env::set_var(CONFIG_ENV, &file.path);
    let config = Config::load();
    std::env::remove_var(CONFIG_ENV);

    let config = config.unwrap();
    assert_eq!(config.operators, vec![1, 9]);
}

#[test]
fn test_load_error_names_file() {
    let _guard = env_lock();
    let file = write_temp_config("discord_bot_token: tok\nwebhook_url: https://example.com/h\ntimezone: Nowhere/City\n");
    std::env::set_var(CONFIG_ENV, &file.path);
    let err = Config::load().unwrap_err();
    std::env::remove_var(CONFIG_ENV);

    let text = err.to_string();
    assert!(text.contains("archivist.config.yaml"), "{text}");
    assert!(text.contains("Invalid timezone"), "{text}");
}
