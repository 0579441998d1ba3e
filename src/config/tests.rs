use std::env;
use std::fs;
use std::time::Duration;

use super::{Config, ConfigError};
use crate::admission::SenderRules;

fn invalid_key(json: &str) -> &'static str {
    match json.parse::<Config>() {
        Err(ConfigError::Invalid { key, .. }) => key,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn defaults_fill_missing_keys() {
    let config: Config = r#"{"smtp_server": "smtp.example.com"}"#.parse().expect("valid");
    assert_eq!(config.smtp_port, 465);
    assert!(!config.smtp_starttls);
    assert_eq!(config.smtp_max_email_size, 83_886_080);
    assert_eq!(config.local_listen_ip, "0.0.0.0");
    assert_eq!(config.local_listen_port, 2525);
    assert_eq!(config.allowed_senders, "*");
    assert_eq!(config.timeout(), Duration::from_secs(300));
}

#[test]
fn unknown_keys_are_ignored() {
    let json = r#"{"smtp_server": "smtp.example.com", "allowed_hosts": ["example.com"]}"#;
    assert!(json.parse::<Config>().is_ok());
}

#[test]
fn validation_names_the_offending_key() {
    assert_eq!(invalid_key(r#"{}"#), "smtp_server");
    assert_eq!(
        invalid_key(r#"{"smtp_server": "s", "smtp_port": 0}"#),
        "smtp_port"
    );
    assert_eq!(
        invalid_key(r#"{"smtp_server": "s", "local_listen_port": 70000}"#),
        "local_listen_port"
    );
    assert_eq!(
        invalid_key(r#"{"smtp_server": "s", "smtp_max_email_size": 1023}"#),
        "smtp_max_email_size"
    );
    assert_eq!(
        invalid_key(r#"{"smtp_server": "s", "timeout_secs": 0}"#),
        "timeout_secs"
    );
    assert_eq!(
        invalid_key(r#"{"smtp_server": "s", "timeout_secs": 3601}"#),
        "timeout_secs"
    );
}

#[test]
fn boundary_values_are_accepted() {
    let json = r#"{
        "smtp_server": "s",
        "smtp_port": 65535,
        "local_listen_port": 1,
        "smtp_max_email_size": 1024,
        "timeout_secs": 3600
    }"#;
    assert!(json.parse::<Config>().is_ok());
}

#[test]
fn malformed_json_is_a_parse_error() {
    assert!(matches!(
        "{not json".parse::<Config>(),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn relay_options_carry_session_settings() {
    let json = r#"{
        "smtp_server": "smtp.example.com",
        "smtp_port": 587,
        "smtp_starttls": true,
        "smtp_login_auth_type": true,
        "smtp_username": "user",
        "smtp_password": "pass",
        "smtp_helo": "relay.test.com",
        "smtp_skip_cert_verify": true,
        "timeout_secs": 30
    }"#;
    let options = json
        .parse::<Config>()
        .expect("valid")
        .relay_options()
        .expect("options");
    assert_eq!(options.host, "smtp.example.com");
    assert_eq!(options.port, 587);
    assert!(options.starttls && options.login_auth && options.skip_cert_verify);
    assert_eq!(options.helo_name(), "relay.test.com");
    assert_eq!(options.timeout, Some(Duration::from_secs(30)));
}

#[test]
fn blank_helo_means_default_identity() {
    let options = r#"{"smtp_server": "s", "smtp_helo": " "}"#
        .parse::<Config>()
        .expect("valid")
        .relay_options()
        .expect("options");
    assert_eq!(options.helo, None);
}

#[test]
fn listen_address_combines_ip_and_port() {
    let config: Config = r#"{"smtp_server": "s", "local_listen_ip": "127.0.0.1", "local_listen_port": 2526}"#
        .parse()
        .expect("valid");
    assert_eq!(
        config.listen_addr().expect("addr").to_string(),
        "127.0.0.1:2526"
    );

    let config: Config = r#"{"smtp_server": "s", "local_listen_ip": "localhost"}"#
        .parse()
        .expect("valid");
    assert!(config.listen_addr().is_err());
}

#[test]
fn from_path_loads_file_and_sender_rules() {
    let dir = env::temp_dir().join(format!("mailrelay-config-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("temp dir");
    let senders = dir.join("allowed_senders");
    fs::write(&senders, "# office\n192.168.1.0/24\n").expect("write senders");
    let config_path = dir.join("mailrelay.json");
    let json = format!(
        r#"{{"smtp_server": "smtp.example.com", "allowed_senders": {:?}}}"#,
        senders.display().to_string()
    );
    fs::write(&config_path, json).expect("write config");

    let config = Config::from_path(&config_path).expect("load");
    let rules = config.sender_rules().expect("rules");
    assert!(rules.is_allowed("192.168.1.7"));
    assert!(rules.is_blocked("10.0.0.1"));

    assert!(matches!(
        Config::from_path(dir.join("missing.json")),
        Err(ConfigError::Open { .. })
    ));
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn allow_all_needs_no_file() {
    let config: Config = r#"{"smtp_server": "s"}"#.parse().expect("valid");
    assert!(matches!(
        config.sender_rules().expect("rules"),
        SenderRules::AllowAll
    ));
}
