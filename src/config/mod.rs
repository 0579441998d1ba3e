//! JSON configuration file.
//!
//! Every key is optional except `smtp_server`; missing keys take the
//! defaults below and unknown keys are ignored.

mod error;

pub use error::ConfigError;

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::{ALLOW_ALL, SenderRules};
use crate::intake::IntakeOptions;
use crate::relay::RelayOptions;

pub const DEFAULT_PATH: &str = "/etc/mailrelay.json";
pub const DEFAULT_SMTP_PORT: u32 = 465;
pub const DEFAULT_MAX_EMAIL_SIZE: u64 = 83_886_080;
pub const MIN_EMAIL_SIZE: u64 = 1024;
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";
pub const DEFAULT_LISTEN_PORT: u32 = 2525;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
const MAX_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub smtp_server: String,
    pub smtp_port: u32,
    pub smtp_starttls: bool,
    pub smtp_login_auth_type: bool,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_helo: String,
    pub smtp_skip_cert_verify: bool,
    pub smtp_max_email_size: u64,
    pub local_listen_ip: String,
    pub local_listen_port: u32,
    /// `*` or the path of a file listing allowed IPs and CIDR ranges.
    pub allowed_senders: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: DEFAULT_SMTP_PORT,
            smtp_starttls: false,
            smtp_login_auth_type: false,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_helo: String::new(),
            smtp_skip_cert_verify: false,
            smtp_max_email_size: DEFAULT_MAX_EMAIL_SIZE,
            local_listen_ip: DEFAULT_LISTEN_IP.to_string(),
            local_listen_port: DEFAULT_LISTEN_PORT,
            allowed_senders: ALLOW_ALL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parse and validate.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp_server.trim().is_empty() {
            return Err(ConfigError::invalid("smtp_server", "is required"));
        }
        port("smtp_port", self.smtp_port)?;
        port("local_listen_port", self.local_listen_port)?;
        if self.smtp_max_email_size < MIN_EMAIL_SIZE {
            return Err(ConfigError::invalid(
                "smtp_max_email_size",
                format!("must be at least {MIN_EMAIL_SIZE} bytes"),
            ));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConfigError::invalid(
                "timeout_secs",
                format!("must be between 1 and {MAX_TIMEOUT_SECS} seconds"),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn relay_options(&self) -> Result<RelayOptions, ConfigError> {
        let port = port("smtp_port", self.smtp_port)?;
        let mut options = RelayOptions::new(self.smtp_server.clone(), port);
        options.starttls = self.smtp_starttls;
        options.login_auth = self.smtp_login_auth_type;
        options.username = self.smtp_username.clone();
        options.password = self.smtp_password.clone();
        options.helo = Some(self.smtp_helo.clone()).filter(|helo| !helo.trim().is_empty());
        options.skip_cert_verify = self.smtp_skip_cert_verify;
        options.timeout = Some(self.timeout());
        Ok(options)
    }

    pub fn intake_options(&self) -> IntakeOptions {
        IntakeOptions {
            max_message_size: usize::try_from(self.smtp_max_email_size).unwrap_or(usize::MAX),
            timeout: Some(self.timeout()),
            ..IntakeOptions::default()
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .local_listen_ip
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid("local_listen_ip", "is not an IP address"))?;
        Ok(SocketAddr::new(
            ip,
            port("local_listen_port", self.local_listen_port)?,
        ))
    }

    pub fn sender_rules(&self) -> Result<SenderRules, ConfigError> {
        Ok(SenderRules::from_source(&self.allowed_senders)?)
    }
}

fn port(key: &'static str, value: u32) -> Result<u16, ConfigError> {
    u16::try_from(value)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::invalid(key, "must be between 1 and 65535"))
}

#[cfg(test)]
mod tests;
