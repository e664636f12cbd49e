use eap_proto::EapType;
use eap_proto::eap::certs::TlsCertificateConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Static credentials for the built-in verifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
}

/// Server certificate material for EAP-TLS and PEAP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM certificate chain, leaf first
    pub cert_path: String,
    /// PEM private key
    pub key_path: String,
    /// CA bundle used to verify client certificates
    #[serde(default)]
    pub ca_path: Option<String>,
    /// Reject handshakes without a client certificate
    #[serde(default)]
    pub require_client_cert: bool,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Methods offered to a new session, in order
    #[serde(default = "default_method_priority")]
    pub method_priority: Vec<EapType>,

    /// Methods of the conversation inside a PEAP tunnel
    #[serde(default = "default_peap_inner_priority")]
    pub peap_inner_priority: Vec<EapType>,

    /// Required when EAP-TLS or PEAP is offered
    #[serde(default)]
    pub tls: Option<TlsSettings>,

    /// Largest TLS fragment sent in one EAP request
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,

    /// Inactivity after which a TLS tunnel is torn down
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Lifetime of an abandoned session
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Name sent in MSCHAPv2 challenges
    #[serde(default = "default_mschapv2_server_name")]
    pub mschapv2_server_name: String,

    #[serde(default)]
    pub users: Vec<UserEntry>,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// UDP address of the RADIUS listener
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Shared secret of the RADIUS listener
    #[serde(default = "default_secret")]
    pub secret: String,
}

fn default_method_priority() -> Vec<EapType> {
    vec![EapType::Identity, EapType::Peap]
}

fn default_peap_inner_priority() -> Vec<EapType> {
    vec![EapType::Identity, EapType::MsChapV2]
}

fn default_fragment_size() -> usize {
    1000
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_session_ttl_secs() -> u64 {
    300
}

fn default_mschapv2_server_name() -> String {
    "eap-engine".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:1812".to_string()
}

fn default_secret() -> String {
    "testing123".to_string()
}

const FRAGMENT_SIZE_RANGE: std::ops::RangeInclusive<usize> = 64..=4000;
const OFFERABLE: [EapType; 4] = [EapType::Gtc, EapType::Tls, EapType::Peap, EapType::MsChapV2];

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            method_priority: default_method_priority(),
            peap_inner_priority: default_peap_inner_priority(),
            tls: None,
            fragment_size: default_fragment_size(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            mschapv2_server_name: default_mschapv2_server_name(),
            users: vec![],
            log_level: default_log_level(),
            listen_address: default_listen_address(),
            secret: default_secret(),
        }
    }
}

/// Identity may only lead; everything after it must be an offerable method
fn validate_priority(name: &str, priority: &[EapType], allowed: &[EapType]) -> Result<(), ConfigError> {
    if priority.is_empty() {
        return Err(ConfigError::Invalid(format!("{} cannot be empty", name)));
    }
    for (i, method) in priority.iter().enumerate() {
        let ok = match method {
            EapType::Identity => i == 0,
            other => allowed.contains(other),
        };
        if !ok {
            return Err(ConfigError::Invalid(format!(
                "{} cannot offer {} at position {}",
                name, method, i
            )));
        }
    }
    if priority == [EapType::Identity] {
        return Err(ConfigError::Invalid(format!(
            "{} needs a method after Identity",
            name
        )));
    }
    Ok(())
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Invalid listen address: {}", self.listen_address)))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// True when EAP-TLS or PEAP is offered
    pub fn uses_tls(&self) -> bool {
        self.method_priority
            .iter()
            .any(|m| matches!(m, EapType::Tls | EapType::Peap))
    }

    pub fn tls_certificate_config(&self) -> Option<TlsCertificateConfig> {
        self.tls.as_ref().map(|tls| {
            TlsCertificateConfig::new(
                tls.cert_path.clone(),
                tls.key_path.clone(),
                tls.ca_path.clone(),
                tls.require_client_cert,
            )
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_priority("method_priority", &self.method_priority, &OFFERABLE)?;
        if self.method_priority.contains(&EapType::Peap) {
            validate_priority(
                "peap_inner_priority",
                &self.peap_inner_priority,
                &[EapType::Gtc, EapType::MsChapV2],
            )?;
        }

        if self.uses_tls() {
            match &self.tls {
                Some(tls) if !tls.cert_path.is_empty() && !tls.key_path.is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(
                        "EAP-TLS and PEAP need tls.cert_path and tls.key_path".to_string(),
                    ));
                }
            }
        }

        if !FRAGMENT_SIZE_RANGE.contains(&self.fragment_size) {
            return Err(ConfigError::Invalid(format!(
                "fragment_size {} outside {:?}",
                self.fragment_size, FRAGMENT_SIZE_RANGE
            )));
        }

        if self.handshake_timeout_secs == 0 || self.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_secs and session_ttl_secs cannot be 0".to_string(),
            ));
        }

        if self.secret.is_empty() {
            return Err(ConfigError::Invalid("Secret cannot be empty".to_string()));
        }
        self.socket_addr()?;

        for user in &self.users {
            if user.username.is_empty() {
                return Err(ConfigError::Invalid("User has empty username".to_string()));
            }
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        EngineConfig {
            method_priority: vec![EapType::Identity, EapType::Peap],
            peap_inner_priority: vec![EapType::Identity, EapType::MsChapV2],
            tls: Some(TlsSettings {
                cert_path: "/etc/eap-engine/server.pem".to_string(),
                key_path: "/etc/eap-engine/server-key.pem".to_string(),
                ca_path: Some("/etc/eap-engine/ca.pem".to_string()),
                require_client_cert: false,
            }),
            users: vec![
                UserEntry {
                    username: "alice".to_string(),
                    password: "password".to_string(),
                },
                UserEntry {
                    username: "bob".to_string(),
                    password: "hunter2".to_string(),
                },
            ],
            ..Default::default()
        }
    }
}
