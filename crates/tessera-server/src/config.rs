use std::path::PathBuf;

use serde::Deserialize;

use crate::gate::MembershipQuery;

/// Server configuration, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Storage root for entity records and the private key area.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Address the transport layer binds on.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seals private keys at rest (PBKDF2 + AES-256-GCM) when set.
    #[serde(default)]
    pub secret_password: Option<String>,

    /// Which group-info queries must be issued before a message from a
    /// non-member is deferred.
    #[serde(default)]
    pub membership_query: MembershipQuery,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/tmp/.tessera")
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    9394
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host: default_host(),
            port: default_port(),
            secret_password: None,
            membership_query: MembershipQuery::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ServerConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/.tessera"));
        assert_eq!(config.port, 9394);
        assert!(config.secret_password.is_none());
        assert_eq!(config.membership_query, MembershipQuery::All);
    }

    #[test]
    fn config_toml_deserialization() {
        let toml = r#"
            data_dir = "/var/lib/tessera"
            port = 1234
            secret_password = "hunter2"
            membership_query = "any"
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/tessera"));
        assert_eq!(config.port, 1234);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.secret_password.as_deref(), Some("hunter2"));
        assert_eq!(config.membership_query, MembershipQuery::Any);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 9394);
        assert_eq!(config.membership_query, MembershipQuery::All);
    }
}
