//! Agent configuration
//!
//! Plain values handed to the agent by the command line layer. Nothing in
//! here touches the filesystem or the network.

use std::path::PathBuf;
use std::time::Duration;

use crate::pod::PodIdentity;

/// Default port of the policy authority
pub const DEFAULT_AUTHORITY_PORT: u16 = 50052;

/// Projected service-account token, re-read on every RPC
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// How the agent talks to the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportSecurity {
    /// h2c, no encryption
    #[default]
    Plaintext,
    /// TLS verified against the platform trust store
    Tls,
    /// TLS that accepts any certificate chain and hostname
    TlsInsecureSkipVerify,
}

impl TransportSecurity {
    /// Map the `--tls-enabled` / `--tls-insecure-skip-verify` flag pair
    pub fn from_flags(tls_enabled: bool, insecure_skip_verify: bool) -> Self {
        match (tls_enabled, insecure_skip_verify) {
            (false, _) => TransportSecurity::Plaintext,
            (true, false) => TransportSecurity::Tls,
            (true, true) => TransportSecurity::TlsInsecureSkipVerify,
        }
    }
}

/// Where the policy authority lives
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub host: String,
    pub port: u16,
    pub security: TransportSecurity,
    /// Bound on establishing the initial connection
    pub connect_timeout: Duration,
}

impl AuthorityConfig {
    /// `host:port`, as dialed
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_AUTHORITY_PORT,
            security: TransportSecurity::Plaintext,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for the pod agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Remote policy authority
    pub authority: AuthorityConfig,
    /// Identity attached to every reported event
    pub pod: PodIdentity,
    /// Period of the policy sync and process validation loops
    pub validation_interval: Duration,
    /// Period of the file integrity loop
    pub file_validation_interval: Duration,
    /// Per-RPC deadline
    pub sync_timeout: Duration,
    /// Service-account token presented as a bearer credential
    pub token_path: PathBuf,
    /// procfs mount used for process enumeration
    pub proc_root: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            authority: AuthorityConfig::default(),
            pod: PodIdentity::default(),
            validation_interval: Duration::from_secs(3),
            file_validation_interval: Duration::from_secs(3),
            sync_timeout: Duration::from_secs(5),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();

        assert_eq!(config.validation_interval, Duration::from_secs(3));
        assert_eq!(config.file_validation_interval, Duration::from_secs(3));
        assert_eq!(config.sync_timeout, Duration::from_secs(5));
        assert_eq!(config.authority.port, 50052);
        assert_eq!(config.authority.security, TransportSecurity::Plaintext);
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
    }

    #[test]
    fn test_transport_security_from_flags() {
        assert_eq!(TransportSecurity::from_flags(false, true), TransportSecurity::Plaintext);
        assert_eq!(TransportSecurity::from_flags(false, false), TransportSecurity::Plaintext);
        assert_eq!(TransportSecurity::from_flags(true, false), TransportSecurity::Tls);
        assert_eq!(
            TransportSecurity::from_flags(true, true),
            TransportSecurity::TlsInsecureSkipVerify
        );
    }

    #[test]
    fn test_authority_address() {
        let authority = AuthorityConfig {
            host: "authority.podsentinel-system.svc".to_string(),
            port: 443,
            ..AuthorityConfig::default()
        };
        assert_eq!(authority.address(), "authority.podsentinel-system.svc:443");
    }
}
