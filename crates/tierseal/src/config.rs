//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tierseal_core::ObjectId;
use tierseal_crypto::{CryptoError, SealConfig};

pub use tierseal_ledger::BlobStoreConfig;

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid session config: {0}")]
    Session(String),

    #[error("invalid key server config: {0}")]
    Seal(#[from] CryptoError),

    #[error("package id must not be empty")]
    MissingPackage,
}

/// Session lifetime policy.
///
/// Sessions are requested for `nominal_ttl_minutes` but used only for
/// `effective_ttl_minutes`, so the client stops before a key server would
/// start refusing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub nominal_ttl_minutes: u32,
    pub effective_ttl_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nominal_ttl_minutes: 30,
            effective_ttl_minutes: 28,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.effective_ttl_minutes == 0 {
            return Err(ConfigError::Session("effective ttl must be positive".into()));
        }
        if self.effective_ttl_minutes >= self.nominal_ttl_minutes {
            return Err(ConfigError::Session(format!(
                "effective ttl {} min must be shorter than nominal ttl {} min",
                self.effective_ttl_minutes, self.nominal_ttl_minutes
            )));
        }
        Ok(())
    }

    pub fn nominal_ttl_ms(&self) -> i64 {
        i64::from(self.nominal_ttl_minutes) * 60_000
    }

    pub fn effective_ttl_ms(&self) -> i64 {
        i64::from(self.effective_ttl_minutes) * 60_000
    }
}

/// Configuration for the decryption engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Platform package id; also the authorization namespace.
    pub package_id: String,

    /// Shared clock object passed to subscription proofs.
    pub clock_object_id: ObjectId,

    pub session: SessionConfig,
    pub seal: SealConfig,

    /// Upper bound on one blob download.
    pub download_timeout: Duration,

    /// Store decrypted plaintext locally.
    pub cache_writes_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            package_id: String::new(),
            clock_object_id: ObjectId::CLOCK,
            session: SessionConfig::default(),
            seal: SealConfig::default(),
            download_timeout: Duration::from_secs(120),
            cache_writes_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Defaults for a package.
    pub fn for_package(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.package_id.trim().is_empty() {
            return Err(ConfigError::MissingPackage);
        }
        self.session.validate()?;
        self.seal.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierseal_crypto::KeyServerConfig;

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.nominal_ttl_ms(), 30 * 60_000);
        assert_eq!(config.effective_ttl_ms(), 28 * 60_000);
    }

    #[test]
    fn test_effective_ttl_must_be_shorter() {
        let config = SessionConfig {
            nominal_ttl_minutes: 30,
            effective_ttl_minutes: 30,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_from_json() {
        let service = ObjectId::from_bytes([9; 32]);
        let json = format!(
            r#"{{
                "package_id": "0xfeed",
                "seal": {{ "threshold": 1, "services": [{{ "object_id": "{}", "weight": 1 }}] }},
                "cache_writes_enabled": false
            }}"#,
            service
        );
        let config: EngineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.package_id, "0xfeed");
        assert_eq!(config.clock_object_id, ObjectId::CLOCK);
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.download_timeout, Duration::from_secs(120));
        assert_eq!(
            config.seal.services,
            vec![KeyServerConfig {
                object_id: service,
                weight: 1
            }]
        );
        assert!(!config.cache_writes_enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_engine_config_requires_package() {
        assert_eq!(
            EngineConfig::default().validate(),
            Err(ConfigError::MissingPackage)
        );
    }
}
