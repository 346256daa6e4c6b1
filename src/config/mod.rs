use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::biometric::LivenessConfig;

/// Environment variable overriding `security.password_pepper` (hex)
pub const PEPPER_ENV: &str = "FACETRUST_PEPPER";
/// Environment variable overriding `security.vault_passphrase`
pub const VAULT_KEY_ENV: &str = "FACETRUST_VAULT_KEY";

/// Database configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
    /// Maximum number of connections in the connection pool
    pub max_connections: u32,
    /// Pool checkout and SQLite busy timeout
    pub busy_timeout_ms: u64,
}

/// Security configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SecurityConfig {
    /// Argon2id memory cost (KiB)
    pub password_memory_kib: u32,
    /// 32-byte hex pepper for password hashing
    pub password_pepper: Option<String>,
    /// Failed logins inside the window before the TOTP fallback kicks in
    pub max_failed_attempts: u32,
    /// Rolling window for failed logins, in minutes
    pub attempt_window_minutes: i64,
    /// Issuer shown in authenticator apps
    pub totp_issuer: String,
    /// Accepted clock skew in 30-second steps
    pub totp_skew_steps: u8,
    /// Passphrase for sealing TOTP secrets at rest
    pub vault_passphrase: String,
    pub vault_salt: String,
    pub vault_kdf_iterations: u32,
}

/// Biometric matching policy
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BiometricConfig {
    /// Distance below which two faces are the same person for uniqueness
    pub duplicate_threshold: f64,
    /// Stricter distance for replacing one's own descriptor or face login
    pub continuity_threshold: f64,
    pub max_continuity_retries: u32,
    pub max_face_login_attempts: u32,
    pub max_liveness_attempts: u32,
    /// Ask for a TOTP code after a face match when 2FA is enabled
    pub require_totp_at_login: bool,
}

/// Global application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub app_name: String,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub biometric: BiometricConfig,
    pub liveness: LivenessConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/facetrust.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            password_memory_kib: 19456,
            password_pepper: None,
            max_failed_attempts: 5,
            attempt_window_minutes: 30,
            totp_issuer: "FaceTrust".to_string(),
            totp_skew_steps: 2,
            vault_passphrase: "change_me_in_production".to_string(),
            vault_salt: "facetrust_vault_salt_v1".to_string(),
            vault_kdf_iterations: 100_000,
        }
    }
}

impl Default for BiometricConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.60,
            continuity_threshold: 0.45,
            max_continuity_retries: 3,
            max_face_login_attempts: 3,
            max_liveness_attempts: 5,
            require_totp_at_login: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "FaceTrust".to_string(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            biometric: BiometricConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }
}

impl SecurityConfig {
    pub fn attempt_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.attempt_window_minutes)
    }
}

/// Load configuration from `path`, writing the defaults there if the file is missing.
/// Environment overrides are applied on top.
pub fn load_config(path: &str) -> Result<Config> {
    let mut config = if !Path::new(path).exists() {
        debug!("No config at {}, writing defaults", path);
        let default_config = Config::default();
        save_config(path, &default_config)?;
        default_config
    } else {
        let mut file = File::open(path).context(format!("Failed to open config file: {}", path))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).context("Failed to read config file")?;

        match path.ends_with(".toml") {
            true => toml::from_str(&contents).context("Failed to parse TOML config")?,
            false => serde_json::from_str(&contents).context("Failed to parse JSON config")?,
        }
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(path: &str, config: &Config) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
    }

    let serialized = match path.ends_with(".toml") {
        true => toml::to_string_pretty(config).context("Failed to serialize config to TOML")?,
        false => serde_json::to_string_pretty(config).context("Failed to serialize config to JSON")?,
    };

    std::fs::write(path, serialized).context(format!("Failed to write config to file: {}", path))?;

    Ok(())
}

/// Secrets from the environment win over the file
fn apply_env_overrides(config: &mut Config) {
    if let Ok(pepper) = std::env::var(PEPPER_ENV) {
        config.security.password_pepper = Some(pepper);
    }
    if let Ok(passphrase) = std::env::var(VAULT_KEY_ENV) {
        config.security.vault_passphrase = passphrase;
    }
    if config.security.vault_passphrase == SecurityConfig::default().vault_passphrase {
        warn!("Using the default vault passphrase; set {} in production", VAULT_KEY_ENV);
    }
}

fn validate(config: &Config) -> Result<()> {
    let bio = &config.biometric;
    if !(bio.continuity_threshold > 0.0 && bio.duplicate_threshold > 0.0) {
        anyhow::bail!("Biometric thresholds must be positive");
    }
    if bio.continuity_threshold > bio.duplicate_threshold {
        anyhow::bail!(
            "biometric.continuity_threshold ({}) must not be looser than biometric.duplicate_threshold ({})",
            bio.continuity_threshold,
            bio.duplicate_threshold
        );
    }
    if config.security.max_failed_attempts == 0 {
        anyhow::bail!("security.max_failed_attempts must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.app_name, "FaceTrust");
        assert_eq!(config.security.max_failed_attempts, 5);
        assert_eq!(config.security.attempt_window(), chrono::Duration::minutes(30));
        assert_eq!(config.biometric.duplicate_threshold, 0.60);
        assert_eq!(config.biometric.continuity_threshold, 0.45);
        assert_eq!(config.liveness.detect_threshold, 25.0);
    }

    #[test]
    fn test_load_save_toml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("facetrust.toml");
        let config_path_str = config_path.to_str().unwrap();

        let mut config = Config::default();
        config.biometric.duplicate_threshold = 0.55;
        config.liveness.min_quality_frames = 20;
        save_config(config_path_str, &config).unwrap();

        let loaded = load_config(config_path_str).unwrap();
        assert_eq!(loaded.biometric.duplicate_threshold, 0.55);
        assert_eq!(loaded.liveness.min_quality_frames, 20);
        assert_eq!(loaded.database.path, config.database.path);
    }

    #[test]
    fn test_missing_file_written_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nested").join("config.json");
        let config_path_str = config_path.to_str().unwrap();

        let loaded = load_config(config_path_str).unwrap();

        assert!(config_path.exists());
        assert_eq!(loaded.security.totp_issuer, "FaceTrust");
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bad.json");
        let mut config = Config::default();
        config.biometric.duplicate_threshold = -1.0;
        save_config(config_path.to_str().unwrap(), &config).unwrap();

        assert!(load_config(config_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_load_applies_env_overrides() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("env.toml");
        save_config(config_path.to_str().unwrap(), &Config::default()).unwrap();

        std::env::set_var(PEPPER_ENV, "ab".repeat(32));
        let loaded = load_config(config_path.to_str().unwrap());
        std::env::remove_var(PEPPER_ENV);

        assert_eq!(loaded.unwrap().security.password_pepper, Some("ab".repeat(32)));
    }

    #[test]
    fn test_continuity_looser_than_duplicate_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("loose.toml");
        let mut config = Config::default();
        config.biometric.continuity_threshold = 0.7;
        save_config(config_path.to_str().unwrap(), &config).unwrap();

        let err = load_config(config_path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("continuity_threshold"));

        config.biometric.continuity_threshold = 0.6;
        save_config(config_path.to_str().unwrap(), &config).unwrap();
        assert!(load_config(config_path.to_str().unwrap()).is_ok());
    }
}
