use log::{debug, info};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::sync::Arc;
use totp_rs::{Algorithm, TOTP};

use crate::clock::Clock;
use crate::database::{IdentityStore, StoreError, TwoFactorBinding};
use crate::security::encryption::SecretSealer;

const DIGITS: usize = 6;
const PERIOD: u64 = 30;
const ALGORITHM: Algorithm = Algorithm::SHA1;
const SECRET_LEN: usize = 32;
// RFC 4226 minimum
const MIN_SECRET_BYTES: usize = 16;
const ALPHABET: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Verification code must be exactly 6 digits")]
    MalformedCode,

    #[error("Invalid secret label: {0}")]
    InvalidLabel(String),

    #[error("No enabled two-factor secret")]
    NotConfigured,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("TOTP error: {0}")]
    Totp(String),

    #[error("Secret sealing failed: {0}")]
    Sealing(String),
}

/// A TOTP shared secret (base32, no padding). Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct TotpSecret(String);

impl TotpSecret {
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(base32::encode(ALPHABET, &bytes))
    }

    /// Accepts upper or lower case, with or without `=` padding and spaces
    pub fn from_base32(encoded: &str) -> Result<Self, VaultError> {
        let cleaned: String = encoded
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .collect::<String>()
            .to_uppercase();

        match base32::decode(ALPHABET, &cleaned) {
            Some(bytes) if bytes.len() >= MIN_SECRET_BYTES => Ok(Self(cleaned)),
            Some(bytes) => Err(VaultError::Totp(format!(
                "secret is {} bytes, at least {} required",
                bytes.len(),
                MIN_SECRET_BYTES
            ))),
            None => Err(VaultError::Totp("secret is not valid base32".to_string())),
        }
    }

    pub fn as_base32(&self) -> &str {
        &self.0
    }

    fn bytes(&self) -> Result<Vec<u8>, VaultError> {
        base32::decode(ALPHABET, &self.0).ok_or_else(|| VaultError::Totp("secret is not valid base32".to_string()))
    }
}

impl fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TotpSecret(<redacted>)")
    }
}

/// A freshly generated secret and its `otpauth://` URI
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub secret: TotpSecret,
    pub uri: String,
}

/// Where the secret for a verification comes from
#[derive(Debug, Clone, PartialEq)]
pub enum SecretSource {
    /// Carried by the flow; not yet tied to any identity
    Ephemeral(TotpSecret),
    /// Enabled secret of a stored identity
    Persisted(String),
}

/// TOTP secret lifecycle: issue, enable, disable, verify.
///
/// Verification itself does not care where a secret came from; only
/// `verify_source` looks one up.
pub struct SecretVault {
    store: Arc<dyn IdentityStore>,
    sealer: SecretSealer,
    clock: Arc<dyn Clock>,
    issuer: String,
    skew: u8,
}

impl SecretVault {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        sealer: SecretSealer,
        clock: Arc<dyn Clock>,
        issuer: impl Into<String>,
        skew: u8,
    ) -> Self {
        Self {
            store,
            sealer,
            clock,
            issuer: issuer.into(),
            skew,
        }
    }

    /// Issue a new ephemeral secret bound to `label` (usually an email)
    pub fn generate_secret(&self, label: &str) -> Result<Provisioning, VaultError> {
        let secret = TotpSecret::generate();
        let uri = self.provisioning_uri(&secret, label)?;
        debug!("Issued ephemeral TOTP secret");
        Ok(Provisioning { secret, uri })
    }

    pub fn provisioning_uri(&self, secret: &TotpSecret, label: &str) -> Result<String, VaultError> {
        let label = label.trim();
        if label.is_empty() || label.contains(':') {
            return Err(VaultError::InvalidLabel(label.to_string()));
        }
        Ok(self.totp(secret, Some(label))?.get_url())
    }

    /// Seal `secret` into an enabled binding for `identity_id` without storing it
    pub fn bind(&self, identity_id: &str, secret: &TotpSecret) -> Result<TwoFactorBinding, VaultError> {
        let now = self.clock.now();
        let sealed_secret = self
            .sealer
            .seal_str(secret.as_base32())
            .map_err(|e| VaultError::Sealing(e.to_string()))?;

        Ok(TwoFactorBinding {
            identity_id: identity_id.to_string(),
            sealed_secret,
            enabled: true,
            enabled_at: Some(now),
            updated_at: now,
        })
    }

    /// Persist `secret` as the enabled secret of `identity_id`, replacing any previous one
    pub fn enable(&self, identity_id: &str, secret: &TotpSecret) -> Result<(), VaultError> {
        let binding = self.bind(identity_id, secret)?;
        self.store.put_two_factor(&binding)?;
        info!("Two-factor enabled for identity {}", identity_id);
        Ok(())
    }

    /// Clear the enabled flag; the sealed secret stays on record.
    /// Returns false when nothing was enabled.
    pub fn disable(&self, identity_id: &str) -> Result<bool, VaultError> {
        match self.store.get_two_factor(identity_id)? {
            Some(mut binding) if binding.enabled => {
                binding.enabled = false;
                binding.updated_at = self.clock.now();
                self.store.put_two_factor(&binding)?;
                info!("Two-factor disabled for identity {}", identity_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn is_enabled(&self, identity_id: &str) -> Result<bool, VaultError> {
        Ok(self
            .store
            .get_two_factor(identity_id)?
            .map_or(false, |binding| binding.enabled))
    }

    /// Check `code` against `secret` at the current time, allowing the configured skew
    pub fn verify(&self, secret: &TotpSecret, code: &str) -> Result<bool, VaultError> {
        self.verify_at(secret, code, self.unix_now())
    }

    pub fn verify_at(&self, secret: &TotpSecret, code: &str, time: u64) -> Result<bool, VaultError> {
        check_format(code)?;
        Ok(self.totp(secret, None)?.check(code, time))
    }

    /// Resolve the secret for `source` and verify `code` against it
    pub fn verify_source(&self, source: &SecretSource, code: &str) -> Result<bool, VaultError> {
        match source {
            SecretSource::Ephemeral(secret) => self.verify(secret, code),
            SecretSource::Persisted(identity_id) => {
                let secret = self.persisted_secret(identity_id)?;
                self.verify(&secret, code)
            }
        }
    }

    /// Code for `secret` at unix time `time`
    pub fn code_at(&self, secret: &TotpSecret, time: u64) -> Result<String, VaultError> {
        Ok(self.totp(secret, None)?.generate(time))
    }

    pub fn current_code(&self, secret: &TotpSecret) -> Result<String, VaultError> {
        self.code_at(secret, self.unix_now())
    }

    fn persisted_secret(&self, identity_id: &str) -> Result<TotpSecret, VaultError> {
        let binding = match self.store.get_two_factor(identity_id)? {
            Some(binding) if binding.enabled => binding,
            _ => return Err(VaultError::NotConfigured),
        };
        let encoded = self
            .sealer
            .open_str(&binding.sealed_secret)
            .map_err(|e| VaultError::Sealing(e.to_string()))?;
        TotpSecret::from_base32(&encoded)
    }

    fn totp(&self, secret: &TotpSecret, label: Option<&str>) -> Result<TOTP, VaultError> {
        TOTP::new(
            ALGORITHM,
            DIGITS,
            self.skew,
            PERIOD,
            secret.bytes()?,
            Some(self.issuer.clone()),
            label.unwrap_or_default().to_string(),
        )
        .map_err(|e| VaultError::Totp(e.to_string()))
    }

    fn unix_now(&self) -> u64 {
        self.clock.now().timestamp().max(0) as u64
    }
}

fn check_format(code: &str) -> Result<(), VaultError> {
    if code.len() == DIGITS && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(VaultError::MalformedCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::{IdentityRecord, MemoryStore};
    use chrono::Utc;
    use test_case::test_case;

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";
    const T: u64 = 1_700_000_010;

    fn vault_with_store() -> (SecretVault, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_timestamp(T as i64));
        let sealer = SecretSealer::from_passphrase("test", b"salt-for-tests", 1000);
        (SecretVault::new(store.clone(), sealer, clock, "FaceTrust", 2), store)
    }

    fn vault() -> SecretVault {
        vault_with_store().0
    }

    fn identity(store: &MemoryStore) -> String {
        let record = IdentityRecord::new(
            "ana@example.com".into(),
            "Ana".into(),
            "Diaz".into(),
            "1710034065".into(),
            "hash".into(),
            Utc::now(),
        );
        store.commit_identity(&record, &|_| false).unwrap();
        record.id
    }

    #[test_case(0, true ; "same step")]
    #[test_case(30, true ; "one step later")]
    #[test_case(-30, true ; "one step earlier")]
    #[test_case(60, true ; "two steps later")]
    #[test_case(90, false ; "three steps later")]
    #[test_case(-90, false ; "three steps earlier")]
    fn test_skew_window(offset: i64, accepted: bool) {
        let vault = vault();
        let secret = TotpSecret::from_base32(SECRET).unwrap();
        let code = vault.code_at(&secret, T).unwrap();

        let at = (T as i64 + offset) as u64;
        assert_eq!(vault.verify_at(&secret, &code, at).unwrap(), accepted);
    }

    #[test_case("12345" ; "too short")]
    #[test_case("1234567" ; "too long")]
    #[test_case("12a456" ; "not numeric")]
    #[test_case("" ; "empty")]
    fn test_malformed_codes_rejected(code: &str) {
        let vault = vault();
        let secret = TotpSecret::from_base32(SECRET).unwrap();
        assert!(matches!(vault.verify(&secret, code), Err(VaultError::MalformedCode)));
    }

    #[test]
    fn test_generated_secret_uri() {
        let provisioning = vault().generate_secret("ana@example.com").unwrap();

        assert!(provisioning.uri.starts_with("otpauth://totp/"));
        assert!(provisioning.uri.contains("FaceTrust"));
        assert!(provisioning.uri.contains(provisioning.secret.as_base32()));
    }

    #[test]
    fn test_label_with_colon_rejected() {
        assert!(matches!(
            vault().generate_secret("bad:label"),
            Err(VaultError::InvalidLabel(_))
        ));
    }

    #[test]
    fn test_secret_parsing() {
        let lower = TotpSecret::from_base32("jbswy3dpehpk3pxp jbswy3dpehpk3pxp").unwrap();
        assert_eq!(lower.as_base32(), SECRET);
        assert!(TotpSecret::from_base32("JBSWY3DP").is_err());
        assert!(TotpSecret::from_base32("!!!!").is_err());
        assert_eq!(format!("{:?}", lower), "TotpSecret(<redacted>)");
    }

    #[test]
    fn test_enable_verify_disable_lifecycle() {
        let (vault, store) = vault_with_store();
        let id = identity(&store);
        let secret = TotpSecret::from_base32(SECRET).unwrap();
        let source = SecretSource::Persisted(id.clone());

        assert!(matches!(vault.verify_source(&source, "123456"), Err(VaultError::NotConfigured)));

        vault.enable(&id, &secret).unwrap();
        assert!(vault.is_enabled(&id).unwrap());

        let stored = store.get_two_factor(&id).unwrap().unwrap();
        assert!(!stored.sealed_secret.contains(SECRET));

        let code = vault.current_code(&secret).unwrap();
        assert!(vault.verify_source(&source, &code).unwrap());

        assert!(vault.disable(&id).unwrap());
        assert!(!vault.is_enabled(&id).unwrap());
        assert!(store.get_two_factor(&id).unwrap().is_some());
        assert!(matches!(vault.verify_source(&source, &code), Err(VaultError::NotConfigured)));
        assert!(!vault.disable(&id).unwrap());
    }

    #[test]
    fn test_reenable_replaces_secret() {
        let (vault, store) = vault_with_store();
        let id = identity(&store);
        let first = TotpSecret::generate();
        let second = TotpSecret::generate();

        vault.enable(&id, &first).unwrap();
        vault.enable(&id, &second).unwrap();

        let source = SecretSource::Persisted(id);
        let code = vault.current_code(&second).unwrap();
        assert!(vault.verify_source(&source, &code).unwrap());
    }

    #[test]
    fn test_ephemeral_source_needs_no_identity() {
        let vault = vault();
        let provisioning = vault.generate_secret("new@example.com").unwrap();
        let code = vault.current_code(&provisioning.secret).unwrap();

        let source = SecretSource::Ephemeral(provisioning.secret);
        assert!(vault.verify_source(&source, &code).unwrap());
    }
}
