use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use hmac::{Hmac, Mac};
use log::{debug, warn};
use sha2::Sha256;

/// One-way credential hashing
#[cfg_attr(test, mockall::automock)]
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String>;

    /// Ok(false) for a wrong secret; Err only when the digest is unusable
    fn verify(&self, secret: &str, digest: &str) -> Result<bool>;
}

/// Argon2id with an HMAC-SHA256 pepper applied before hashing.
///
/// The pepper is never stored next to the hash; losing it invalidates every
/// stored credential.
pub struct Argon2Hasher {
    memory_kib: u32,
    pepper: [u8; 32],
}

impl Argon2Hasher {
    pub fn new(memory_kib: u32, pepper: [u8; 32]) -> Self {
        Self { memory_kib, pepper }
    }

    /// Pepper from a 64-character hex string
    pub fn with_hex_pepper(memory_kib: u32, pepper_hex: &str) -> Result<Self> {
        let bytes = hex::decode(pepper_hex.trim()).context("Password pepper is not valid hex")?;
        let pepper: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("Password pepper must be 32 bytes"))?;
        Ok(Self::new(memory_kib, pepper))
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_kib, 2, 1, None)
            .map_err(|e| anyhow!("Invalid Argon2 parameters: {}", e))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn apply_pepper(&self, secret: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.pepper)
            .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
        mac.update(secret.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let peppered = self.apply_pepper(secret)?;

        let digest = self
            .argon2()?
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash password: {}", e))?
            .to_string();

        debug!("Password hashed with Argon2id ({} KiB)", self.memory_kib);
        Ok(digest)
    }

    fn verify(&self, secret: &str, digest: &str) -> Result<bool> {
        let parsed = PasswordHash::new(digest).map_err(|e| anyhow!("Failed to parse password hash: {}", e))?;
        let peppered = self.apply_pepper(secret)?;

        // Parameters come from the digest itself
        match Argon2::default().verify_password(peppered.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => {
                warn!("Password verification error: {}", e);
                Err(anyhow!("Password verification failed: {}", e))
            }
        }
    }
}
