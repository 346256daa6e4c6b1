use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing for small secrets stored at rest.
///
/// Sealed values are `base64(nonce || ciphertext)`; a fresh nonce is drawn
/// for every seal.
#[derive(Clone)]
pub struct SecretSealer {
    key: [u8; AES_KEY_LEN],
}

impl SecretSealer {
    pub fn new(key: [u8; AES_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Derive the sealing key from a passphrase with PBKDF2-HMAC-SHA256
    pub fn from_passphrase(passphrase: &str, salt: &[u8], iterations: u32) -> Self {
        Self::new(derive_key_from_password(passphrase, salt, iterations))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| anyhow!("Encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(general_purpose::STANDARD.encode(&sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let decoded = general_purpose::STANDARD
            .decode(sealed)
            .context("Failed to decode sealed value")?;

        if decoded.len() <= NONCE_LEN {
            return Err(anyhow!("Invalid ciphertext length"));
        }
        let (nonce_bytes, ciphertext) = decoded.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow!("Decryption failed"))
    }

    pub fn seal_str(&self, plaintext: &str) -> Result<String> {
        self.seal(plaintext.as_bytes())
    }

    pub fn open_str(&self, sealed: &str) -> Result<String> {
        String::from_utf8(self.open(sealed)?).context("Sealed value is not valid UTF-8")
    }
}

/// Derive an AES-256 key from a password using PBKDF2
pub fn derive_key_from_password(password: &str, salt: &[u8], iterations: u32) -> [u8; AES_KEY_LEN] {
    let mut key = [0u8; AES_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}
