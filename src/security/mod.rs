//! Credential hashing, secret sealing, TOTP and failed-attempt accounting.

pub mod attempts;
pub mod encryption;
pub mod password;
pub mod totp;

pub use attempts::AttemptLedger;
pub use encryption::SecretSealer;
pub use password::{Argon2Hasher, CredentialHasher};
pub use totp::{Provisioning, SecretSource, SecretVault, TotpSecret, VaultError};
