use anyhow::{anyhow, Context, Result};
use log::{error, info};
use std::sync::Arc;

use super::utils::{confirm, display_qr_code, read_line};
use super::Gate;
use facetrust::clock::SystemClock;
use facetrust::config::Config;
use facetrust::database::{AuditEventType, MemoryStore};
use facetrust::security::{SecretSealer, SecretVault, TotpSecret, VaultError};

const SETUP_TRIES: u32 = 3;

/// Issue a secret for an identity, show it as a QR code and enable it once
/// the user proves their authenticator produces matching codes.
pub fn setup(gate: &Gate, email: &str) -> Result<()> {
    let identity = gate.identity_by_email(email)?;
    let vault = gate.orchestrator.vault();

    if vault.is_enabled(&identity.id)? {
        return Err(anyhow!("Two-factor authentication is already enabled for {}", identity.email));
    }

    let provisioning = vault.generate_secret(&identity.email)?;
    display_qr_code(&provisioning.uri)?;
    println!("If you can't scan the QR code, enter this secret manually:");
    println!("{}\n", provisioning.secret.as_base32());

    for attempt in 1..=SETUP_TRIES {
        let code = read_line(&format!("Code (attempt {}/{}): ", attempt, SETUP_TRIES))?;

        match vault.verify(&provisioning.secret, &code) {
            Ok(true) => {
                vault.enable(&identity.id, &provisioning.secret)?;
                gate.audit(AuditEventType::TotpEnabled, &identity.id, "cli");
                println!("\n✅ Two-factor authentication enabled for {}.", identity.email);
                return Ok(());
            }
            Ok(false) => println!("❌ Invalid code. Please try again."),
            Err(VaultError::MalformedCode) => println!("❌ Invalid code format. The code must be 6 digits."),
            Err(e) => {
                error!("Verification failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Err(anyhow!(
        "Failed to verify the authenticator setup after {} attempts; nothing was enabled",
        SETUP_TRIES
    ))
}

pub fn disable(gate: &Gate, email: &str) -> Result<()> {
    let identity = gate.identity_by_email(email)?;

    println!("⚠️  Disabling two-factor authentication removes the TOTP fallback for locked-out logins.");
    if !confirm(&format!("Disable two-factor authentication for {}?", identity.email))? {
        println!("Cancelled.");
        return Ok(());
    }

    if gate.orchestrator.vault().disable(&identity.id)? {
        gate.audit(AuditEventType::TotpDisabled, &identity.id, "cli");
        info!("Two-factor disabled from the CLI");
        println!("✅ Two-factor authentication disabled.");
    } else {
        println!("Two-factor authentication was not enabled for {}.", identity.email);
    }

    Ok(())
}

/// Print the current code for a base32 secret
pub fn print_code(config: &Config, secret: &str) -> Result<()> {
    let secret = TotpSecret::from_base32(secret).context("Invalid TOTP secret")?;

    // Code generation never touches storage
    let vault = SecretVault::new(
        Arc::new(MemoryStore::new()),
        SecretSealer::new([0u8; 32]),
        Arc::new(SystemClock),
        config.security.totp_issuer.clone(),
        config.security.totp_skew_steps,
    );

    println!("{}", vault.current_code(&secret)?);
    Ok(())
}
