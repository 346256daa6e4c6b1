use anyhow::{anyhow, Result};
use log::info;

use super::utils::confirm;
use super::Gate;
use facetrust::database::{AuditEventType, IdentityStore};

/// List all identities with their enrollment state
pub fn list_identities(gate: &Gate) -> Result<()> {
    let identities = gate.store.list_identities()?;

    println!(
        "{:<36} {:<30} {:<24} {:<6} {:<7} {:<5} {:<4}",
        "ID", "Email", "Name", "Role", "Active", "Face", "2FA"
    );
    println!("{:-<36} {:-<30} {:-<24} {:-<6} {:-<7} {:-<5} {:-<4}", "", "", "", "", "", "", "");

    for identity in &identities {
        println!(
            "{:<36} {:<30} {:<24} {:<6} {:<7} {:<5} {:<4}",
            identity.id,
            identity.email,
            identity.full_name(),
            identity.role.as_str(),
            yes_no(identity.active),
            yes_no(identity.descriptor.is_some()),
            yes_no(identity.two_factor_enabled()),
        );
    }
    println!("\n{} identities", identities.len());

    Ok(())
}

pub fn deactivate(gate: &Gate, email: &str) -> Result<()> {
    let identity = gate.identity_by_email(email)?;
    if !identity.active {
        println!("{} is already inactive.", identity.email);
        return Ok(());
    }

    println!("Deactivating {} ({}).", identity.full_name(), identity.email);
    println!("The identity will no longer be able to log in and its face will be free for re-enrollment.");
    if !confirm("Continue?")? {
        println!("Cancelled.");
        return Ok(());
    }

    if !gate.store.set_active(&identity.id, false)? {
        return Err(anyhow!("Identity disappeared before it could be deactivated"));
    }
    gate.audit(AuditEventType::IdentityDeactivated, &identity.id, "cli");
    info!("Identity {} deactivated", identity.id);
    println!("✅ Identity deactivated.");

    Ok(())
}

/// Remove an identity and its two-factor binding for good
pub fn delete(gate: &Gate, email: &str) -> Result<()> {
    let identity = gate.identity_by_email(email)?;

    println!("⚠️  Deleting {} ({}) cannot be undone.", identity.full_name(), identity.email);
    if !confirm("Delete this identity?")? {
        println!("Cancelled.");
        return Ok(());
    }

    if !gate.store.delete_identity(&identity.id)? {
        return Err(anyhow!("Identity disappeared before it could be deleted"));
    }
    gate.audit(AuditEventType::IdentityDeleted, &identity.id, "cli");
    info!("Identity {} deleted", identity.id);
    println!("✅ Identity deleted.");

    Ok(())
}

/// Print the failed-login count for `email` within the window, optionally clearing it
pub fn attempts(gate: &Gate, email: &str, clear: bool) -> Result<()> {
    let ledger = gate.orchestrator.ledger();
    let count = ledger.count(email)?;
    println!(
        "{} failed attempt(s) in the last {} minutes for {}",
        count,
        ledger.window().num_minutes(),
        email
    );

    if clear {
        ledger.clear(email)?;
        println!("✅ Failed-attempt count cleared.");
    }

    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
