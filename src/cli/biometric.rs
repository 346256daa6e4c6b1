use anyhow::{Context, Result};
use std::fs;
use std::sync::atomic::AtomicBool;

use facetrust::biometric::{FaceDescriptor, FrameObservation, LivenessGate, RecordedCapture};
use facetrust::config::Config;

/// Compare two descriptor files and report where the distance falls
/// relative to the configured thresholds.
pub fn distance(config: &Config, first: &str, second: &str) -> Result<()> {
    let a = read_descriptor(first)?;
    let b = read_descriptor(second)?;
    let distance = a.distance_to(&b);
    let policy = &config.biometric;

    println!("Distance: {:.4}", distance);
    println!(
        "Same person (continuity < {:.2}): {}",
        policy.continuity_threshold,
        if distance < policy.continuity_threshold { "yes" } else { "no" }
    );
    println!(
        "Duplicate (< {:.2}): {}",
        policy.duplicate_threshold,
        if distance < policy.duplicate_threshold { "yes" } else { "no" }
    );

    Ok(())
}

/// Replay a JSON array of frame observations; prints the verdict as JSON.
/// Run with `-dd` to see every frame.
pub fn replay_liveness(config: &Config, frames_path: &str) -> Result<()> {
    let raw = fs::read_to_string(frames_path).with_context(|| format!("Failed to read {}", frames_path))?;
    let frames: Vec<FrameObservation> =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse frame log {}", frames_path))?;
    println!("Replaying {} frames", frames.len());

    let gate = LivenessGate::new(config.liveness.clone());
    let mut capture = RecordedCapture::new(frames);
    let verdict = gate
        .run(&mut capture, &AtomicBool::new(false))
        .context("Liveness replay ended without a verdict")?;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

fn read_descriptor(path: &str) -> Result<FaceDescriptor> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let values: Vec<f64> = serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON number array", path))?;
    FaceDescriptor::from_f64(&values).with_context(|| format!("{} is not a valid descriptor", path))
}
