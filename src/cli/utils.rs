use anyhow::{Context, Result};
use qrcode::{render::unicode, QrCode};
use std::io::{self, Write};

/// Display a QR code in the terminal
pub fn display_qr_code(uri: &str) -> Result<()> {
    let code = QrCode::new(uri).context("Failed to create QR code")?;

    let qr = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();

    println!("\nScan this QR code with your authenticator app:\n");
    println!("{}", qr);
    println!();

    Ok(())
}

/// Read a line of input from the terminal
pub fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_string())
}

/// Ask a yes/no question; anything but "y"/"yes" is a no
pub fn confirm(prompt: &str) -> Result<bool> {
    let answer = read_line(&format!("{} [y/N]: ", prompt))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}
