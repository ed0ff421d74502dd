//! One-shot write command.

use anyhow::{Context, Result};
use console::style;
use log::{debug, info};
use usblink::Session;

use crate::{CliError, use_fancy_output};

fn invalid_hex(detail: &str) -> anyhow::Error {
    CliError::Usage(format!("Invalid hex data: {detail}")).into()
}

/// Parse hex bytes such as `"01 02 ff"`, `"0102ff"` or `"0x01,0x02"`.
fn parse_hex_bytes(input: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in input.split(|c: char| c.is_ascii_whitespace() || c == ',' || c == ':') {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() {
            continue;
        }
        if digits.len() % 2 != 0 {
            return Err(invalid_hex(&format!("odd number of digits in \"{token}\"")));
        }
        for pair in digits.as_bytes().chunks(2) {
            let pair =
                std::str::from_utf8(pair).map_err(|_| invalid_hex(&format!("\"{token}\"")))?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| invalid_hex(&format!("\"{pair}\" in \"{token}\"")))?;
            bytes.push(byte);
        }
    }

    if bytes.is_empty() {
        return Err(invalid_hex("no bytes given"));
    }
    Ok(bytes)
}

/// Bytes to send for `send DATA [--hex] [--newline]`.
pub(crate) fn build_payload(data: &str, hex: bool, newline: bool) -> Result<Vec<u8>> {
    let mut payload = if hex {
        parse_hex_bytes(data)?
    } else {
        data.as_bytes().to_vec()
    };
    if newline {
        payload.extend_from_slice(b"\r\n");
    }
    if payload.is_empty() {
        return Err(CliError::Usage("Nothing to send".to_string()).into());
    }
    Ok(payload)
}

/// Connect to `device`, write `payload`, then disconnect.
pub(crate) fn cmd_send(session: &Session, device: &str, baud: u32, payload: &[u8]) -> Result<()> {
    session
        .connect(device, Some(baud))
        .wait()
        .with_context(|| format!("Failed to connect to {device}"))?;
    debug!("Sending {} bytes to {device}", payload.len());

    let written = session
        .write(payload)
        .wait()
        .with_context(|| format!("Failed to write to {device}"));
    // Close even when the write failed
    let _ = session.disconnect().wait();
    written?;

    if use_fancy_output() {
        eprintln!(
            "{} Sent {} bytes to {}",
            style("✓").green().bold(),
            payload.len(),
            style(device).cyan()
        );
    } else {
        info!("Sent {} bytes to {device}", payload.len());
    }
    Ok(())
}
