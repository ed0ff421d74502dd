//! Device listing command.

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use usblink::{DeviceDescriptor, Session, format_listing};

/// One entry of `list-devices --json`.
#[derive(Debug, Serialize)]
struct DeviceEntry<'a> {
    #[serde(flatten)]
    device: &'a DeviceDescriptor,
    /// Bridge family name.
    kind: &'static str,
    /// Whether the bridge family is recognized.
    known: bool,
    /// Same line `list-devices` prints without `--json`.
    listing: String,
}

fn to_json(devices: &[DeviceDescriptor]) -> Result<String> {
    let listings = format_listing(devices);
    let entries: Vec<DeviceEntry<'_>> = devices
        .iter()
        .zip(listings)
        .map(|(device, listing)| {
            let kind = device.kind();
            DeviceEntry {
                device,
                kind: kind.name(),
                known: kind.is_known(),
                listing,
            }
        })
        .collect();
    serde_json::to_string_pretty(&entries).context("Failed to serialize device list")
}

/// List devices: listing lines on stdout, decoration on stderr.
pub(crate) fn cmd_list_devices(session: &Session, json: bool) -> Result<()> {
    let devices = session.list_devices();

    if json {
        println!("{}", to_json(&devices)?);
        return Ok(());
    }

    eprintln!("{}", style("USB serial devices:").bold().underlined());

    if devices.is_empty() {
        eprintln!("  {}", style("No USB serial devices found").dim());
        return Ok(());
    }

    for line in format_listing(&devices) {
        println!("{line}");
    }

    Ok(())
}
