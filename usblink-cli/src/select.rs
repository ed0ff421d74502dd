//! Interactive device selection.
//!
//! Picks the device to connect to from, in order:
//! - the `--port` flag or `USBLINK_PORT`
//! - the configured default port
//! - the single attached device, or an interactive choice when several are
//!   attached (never prompting in non-interactive mode)

use {
    crate::CliError,
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
    usblink::DeviceDescriptor,
};

/// Inputs to device selection.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Explicit device from the command line or environment.
    pub port: Option<String>,
    /// Device from the config file.
    pub configured: Option<String>,
    /// Fail instead of prompting.
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures are usage errors so scripts can tell them apart
    // from device failures (exit 2 rather than 1).
    CliError::Usage(message.to_string()).into()
}

/// Choose a device id among `devices` according to `options`.
pub fn select_device(options: &SelectOptions, devices: Vec<DeviceDescriptor>) -> Result<String> {
    if let Some(port) = &options.port {
        return Ok(port.clone());
    }

    if let Some(port) = &options.configured {
        debug!("Using port from config: {port}");
        return Ok(port.clone());
    }

    match devices.len().cmp(&1) {
        Ordering::Less => Err(usage_err("No USB serial devices found")),
        Ordering::Equal => {
            let device = devices
                .into_iter()
                .next()
                .ok_or_else(|| usage_err("No USB serial devices found"))?;
            info!("Auto-selected device: {device}");
            Ok(device.id)
        },
        Ordering::Greater if options.non_interactive => Err(usage_err(
            "Multiple USB serial devices found; specify one with --port",
        )),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_interactive(devices)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Multiple USB serial devices found and no terminal to choose from; use --port",
        ))
    }
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Device selection cancelled".to_string()).into()
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err("Device selection prompt failed")
            }
        },
    }
}

/// Menu label: known bridge families are highlighted.
fn device_label(device: &DeviceDescriptor) -> String {
    let kind = device.kind();
    let family = if kind.is_known() {
        format!(" [{}]", style(kind.name()).yellow())
    } else {
        String::new()
    };
    format!("{}{family}", device)
}

fn select_interactive(mut devices: Vec<DeviceDescriptor>) -> Result<String> {
    eprintln!(
        "{} Found {} USB serial devices",
        style("ℹ").blue(),
        devices.len()
    );

    // Known bridges first; stable sort keeps attachment order otherwise
    devices.sort_by_key(|device| !device.kind().is_known());

    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = devices
        .iter()
        .map(|device| {
            let label = device_label(device);
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a device")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => devices
            .into_iter()
            .nth(index)
            .map(|device| device.id)
            .ok_or_else(|| anyhow::anyhow!("Invalid device index: {index}")),
        None => Err(cancelled()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(ids: &[&str]) -> Vec<DeviceDescriptor> {
        ids.iter()
            .map(|id| DeviceDescriptor::new(*id, 0x1A86, 0x7523))
            .collect()
    }

    fn usage_message(err: &anyhow::Error) -> Option<String> {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(message)) => Some(message.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let options = SelectOptions {
            port: Some("/dev/ttyUSB9".into()),
            configured: Some("/dev/ttyUSB0".into()),
            non_interactive: true,
        };
        assert_eq!(select_device(&options, Vec::new()).unwrap(), "/dev/ttyUSB9");
    }

    #[test]
    fn test_configured_port_used_without_flag() {
        let options = SelectOptions {
            configured: Some("COM4".into()),
            ..SelectOptions::default()
        };
        assert_eq!(select_device(&options, devices(&["COM3"])).unwrap(), "COM4");
    }

    #[test]
    fn test_single_device_auto_selected() {
        let options = SelectOptions {
            non_interactive: true,
            ..SelectOptions::default()
        };
        assert_eq!(
            select_device(&options, devices(&["/dev/ttyACM0"])).unwrap(),
            "/dev/ttyACM0"
        );
    }

    #[test]
    fn test_no_devices_is_usage_error() {
        let err = select_device(&SelectOptions::default(), Vec::new()).unwrap_err();
        assert!(
            usage_message(&err)
                .unwrap()
                .contains("No USB serial devices")
        );
    }

    #[test]
    fn test_multiple_devices_non_interactive_is_usage_error() {
        let options = SelectOptions {
            non_interactive: true,
            ..SelectOptions::default()
        };
        let attached = devices(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        let err = select_device(&options, attached).unwrap_err();
        assert!(usage_message(&err).unwrap().contains("Multiple"));
    }

    #[test]
    fn test_device_label_marks_known_bridge() {
        console::set_colors_enabled(false);
        let device = DeviceDescriptor::new("/dev/ttyUSB0", 0x1A86, 0x7523)
            .with_product("USB Serial");
        let label = device_label(&device);
        assert_eq!(
            label,
            "/dev/ttyUSB0 - USB Serial - VID:1A86 PID:7523 [CH34x]"
        );

        let label = device_label(&DeviceDescriptor::new("/dev/ttyACM0", 0x1234, 0x0001));
        assert!(!label.contains('['));
    }
}
