//! phdc-probe
//!
//! Lists USB personal healthcare devices and dumps the APDUs they send.
//! The transport runs on its own thread; this front-end talks to it over
//! the probe bridge.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use common::{ProbeBridge, ProbeCommand, ProbeEvent, create_probe_bridge, setup_logging};
use protocol::DeviceSummary;
use tokio::signal;
use tracing::{error, info};
use transport::config::{self, TransportConfig};
use transport::usb::spawn_probe_worker;

#[derive(Parser, Debug)]
#[command(name = "phdc-probe")]
#[command(
    author,
    version,
    about = "PHDC Probe - Inspect USB personal healthcare devices"
)]
#[command(long_about = "
Finds USB devices implementing the Personal Healthcare Device Class with
IEEE 11073-20601 data, and streams the APDUs they send.

EXAMPLES:
    # List compatible devices
    phdc-probe

    # Same, as JSON
    phdc-probe --list-devices --json

    # Open the first device and print everything it sends
    phdc-probe --listen 0

    # Open a device and send an APDU once it is open
    phdc-probe --listen 0 --send 'e2 00 00 32 80 00'

CONFIGURATION:
    The probe looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/phdc-usb/transport.toml
    3. /etc/phdc-usb/transport.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List compatible devices and exit (default action)
    #[arg(long, conflicts_with = "listen")]
    list_devices: bool,

    /// Open the device at INDEX and print received APDUs until Ctrl+C
    #[arg(long, value_name = "INDEX")]
    listen: Option<usize>,

    /// Hex-encoded APDU to send after opening (repeatable)
    #[arg(long, value_name = "HEX", requires = "listen")]
    send: Vec<String>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = TransportConfig::default();
        let path = TransportConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        TransportConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.transport.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("phdc-probe v{}", env!("CARGO_PKG_VERSION"));

    let apdus = args
        .send
        .iter()
        .map(|hex| parse_hex(hex))
        .collect::<Result<Vec<_>>>()?;

    let (bridge, worker) = create_probe_bridge();
    let worker_handle = spawn_probe_worker(worker, config.usb.clone())
        .context("Failed to spawn transport thread")?;

    let result = match args.listen {
        Some(index) if !args.list_devices => listen_mode(&bridge, index, apdus, args.json).await,
        _ => list_devices_mode(&bridge, args.json).await,
    };

    info!("Shutting down transport...");
    if let Err(e) = bridge.send_command(ProbeCommand::Shutdown).await {
        error!("Error shutting down transport: {:#}", e);
    }
    drop(bridge);
    if let Err(e) = worker_handle.join() {
        error!("Transport thread panicked: {:?}", e);
    }

    result
}

/// List compatible devices and exit
async fn list_devices_mode(bridge: &ProbeBridge, json: bool) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    bridge
        .send_command(ProbeCommand::ListDevices { response: tx })
        .await
        .context("Failed to send ListDevices command")?;

    let devices = rx.await.context("Failed to receive device list")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No PHDC devices found.");
    } else {
        println!("Found {} PHDC device(s):\n", devices.len());
        for device in &devices {
            print_device(device);
            println!();
        }
    }
    Ok(())
}

/// Open a device, send the given APDUs, print what arrives until Ctrl+C
async fn listen_mode(
    bridge: &ProbeBridge,
    index: usize,
    apdus: Vec<Vec<u8>>,
    json: bool,
) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    bridge
        .send_command(ProbeCommand::Listen {
            index,
            response: tx,
        })
        .await
        .context("Failed to send Listen command")?;

    let device = rx
        .await
        .context("Failed to receive Listen response")?
        .map_err(|e| anyhow!("Failed to open device {}: {}", index, e))?;

    if !json {
        println!("Listening on:");
        print_device(&device);
        println!("\nPress Ctrl+C to stop\n");
    }

    for apdu in apdus {
        let (tx, rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command(ProbeCommand::SendApdu {
                data: apdu.clone(),
                response: tx,
            })
            .await
            .context("Failed to send SendApdu command")?;
        rx.await
            .context("Failed to receive SendApdu response")?
            .map_err(|e| anyhow!("Failed to send APDU: {}", e))?;
        info!("Sent {} byte APDU", apdu.len());
    }

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, stopping"),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                return Ok(());
            }
            event = bridge.recv_event() => {
                match event.context("Transport thread stopped")? {
                    ProbeEvent::ApduReceived { index, data } => {
                        if json {
                            let line = serde_json::json!({
                                "index": index,
                                "data": format_hex(&data),
                            });
                            println!("{}", line);
                        } else {
                            println!("[{}] {:4} bytes  {}", index, data.len(), format_hex(&data));
                        }
                    }
                    ProbeEvent::SessionClosed { index, reason } => {
                        return match reason {
                            Some(reason) => Err(anyhow!("Device {} closed: {}", index, reason)),
                            None => Ok(()),
                        };
                    }
                }
            }
        }
    }
}

fn print_device(device: &DeviceSummary) {
    println!(
        "  [{}] {:04x}:{:04x} - {} {}",
        device.index,
        device.vendor_id,
        device.product_id,
        non_empty_or(&device.manufacturer, "Unknown Manufacturer"),
        non_empty_or(&device.name, "Unknown Device"),
    );
    println!(
        "      Bus {:03} Device {:03} Interface {}",
        device.bus_number, device.device_address, device.health_interface
    );
    if !device.serial_number.is_empty() {
        println!("      Serial: {}", device.serial_number);
    }
    for specialization in &device.specializations {
        println!("      Specialization: {}", specialization);
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// Parse hex bytes, ignoring whitespace, ':' and '-' separators
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: Vec<char> = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    if digits.is_empty() {
        bail!("Empty APDU");
    }
    if digits.len() % 2 != 0 {
        bail!("Odd number of hex digits in '{}'", input);
    }

    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).with_context(|| format!("Invalid hex byte '{}'", byte))
        })
        .collect()
}

fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("e2000032").unwrap(), vec![0xE2, 0x00, 0x00, 0x32]);
        assert_eq!(parse_hex("E2 00:00-32").unwrap(), vec![0xE2, 0x00, 0x00, 0x32]);
        assert!(parse_hex("").is_err());
        assert!(parse_hex("e20").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xE7, 0x00, 0x01]), "e7 00 01");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_args_listen_and_send() {
        let args = Args::parse_from(["phdc-probe", "--listen", "1", "--send", "e200"]);
        assert_eq!(args.listen, Some(1));
        assert_eq!(args.send, vec!["e200".to_string()]);
    }

    #[test]
    fn test_args_send_requires_listen() {
        assert!(Args::try_parse_from(["phdc-probe", "--send", "e200"]).is_err());
    }
}
