//! usbgate command-line interface
//!
//! Locates a USB device by vendor/product id (and optionally serial number),
//! opens an exclusive bulk-pipe session to it, and exchanges raw request and
//! response payloads over that session.

mod config;
mod logging;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::{Config, parse_hex_id};
use std::time::Duration;
use tracing::info;
use usbgate::{Connector, Error, RusbHost, Selector};

#[derive(Parser, Debug)]
#[command(name = "usbgate")]
#[command(author, version, about = "Exclusive bulk-pipe access to a single USB device")]
#[command(long_about = "
Locates a USB device by vendor/product id (and optionally serial number) and
talks to it over its bulk pipes.

EXAMPLES:
    # Check whether the default device is present
    usbgate find

    # Select a specific unit among identical devices
    usbgate --serial 0123456789 find

    # Send a hex-encoded request and print the hex-encoded response
    usbgate proxy 6803

    # Run with debug logging
    usbgate --log-level debug check

CONFIGURATION:
    Settings are read in the following order:
    1. Command-line flags
    2. Path specified with --config
    3. ~/.config/usbgate/usbgate.toml
    4. /etc/usbgate/usbgate.toml
    5. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Vendor id (hex with 0x prefix, or decimal)
    #[arg(long, value_name = "ID")]
    vendor_id: Option<String>,

    /// Product id (hex with 0x prefix, or decimal)
    #[arg(long, value_name = "ID")]
    product_id: Option<String>,

    /// Serial number to select between identical devices
    #[arg(short, long, value_name = "SERIAL")]
    serial: Option<String>,

    /// Bulk transfer timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate the device and report whether it is present
    Find,
    /// Open a session and verify the device still answers to its identity
    Check,
    /// Send a hex-encoded request over the write pipe and print the response
    Proxy {
        /// Request payload as a hex string (e.g. "6803")
        request: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = Config::default();
        let path = Config::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        Config::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        Config::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    logging::setup_logging(log_level).context("Failed to setup logging")?;

    let vendor_id = match args.vendor_id {
        Some(ref id) => parse_hex_id(id, "vendor_id")?,
        None => parse_hex_id(&config.device.vendor_id, "vendor_id")?,
    };
    let product_id = match args.product_id {
        Some(ref id) => parse_hex_id(id, "product_id")?,
        None => parse_hex_id(&config.device.product_id, "product_id")?,
    };
    let serial = args.serial.or(config.device.serial);
    let timeout = match args.timeout_ms {
        Some(ms) => Duration::from_millis(ms),
        None => config.transfer.timeout(),
    };

    let selector = match serial {
        Some(serial) => Selector::with_serial(vendor_id, product_id, serial),
        None => Selector::new(vendor_id, product_id),
    };

    info!(%selector, ?timeout, "usbgate v{}", env!("CARGO_PKG_VERSION"));

    let host = RusbHost::new().context("Failed to initialize USB host")?;
    let connector = Connector::new(host, selector, timeout);

    match args.command {
        Command::Find => run_find(&connector),
        Command::Check => run_check(&connector),
        Command::Proxy { request } => run_proxy(&connector, &request),
    }
}

fn run_find(connector: &Connector<RusbHost>) -> Result<()> {
    match connector.open() {
        Ok(()) => {
            println!("status=OK {}", connector.selector());
            connector.close();
            Ok(())
        }
        Err(Error::NotFound) => {
            println!("status=NO_DEVICE {}", connector.selector());
            std::process::exit(1);
        }
        Err(e) => Err(e).context("Failed to open device"),
    }
}

fn run_check(connector: &Connector<RusbHost>) -> Result<()> {
    match connector.check() {
        Ok(()) => {
            println!("status=OK {}", connector.selector());
            connector.close();
            Ok(())
        }
        Err(Error::NotFound) => {
            println!("status=NO_DEVICE {}", connector.selector());
            std::process::exit(1);
        }
        Err(e) => Err(e).context("Device check failed"),
    }
}

fn run_proxy(connector: &Connector<RusbHost>, request: &str) -> Result<()> {
    let payload = hex::decode(request.trim()).context("Request is not valid hex")?;
    if payload.is_empty() {
        bail!("Request must not be empty");
    }

    let response = connector.proxy(&payload).context("Proxy exchange failed")?;
    connector.close();

    println!("{}", hex::encode(&response));
    Ok(())
}
