//! biolink
//!
//! Command-line front end for the capture engine: list and diagnose
//! attached sensors, capture a template, verify templates and dump the
//! driver surface.

mod config;
mod logging;
mod simulate;

use anyhow::{Context, Result, anyhow};
use biolink_engine::{BiometricService, DeviceLocator, DriverMode, FnMatcher, OperationError};
use biolink_hardware::adaptive::{AdaptiveFactory, ProbeRegistry};
use biolink_hardware::{DriverFactory, FixedFactory, HardwareError, UsbHost};
use biolink_usb::{DetachWatcher, RusbHost};
use clap::{Parser, Subcommand};
use config::CliConfig;
use logging::setup_logging;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "biolink")]
#[command(author, version, about = "USB fingerprint sensor capture tool")]
#[command(long_about = "
Capture fingerprint templates from a USB sensor.

EXAMPLES:
    # List attached devices and permission state
    biolink diagnose

    # Capture one template (base64 on stdout)
    biolink scan

    # Try everything against a simulated sensor
    biolink --simulate scan --trace

CONFIGURATION:
    The configuration is read from the first of:
    1. Path specified with --config
    2. ~/.config/biolink/config.toml
    3. /etc/biolink/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Use a simulated bus and sensor instead of libusb
    #[arg(long)]
    simulate: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices and the one a scan would use
    Devices,

    /// Report devices, permission state and SDK availability
    Diagnose,

    /// Capture one template and print it base64-encoded
    ///
    /// This build links no sensor SDK, so on real hardware the driver cannot
    /// be bound and the scan fails after locating the device. Use --simulate
    /// to run the full capture path against a scripted sensor.
    Scan {
        /// Also print the capture trace
        #[arg(long)]
        trace: bool,
    },

    /// Compare a base64 template against stored base64 templates
    Verify {
        template: String,

        #[arg(required = true)]
        stored: Vec<String>,
    },

    /// Describe the driver surface
    Dump,

    /// Print the effective configuration as TOML
    Config {
        /// Save it to the default location instead
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = CliConfig::load(args.config.clone()).context("Failed to load configuration")?;
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    setup_logging(log_level).context("Failed to setup logging")?;
    info!("biolink v{}", biolink_core::VERSION);

    if let Command::Config { save } = args.command {
        return print_config(&config, save);
    }

    let (host, factory, watcher) = if args.simulate {
        let (host, factory) = simulate::simulated_hardware();
        let host: Arc<dyn UsbHost> = Arc::new(host);
        let factory: Arc<dyn DriverFactory> = Arc::new(factory);
        (host, factory, None)
    } else {
        let host = RusbHost::new().context("Failed to initialise libusb")?;
        let watcher = match DetachWatcher::start(host.context()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Device departures will not be noticed: {}", e);
                None
            }
        };
        let host: Arc<dyn UsbHost> = Arc::new(host);
        (host, driver_factory(config.service.driver.mode), watcher)
    };

    if let Command::Devices = args.command {
        return list_devices(DeviceLocator::new(host, config.service.locator.clone()), args.json);
    }

    let service = BiometricService::builder(host, factory)
        .with_config(config.service.clone())
        .with_matcher(Arc::new(FnMatcher::new(|a: &[u8], b: &[u8]| {
            if a == b { 100 } else { 0 }
        })))
        .build()
        .context("Invalid service configuration")?;

    let _detach_forwarder = watcher.map(|(watcher, mut departures)| {
        let service = service.clone();
        tokio::spawn(async move {
            let _watcher = watcher;
            while let Some((bus, address)) = departures.recv().await {
                service.on_detach(bus, address).await;
            }
        })
    });

    let result = run(&service, args.command, args.json).await;
    service.shutdown().await;
    result
}

/// Driver factory for real hardware.
///
/// No vendor SDK ships with this tool: adaptive mode starts with an empty
/// class registry, and fixed mode has no adapter linked in.
fn driver_factory(mode: DriverMode) -> Arc<dyn DriverFactory> {
    match mode {
        DriverMode::Adaptive => {
            let registry = ProbeRegistry::new();
            if registry.is_empty() {
                warn!(
                    "No sensor SDK classes registered: scans cannot bind a driver (try --simulate)"
                );
            }
            Arc::new(AdaptiveFactory::new(registry))
        }
        DriverMode::Fixed => {
            warn!("No sensor adapter linked into this build: scans will fail (try --simulate)");
            Arc::new(FixedFactory::new("none", |_device| {
                Err(HardwareError::unsupported("statically linked sensor adapter"))
            }))
        }
    }
}

async fn run(service: &BiometricService, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Diagnose => {
            let diagnosis = service.diagnose_connection().await;
            if json {
                return print_json(&diagnosis);
            }
            if diagnosis.devices.is_empty() {
                println!("No USB devices found.");
            }
            for line in &diagnosis.devices {
                println!("{line}");
            }
            println!("Has permission: {}", diagnosis.has_permission);
            println!("SDK available: {}", diagnosis.sdk_available);
            if let Some(note) = &diagnosis.note {
                println!("Note: {note}");
            }
            Ok(())
        }
        Command::Scan { trace } => {
            let (template, log) = service
                .capture_template_traced()
                .await
                .map_err(|e| report(e, json))?;
            if json {
                return print_json(&serde_json::json!({ "template": template, "trace": log }));
            }
            if trace {
                eprintln!("{}", log.render());
            }
            println!("{template}");
            Ok(())
        }
        Command::Verify { template, stored } => {
            let result = service
                .verify(&template, &stored)
                .await
                .map_err(|e| report(e, json))?;
            if json {
                return print_json(&result);
            }
            match result.matched_index {
                Some(index) => println!("Match: stored #{index} (score {})", result.score),
                None => println!("No match (best score {})", result.score),
            }
            Ok(())
        }
        Command::Dump => {
            println!("{}", service.dump_driver().await);
            Ok(())
        }
        Command::Devices | Command::Config { .. } => Ok(()),
    }
}

fn list_devices(locator: DeviceLocator, json: bool) -> Result<()> {
    let devices = locator.list_devices();
    let selected = locator.locate();

    if json {
        let selected = selected.map(|(device, reason)| {
            serde_json::json!({ "name": device.name, "reason": format!("{reason:?}") })
        });
        let devices: Vec<String> = devices.iter().map(ToString::to_string).collect();
        return print_json(&serde_json::json!({ "devices": devices, "selected": selected }));
    }

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in &devices {
        println!(
            "  {:04x}:{:04x} - {} {}",
            device.vendor_id,
            device.product_id,
            device.manufacturer.as_deref().unwrap_or("Unknown Manufacturer"),
            device.product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Bus {:03} Device {:03} Classes: {:02x?}",
            device.bus_number, device.address, device.interface_classes
        );
    }

    match selected {
        Some((device, reason)) => println!("\nSelected: {} ({:?})", device.name, reason),
        None => println!("\nNo device selected."),
    }
    Ok(())
}

fn print_config(config: &CliConfig, save: bool) -> Result<()> {
    if save {
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
    } else {
        print!(
            "{}",
            toml::to_string_pretty(config).context("Failed to serialize configuration")?
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print an operation failure with its trace and turn it into the exit error.
fn report(err: OperationError, json: bool) -> anyhow::Error {
    if json {
        if let Ok(text) = serde_json::to_string_pretty(&err) {
            println!("{text}");
        }
    } else {
        eprintln!("{}", err.trace.render());
    }
    anyhow!("{} ({})", err.message, err.code)
}
