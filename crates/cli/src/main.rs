//! usb-battery CLI: list supported devices and read or watch battery levels.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use usb_battery_core::alert::{format_level, lowest_charge, LowBatteryAlerts};
use usb_battery_core::catalog;
use usb_battery_core::config::{
    MonitorConfig, DEFAULT_REFRESH_INTERVAL, DEFAULT_RESCAN_INTERVAL, DEFAULT_SKIP_THRESHOLD,
};
use usb_battery_core::monitor::{read_all_once, DeviceEvent, DeviceMonitor, DeviceSnapshot};
use usb_battery_core::probe::HardwareProbe;
use usb_battery_core::transport::{RusbBus, UsbBus};

#[derive(Parser)]
#[command(
    name = "usb-battery",
    version,
    about = "Battery levels of Asus and Razer wireless peripherals"
)]
struct Cli {
    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every supported device model.
    Catalog,
    /// List attached supported devices.
    Devices,
    /// Read the battery level of each attached supported device once.
    Battery,
    /// Keep polling attached devices and print changes until Ctrl-C.
    Watch {
        /// Seconds between battery reads of one device (>= 1).
        #[arg(long, default_value_t = DEFAULT_REFRESH_INTERVAL.as_secs())]
        refresh_interval: u64,
        /// Failed reads absorbed before the level becomes unknown.
        #[arg(long, default_value_t = DEFAULT_SKIP_THRESHOLD)]
        skip_threshold: u32,
        /// Seconds between USB bus scans (>= 1).
        #[arg(long, default_value_t = DEFAULT_RESCAN_INTERVAL.as_secs())]
        rescan_interval: u64,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_snapshot(dev: &DeviceSnapshot) {
    println!(
        "{} [{}] (VID: 0x{:04X}, PID: 0x{:04X}, bus {}): {}",
        dev.display_name,
        dev.device_type,
        dev.vendor_id,
        dev.product_id,
        dev.address,
        format_level(dev.battery_level)
    );
}

fn print_event(event: &DeviceEvent, json: bool) -> Result<()> {
    if json {
        let (kind, dev) = match event {
            DeviceEvent::Added(d) => ("added", d),
            DeviceEvent::Removed(d) => ("removed", d),
            DeviceEvent::BatteryLevelChanged(d) => ("battery", d),
        };
        println!(
            "{}",
            serde_json::json!({ "event": kind, "device": serde_json::to_value(dev)? })
        );
        return Ok(());
    }

    match event {
        DeviceEvent::Added(d) => println!("+ {} connected", d.display_name),
        DeviceEvent::Removed(d) => println!("- {} disconnected", d.display_name),
        DeviceEvent::BatteryLevelChanged(d) => {
            println!("  {}: {}", d.display_name, format_level(d.battery_level))
        }
    }
    Ok(())
}

async fn watch(config: MonitorConfig, json: bool) -> Result<()> {
    let monitor = DeviceMonitor::with_hardware(config)?;
    let mut events = monitor.subscribe();
    let mut alerts = LowBatteryAlerts::new();
    monitor.start().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, json)?;
                    if let DeviceEvent::BatteryLevelChanged(_) = event {
                        let devices = monitor.devices().await;
                        if let Some(alert) = alerts.evaluate(&devices) {
                            tracing::warn!("Low battery: {}", alert.message());
                        }
                        if let Some(lowest) = lowest_charge(&devices) {
                            tracing::debug!(
                                "Lowest: {} at {}",
                                lowest.display_name,
                                format_level(lowest.battery_level)
                            );
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Catalog => {
            if cli.json {
                let entries: Vec<_> = catalog::all()
                    .iter()
                    .map(|d| {
                        serde_json::json!({
                            "display_name": d.display_name,
                            "manufacturer_name": d.manufacturer_name(),
                            "device_type": d.device_type,
                            "vendor_id": d.vendor_id(),
                            "product_id": d.product_id(),
                            "alternative": d.alternative,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for d in catalog::all() {
                    println!(
                        "{} {} [{}] (VID: 0x{:04X}, PID: 0x{:04X})",
                        d.manufacturer_name(),
                        d.display_name,
                        d.device_type,
                        d.vendor_id(),
                        d.product_id()
                    );
                }
            }
        }
        Commands::Devices => {
            let attached = tokio::task::spawn_blocking(|| RusbBus.enumerate()).await??;
            let supported: Vec<_> = attached
                .iter()
                .filter_map(|e| catalog::find_by_key(e.key).map(|d| (d, e.address)))
                .collect();

            if cli.json {
                let entries: Vec<_> = supported
                    .iter()
                    .map(|(d, addr)| {
                        serde_json::json!({
                            "display_name": d.display_name,
                            "vendor_id": d.vendor_id(),
                            "product_id": d.product_id(),
                            "address": addr,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if supported.is_empty() {
                println!("No supported devices found.");
                println!("Ensure the device or its receiver is plugged in and USB access is permitted.");
            } else {
                for (d, addr) in &supported {
                    println!(
                        "{} (VID: 0x{:04X}, PID: 0x{:04X}, bus {})",
                        d.display_name,
                        d.vendor_id(),
                        d.product_id(),
                        addr
                    );
                }
            }
        }
        Commands::Battery => {
            let snapshots =
                read_all_once(Arc::new(RusbBus), Arc::new(HardwareProbe::new())).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            } else if snapshots.is_empty() {
                println!("No supported devices found.");
            } else {
                for dev in &snapshots {
                    print_snapshot(dev);
                }
            }
        }
        Commands::Watch {
            refresh_interval,
            skip_threshold,
            rescan_interval,
        } => {
            let config = MonitorConfig::from_secs(refresh_interval, skip_threshold, rescan_interval)?;
            watch(config, cli.json).await?;
        }
    }

    Ok(())
}
