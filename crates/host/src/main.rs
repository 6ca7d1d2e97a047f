//! usb-topology host
//!
//! Enumerates the USB devices attached to this machine, prints their
//! descriptor tree, persists it to a topology cache and keeps the registry
//! up to date from hot-plug notifications.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::{DeviceEvent, create_notification_bridge, setup_logging};
use host::backend::{HotplugTransport, RusbDriverKit};
use host::{Device, EventListener, HostConfig, HostManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-host")]
#[command(author, version, about = "USB host topology - inspect and track attached devices")]
#[command(long_about = "
Builds the descriptor tree (device, configurations, interfaces, endpoints)
of every attached USB device and keeps it current from hot-plug events.

EXAMPLES:
    # Print the attached devices
    usb-host list

    # Write the discovered topology to the cache file
    usb-host export --output topology.json

    # Show a previously exported topology
    usb-host import --input topology.json

    # Track attach/detach events until Ctrl+C
    usb-host watch --log-level debug

CONFIGURATION:
    The host looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-topology/host.toml
    3. /etc/usb-topology/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate attached devices and print their descriptor tree
    List,
    /// Enumerate attached devices and write them to the topology cache
    Export {
        /// Cache file (defaults to the configured cache path)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Load a topology cache and print it
    Import {
        /// Cache file (defaults to the configured cache path)
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
    /// Track attach and detach notifications until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        HostConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-topology host v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let kit = Arc::new(RusbDriverKit::new());
    let manager = Arc::new(HostManager::with_max_devices(
        kit.clone(),
        config.host.max_devices,
    ));

    match args.command.unwrap_or(Command::List) {
        Command::List => {
            open_session(&manager)?;
            list_devices(&manager);
        }
        Command::Export { output } => {
            open_session(&manager)?;
            export(&config, &manager, output)?;
        }
        Command::Import { input } => import(&config, &manager, input)?,
        Command::Watch => {
            open_session(&manager)?;
            watch(&config, &kit, manager.clone()).await?;
        }
    }

    manager.shutdown();
    Ok(())
}

fn open_session(manager: &HostManager) -> Result<()> {
    manager
        .initialize()
        .context("Failed to initialize USB driver kit")?;
    manager.enumerate().context("Failed to enumerate devices")?;
    Ok(())
}

fn list_devices(manager: &HostManager) {
    let devices = manager.devices();
    if devices.is_empty() {
        println!("No USB devices found.");
        return;
    }

    println!("Found {} USB device(s):\n", devices.len());
    for (_, device) in devices {
        let device = device.lock().unwrap_or_else(|e| e.into_inner());
        print_device(&device);
    }
}

fn print_device(device: &Device) {
    println!(
        "  [{}] {:04x}:{:04x} - {} {}",
        device.identifier(),
        device.vendor_id(),
        device.product_id(),
        non_empty(device.manufacturer_name()).unwrap_or("Unknown Manufacturer"),
        non_empty(device.product_name()).unwrap_or("Unknown Product")
    );
    println!(
        "      Bus {:03} Device {:03} Class {:#04x} Version {}",
        device.bus_num(),
        device.dev_address(),
        device.class(),
        device.version()
    );
    if let Some(serial) = non_empty(device.serial()) {
        println!("      Serial: {}", serial);
    }

    for config in device.configs() {
        println!(
            "      Configuration {}: {} mA{}{}",
            config.id(),
            config.max_power(),
            if config.is_self_powered() { ", self-powered" } else { "" },
            if config.is_remote_wakeup() { ", remote wakeup" } else { "" }
        );
        for interface in config.interfaces().iter().chain(config.alt_settings()) {
            println!(
                "        Interface {} alt {} class {:#04x}/{:#04x}/{:#04x} {}",
                interface.id(),
                interface.alternate_setting(),
                interface.class(),
                interface.sub_class(),
                interface.protocol(),
                interface.name()
            );
            for endpoint in interface.endpoints() {
                println!(
                    "          Endpoint {:#04x} {:?} {:?}, max packet {}",
                    endpoint.address(),
                    endpoint.direction_kind(),
                    endpoint.transfer_kind(),
                    endpoint.max_packet_size()
                );
            }
        }
    }
    println!();
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn export(config: &HostConfig, manager: &HostManager, output: Option<PathBuf>) -> Result<()> {
    let mut cache = config.topology_cache();
    if let Some(path) = output {
        cache = host::TopologyCache::new(path, cache.format());
    }

    let written = cache
        .export(manager)
        .with_context(|| format!("Failed to write cache {}", cache.path().display()))?;
    println!("Exported {} device(s) to {}", written, cache.path().display());
    Ok(())
}

fn import(config: &HostConfig, manager: &HostManager, input: Option<PathBuf>) -> Result<()> {
    let mut cache = config.topology_cache();
    if let Some(path) = input {
        cache = host::TopologyCache::new(path, cache.format());
    }

    let ids = cache
        .import_into(manager)
        .with_context(|| format!("Failed to read cache {}", cache.path().display()))?;
    println!("Imported {} cached device(s):\n", ids.len());
    for id in ids {
        let device = manager.device_of(id)?;
        let device = device.lock().unwrap_or_else(|e| e.into_inner());
        print_device(&device);
    }
    Ok(())
}

/// Keep the registry current from hot-plug notifications until Ctrl+C
///
/// Listener callbacks only forward to the notification bridge; the registry
/// is updated from a Tokio task so no descriptor query runs on the libusb
/// event thread.
async fn watch(config: &HostConfig, kit: &RusbDriverKit, manager: Arc<HostManager>) -> Result<()> {
    let context = kit
        .context()
        .map_err(|status| anyhow!("USB driver kit not initialized: {}", status))?;
    let listener = EventListener::new(Arc::new(HotplugTransport::new(context)));
    let (sender, receiver) = create_notification_bridge();

    if config.events.attach {
        let sender = sender.clone();
        listener.on_attach(move |notification| {
            sender.forward(notification);
        });
    }
    if config.events.detach {
        listener.on_detach(move |notification| {
            sender.forward(notification);
        });
    }

    listener
        .start()
        .context("Failed to subscribe to USB events")?;
    info!(
        "Watching {} device(s), press Ctrl+C to stop",
        manager.len()
    );

    let registry = manager.clone();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            let manager = registry.clone();
            let result = tokio::task::spawn_blocking(move || match event {
                DeviceEvent::Attached(address) => manager
                    .handle_attached(address.bus, address.address)
                    .map(|_| ()),
                DeviceEvent::Detached(address) => {
                    manager.handle_detached(&address.identifier());
                    Ok(())
                }
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to update registry: {}", e),
                Err(e) => error!("Registry update task failed: {}", e),
            }
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    if let Err(e) = listener.reset() {
        warn!("Failed to unsubscribe from USB events: {}", e);
    }
    event_task.abort();

    let cache = config.topology_cache();
    match cache.export(&manager) {
        Ok(written) => info!("Saved {} device(s) to {}", written, cache.path().display()),
        Err(e) => warn!("Failed to save topology cache: {}", e),
    }
    Ok(())
}
