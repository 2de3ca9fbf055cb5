use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use midibridge::{
    config, BridgeConfig, BridgeEvent, ConnectError, Endpoint, EventReceiver, MidiBackend,
    MidiDeviceBridge, MidirBackend, VirtualBackend,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load(),
    };

    match cli.command {
        Commands::List(args) => {
            if args.virtual_devices {
                let (bridge, _events) =
                    MidiDeviceBridge::with_config(demo_backend(), &settings);
                print_devices(&bridge);
            } else {
                let (bridge, _events) = MidiDeviceBridge::<MidirBackend>::system(&settings);
                print_devices(&bridge);
            }
            Ok(())
        }
        Commands::Monitor(args) => {
            if args.virtual_devices {
                let backend = demo_backend();
                let (bridge, events) = MidiDeviceBridge::with_config(backend.clone(), &settings);
                spawn_demo_driver(backend);
                monitor(&bridge, &events, &args, &mut settings)?;
            } else {
                let (bridge, events) = MidiDeviceBridge::<MidirBackend>::system(&settings);
                monitor(&bridge, &events, &args, &mut settings)?;
            }
            match &cli.config {
                Some(path) => config::save_to(path, &settings)?,
                None => config::save(&settings),
            }
            Ok(())
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Inspect and monitor MIDI input devices")]
struct Cli {
    /// Settings file to use instead of the per-user default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the available devices with their indices.
    List(ListArgs),
    /// Open a device and print incoming notes and device changes.
    Monitor(MonitorArgs),
}

#[derive(Args)]
struct ListArgs {
    /// Use simulated devices instead of the system MIDI subsystem.
    #[arg(long = "virtual")]
    virtual_devices: bool,
}

#[derive(Args)]
struct MonitorArgs {
    /// Device index as printed by `list`.
    #[arg(long, conflicts_with = "name")]
    device: Option<usize>,
    /// Case-insensitive part of the device name.
    #[arg(long)]
    name: Option<String>,
    /// Print events as JSON envelopes.
    #[arg(long)]
    json: bool,
    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<f32>,
    /// Use simulated devices instead of the system MIDI subsystem.
    #[arg(long = "virtual")]
    virtual_devices: bool,
}

fn print_devices<B: MidiBackend>(bridge: &MidiDeviceBridge<B>) {
    let names = bridge.list_devices();
    if names.is_empty() {
        println!("(no MIDI devices found)");
    }
    for (index, name) in names.iter().enumerate() {
        println!("[{index}] {name}");
    }
}

fn monitor<B: MidiBackend>(
    bridge: &MidiDeviceBridge<B>,
    events: &EventReceiver,
    args: &MonitorArgs,
    settings: &mut BridgeConfig,
) -> Result<()> {
    let endpoint = if let Some(index) = args.device {
        bridge
            .open_device(index)
            .with_context(|| format!("failed to open device {index}"))?;
        bridge.connected_device()
    } else if let Some(name) = args.name.as_deref() {
        Some(
            bridge
                .open_device_by_name(name)
                .with_context(|| format!("failed to open device '{name}'"))?,
        )
    } else {
        open_remembered(bridge, settings.last_device.as_deref())?
    };

    if let Some(endpoint) = endpoint {
        info!(index = endpoint.index, name = %endpoint.label(), "monitoring");
        settings.last_device = Some(endpoint.label());
    }

    if let Err(err) = bridge.start_hotplug_watch() {
        warn!(%err, "device changes will not be reported");
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f32(secs.max(0.0)));
    while deadline.map_or(true, |deadline| Instant::now() < deadline) {
        let Some(event) = events.recv_timeout(POLL_TIMEOUT) else {
            continue;
        };
        print_event(&event, args.json);
    }
    bridge.close_device();
    for event in events.drain() {
        print_event(&event, args.json);
    }
    Ok(())
}

/// Reopen the device used last time, falling back to the first device.
fn open_remembered<B: MidiBackend>(
    bridge: &MidiDeviceBridge<B>,
    last: Option<&str>,
) -> Result<Option<Endpoint>> {
    if let Some(name) = last {
        match bridge.open_device_by_name(name) {
            Ok(endpoint) => return Ok(Some(endpoint)),
            Err(ConnectError::UnknownDevice { .. }) => {
                warn!(device = name, "last used device not present; opening the first device");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open device '{name}'"));
            }
        }
    }
    bridge.open_device(0).context("failed to open the first device")?;
    Ok(bridge.connected_device())
}

fn print_event(event: &BridgeEvent, json: bool) {
    if json {
        println!("{}", event.to_json());
        return;
    }
    match event {
        BridgeEvent::Message(msg) => println!(
            "{:>10}us  ch{:<2} {:?} note={} velocity={}",
            msg.timestamp,
            msg.channel() + 1,
            msg.kind,
            msg.note,
            msg.velocity
        ),
        BridgeEvent::Devices(snapshot) => println!("devices: {}", snapshot.names.join(", ")),
    }
}

fn demo_backend() -> VirtualBackend {
    let backend = VirtualBackend::new();
    backend.add_device("Virtual Keyboard");
    backend.add_device("Virtual Pads");
    backend
}

/// Plays a C major scale on the first virtual device and plugs in a third one.
fn spawn_demo_driver(backend: VirtualBackend) {
    let spawned = thread::Builder::new()
        .name("midibridge-demo".into())
        .spawn(move || {
            // Give the monitor time to open the keyboard.
            thread::sleep(Duration::from_millis(300));
            for note in [60u8, 62, 64, 65, 67, 69, 71, 72] {
                backend.send(0, &[0x90, note, 100]);
                thread::sleep(Duration::from_millis(150));
                backend.send(0, &[0x90, note, 0]);
            }
            backend.add_device("Virtual Controller");
        });
    if let Err(err) = spawned {
        warn!(%err, "failed to start demo driver");
    }
}
