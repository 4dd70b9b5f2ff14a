use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use joyfocus::config::{self, ConfigStore, Settings};
use joyfocus::device_monitor::DeviceMonitor;
use joyfocus::event::{DaemonEvent, EventKind};
use joyfocus::event_bus::EventBus;
use joyfocus::focus;
use joyfocus::focus_trigger::FocusTrigger;
use joyfocus::input_backend::gilrs_factory;
use joyfocus::process_monitor::ProcessMonitor;
use joyfocus::{logging, paths, window_list};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "joyfocus", version, about = "Brings a game window to the front when a watched joystick moves")]
struct Args {
    /// Settings file to use instead of the one in the user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `logging.level` and RUST_LOG (e.g. "debug").
    #[arg(long)]
    log_level: Option<String>,

    /// Print connected joysticks and exit.
    #[arg(long)]
    list_devices: bool,

    /// Add a device id (as printed by --list-devices) to the watched set and exit.
    #[arg(long, value_name = "ID", conflicts_with = "ignore_device")]
    monitor_device: Option<usize>,

    /// Remove a device id from the watched set and exit.
    #[arg(long, value_name = "ID")]
    ignore_device: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir()?;
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("failed to create app data directory {}", app_dir.display()))?;

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths::config_file_path(&app_dir));
    let store = Arc::new(ConfigStore::load(&config_path)?);
    store.ensure_defaults()?;
    let settings = Settings::from_store(&store);

    logging::init(
        args.log_level.as_deref(),
        &settings.log_level,
        &paths::log_file_path(&app_dir),
    )?;
    info!(config = %config_path.display(), "joyfocus v{} started", env!("CARGO_PKG_VERSION"));

    let toggle = match (args.monitor_device, args.ignore_device) {
        (Some(id), _) => Some((id, true)),
        (None, Some(id)) => Some((id, false)),
        (None, None) => None,
    };
    if let Some((id, monitored)) = toggle {
        let watched = store.set_device_monitored(id, monitored)?;
        info!(?watched, "Watched devices updated");
        return Ok(());
    }

    // ── Monitors ──────────────────────────────────────────────────────────────
    let bus = Arc::new(EventBus::new());

    let devices = Arc::new(DeviceMonitor::new(Arc::clone(&bus), gilrs_factory()));
    if let Err(e) = devices.set_rate_value(&settings.poll_rate) {
        warn!("{e}; keeping default poll rate");
    }

    if args.list_devices {
        for device in devices.get_joysticks_and_axes()? {
            println!("{device}");
        }
        return Ok(());
    }

    let processes = match window_list::platform_window_source() {
        Ok(windows) => Some(Arc::new(ProcessMonitor::new(
            Arc::clone(&bus),
            windows,
            focus::platform_focuser(),
            &settings.process_title,
            &settings.process_display_name,
        ))),
        Err(e) => {
            warn!("Process monitoring unavailable: {e}");
            None
        }
    };

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(256);
    let forwarded = bus.forward(&EventKind::ALL, event_tx.clone(), DaemonEvent::Monitor);

    match devices.start() {
        Ok(()) => {
            let connected = devices.devices();
            for id in &settings.joysticks {
                if !connected.iter().any(|d| d.id == *id) {
                    warn!(device = id, "Watched joystick is not connected");
                }
            }
        }
        Err(e) => error!("Device monitor failed to start: {e}"),
    }
    if settings.process_enabled {
        if let Some(processes) = &processes {
            if let Err(e) = processes.start() {
                error!("Process monitor failed to start: {e}");
            }
        }
    }

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(Arc::clone(&store), event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    let mut trigger = FocusTrigger::new(&settings);
    let mut current = settings;

    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::Monitor(event) => {
                if trigger.observe(&event, Instant::now()) {
                    if let Some(processes) = &processes {
                        if processes.request_focus() {
                            debug!(device = ?event.device_id(), "Focus requested");
                        }
                    }
                }
            }

            DaemonEvent::ConfigReloaded(new_settings) => {
                info!("Config reloaded");
                apply_settings(&current, &new_settings, &devices, processes.as_deref(), &mut trigger);
                current = new_settings;
            }

            DaemonEvent::Shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    for id in forwarded {
        bus.unsubscribe(id);
    }
    devices.stop();
    if let Some(processes) = &processes {
        processes.stop();
    }
    let stopped = tokio::task::spawn_blocking(move || {
        let devices_done = devices.wait_stopped(SHUTDOWN_GRACE);
        let processes_done = processes
            .as_ref()
            .map_or(true, |p| p.wait_stopped(SHUTDOWN_GRACE));
        devices_done && processes_done
    })
    .await?;
    if !stopped {
        warn!("Monitor threads did not stop within {SHUTDOWN_GRACE:?}");
    }

    Ok(())
}

/// Pushes the parts of a reloaded config that can change at runtime into the
/// running monitors.  The log level only applies on restart.
fn apply_settings(
    old: &Settings,
    new: &Settings,
    devices: &DeviceMonitor,
    processes: Option<&ProcessMonitor>,
    trigger: &mut FocusTrigger,
) {
    if new.poll_rate != old.poll_rate {
        if let Err(e) = devices.set_rate_value(&new.poll_rate) {
            warn!("Ignoring poll rate change: {e}");
        }
    }

    if let Some(processes) = processes {
        if new.process_title != old.process_title || new.process_display_name != old.process_display_name {
            processes.set_target(&new.process_title, &new.process_display_name);
        }
        match (old.process_enabled, new.process_enabled) {
            (false, true) => {
                if let Err(e) = processes.start() {
                    error!("Process monitor failed to start: {e}");
                }
            }
            (true, false) => processes.stop(),
            _ => {}
        }
    }

    if new.log_level != old.log_level {
        info!(level = %new.log_level, "Log level change takes effect on restart");
    }

    trigger.apply_settings(new);
}
