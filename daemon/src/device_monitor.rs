/// Joystick polling on a dedicated OS thread.
///
/// The thread owns the input backend for its whole life.  At start it
/// enumerates devices and publishes one seed [`AxisEvent`] per axis (resting
/// value, timestamp 0), then polls at the configured rate, translating raw
/// input to [`MonitorEvent`]s on the shared [`EventBus`].
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::event::{axis_percent, now_timestamp, AxisEvent, ButtonEvent, HatEvent, MonitorEvent, SEED_TIMESTAMP};
use crate::event_bus::EventBus;
use crate::input_backend::{BackendFactory, Device, DeviceError, InputBackend, RawInput};
use crate::lifecycle::{Checkpoint, Lifecycle, MonitorState, PollRate, StartDecision, WorkerGuard};

/// Requests served by the polling thread between iterations.
enum Command {
    Rescan(SyncSender<Result<Vec<Device>, DeviceError>>),
}

struct Shared {
    bus: Arc<EventBus>,
    lifecycle: Lifecycle,
    devices: Mutex<Vec<Device>>,
    worker: Mutex<Option<ThreadId>>,
}

pub struct DeviceMonitor {
    shared: Arc<Shared>,
    backend: BackendFactory,
    commands: Mutex<Option<Sender<Command>>>,
}

impl DeviceMonitor {
    pub fn new(bus: Arc<EventBus>, backend: BackendFactory) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus,
                lifecycle: Lifecycle::new(PollRate::default().interval()),
                devices: Mutex::new(Vec::new()),
                worker: Mutex::new(None),
            }),
            backend,
            commands: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.shared.lifecycle.state()
    }

    pub fn interval(&self) -> Duration {
        self.shared.lifecycle.interval()
    }

    /// Devices found by the most recent enumeration.
    pub fn devices(&self) -> Vec<Device> {
        self.shared
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Changes the poll rate.  On error the previous interval is kept.
    pub fn set_rate(&self, per_second: f64) -> Result<(), ConfigError> {
        self.apply_rate(PollRate::new(per_second)?);
        Ok(())
    }

    /// [`set_rate`](Self::set_rate) for an untyped settings value.
    pub fn set_rate_value(&self, value: &toml::Value) -> Result<(), ConfigError> {
        self.apply_rate(PollRate::from_value(value)?);
        Ok(())
    }

    fn apply_rate(&self, rate: PollRate) {
        self.shared.lifecycle.set_interval(rate.interval());
        debug!(
            rate = rate.per_second(),
            interval_ms = rate.interval().as_millis() as u64,
            "Device poll rate set"
        );
    }

    /// Spawns the polling thread and blocks until it has enumerated devices
    /// and published the seed events.  A no-op when already running.
    pub fn start(&self) -> Result<(), DeviceError> {
        match self.shared.lifecycle.begin_start() {
            StartDecision::Spawn => {}
            StartDecision::AlreadyRunning => {
                debug!("Device monitor already running");
                return Ok(());
            }
            StartDecision::Resumed => {
                info!("Device monitor stop cancelled; resuming");
                return Ok(());
            }
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), DeviceError>>(1);
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let shared = Arc::clone(&self.shared);
        let factory = Arc::clone(&self.backend);

        let spawned = thread::Builder::new()
            .name("device-monitor".into())
            .spawn(move || {
                let _guard = WorkerGuard(&shared.lifecycle);
                *shared.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
                let mut backend = match factory() {
                    Ok(backend) => backend,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = shared.seed(backend.as_mut()) {
                    error!("Device enumeration failed: {e}");
                }
                let _ = ready_tx.send(Ok(()));
                shared.poll(backend.as_mut(), &cmd_rx);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.lifecycle.abort_start();
                return Err(DeviceError::Thread(e.to_string()));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.shared.lifecycle.finish_start(handle);
                *self.commands.lock().unwrap_or_else(PoisonError::into_inner) = Some(cmd_tx);
                info!(interval_ms = self.interval().as_millis() as u64, "Device monitor started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.shared.lifecycle.abort_start();
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.shared.lifecycle.abort_start();
                Err(DeviceError::Thread("exited before signalling readiness".into()))
            }
        }
    }

    /// Asks the polling thread to exit at its next loop boundary.  Returns
    /// immediately; use [`wait_stopped`](Self::wait_stopped) to block.
    pub fn stop(&self) {
        if self.shared.lifecycle.request_stop() {
            info!("Device monitor stop requested");
        } else {
            debug!("Device monitor not running");
        }
    }

    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.shared.lifecycle.wait_stopped(timeout)
    }

    /// Re-enumerates devices, replaces the device list and publishes a fresh
    /// set of seed events.
    ///
    /// While running the scan is handed to the polling thread and this blocks
    /// for up to one poll interval.  Called from a bus handler on the polling
    /// thread itself, it scans inline with a fresh backend instead.
    pub fn get_joysticks_and_axes(&self) -> Result<Vec<Device>, DeviceError> {
        let on_worker = *self.shared.worker.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id());
        let sender = if on_worker {
            None
        } else {
            self.commands
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        };
        if let Some(sender) = sender {
            let (reply_tx, reply_rx) = mpsc::sync_channel(1);
            if sender.send(Command::Rescan(reply_tx)).is_ok() {
                // Disconnected means the thread exited with the command queued.
                if let Ok(result) = reply_rx.recv() {
                    return result;
                }
            }
        }

        let mut backend = (self.backend)()?;
        self.shared.seed(backend.as_mut())
    }
}

impl Shared {
    fn seed(&self, backend: &mut dyn InputBackend) -> Result<Vec<Device>, DeviceError> {
        let snapshots = backend.enumerate()?;
        if snapshots.is_empty() {
            warn!("No joysticks found");
        }

        let devices: Vec<Device> = snapshots.iter().map(|s| s.device.clone()).collect();
        *self.devices.lock().unwrap_or_else(PoisonError::into_inner) = devices.clone();

        for snapshot in &snapshots {
            info!("Found joystick {}", snapshot.device);
            for (axis, raw) in snapshot.resting_axes.iter().enumerate() {
                self.bus.publish(&MonitorEvent::AxisMotion(AxisEvent {
                    device_id: snapshot.device.id,
                    axis,
                    value: axis_percent(*raw),
                    timestamp: SEED_TIMESTAMP,
                }));
            }
        }
        Ok(devices)
    }

    fn poll(&self, backend: &mut dyn InputBackend, commands: &Receiver<Command>) {
        loop {
            backend.refresh();
            let timestamp = now_timestamp();

            while let Some(input) = backend.next_input() {
                match input {
                    Ok(raw) => {
                        self.bus.publish(&translate(raw, timestamp));
                    }
                    Err(e) => {
                        warn!("Skipping device event: {e}");
                        break;
                    }
                }
            }

            for command in commands.try_iter() {
                match command {
                    Command::Rescan(reply) => {
                        let _ = reply.send(self.seed(backend));
                    }
                }
            }

            match self.lifecycle.checkpoint() {
                Checkpoint::Halt => {
                    info!("Device monitor stopped");
                    return;
                }
                Checkpoint::Continue(interval) => thread::sleep(interval),
            }
        }
    }
}

fn translate(raw: RawInput, timestamp: f64) -> MonitorEvent {
    match raw {
        RawInput::Axis { device, axis, value } => MonitorEvent::AxisMotion(AxisEvent {
            device_id: device,
            axis,
            value: axis_percent(value),
            timestamp,
        }),
        RawInput::ButtonDown { device, button } => MonitorEvent::ButtonPressed(ButtonEvent {
            device_id: device,
            button,
            timestamp,
        }),
        RawInput::ButtonUp { device, button } => MonitorEvent::ButtonReleased(ButtonEvent {
            device_id: device,
            button,
            timestamp,
        }),
        RawInput::Hat { device, hat, position } => MonitorEvent::HatMotion(HatEvent {
            device_id: device,
            hat,
            position,
            timestamp,
        }),
    }
}
