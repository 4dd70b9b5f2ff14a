use crate::config::Settings;

/// Index of an input device as reported by the device subsystem.
pub type DeviceId = usize;

/// Timestamp carried by the per-axis seed events emitted at enumeration time.
pub const SEED_TIMESTAMP: f64 = 0.0;

/// An analog axis moved.  `value` is a percentage in `[-100, 100]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisEvent {
    pub device_id: DeviceId,
    pub axis: usize,
    pub value: i32,
    /// Seconds since the Unix epoch, or [`SEED_TIMESTAMP`] for resting values.
    pub timestamp: f64,
}

impl AxisEvent {
    /// True for the resting-value events emitted before any real motion.
    pub fn is_seed(&self) -> bool {
        self.timestamp == SEED_TIMESTAMP
    }
}

/// A button transition.  Whether it was a press or a release is carried by
/// the [`MonitorEvent`] variant it arrives in.
#[derive(Debug, Clone, PartialEq)]
pub struct ButtonEvent {
    pub device_id: DeviceId,
    pub button: usize,
    pub timestamp: f64,
}

/// A hat switch moved.  `position` is `(x, y)` with each component in
/// `{-1, 0, 1}`; `(0, 0)` is centred and `y = 1` is up.
#[derive(Debug, Clone, PartialEq)]
pub struct HatEvent {
    pub device_id: DeviceId,
    pub hat: usize,
    pub position: (i32, i32),
    pub timestamp: f64,
}

impl HatEvent {
    pub fn is_centred(&self) -> bool {
        self.position == (0, 0)
    }
}

/// The watched window appeared or disappeared.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRunningChanged {
    pub name: String,
    pub is_running: bool,
}

/// Everything the two monitors publish on the [`EventBus`](crate::event_bus::EventBus).
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    AxisMotion(AxisEvent),
    ButtonPressed(ButtonEvent),
    ButtonReleased(ButtonEvent),
    HatMotion(HatEvent),
    ProcessRunningChanged(ProcessRunningChanged),
}

/// Subscription key for [`MonitorEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AxisMotion,
    ButtonPressed,
    ButtonReleased,
    HatMotion,
    ProcessRunningChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::AxisMotion,
        EventKind::ButtonPressed,
        EventKind::ButtonReleased,
        EventKind::HatMotion,
        EventKind::ProcessRunningChanged,
    ];
}

impl MonitorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MonitorEvent::AxisMotion(_) => EventKind::AxisMotion,
            MonitorEvent::ButtonPressed(_) => EventKind::ButtonPressed,
            MonitorEvent::ButtonReleased(_) => EventKind::ButtonReleased,
            MonitorEvent::HatMotion(_) => EventKind::HatMotion,
            MonitorEvent::ProcessRunningChanged(_) => EventKind::ProcessRunningChanged,
        }
    }

    /// The originating device for input events; `None` for window events.
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            MonitorEvent::AxisMotion(e) => Some(e.device_id),
            MonitorEvent::ButtonPressed(e) | MonitorEvent::ButtonReleased(e) => Some(e.device_id),
            MonitorEvent::HatMotion(e) => Some(e.device_id),
            MonitorEvent::ProcessRunningChanged(_) => None,
        }
    }
}

/// Messages consumed by the daemon's single event loop.
pub enum DaemonEvent {
    /// Forwarded from the event bus.
    Monitor(MonitorEvent),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Settings),
    /// Ctrl+C received; stop both monitors and exit.
    Shutdown,
}

/// Converts a raw analog reading (nominally `[-1.0, 1.0]`) to an integer
/// percentage, truncating toward zero.  Out-of-range readings are clamped
/// and NaN reads as 0.
pub fn axis_percent(raw: f32) -> i32 {
    ((raw * 100.0).trunc() as i32).clamp(-100, 100)
}

/// Current wall-clock time in fractional seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
