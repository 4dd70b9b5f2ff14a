/// Decides when joystick activity should pull the target window forward.
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::event::{DeviceId, MonitorEvent};

/// Axis deflection, in percent, below which motion is treated as noise.
pub const ACTIVATION_THRESHOLD: i32 = 5;
/// Minimum spacing between two focus requests.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct FocusTrigger {
    monitored: HashSet<DeviceId>,
    enabled: bool,
    target_present: bool,
    cooldown: Duration,
    last_request: Option<Instant>,
}

impl FocusTrigger {
    pub fn new(settings: &Settings) -> Self {
        Self {
            monitored: settings.joysticks.iter().copied().collect(),
            enabled: settings.process_enabled,
            target_present: false,
            cooldown: DEFAULT_COOLDOWN,
            last_request: None,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Picks up a reloaded device list and enable flag.  Presence and the
    /// cooldown clock carry over.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.monitored = settings.joysticks.iter().copied().collect();
        self.enabled = settings.process_enabled;
        if !self.enabled {
            self.target_present = false;
        }
    }

    /// Feeds one event through the trigger.  Returns `true` when a focus
    /// request should be issued now.
    pub fn observe(&mut self, event: &MonitorEvent, now: Instant) -> bool {
        if let MonitorEvent::ProcessRunningChanged(change) = event {
            self.target_present = change.is_running;
            return false;
        }
        if !self.enabled || !self.target_present {
            return false;
        }
        match event.device_id() {
            Some(device) if self.monitored.contains(&device) => {}
            _ => return false,
        }

        let active = match event {
            MonitorEvent::AxisMotion(axis) => !axis.is_seed() && axis.value.abs() >= ACTIVATION_THRESHOLD,
            MonitorEvent::ButtonPressed(_) => true,
            MonitorEvent::HatMotion(hat) => !hat.is_centred(),
            MonitorEvent::ButtonReleased(_) | MonitorEvent::ProcessRunningChanged(_) => false,
        };
        if !active {
            return false;
        }

        if let Some(last) = self.last_request {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_request = Some(now);
        true
    }
}
