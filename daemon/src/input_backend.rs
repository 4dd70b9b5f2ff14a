/// Joystick subsystem abstraction and its gilrs implementation.
///
/// A backend is created *on* the device-monitor thread (gilrs contexts are
/// not `Send`), so [`InputBackend`] carries no `Send` bound; the monitor
/// instead holds a [`BackendFactory`].
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use gilrs::ev::Code;
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use tracing::{debug, info, warn};

use crate::event::DeviceId;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to initialise input subsystem: {0}")]
    Init(String),

    #[error("failed to enumerate devices: {0}")]
    Enumeration(String),

    #[error("bad input event: {0}")]
    Event(String),

    #[error("device monitor thread unavailable: {0}")]
    Thread(String),
}

/// A joystick as discovered at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub axes: usize,
    pub buttons: usize,
    pub hats: usize,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} \"{}\" ({} axes, {} buttons, {} hats)",
            self.id, self.name, self.axes, self.buttons, self.hats
        )
    }
}

/// A device plus the current raw reading of each of its axes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub device: Device,
    pub resting_axes: Vec<f32>,
}

/// Untranslated input, in the order the subsystem reported it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    Axis { device: DeviceId, axis: usize, value: f32 },
    ButtonDown { device: DeviceId, button: usize },
    ButtonUp { device: DeviceId, button: usize },
    Hat { device: DeviceId, hat: usize, position: (i32, i32) },
}

pub trait InputBackend {
    /// Lists every connected device with its resting axis values.
    fn enumerate(&mut self) -> Result<Vec<DeviceSnapshot>, DeviceError>;
    /// Pulls pending events from the OS into the backend's queue.
    fn refresh(&mut self);
    /// Pops the next queued input.  An `Err` is a single malformed event; the
    /// queue remains usable.
    fn next_input(&mut self) -> Option<Result<RawInput, DeviceError>>;
}

pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn InputBackend>, DeviceError> + Send + Sync>;

pub fn gilrs_factory() -> BackendFactory {
    Arc::new(|| GilrsBackend::new().map(|b| Box::new(b) as Box<dyn InputBackend>))
}

// ── control indexing ─────────────────────────────────────────────────────────

/// One observation from a backend, keyed by the control's native code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Control<C> {
    Axis(C, f32),
    Button(C, bool),
    Hat((i32, i32)),
}

/// The controls of one device.  A control's position in its list is the
/// index carried by events; codes first seen after enumeration are appended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ControlLayout<C> {
    pub(crate) axes: Vec<C>,
    pub(crate) buttons: Vec<C>,
    pub(crate) hats: usize,
}

impl<C> Default for ControlLayout<C> {
    fn default() -> Self {
        Self {
            axes: Vec::new(),
            buttons: Vec::new(),
            hats: 0,
        }
    }
}

fn slot<C: PartialEq>(codes: &mut Vec<C>, code: C) -> usize {
    match codes.iter().position(|c| *c == code) {
        Some(index) => index,
        None => {
            codes.push(code);
            codes.len() - 1
        }
    }
}

/// Turns native control codes into stable per-device indices.
pub(crate) struct Translator<C> {
    layouts: HashMap<DeviceId, ControlLayout<C>>,
}

impl<C: PartialEq> Translator<C> {
    pub(crate) fn new() -> Self {
        Self { layouts: HashMap::new() }
    }

    /// Forgets every known device and adopts the given layouts.
    pub(crate) fn replace(&mut self, layouts: impl IntoIterator<Item = (DeviceId, ControlLayout<C>)>) {
        self.layouts = layouts.into_iter().collect();
    }

    /// `None` for devices that were not enumerated; their input waits for the
    /// next re-scan.  `Err` only for an event that cannot be represented.
    pub(crate) fn translate(&mut self, device: DeviceId, control: Control<C>) -> Option<Result<RawInput, DeviceError>> {
        let Some(layout) = self.layouts.get_mut(&device) else {
            debug!(device, "Input from a device that was not enumerated; ignored until re-scan");
            return None;
        };
        let raw = match control {
            Control::Axis(_, value) if !value.is_finite() => {
                return Some(Err(DeviceError::Event(format!(
                    "non-finite axis value {value} from device {device}"
                ))));
            }
            Control::Axis(code, value) => RawInput::Axis {
                device,
                axis: slot(&mut layout.axes, code),
                value,
            },
            Control::Button(code, true) => RawInput::ButtonDown {
                device,
                button: slot(&mut layout.buttons, code),
            },
            Control::Button(code, false) => RawInput::ButtonUp {
                device,
                button: slot(&mut layout.buttons, code),
            },
            Control::Hat(position) => {
                layout.hats = layout.hats.max(1);
                RawInput::Hat { device, hat: 0, position }
            }
        };
        Some(Ok(raw))
    }
}

// ── gilrs ─────────────────────────────────────────────────────────────────────

/// Mapped gamepad axes, listed first and in this order when a device has them.
/// Any other axis code the device reports follows, ordered by code.
const AXIS_CATALOGUE: [Axis; 6] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::LeftZ,
    Axis::RightStickX,
    Axis::RightStickY,
    Axis::RightZ,
];

const BUTTON_CATALOGUE: [Button; 15] = [
    Button::South,
    Button::East,
    Button::North,
    Button::West,
    Button::C,
    Button::Z,
    Button::LeftTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger,
    Button::RightTrigger2,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
];

const DPAD_AXES: [Axis; 2] = [Axis::DPadX, Axis::DPadY];
const DPAD_BUTTONS: [Button; 4] = [Button::DPadUp, Button::DPadDown, Button::DPadLeft, Button::DPadRight];

fn dpad_codes(gamepad: &Gamepad<'_>) -> Vec<Code> {
    DPAD_AXES
        .iter()
        .filter_map(|a| gamepad.axis_code(*a))
        .chain(DPAD_BUTTONS.iter().filter_map(|b| gamepad.button_code(*b)))
        .collect()
}

/// Mapped codes in catalogue order, then every other code gilrs has state
/// for.  D-pad codes are excluded; the D-pad is hat 0.
fn layout_of(gamepad: &Gamepad<'_>) -> ControlLayout<Code> {
    let dpad = dpad_codes(gamepad);
    let mut layout = ControlLayout {
        hats: usize::from(!dpad.is_empty()),
        ..ControlLayout::default()
    };

    for code in AXIS_CATALOGUE.iter().filter_map(|a| gamepad.axis_code(*a)) {
        slot(&mut layout.axes, code);
    }
    let mut other_axes: Vec<Code> = gamepad.state().axes().map(|(code, _)| code).collect();
    other_axes.sort_by_key(Code::into_u32);
    for code in other_axes.into_iter().filter(|c| !dpad.contains(c)) {
        slot(&mut layout.axes, code);
    }

    for code in BUTTON_CATALOGUE.iter().filter_map(|b| gamepad.button_code(*b)) {
        slot(&mut layout.buttons, code);
    }
    let mut other_buttons: Vec<Code> = gamepad.state().buttons().map(|(code, _)| code).collect();
    other_buttons.sort_by_key(Code::into_u32);
    for code in other_buttons.into_iter().filter(|c| !dpad.contains(c)) {
        slot(&mut layout.buttons, code);
    }

    layout
}

pub struct GilrsBackend {
    gilrs: Gilrs,
    translator: Translator<Code>,
    pending: VecDeque<Result<RawInput, DeviceError>>,
}

impl GilrsBackend {
    pub fn new() -> Result<Self, DeviceError> {
        info!("Initializing gilrs joystick interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => g,
            Err(gilrs::Error::NotImplemented(g)) => {
                warn!("gilrs has no backend for this platform; no devices will be reported");
                g
            }
            Err(e) => return Err(DeviceError::Init(e.to_string())),
        };
        Ok(Self {
            gilrs,
            translator: Translator::new(),
            pending: VecDeque::new(),
        })
    }

    /// Classifies one gilrs event.  Unmapped controls (`Axis::Unknown`,
    /// `Button::Unknown`) are kept and identified by their code.
    fn control(&self, id: GamepadId, event: EventType) -> Option<Control<Code>> {
        let gamepad = self.gilrs.connected_gamepad(id)?;
        let dpad = dpad_codes(&gamepad);
        let control = match event {
            EventType::AxisChanged(axis, value, code) => {
                if DPAD_AXES.contains(&axis) || dpad.contains(&code) {
                    Control::Hat(hat_position(&gamepad))
                } else {
                    Control::Axis(code, value)
                }
            }
            EventType::ButtonPressed(button, code) | EventType::ButtonReleased(button, code)
                if DPAD_BUTTONS.contains(&button) || dpad.contains(&code) =>
            {
                Control::Hat(hat_position(&gamepad))
            }
            EventType::ButtonPressed(_, code) => Control::Button(code, true),
            EventType::ButtonReleased(_, code) => Control::Button(code, false),
            EventType::Connected => {
                debug!(device = usize::from(id), "Device connected after enumeration; ignored until re-scan");
                return None;
            }
            _ => return None,
        };
        Some(control)
    }
}

/// `(x, y)` of the D-pad with `y = 1` up, from either buttons or axes.
fn hat_position(gamepad: &Gamepad<'_>) -> (i32, i32) {
    let from_buttons = (
        gamepad.is_pressed(Button::DPadRight) as i32 - gamepad.is_pressed(Button::DPadLeft) as i32,
        gamepad.is_pressed(Button::DPadUp) as i32 - gamepad.is_pressed(Button::DPadDown) as i32,
    );
    if from_buttons != (0, 0) {
        return from_buttons;
    }
    (
        gamepad.value(Axis::DPadX).round() as i32,
        gamepad.value(Axis::DPadY).round() as i32,
    )
}

impl InputBackend for GilrsBackend {
    fn enumerate(&mut self) -> Result<Vec<DeviceSnapshot>, DeviceError> {
        // Pump pending events first so cached axis state is current.
        self.refresh();

        let mut layouts = Vec::new();
        let mut snapshots = Vec::new();
        for (id, gamepad) in self.gilrs.gamepads().filter(|(_, gp)| gp.is_connected()) {
            let layout = layout_of(&gamepad);
            let device = usize::from(id);
            snapshots.push(DeviceSnapshot {
                device: Device {
                    id: device,
                    name: gamepad.name().to_string(),
                    axes: layout.axes.len(),
                    buttons: layout.buttons.len(),
                    hats: layout.hats,
                },
                resting_axes: layout.axes.iter().map(|c| gamepad.state().value(*c)).collect(),
            });
            layouts.push((device, layout));
        }
        self.translator.replace(layouts);
        Ok(snapshots)
    }

    fn refresh(&mut self) {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            let Some(control) = self.control(id, event) else {
                continue;
            };
            if let Some(input) = self.translator.translate(usize::from(id), control) {
                self.pending.push_back(input);
            }
        }
    }

    fn next_input(&mut self) -> Option<Result<RawInput, DeviceError>> {
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_display_lists_capabilities() {
        let device = Device {
            id: 2,
            name: "T.16000M".into(),
            axes: 4,
            buttons: 16,
            hats: 1,
        };
        assert_eq!(device.to_string(), "#2 \"T.16000M\" (4 axes, 16 buttons, 1 hats)");
    }

    #[test]
    fn catalogues_have_no_duplicates() {
        for (i, a) in AXIS_CATALOGUE.iter().enumerate() {
            assert!(!AXIS_CATALOGUE[i + 1..].contains(a));
            assert!(!DPAD_AXES.contains(a));
        }
        for (i, b) in BUTTON_CATALOGUE.iter().enumerate() {
            assert!(!BUTTON_CATALOGUE[i + 1..].contains(b));
            assert!(!DPAD_BUTTONS.contains(b));
        }
    }

    fn translator(device: DeviceId, axes: Vec<u32>, buttons: Vec<u32>) -> Translator<u32> {
        let mut translator = Translator::new();
        translator.replace([(device, ControlLayout { axes, buttons, hats: 1 })]);
        translator
    }

    #[test]
    fn known_codes_keep_their_enumerated_index() {
        let mut t = translator(0, vec![0x00, 0x01, 0x06], vec![0x120, 0x121]);
        assert_eq!(
            t.translate(0, Control::Axis(0x06, 0.5)).unwrap().unwrap(),
            RawInput::Axis { device: 0, axis: 2, value: 0.5 }
        );
        assert_eq!(
            t.translate(0, Control::Button(0x121, true)).unwrap().unwrap(),
            RawInput::ButtonDown { device: 0, button: 1 }
        );
        assert_eq!(
            t.translate(0, Control::Button(0x121, false)).unwrap().unwrap(),
            RawInput::ButtonUp { device: 0, button: 1 }
        );
    }

    #[test]
    fn codes_first_seen_later_get_the_next_index() {
        let mut t = translator(1, vec![0x00], vec![]);
        // A throttle and a trigger button that no mapping names.
        assert_eq!(
            t.translate(1, Control::Axis(0x07, -0.25)).unwrap().unwrap(),
            RawInput::Axis { device: 1, axis: 1, value: -0.25 }
        );
        assert_eq!(
            t.translate(1, Control::Button(0x120, true)).unwrap().unwrap(),
            RawInput::ButtonDown { device: 1, button: 0 }
        );
        assert_eq!(
            t.translate(1, Control::Axis(0x07, 0.75)).unwrap().unwrap(),
            RawInput::Axis { device: 1, axis: 1, value: 0.75 }
        );
    }

    #[test]
    fn hat_motion_is_hat_zero() {
        let mut t = translator(2, vec![], vec![]);
        assert_eq!(
            t.translate(2, Control::Hat((1, -1))).unwrap().unwrap(),
            RawInput::Hat { device: 2, hat: 0, position: (1, -1) }
        );
    }

    #[test]
    fn input_from_unknown_devices_is_dropped_quietly() {
        let mut t = translator(0, vec![0x00], vec![0x120]);
        assert!(t.translate(5, Control::Axis(0x00, 0.5)).is_none());
        assert!(t.translate(5, Control::Button(0x120, true)).is_none());
        assert!(t.translate(5, Control::Hat((0, 1))).is_none());
    }

    #[test]
    fn replace_forgets_old_devices() {
        let mut t = translator(0, vec![0x00], vec![]);
        t.replace([(3, ControlLayout::default())]);
        assert!(t.translate(0, Control::Axis(0x00, 0.1)).is_none());
        assert!(t.translate(3, Control::Axis(0x00, 0.1)).is_some());
    }

    #[test]
    fn non_finite_axis_value_is_an_error() {
        let mut t = translator(0, vec![0x00], vec![]);
        assert!(matches!(
            t.translate(0, Control::Axis(0x00, f32::NAN)),
            Some(Err(DeviceError::Event(_)))
        ));
    }
}
