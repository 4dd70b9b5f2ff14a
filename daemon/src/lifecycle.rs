/// Run-state bookkeeping shared by the device and process monitors.
///
/// Each monitor owns one [`Lifecycle`]: a single mutex guarding the state
/// machine, the worker's poll interval and its thread handle.  State only
/// moves through the named transition methods:
///
/// ```text
/// Stopped ─begin_start─► Starting ─finish_start─► Running ─request_stop─► StopRequested
///    ▲                      │                        ▲                        │
///    └────abort_start───────┘                        └──begin_start (resume)──┤
///    └───────────────────────────checkpoint (worker observes halt)───────────┘
/// ```
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ConfigError;

/// Exclusive upper bound on the poll rate, in iterations per second.
pub const MAX_POLL_RATE: f64 = 60.0;
/// Rate used until the config says otherwise.
pub const DEFAULT_POLL_RATE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    StopRequested,
}

/// What [`Lifecycle::begin_start`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// The caller must spawn the worker and then call `finish_start` or `abort_start`.
    Spawn,
    /// A worker is already live; nothing to do.
    AlreadyRunning,
    /// A pending stop was cancelled; the existing worker keeps going.
    Resumed,
}

/// What the worker should do at the end of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue(Duration),
    Halt,
}

/// A validated poll rate and the sleep interval derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollRate {
    per_second: f64,
    interval: Duration,
}

impl PollRate {
    /// Accepts any finite rate in `(0, 60)`.  The interval is
    /// `round(1000 / rate)` milliseconds.
    pub fn new(per_second: f64) -> Result<Self, ConfigError> {
        if !per_second.is_finite() || per_second <= 0.0 || per_second >= MAX_POLL_RATE {
            return Err(ConfigError::InvalidRate(per_second.to_string()));
        }
        let millis = (1000.0 / per_second).round() as u64;
        Ok(Self {
            per_second,
            interval: Duration::from_millis(millis),
        })
    }

    /// Like [`PollRate::new`] for an untyped config value: integers and
    /// floats are accepted, anything else is rejected.
    pub fn from_value(value: &toml::Value) -> Result<Self, ConfigError> {
        match value {
            toml::Value::Integer(i) => Self::new(*i as f64),
            toml::Value::Float(f) => Self::new(*f),
            other => Err(ConfigError::InvalidRate(other.to_string())),
        }
    }

    pub fn per_second(&self) -> f64 {
        self.per_second
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollRate {
    fn default() -> Self {
        Self {
            per_second: DEFAULT_POLL_RATE,
            interval: Duration::from_millis((1000.0 / DEFAULT_POLL_RATE).round() as u64),
        }
    }
}

struct Inner {
    state: MonitorState,
    interval: Duration,
    thread: Option<JoinHandle<()>>,
}

pub struct Lifecycle {
    inner: Mutex<Inner>,
    stopped: Condvar,
}

impl Lifecycle {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: MonitorState::Stopped,
                interval,
                thread: None,
            }),
            stopped: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> MonitorState {
        self.lock().state
    }

    pub fn interval(&self) -> Duration {
        self.lock().interval
    }

    pub fn set_interval(&self, interval: Duration) {
        self.lock().interval = interval;
    }

    /// `Stopped → Starting`, or `StopRequested → Running` when a stop is
    /// still pending.
    pub fn begin_start(&self) -> StartDecision {
        let mut inner = self.lock();
        match inner.state {
            MonitorState::Stopped => {
                inner.state = MonitorState::Starting;
                StartDecision::Spawn
            }
            MonitorState::StopRequested => {
                inner.state = MonitorState::Running;
                StartDecision::Resumed
            }
            MonitorState::Starting | MonitorState::Running => StartDecision::AlreadyRunning,
        }
    }

    /// `Starting → Running`, recording the worker's handle.
    ///
    /// If a stop was requested while starting the state stays
    /// `StopRequested`; if the worker already exited the handle is dropped.
    pub fn finish_start(&self, thread: JoinHandle<()>) {
        let mut inner = self.lock();
        match inner.state {
            MonitorState::Starting => {
                inner.state = MonitorState::Running;
                inner.thread = Some(thread);
            }
            MonitorState::StopRequested | MonitorState::Running => inner.thread = Some(thread),
            MonitorState::Stopped => {}
        }
    }

    /// `Starting | StopRequested → Stopped` after a failed start.
    pub fn abort_start(&self) {
        let mut inner = self.lock();
        inner.state = MonitorState::Stopped;
        inner.thread = None;
        self.stopped.notify_all();
    }

    /// `Running | Starting → StopRequested`.  Returns `false` when there was
    /// nothing to stop.
    pub fn request_stop(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            MonitorState::Running | MonitorState::Starting => {
                inner.state = MonitorState::StopRequested;
                true
            }
            MonitorState::Stopped | MonitorState::StopRequested => false,
        }
    }

    /// Called by the worker once per iteration.  `StopRequested → Stopped`
    /// (clearing the thread handle) yields [`Checkpoint::Halt`]; otherwise the
    /// current interval is returned.
    pub fn checkpoint(&self) -> Checkpoint {
        let mut inner = self.lock();
        if inner.state == MonitorState::StopRequested {
            inner.state = MonitorState::Stopped;
            inner.thread = None;
            self.stopped.notify_all();
            return Checkpoint::Halt;
        }
        Checkpoint::Continue(inner.interval)
    }

    /// Forces `Stopped` when a worker exits by any path other than a
    /// checkpoint (for example a panicking subscriber).
    pub fn worker_exited(&self) {
        let mut inner = self.lock();
        if inner.state != MonitorState::Stopped {
            inner.state = MonitorState::Stopped;
            inner.thread = None;
            self.stopped.notify_all();
        }
    }

    /// Blocks until the state is `Stopped` or `timeout` elapses.  Returns
    /// whether the monitor is stopped.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .stopped
            .wait_timeout_while(guard, timeout, |inner| inner.state != MonitorState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        guard.state == MonitorState::Stopped
    }
}

/// Resets the owning [`Lifecycle`] if a worker thread unwinds.  A normal
/// exit goes through [`Lifecycle::checkpoint`] and leaves the state alone, so
/// a restart that raced the old worker's exit is not clobbered.
pub struct WorkerGuard<'a>(pub &'a Lifecycle);

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.worker_exited();
        }
    }
}
