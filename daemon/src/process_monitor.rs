use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::event::{MonitorEvent, ProcessRunningChanged};
use crate::event_bus::EventBus;
use crate::focus::{FocusOutcome, Focuser, WindowHandle};
use crate::lifecycle::{Checkpoint, Lifecycle, MonitorState, StartDecision, WorkerGuard};
use crate::window_list::{find_by_title, WindowError, WindowSource};

/// Longest the worker waits for a focus request each iteration.
pub const FOCUS_WAIT: Duration = Duration::from_millis(500);
/// Fixed pause between scans.
pub const SCAN_THROTTLE: Duration = Duration::from_millis(50);
const FOCUS_QUEUE_DEPTH: usize = 4;

struct FocusRequest {
    reply: Option<SyncSender<FocusOutcome>>,
}

struct Target {
    title_lower: String,
    display_name: String,
}

struct Shared {
    bus: Arc<EventBus>,
    windows: Arc<dyn WindowSource>,
    focuser: Arc<dyn Focuser>,
    lifecycle: Lifecycle,
    target: RwLock<Target>,
    present: AtomicBool,
    focus_wait: Duration,
}

/// Watches for a top-level window whose title contains the target substring
/// and serves focus requests against it.
///
/// Each iteration rescans every window, publishes
/// [`MonitorEvent::ProcessRunningChanged`] only when presence flips, waits up
/// to [`FOCUS_WAIT`] for a queued focus request, then sleeps
/// [`SCAN_THROTTLE`].
pub struct ProcessMonitor {
    shared: Arc<Shared>,
    requests: Mutex<Option<SyncSender<FocusRequest>>>,
}

impl ProcessMonitor {
    pub fn new(
        bus: Arc<EventBus>,
        windows: Arc<dyn WindowSource>,
        focuser: Arc<dyn Focuser>,
        title: &str,
        display_name: &str,
    ) -> Self {
        Self::with_timing(bus, windows, focuser, title, display_name, FOCUS_WAIT, SCAN_THROTTLE)
    }

    fn with_timing(
        bus: Arc<EventBus>,
        windows: Arc<dyn WindowSource>,
        focuser: Arc<dyn Focuser>,
        title: &str,
        display_name: &str,
        focus_wait: Duration,
        throttle: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus,
                windows,
                focuser,
                lifecycle: Lifecycle::new(throttle),
                target: RwLock::new(Target {
                    title_lower: title.to_lowercase(),
                    display_name: display_name.to_string(),
                }),
                present: AtomicBool::new(false),
                focus_wait,
            }),
            requests: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.shared.lifecycle.state()
    }

    /// Last presence observed by the worker.  `false` while stopped.
    pub fn is_target_present(&self) -> bool {
        self.shared.present.load(Ordering::Relaxed)
    }

    /// Replaces the title substring and the name carried by presence events.
    /// Takes effect at the worker's next scan; the thread is not restarted
    /// and the last observed presence is kept.
    pub fn set_target(&self, title: &str, display_name: &str) {
        let mut target = self.shared.target.write().unwrap_or_else(PoisonError::into_inner);
        target.title_lower = title.to_lowercase();
        target.display_name = display_name.to_string();
        info!(title, display_name, "Target window updated");
    }

    pub fn set_target_title(&self, title: &str) {
        let mut target = self.shared.target.write().unwrap_or_else(PoisonError::into_inner);
        target.title_lower = title.to_lowercase();
        info!(title, "Target window title updated");
    }

    /// Spawns the worker thread.  A no-op when already running.
    pub fn start(&self) -> Result<(), WindowError> {
        match self.shared.lifecycle.begin_start() {
            StartDecision::Spawn => {}
            StartDecision::AlreadyRunning => {
                debug!("Process monitor already running");
                return Ok(());
            }
            StartDecision::Resumed => {
                info!("Process monitor stop cancelled; resuming");
                return Ok(());
            }
        }

        let (tx, rx) = mpsc::sync_channel::<FocusRequest>(FOCUS_QUEUE_DEPTH);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("process-monitor".into())
            .spawn(move || {
                let _guard = WorkerGuard(&shared.lifecycle);
                shared.run(rx);
            });

        match spawned {
            Ok(handle) => {
                self.shared.lifecycle.finish_start(handle);
                *self.requests.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
                info!("Process monitor started");
                Ok(())
            }
            Err(e) => {
                self.shared.lifecycle.abort_start();
                Err(WindowError::Thread(e.to_string()))
            }
        }
    }

    /// Asks the worker to exit after its current iteration.
    pub fn stop(&self) {
        if self.shared.lifecycle.request_stop() {
            info!("Process monitor stop requested");
        } else {
            debug!("Process monitor not running");
        }
    }

    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.shared.lifecycle.wait_stopped(timeout)
    }

    /// Queues a forced focus of the target window without blocking.  Returns
    /// `false` if the request was dropped (monitor stopped or queue full).
    pub fn request_focus(&self) -> bool {
        self.enqueue(FocusRequest { reply: None })
    }

    /// Queues a focus request and waits up to `timeout` for its outcome.
    #[cfg(test)]
    fn request_focus_and_wait(&self, timeout: Duration) -> Option<FocusOutcome> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        if !self.enqueue(FocusRequest { reply: Some(reply_tx) }) {
            return None;
        }
        reply_rx.recv_timeout(timeout).ok()
    }

    fn enqueue(&self, request: FocusRequest) -> bool {
        let sender = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            debug!("Process monitor never started; focus request ignored");
            return false;
        };
        match sender.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Focus queue full; request dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Process monitor stopped; focus request ignored");
                false
            }
        }
    }
}

impl Shared {
    fn run(&self, requests: Receiver<FocusRequest>) {
        let mut present = false;
        self.present.store(false, Ordering::Relaxed);

        loop {
            let target = self.scan(&mut present);

            match requests.recv_timeout(self.focus_wait) {
                Ok(request) => self.serve(request, target),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }

            thread::sleep(self.lifecycle.interval());
            if self.lifecycle.checkpoint() == Checkpoint::Halt {
                self.present.store(false, Ordering::Relaxed);
                info!("Process monitor stopped");
                return;
            }
        }
    }

    /// One full window scan with edge detection.  A failed scan is logged
    /// and leaves presence untouched.
    fn scan(&self, present: &mut bool) -> Option<WindowHandle> {
        let (title_lower, display_name) = {
            let target = self.target.read().unwrap_or_else(PoisonError::into_inner);
            (target.title_lower.clone(), target.display_name.clone())
        };

        let windows = match self.windows.top_level_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Window scan failed: {e}");
                return None;
            }
        };
        let handle = find_by_title(&windows, &title_lower).map(|w| w.handle);

        let found = handle.is_some();
        if found != *present {
            *present = found;
            self.present.store(found, Ordering::Relaxed);
            if found {
                info!(name = %display_name, "Target window appeared");
            } else {
                info!(name = %display_name, "Target window disappeared");
            }
            self.bus.publish(&MonitorEvent::ProcessRunningChanged(ProcessRunningChanged {
                name: display_name,
                is_running: found,
            }));
        }
        handle
    }

    fn serve(&self, request: FocusRequest, target: Option<WindowHandle>) {
        let outcome = match target {
            Some(window) => self.focuser.focus(window, true),
            None => {
                debug!("Focus requested but target window is not present");
                FocusOutcome::NoTarget
            }
        };
        if outcome.is_success() {
            debug!(?outcome, "Focus request served");
        } else {
            info!(?outcome, "Focus request could not bring the target forward");
        }
        if let Some(reply) = request.reply {
            let _ = reply.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::window_list::WindowInfo;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const GAME: WindowHandle = WindowHandle(42);

    /// Plays back `frames` one scan at a time, then repeats the last frame.
    struct ScriptedWindows {
        frames: Mutex<VecDeque<Result<Vec<WindowInfo>, WindowError>>>,
        last: Mutex<Vec<WindowInfo>>,
        scans: AtomicUsize,
    }

    impl ScriptedWindows {
        fn new(frames: Vec<Result<Vec<WindowInfo>, WindowError>>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(frames.into()),
                last: Mutex::new(Vec::new()),
                scans: AtomicUsize::new(0),
            })
        }

        fn scans(&self) -> usize {
            self.scans.load(Ordering::SeqCst)
        }
    }

    impl WindowSource for ScriptedWindows {
        fn top_level_windows(&self) -> Result<Vec<WindowInfo>, WindowError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            match self.frames.lock().unwrap().pop_front() {
                Some(Ok(frame)) => {
                    *self.last.lock().unwrap() = frame.clone();
                    Ok(frame)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    struct RecordingFocuser {
        calls: Mutex<Vec<(WindowHandle, bool)>>,
        outcome: FocusOutcome,
    }

    impl RecordingFocuser {
        fn new(outcome: FocusOutcome) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                outcome,
            })
        }
    }

    impl Focuser for RecordingFocuser {
        fn focus(&self, window: WindowHandle, force: bool) -> FocusOutcome {
            self.calls.lock().unwrap().push((window, force));
            self.outcome
        }
    }

    fn game_window() -> Vec<WindowInfo> {
        vec![
            WindowInfo { handle: WindowHandle(7), title: "Discord".into() },
            WindowInfo { handle: GAME, title: "Elite - Dangerous (CLIENT)".into() },
        ]
    }

    fn desktop() -> Vec<WindowInfo> {
        vec![WindowInfo { handle: WindowHandle(7), title: "Discord".into() }]
    }

    fn monitor(
        windows: Arc<ScriptedWindows>,
        focuser: Arc<RecordingFocuser>,
        title: &str,
    ) -> (ProcessMonitor, Arc<Mutex<Vec<ProcessRunningChanged>>>) {
        let bus = Arc::new(EventBus::new());
        let changes = Arc::new(Mutex::new(Vec::new()));
        {
            let changes = Arc::clone(&changes);
            bus.subscribe(EventKind::ProcessRunningChanged, move |e| {
                if let MonitorEvent::ProcessRunningChanged(c) = e {
                    changes.lock().unwrap().push(c.clone());
                }
            });
        }
        let monitor = ProcessMonitor::with_timing(
            bus,
            windows,
            focuser,
            title,
            "Elite Dangerous",
            Duration::from_millis(5),
            Duration::from_millis(1),
        );
        (monitor, changes)
    }

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    fn stop(monitor: &ProcessMonitor) {
        monitor.stop();
        assert!(monitor.wait_stopped(Duration::from_secs(2)));
    }

    // ── presence ──────────────────────────────────────────────────────────────

    #[test]
    fn presence_changes_are_edge_triggered() {
        let windows = ScriptedWindows::new(vec![
            Ok(desktop()),
            Ok(game_window()),
            Ok(game_window()),
            Ok(desktop()),
        ]);
        let (monitor, changes) =
            monitor(Arc::clone(&windows), RecordingFocuser::new(FocusOutcome::Focused), "Elite - Dangerous");
        monitor.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || windows.scans() >= 6));
        stop(&monitor);

        let running: Vec<bool> = changes.lock().unwrap().iter().map(|c| c.is_running).collect();
        assert_eq!(running, vec![true, false]);
        assert!(changes.lock().unwrap().iter().all(|c| c.name == "Elite Dangerous"));
    }

    #[test]
    fn title_match_ignores_case() {
        let windows = ScriptedWindows::new(vec![Ok(game_window())]);
        let (monitor, changes) =
            monitor(windows, RecordingFocuser::new(FocusOutcome::Focused), "ELITE - DANGEROUS");
        monitor.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || monitor.is_target_present()));
        stop(&monitor);
        assert_eq!(changes.lock().unwrap().len(), 1);
    }

    #[test]
    fn scan_failure_publishes_nothing() {
        let windows = ScriptedWindows::new(vec![
            Ok(game_window()),
            Err(WindowError::Enumeration("access denied".into())),
            Ok(game_window()),
        ]);
        let (monitor, changes) =
            monitor(Arc::clone(&windows), RecordingFocuser::new(FocusOutcome::Focused), "elite");
        monitor.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || windows.scans() >= 4));
        assert_eq!(monitor.state(), MonitorState::Running);
        stop(&monitor);

        let running: Vec<bool> = changes.lock().unwrap().iter().map(|c| c.is_running).collect();
        assert_eq!(running, vec![true]);
    }

    #[test]
    fn empty_title_never_matches() {
        let windows = ScriptedWindows::new(vec![Ok(game_window())]);
        let (monitor, changes) =
            monitor(Arc::clone(&windows), RecordingFocuser::new(FocusOutcome::Focused), "");
        monitor.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || windows.scans() >= 3));
        stop(&monitor);
        assert!(changes.lock().unwrap().is_empty());
    }

    #[test]
    fn title_change_applies_without_restart() {
        let windows = ScriptedWindows::new(vec![Ok(game_window())]);
        let (monitor, changes) =
            monitor(Arc::clone(&windows), RecordingFocuser::new(FocusOutcome::Focused), "Star Citizen");
        monitor.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || windows.scans() >= 2));
        assert!(!monitor.is_target_present());

        monitor.set_target_title("elite");
        assert!(wait_for(Duration::from_secs(2), || monitor.is_target_present()));
        assert_eq!(monitor.state(), MonitorState::Running);
        stop(&monitor);
        assert_eq!(changes.lock().unwrap().len(), 1);
    }

    // ── focus requests ────────────────────────────────────────────────────────

    #[test]
    fn focus_request_forces_the_found_window() {
        let windows = ScriptedWindows::new(vec![Ok(game_window())]);
        let focuser = RecordingFocuser::new(FocusOutcome::ForcedFocus);
        let (monitor, _changes) = monitor(windows, Arc::clone(&focuser), "elite");
        monitor.start().unwrap();

        let outcome = monitor.request_focus_and_wait(Duration::from_secs(2));
        stop(&monitor);

        assert_eq!(outcome, Some(FocusOutcome::ForcedFocus));
        assert_eq!(*focuser.calls.lock().unwrap(), vec![(GAME, true)]);
    }

    #[test]
    fn focus_request_without_target_skips_focuser() {
        let windows = ScriptedWindows::new(vec![Ok(desktop())]);
        let focuser = RecordingFocuser::new(FocusOutcome::Focused);
        let (monitor, _changes) = monitor(windows, Arc::clone(&focuser), "elite");
        monitor.start().unwrap();

        let outcome = monitor.request_focus_and_wait(Duration::from_secs(2));
        stop(&monitor);

        assert_eq!(outcome, Some(FocusOutcome::NoTarget));
        assert!(focuser.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn fire_and_forget_request_is_consumed() {
        let windows = ScriptedWindows::new(vec![Ok(game_window())]);
        let focuser = RecordingFocuser::new(FocusOutcome::Focused);
        let (monitor, _changes) = monitor(windows, Arc::clone(&focuser), "elite");
        monitor.start().unwrap();

        assert!(monitor.request_focus());
        assert!(wait_for(Duration::from_secs(2), || !focuser.calls.lock().unwrap().is_empty()));
        stop(&monitor);
    }

    #[test]
    fn focus_request_before_start_is_dropped() {
        let windows = ScriptedWindows::new(vec![]);
        let (monitor, _changes) = monitor(windows, RecordingFocuser::new(FocusOutcome::Focused), "elite");
        assert!(!monitor.request_focus());
        assert_eq!(monitor.request_focus_and_wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn focus_request_after_stop_is_dropped() {
        let windows = ScriptedWindows::new(vec![]);
        let (monitor, _changes) = monitor(windows, RecordingFocuser::new(FocusOutcome::Focused), "elite");
        monitor.start().unwrap();
        stop(&monitor);
        assert!(!monitor.request_focus());
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn double_start_and_double_stop_are_harmless() {
        let windows = ScriptedWindows::new(vec![]);
        let (monitor, _changes) = monitor(windows, RecordingFocuser::new(FocusOutcome::Focused), "elite");
        monitor.start().unwrap();
        monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Running);
        monitor.stop();
        monitor.stop();
        assert!(monitor.wait_stopped(Duration::from_secs(2)));
    }

    #[test]
    fn presence_resets_on_restart() {
        let windows = ScriptedWindows::new(vec![Ok(game_window())]);
        let (monitor, changes) =
            monitor(Arc::clone(&windows), RecordingFocuser::new(FocusOutcome::Focused), "elite");
        monitor.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || monitor.is_target_present()));
        stop(&monitor);
        assert!(!monitor.is_target_present());

        monitor.start().unwrap();
        assert!(wait_for(Duration::from_secs(2), || changes.lock().unwrap().len() == 2));
        stop(&monitor);
        assert!(changes.lock().unwrap().iter().all(|c| c.is_running));
    }
}
