/// Foreground-focus stealing.
///
/// [`WindowFocuser`] is the platform-independent algorithm: a polite
/// restore + foreground request, then (when forced) a retry with the calling
/// thread's input attached to the foreground and target threads.  The OS
/// calls sit behind [`ForegroundOs`] so the algorithm can be exercised with a
/// scripted fake.  Callers hold an `Arc<dyn Focuser>` from
/// [`platform_focuser`], which reports [`FocusOutcome::NotSupported`] on
/// platforms without a backend.
use std::sync::Arc;

use tracing::{debug, info, warn};

/// Opaque top-level window handle (an `HWND` value on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// OS thread identifier.
pub type ThreadId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    /// The polite request was honoured.
    Focused,
    /// The target already owned the foreground; nothing was attached.
    AlreadyForeground,
    /// Focus was taken after attaching thread input.
    ForcedFocus,
    /// The OS refused and forcing was not requested.
    Refused,
    /// Every attempt failed; details were logged.
    Failed,
    /// No matching window was present when the request was served.
    NoTarget,
    NotSupported,
}

impl FocusOutcome {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            FocusOutcome::Focused | FocusOutcome::AlreadyForeground | FocusOutcome::ForcedFocus
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{call} failed: {detail}")]
pub struct OsCallError {
    pub call: &'static str,
    pub detail: String,
}

impl OsCallError {
    pub fn new(call: &'static str, detail: impl Into<String>) -> Self {
        Self {
            call,
            detail: detail.into(),
        }
    }
}

/// The handful of windowing calls the focus algorithm needs.
pub trait ForegroundOs: Send + Sync {
    /// Restores the window if it is minimized.
    fn restore(&self, window: WindowHandle) -> Result<(), OsCallError>;
    /// Asks for foreground status.  `Ok(false)` means the OS refused.
    fn set_foreground(&self, window: WindowHandle) -> Result<bool, OsCallError>;
    fn foreground_window(&self) -> Option<WindowHandle>;
    fn window_thread(&self, window: WindowHandle) -> Result<ThreadId, OsCallError>;
    fn current_thread(&self) -> ThreadId;
    fn attach_input(&self, from: ThreadId, to: ThreadId, attach: bool) -> Result<(), OsCallError>;
}

pub trait Focuser: Send + Sync {
    /// Never fails: every OS error is logged and folded into the outcome.
    fn focus(&self, window: WindowHandle, force: bool) -> FocusOutcome;
}

pub struct WindowFocuser<O> {
    os: O,
}

impl<O: ForegroundOs> WindowFocuser<O> {
    pub fn new(os: O) -> Self {
        Self { os }
    }

    fn polite_attempt(&self, window: WindowHandle) -> Result<bool, OsCallError> {
        self.os.restore(window)?;
        self.os.set_foreground(window)
    }

    fn forced_attempt(&self, window: WindowHandle) -> FocusOutcome {
        let foreground = self.os.foreground_window();
        if foreground == Some(window) {
            debug!(?window, "Target already owns the foreground");
            return FocusOutcome::AlreadyForeground;
        }

        let mut attachment = InputAttachment::new(&self.os);
        if let Some(foreground) = foreground {
            match self.os.window_thread(foreground) {
                Ok(thread) => attachment.attach(thread),
                Err(e) => warn!("Could not resolve foreground thread: {e}"),
            }
        }
        match self.os.window_thread(window) {
            Ok(thread) => attachment.attach(thread),
            Err(e) => warn!("Could not resolve target thread: {e}"),
        }

        // `attachment` detaches on drop, including when this returns early.
        match self.polite_attempt(window) {
            Ok(true) => {
                info!(?window, "Focus forced via thread input attachment");
                FocusOutcome::ForcedFocus
            }
            Ok(false) => {
                warn!(?window, "Foreground request refused even with attached input");
                FocusOutcome::Failed
            }
            Err(e) => {
                warn!(?window, "Forced focus attempt failed: {e}");
                FocusOutcome::Failed
            }
        }
    }
}

impl<O: ForegroundOs> Focuser for WindowFocuser<O> {
    fn focus(&self, window: WindowHandle, force: bool) -> FocusOutcome {
        match self.polite_attempt(window) {
            Ok(true) => return FocusOutcome::Focused,
            Ok(false) => debug!(?window, "Foreground request refused"),
            Err(e) => warn!(?window, "Foreground request failed: {e}"),
        }
        if !force {
            return FocusOutcome::Refused;
        }
        self.forced_attempt(window)
    }
}

/// Attaches the calling thread's input to other threads and detaches all of
/// them when dropped.
struct InputAttachment<'a, O: ForegroundOs> {
    os: &'a O,
    current: ThreadId,
    threads: Vec<ThreadId>,
}

impl<'a, O: ForegroundOs> InputAttachment<'a, O> {
    fn new(os: &'a O) -> Self {
        Self {
            os,
            current: os.current_thread(),
            threads: Vec::with_capacity(2),
        }
    }

    fn attach(&mut self, thread: ThreadId) {
        if thread == self.current || self.threads.contains(&thread) {
            return;
        }
        // Recorded before the call so a half-applied attach is still undone.
        self.threads.push(thread);
        if let Err(e) = self.os.attach_input(self.current, thread, true) {
            warn!(thread, "Attaching thread input failed: {e}");
        }
    }
}

impl<O: ForegroundOs> Drop for InputAttachment<'_, O> {
    fn drop(&mut self) {
        for &thread in &self.threads {
            if let Err(e) = self.os.attach_input(self.current, thread, false) {
                warn!(thread, "Detaching thread input failed: {e}");
            }
        }
    }
}

/// Used where no foreground backend exists.
pub struct UnsupportedFocuser;

impl Focuser for UnsupportedFocuser {
    fn focus(&self, window: WindowHandle, _force: bool) -> FocusOutcome {
        debug!(?window, "Window focusing is not supported on this platform");
        FocusOutcome::NotSupported
    }
}

#[cfg(windows)]
pub fn platform_focuser() -> Arc<dyn Focuser> {
    Arc::new(WindowFocuser::new(imp::Win32Foreground))
}

#[cfg(not(windows))]
pub fn platform_focuser() -> Arc<dyn Focuser> {
    Arc::new(UnsupportedFocuser)
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use super::{ForegroundOs, OsCallError, ThreadId, WindowHandle};
    use windows::Win32::Foundation::{BOOL, HWND};
    use windows::Win32::System::Threading::{AttachThreadInput, GetCurrentThreadId};
    use windows::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowThreadProcessId, IsIconic, SetForegroundWindow, ShowWindow,
        SW_RESTORE,
    };

    pub struct Win32Foreground;

    impl ForegroundOs for Win32Foreground {
        fn restore(&self, window: WindowHandle) -> Result<(), OsCallError> {
            let hwnd = HWND(window.0);
            unsafe {
                if IsIconic(hwnd).as_bool() {
                    // Returns the previous visibility, not success.
                    let _ = ShowWindow(hwnd, SW_RESTORE);
                }
            }
            Ok(())
        }

        fn set_foreground(&self, window: WindowHandle) -> Result<bool, OsCallError> {
            Ok(unsafe { SetForegroundWindow(HWND(window.0)) }.as_bool())
        }

        fn foreground_window(&self) -> Option<WindowHandle> {
            let hwnd = unsafe { GetForegroundWindow() };
            (hwnd.0 != 0).then_some(WindowHandle(hwnd.0))
        }

        fn window_thread(&self, window: WindowHandle) -> Result<ThreadId, OsCallError> {
            match unsafe { GetWindowThreadProcessId(HWND(window.0), None) } {
                0 => Err(OsCallError::new(
                    "GetWindowThreadProcessId",
                    windows::core::Error::from_win32().message().to_string(),
                )),
                thread => Ok(thread),
            }
        }

        fn current_thread(&self) -> ThreadId {
            unsafe { GetCurrentThreadId() }
        }

        fn attach_input(&self, from: ThreadId, to: ThreadId, attach: bool) -> Result<(), OsCallError> {
            if unsafe { AttachThreadInput(from, to, BOOL::from(attach)) }.as_bool() {
                Ok(())
            } else {
                Err(OsCallError::new(
                    "AttachThreadInput",
                    windows::core::Error::from_win32().message().to_string(),
                ))
            }
        }
    }
}
