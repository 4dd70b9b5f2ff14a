/// Top-level window enumeration and title matching.
use crate::focus::WindowHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("window enumeration failed: {0}")]
    Enumeration(String),

    #[error("window enumeration is not supported on this platform")]
    NotSupported,

    #[error("process monitor thread unavailable: {0}")]
    Thread(String),
}

/// Source of top-level windows; rescanned in full on every call.
pub trait WindowSource: Send + Sync {
    fn top_level_windows(&self) -> Result<Vec<WindowInfo>, WindowError>;
}

/// Returns the first window whose title contains `needle_lower`, comparing
/// case-insensitively.  `needle_lower` must already be lowercase; an empty
/// needle matches nothing.
pub fn find_by_title<'a>(windows: &'a [WindowInfo], needle_lower: &str) -> Option<&'a WindowInfo> {
    if needle_lower.is_empty() {
        return None;
    }
    windows
        .iter()
        .find(|w| w.title.to_lowercase().contains(needle_lower))
}

#[cfg(windows)]
pub fn platform_window_source() -> Result<std::sync::Arc<dyn WindowSource>, WindowError> {
    Ok(std::sync::Arc::new(imp::Win32Windows))
}

#[cfg(not(windows))]
pub fn platform_window_source() -> Result<std::sync::Arc<dyn WindowSource>, WindowError> {
    Err(WindowError::NotSupported)
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use super::{WindowError, WindowInfo, WindowSource};
    use crate::focus::WindowHandle;
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{EnumWindows, GetWindowTextLengthW, GetWindowTextW};

    pub struct Win32Windows;

    impl WindowSource for Win32Windows {
        fn top_level_windows(&self) -> Result<Vec<WindowInfo>, WindowError> {
            let mut windows: Vec<WindowInfo> = Vec::new();
            // SAFETY: `collect_window` only runs inside `EnumWindows`, while
            // `windows` is alive and exclusively borrowed.
            unsafe {
                EnumWindows(
                    Some(collect_window),
                    LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
                )
            }
            .map_err(|e| WindowError::Enumeration(e.message().to_string()))?;
            Ok(windows)
        }
    }

    /// `lparam` must point to a live `Vec<WindowInfo>` for the duration of
    /// the enumeration.  Untitled windows are skipped.
    unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);

        let len = GetWindowTextLengthW(hwnd);
        if len > 0 {
            let mut buf = vec![0u16; len as usize + 1];
            let copied = GetWindowTextW(hwnd, &mut buf);
            if copied > 0 {
                windows.push(WindowInfo {
                    handle: WindowHandle(hwnd.0),
                    title: String::from_utf16_lossy(&buf[..copied as usize]),
                });
            }
        }

        BOOL(1) // continue enumeration
    }
}
