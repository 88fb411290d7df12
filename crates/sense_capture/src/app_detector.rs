//! Focused-app/window detection, used to drive the adaptive SSIM threshold
//! and to label semantic events with the application they came from.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub app_name: String,
    pub window_title: String,
}

#[async_trait]
pub trait AppDetector: Send + Sync {
    async fn detect(&self) -> Result<Option<AppInfo>>;
}

/// Picks the AppleScript-backed detector on macOS and a window-list
/// fallback everywhere else.
pub fn default_detector() -> Box<dyn AppDetector> {
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::AppleScriptDetector)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(FocusedWindowDetector)
    }
}

/// Falls back to whichever captured window reports `is_focused`. Cheap,
/// and reuses the same xcap plumbing `window_capture` already depends on.
pub struct FocusedWindowDetector;

#[async_trait]
impl AppDetector for FocusedWindowDetector {
    async fn detect(&self) -> Result<Option<AppInfo>> {
        let info = tokio::task::spawn_blocking(|| -> Result<Option<AppInfo>> {
            let windows = xcap::Window::all().map_err(anyhow::Error::from)?;
            for window in windows {
                if window.is_focused().unwrap_or(false) {
                    let app_name = window.app_name().unwrap_or_default().to_string();
                    let window_title = window.title().unwrap_or_default().to_string();
                    return Ok(Some(AppInfo {
                        app_name,
                        window_title,
                    }));
                }
            }
            Ok(None)
        })
        .await??;
        Ok(info)
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use super::{AppDetector, AppInfo, Result};
    use async_trait::async_trait;
    use tokio::process::Command;

    pub struct AppleScriptDetector;

    #[async_trait]
    impl AppDetector for AppleScriptDetector {
        async fn detect(&self) -> Result<Option<AppInfo>> {
            let script = r#"
                tell application "System Events"
                    set frontApp to name of first application process whose frontmost is true
                    set frontWindow to ""
                    try
                        tell process frontApp
                            set frontWindow to name of front window
                        end tell
                    end try
                    return frontApp & "||" & frontWindow
                end tell
            "#;

            let output = Command::new("osascript").arg("-e").arg(script).output().await?;
            if !output.status.success() {
                return Ok(None);
            }

            let text = String::from_utf8_lossy(&output.stdout);
            let mut parts = text.trim().splitn(2, "||");
            let app_name = parts.next().unwrap_or_default().to_string();
            let window_title = parts.next().unwrap_or_default().to_string();

            if app_name.is_empty() {
                Ok(None)
            } else {
                Ok(Some(AppInfo {
                    app_name,
                    window_title,
                }))
            }
        }
    }
}
