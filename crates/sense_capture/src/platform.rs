//! Capture backend selection: a full monitor grab in "screen" mode, or a
//! single window's buffer in "window" mode.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::monitor::{self, SafeMonitor};
use crate::window_capture::{self, WindowFilters};
use crate::{capture_monitor_frame, now_ms, Frame};

#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture(&self) -> Result<Frame>;
}

pub struct MonitorSource {
    monitor: SafeMonitor,
}

impl MonitorSource {
    pub async fn for_monitor_id(monitor_id: u32) -> Result<Self> {
        Ok(Self {
            monitor: monitor::get_monitor_by_id(monitor_id).await?,
        })
    }
}

#[async_trait]
impl CaptureSource for MonitorSource {
    async fn capture(&self) -> Result<Frame> {
        capture_monitor_frame(&self.monitor).await
    }
}

/// Captures a specific window by process id, falling back to whichever
/// window currently has focus when no target is given.
pub struct WindowSource {
    monitor: SafeMonitor,
    filters: WindowFilters,
    target_pid: Option<i32>,
}

impl WindowSource {
    pub async fn new(monitor_id: u32, target_pid: Option<i32>, filters: WindowFilters) -> Result<Self> {
        Ok(Self {
            monitor: monitor::get_monitor_by_id(monitor_id).await?,
            filters,
            target_pid,
        })
    }
}

#[async_trait]
impl CaptureSource for WindowSource {
    async fn capture(&self) -> Result<Frame> {
        let windows = window_capture::capture_all_visible_windows(&self.monitor, &self.filters, true).await?;

        let chosen = match self.target_pid {
            Some(pid) => windows.into_iter().find(|w| w.process_id == pid),
            None => windows.into_iter().find(|w| w.is_focused),
        };

        let window = chosen.ok_or_else(|| anyhow!("no matching window to capture"))?;
        Ok(Frame {
            image: window.image,
            captured_at_ms: now_ms(),
            monitor_id: self.monitor.id(),
        })
    }
}
