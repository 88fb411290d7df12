//! Wire-shaped types produced by the gate and consumed by the sender.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenseEventType {
    Text,
    Visual,
    Context,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SenseMeta {
    pub ssim: f32,
    pub app: String,
    pub window_title: String,
    pub screen: u32,
}

/// A base64-JPEG image attached to an event: `sense_sender::image_payload`
/// is the sole producer, encoded to fit a configured byte budget.
#[derive(Debug, Clone, Serialize)]
pub struct ImagePayload {
    pub data: String,
    pub bbox: (u32, u32, u32, u32),
    pub thumb: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SenseEvent {
    #[serde(rename = "type")]
    pub event_type: SenseEventType,
    pub ts_ms: i64,
    pub ocr: String,
    pub roi: Option<ImagePayload>,
    pub diff: Option<ImagePayload>,
    pub meta: SenseMeta,
}

impl SenseEvent {
    pub fn context(ts_ms: i64, meta: SenseMeta) -> Self {
        Self {
            event_type: SenseEventType::Context,
            ts_ms,
            ocr: String::new(),
            roi: None,
            diff: None,
            meta,
        }
    }
}

/// URGENT = 0, HIGH = 1, NORMAL = 2 — lower numeric value sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum Priority {
    Urgent = 0,
    High = 1,
    Normal = 2,
}

/// Total order `(priority, ts)`, lower-numbered priority first, earlier
/// timestamp breaking ties within the same priority.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub priority: Priority,
    pub ts_ms: i64,
    pub payload: SenseEvent,
    pub attempts: u32,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.ts_ms == other.ts_ms
    }
}
impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.ts_ms).cmp(&(other.priority, other.ts_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_events_order_by_priority_then_timestamp() {
        let event = |priority: Priority, ts: i64| QueuedEvent {
            priority,
            ts_ms: ts,
            payload: SenseEvent::context(ts, SenseMeta::default()),
            attempts: 0,
        };

        let mut events = vec![event(Priority::Normal, 1), event(Priority::Urgent, 5), event(Priority::Urgent, 2)];
        events.sort();

        assert_eq!(events[0].ts_ms, 2);
        assert_eq!(events[1].ts_ms, 5);
        assert_eq!(events[2].priority, Priority::Normal);
    }
}
