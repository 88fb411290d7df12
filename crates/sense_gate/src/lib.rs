//! The decision gate: turns a change result plus OCR text into the small
//! stream of wire events actually worth sending to the remote agent.

pub mod gate;
pub mod types;

pub use gate::{DecisionGate, GateConfig};
pub use types::{ImagePayload, Priority, QueuedEvent, SenseEvent, SenseEventType, SenseMeta};
