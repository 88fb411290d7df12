//! Semantic layer: turns raw OCR text into structured, token-efficient
//! state for the agent — activity classification, delta encoding, and a
//! queryable rolling history.

pub mod activity;
pub mod context;
pub mod delta;
pub mod privacy;

pub use activity::{ActivityClassifier, ActivitySignals, ActivityType};
pub use context::{ContextBuilder, ContextQuery, ContextSnapshot, SemanticBuilder, SemanticState};
pub use delta::{DeltaEncoder, DeltaKind, TextDelta};
