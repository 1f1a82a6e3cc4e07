//! turnkeep-turn — the turn content tracker (L6) and event linearizer (L7).

pub mod content;
pub mod linearizer;
pub mod token;

pub use content::{ContentSequenceItem, InterruptedContent, ToolCall, ToolCallStatus, ToolIntent, TurnContentTracker};
pub use linearizer::EventLinearizer;
pub use token::{NormalizedUsage, TokenTracker};
