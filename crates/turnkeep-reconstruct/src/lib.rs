//! turnkeep-reconstruct — the message reconstructor (L4) and sanitizer (L5).

pub mod reconstruct;
pub mod sanitize;

pub use reconstruct::{messages_at, reconstruct as reconstruct_chain, DanglingToolUse, Reconstructed};
pub use sanitize::{sanitize, Fix, FixKind};
