//! turnkeep-core — shared ids, the event/session data model, and the
//! closed error taxonomy that every other turnkeep crate builds on.

pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod session;

pub use error::{Error, Result};
pub use event::{Event, EventPayload, EventType, TokenUsage};
pub use ids::{EventId, RunId, SessionId};
pub use message::{ContentBlock, Message};
pub use session::{CreateSessionOptions, ForkSessionOptions, Session};
