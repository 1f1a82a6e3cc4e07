//! turnkeep-runtime — the agent run coordinator (L8) and broadcast bus
//! (L10): the part of the kernel that actually drives a turn loop against a
//! `Provider` and a `ToolRegistry`, persisting through the lower layers this
//! workspace's other crates already provide.

pub mod broadcast;
pub mod coordinator;

pub use broadcast::{BroadcastBus, DeltaEvent, PersistedNotification, Subscription, SubscriptionFilter};
pub use coordinator::{AgentRunCoordinator, CoordinatorConfig, RunOptions, RunOutcome};
