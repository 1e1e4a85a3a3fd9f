//! Domain events and the cache invalidation they drive.
//!
//! ```toml
//! [events]
//! max_history_size = 100
//! ```

mod bus;
mod router;
mod topic;

pub use bus::{
    BusStats, DispatchReport, EventBus, EventBusConfig, EventRecord, HandlerError, HandlerFailure,
    HandlerFuture, SubscriptionId, Unsubscribe,
};
pub use router::{BINDINGS, Binding, Invalidation, InvalidationRouter, invalidation_for};
pub use topic::{EventTopic, PortalEvent};
