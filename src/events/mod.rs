//! Watch/trigger event bus
//!
//! Watchers persist until removed. Triggers fire once, the first time their
//! predicate passes, and are then discarded. Each bus is an owned value;
//! clones share the same listener tables.

mod bus;
mod event;

pub use bus::{EventBus, HandlerResult};
pub use event::{Event, EventKind};
