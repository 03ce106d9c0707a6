//! `fqdecomp-events`: bus mechanics and event routing.
//!
//! - [`EventBus`] / [`Subscription`]: transport-agnostic pub/sub
//! - [`InMemoryEventBus`]: channel-backed implementation
//! - [`BusEvent`]: the envelope every message travels in
//! - [`EventRouter`]: structural classification into [`Route`]s

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod router;

pub use bus::{EventBus, Subscription};
pub use envelope::BusEvent;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use router::{
    DEFAULT_EVENT_SOURCE, EventRouter, RequestClass, Route, RouteError, STATE_CHANGE_DETAIL_TYPE,
    SWEEP_TICK_DETAIL_TYPE,
};
