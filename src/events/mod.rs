// src/events/mod.rs

//! Event bus shared by the scheduler, the feature board and any host
//! subscribers (timeline views, forwarding layers, loggers).
//!
//! - [`event`] defines the immutable [`Event`] record and [`EventKind`].
//! - [`bus`] is the dispatcher itself.
//! - [`sink`] lets outside layers receive every event without subscribing.
//!
//! There is no global bus: construct one and hand clones to whoever needs it.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::{
    DEFAULT_EVENT_SOURCE, DEFAULT_HISTORY_CAPACITY, DEFAULT_HISTORY_LIMIT, EventBus,
    EventBusConfig, Handler, HandlerFuture, SubscriptionId, Unsubscribe, handler,
};
pub use event::{EmitOptions, Event, EventId, EventKind};
pub use sink::{ChannelSink, EventSink};
