//! In-process publish/subscribe dispatcher for the Voxline pipeline.
//!
//! The bus is the only link between the transport, the recognition sessions,
//! the answer logic, and the synthesizer. None of them hold references to
//! each other; they subscribe handlers to [`Topic`]s and publish [`Event`]s.
//!
//! # Delivery model
//!
//! | Property | Behaviour |
//! |----------|-----------|
//! | Order | Registration order, one handler at a time |
//! | Completion | `publish` returns after every handler finished |
//! | Failures | Collected; never stop delivery to later handlers |
//! | Snapshot | Handler list is copied when `publish` starts |
//! | Durability | None: in-process, at-most-once |
//!
//! Because each handler is awaited before the next one runs, `publish` is a
//! backpressure point: a slow handler delays its publisher.
//!
//! # Usage
//!
//! ```rust,ignore
//! use voxline_bus::{handler_fn, EventBus};
//! use voxline_types::{Event, Topic};
//!
//! let bus = EventBus::new();
//! let printer = handler_fn("printer", |event: Event| async move {
//!     tracing::info!(topic = %event.topic(), "got event");
//!     Ok(())
//! });
//! bus.subscribe(Topic::TranscriptFinal, printer.clone())?;
//! bus.publish(Topic::TranscriptFinal, event).await?;
//! ```
//!
//! [`Topic`]: voxline_types::Topic
//! [`Event`]: voxline_types::Event

mod bus;
mod error;
mod handler;

pub use bus::EventBus;
pub use error::{BusError, HandlerError, HandlerFailure};
pub use handler::{handler_fn, EventHandler, FnHandler, HandlerResult};
