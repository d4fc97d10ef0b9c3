#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! In-process event bus for the TinyTorrent engine.
//!
//! The bus provides a typed event enum, sequential identifiers, synchronous
//! handlers for engine-internal reactions, and broadcast streams with a replay
//! ring for asynchronous observers.
//!
//! Layout: `payloads.rs` (event types), `routing.rs` (`EventBus`).

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, ErrorSource, Event, EventEnvelope, EventId};
pub use routing::{EventBus, EventStream, HandlerId};
