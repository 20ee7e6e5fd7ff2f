//! `ember-middleware` – the reactive layer.
//!
//! Decouples hardware and state producers from their consumers (UI,
//! settings persistence, other services).
//!
//! # Modules
//!
//! - [`observable`] – [`Observable<T>`][observable::Observable]: a thread-safe
//!   value cell that notifies subscribers on change.  The lock is never held
//!   while a subscriber runs, so callbacks may freely read, subscribe, or
//!   unsubscribe.
//! - [`bus`] – [`EventBus`][bus::EventBus]: named-topic publish/subscribe
//!   with a wildcard listener mode and an async tap for Tokio consumers.
//! - [`topics`] – the documented topic names produced by the kernel.

pub mod bus;
pub mod observable;
pub mod topics;

pub use bus::{EventBus, EventStream, SubscriptionId};
pub use observable::{Observable, StringObservable, SubscriptionId as ObservableSubscription};
