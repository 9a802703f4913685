//! Data model (§3): events, filters, subscriptions, wire frames.

pub mod event;
pub mod filter;
pub mod message;
pub mod subscription;

pub use event::{Event, EventClass, EventRecord};
pub use filter::Filter;
pub use message::{ClientFrame, RelayMessage};
pub use subscription::{IndexKey, SubId, Subscription};
