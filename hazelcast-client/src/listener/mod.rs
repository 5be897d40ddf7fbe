//! Listener infrastructure: client lifecycle notifications.

mod lifecycle;

pub use lifecycle::{LifecycleEvent, LifecycleService};
