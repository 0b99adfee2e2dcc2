//! 流量类型：意图、目的地与结果。
//!
//! # Traffic Types
//!
//! Values that flow through the generator, in order:
//!
//! | Type | Produced by | Consumed by |
//! |------|-------------|-------------|
//! | [`TrafficIntent`] | [`crate::scheduler::RequestScheduler`] | [`crate::dispatcher::Dispatcher`] |
//! | [`Outcome`] | [`crate::dispatcher::Dispatcher`] | [`crate::metrics::MetricsSink`] |
//!
//! Both are immutable once built. Intents are tracked by the dispatcher until
//! exactly one outcome is emitted for them.

pub mod intent;
pub mod outcome;

pub use intent::{Destination, TrafficIntent};
pub use outcome::{ErrorKind, Outcome, OutcomeStatus};
