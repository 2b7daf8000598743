//! Hot-swappable expression configuration.
//!
//! The [`ExpressionConfigManager`] owns the lifecycle of "discover an
//! expression-set change, fetch it, parse it, resolve it, atomically publish
//! it". Evaluators always observe *some* valid plan through a [`SharedPlan`]
//! handle: a complete, internally consistent snapshot that is replaced
//! wholesale and never mutated in place. Reload work runs on a background
//! task and never blocks evaluation.
//!
//! Change detection and transport are collaborator contracts: a [`Trigger`]
//! answers "may the content have changed?", and an [`ExpressionSource`]
//! fetches the typed configuration documents for the currently observed
//! cluster-service keys. Both are constructed explicitly and injected at
//! manager construction.
//!
//! A failed reload cycle, whether fetching, parsing, or resolving, leaves
//! the previously published plan active; failures are logged and counted but
//! never surface to callers of evaluation.

#![warn(missing_docs)]

mod manager;
mod source;
mod statsd;
mod trigger;

pub use self::manager::{
    ExpressionConfigManager, ExpressionConfigManagerConfig, SharedPlan, SubscriptionState,
};
pub use self::source::{ExpressionSource, SourceError};
pub use self::trigger::Trigger;
