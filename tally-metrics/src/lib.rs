//! Pipeline sinks for aggregated metric data.
//!
//! Batches of [`AggregatedData`](tally_base_schema::data::AggregatedData) and
//! [`Condition`](tally_base_schema::data::Condition) flow through an ordered
//! chain of [`sinks::Sink`]s. This crate provides the two processing sinks of
//! the aggregation core and the composition glue:
//!
//! - [`sinks::DerivationSink`] computes additional data points from
//!   configured expressions and appends them to the batch before forwarding
//!   it. The active expression plan is hot-swapped by an owned
//!   [`ExpressionConfigManager`](tally_dynamic_config::ExpressionConfigManager).
//! - [`sinks::SummarySink`] accumulates statistics about the batches passing
//!   through and periodically emits them as metrics-about-metrics.
//! - [`sinks::MultiSink`] fans a batch out to several downstream sinks.
//!
//! Terminal sinks (file writers, forwarders, ...) live with their transports;
//! anything implementing [`sinks::Sink`] can terminate the chain.

#![warn(missing_docs)]

pub mod sinks;

mod statsd;
