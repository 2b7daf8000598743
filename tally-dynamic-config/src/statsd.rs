use tally_statsd::{CounterMetric, GaugeMetric};

/// Counter metrics for dynamic expression configuration.
pub enum ConfigCounters {
    /// Incremented for every successfully published expression plan.
    ReloadSuccesses,

    /// Incremented for every reload cycle that was abandoned.
    ///
    /// Tagged by the failing stage: `fetch`, `parse`, or `resolve`.
    ReloadFailures,
}

impl CounterMetric for ConfigCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::ReloadSuccesses => "config.expressions.reloads",
            Self::ReloadFailures => "config.expressions.reload_failures",
        }
    }
}

/// Gauge metrics for dynamic expression configuration.
pub enum ConfigGauges {
    /// The number of expressions in the active plan.
    ActiveExpressions,
}

impl GaugeMetric for ConfigGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::ActiveExpressions => "config.expressions.active",
        }
    }
}
