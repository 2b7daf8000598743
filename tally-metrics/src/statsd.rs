use tally_statsd::{CounterMetric, GaugeMetric};

/// Counter metrics for pipeline sinks.
pub enum SinkCounters {
    /// Incremented for every attempted expression evaluation.
    ///
    /// Tagged by sink name.
    ExpressionEvaluations,

    /// Incremented for every expression whose evaluation failed.
    ///
    /// Failures skip only the failing expression's contribution for the
    /// batch; the remaining plan still runs.
    ExpressionFailures,

    /// Incremented for every expression whose inputs were absent from the
    /// batch.
    ExpressionMissing,

    /// The number of data points observed since the last summary flush.
    SummaryDataPoints,

    /// The number of distinct `service.metric` names observed since the last
    /// summary flush.
    SummaryUniqueMetrics,

    /// The number of distinct fully-qualified series observed since the last
    /// summary flush.
    SummaryUniqueSeries,
}

impl CounterMetric for SinkCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::ExpressionEvaluations => "sinks.derivation.evaluations",
            Self::ExpressionFailures => "sinks.derivation.failures",
            Self::ExpressionMissing => "sinks.derivation.missing",
            Self::SummaryDataPoints => "sinks.summary.data_points",
            Self::SummaryUniqueMetrics => "sinks.summary.unique_metrics",
            Self::SummaryUniqueSeries => "sinks.summary.unique_series",
        }
    }
}

/// Gauge metrics for pipeline sinks.
pub enum SinkGauges {
    /// The number of distinct cluster-service keys observed by the
    /// derivation sink.
    ClusterServices,

    /// The maximum age in milliseconds of data points observed since the
    /// last summary flush.
    ///
    /// Age is measured from the end of a data point's aggregation period to
    /// its observation.
    SummaryMaxAge,
}

impl GaugeMetric for SinkGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::ClusterServices => "sinks.derivation.cluster_services",
            Self::SummaryMaxAge => "sinks.summary.max_age",
        }
    }
}
