//! Computed data points and threshold conditions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fqdsn::{Fqdsn, Name};
use crate::quantity::Quantity;

/// One computed data point for a statistic series over a single period.
///
/// Data points are produced by upstream aggregation or by expression
/// evaluation. They are immutable once created; sinks receive them by
/// reference and never mutate them.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AggregatedData {
    /// The series this point belongs to.
    pub fqdsn: Fqdsn,
    /// The host that produced the underlying samples.
    pub host: Name,
    /// The length of the aggregation period.
    pub period: Duration,
    /// The start instant of the aggregation period.
    pub period_start: DateTime<Utc>,
    /// The computed value.
    pub value: Quantity,
    /// The number of samples that went into the value.
    pub population_size: u64,
}

impl AggregatedData {
    /// Returns the end instant of the aggregation period.
    pub fn period_end(&self) -> DateTime<Utc> {
        self.period_start + self.period
    }

    /// Returns the age of this point at `now` in milliseconds.
    ///
    /// The age is measured from the end of the aggregation period; points
    /// whose period has not yet elapsed have a negative age.
    pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
        (now - self.period_end()).num_milliseconds()
    }
}

/// A named threshold evaluation result tied to a statistic series.
///
/// Conditions flow through the sink chain alongside data points but are never
/// merged into them. Immutable once created.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Condition {
    /// The name of the threshold check.
    pub name: Name,
    /// The severity of the threshold check.
    pub severity: Name,
    /// The series the threshold applies to.
    pub fqdsn: Fqdsn,
    /// The threshold value.
    pub threshold: Quantity,
    /// Whether the threshold was breached, if known.
    pub triggered: Option<bool>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::statistics::Statistic;

    use super::*;

    fn some_data() -> AggregatedData {
        AggregatedData {
            fqdsn: Fqdsn::new("prod", "web", "latency", Statistic::Mean),
            host: "app1.example.com".into(),
            period: Duration::from_secs(60),
            period_start: Utc.with_ymd_and_hms(2015, 2, 5, 10, 0, 0).unwrap(),
            value: Quantity::new(12.5, crate::quantity::Unit::Millisecond),
            population_size: 120,
        }
    }

    #[test]
    fn test_period_end() {
        let data = some_data();
        assert_eq!(
            data.period_end(),
            Utc.with_ymd_and_hms(2015, 2, 5, 10, 1, 0).unwrap()
        );
    }

    #[test]
    fn test_age_millis() {
        let data = some_data();

        let now = Utc.with_ymd_and_hms(2015, 2, 5, 10, 1, 30).unwrap();
        assert_eq!(data.age_millis(now), 30_000);

        // A period that has not elapsed yet has a negative age.
        let before = Utc.with_ymd_and_hms(2015, 2, 5, 10, 0, 30).unwrap();
        assert_eq!(data.age_millis(before), -30_000);
    }
}
