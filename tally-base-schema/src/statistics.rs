//! Statistic kinds and the name-based statistic factory.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// A named, stateless computation over the samples of one period.
///
/// Statistics are pure value objects compared by kind: two values of the same
/// variant are equal regardless of how they were obtained, so a statistic can
/// be used directly as part of a map key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Statistic {
    /// The arithmetic mean of all samples.
    #[serde(rename = "mean")]
    Mean,
    /// The sum of all samples.
    #[serde(rename = "sum")]
    Sum,
    /// The number of samples.
    #[serde(rename = "count", alias = "n")]
    Count,
    /// The smallest sample, equivalent to the 0th percentile.
    #[serde(rename = "min", alias = "tp0")]
    Min,
    /// The largest sample, equivalent to the 100th percentile.
    #[serde(rename = "max", alias = "tp100")]
    Max,
    /// The 50th percentile.
    #[serde(rename = "median", alias = "tp50")]
    Median,
    /// The 90th percentile.
    #[serde(rename = "tp90")]
    Tp90,
    /// The 95th percentile.
    #[serde(rename = "tp95")]
    Tp95,
    /// The 99th percentile.
    #[serde(rename = "tp99")]
    Tp99,
    /// The 99.9th percentile.
    #[serde(rename = "tp99.9")]
    Tp999,
}

impl Statistic {
    /// Returns all statistic kinds.
    pub fn all() -> &'static [Statistic] {
        &[
            Self::Mean,
            Self::Sum,
            Self::Count,
            Self::Min,
            Self::Max,
            Self::Median,
            Self::Tp90,
            Self::Tp95,
            Self::Tp99,
            Self::Tp999,
        ]
    }

    /// Returns the canonical name of this statistic.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::Tp90 => "tp90",
            Self::Tp95 => "tp95",
            Self::Tp99 => "tp99",
            Self::Tp999 => "tp99.9",
        }
    }

    /// Returns the aliases this statistic is also known by.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Count => &["n"],
            Self::Min => &["tp0"],
            Self::Max => &["tp100"],
            Self::Median => &["tp50"],
            _ => &[],
        }
    }

    /// Computes this statistic over a non-empty set of samples.
    ///
    /// Samples may be reordered in place; percentile statistics sort them by
    /// value. Samples are assumed to share a unit; the result carries the
    /// unit of the first sample, except for [`Statistic::Count`] which is
    /// dimensionless. Returns `None` for an empty sample set.
    pub fn calculate(self, samples: &mut [Quantity]) -> Option<Quantity> {
        if samples.is_empty() {
            return None;
        }

        let unit = samples[0].unit;
        let value = match self {
            Self::Mean => {
                samples.iter().map(|q| q.value).sum::<f64>() / samples.len() as f64
            }
            Self::Sum => samples.iter().map(|q| q.value).sum(),
            Self::Count => return Some(Quantity::unitless(samples.len() as f64)),
            Self::Min => percentile(samples, 0.0),
            Self::Max => percentile(samples, 100.0),
            Self::Median => percentile(samples, 50.0),
            Self::Tp90 => percentile(samples, 90.0),
            Self::Tp95 => percentile(samples, 95.0),
            Self::Tp99 => percentile(samples, 99.0),
            Self::Tp999 => percentile(samples, 99.9),
        };

        Some(Quantity { value, unit })
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Computes the nearest-rank percentile over a non-empty sample set, sorting
/// the samples by value.
fn percentile(samples: &mut [Quantity], percentile: f64) -> f64 {
    samples.sort_unstable_by(|a, b| a.value.total_cmp(&b.value));
    let index = ((samples.len() - 1) as f64 * percentile / 100.0).ceil() as usize;
    samples[index].value
}

/// An error raised when two statistics claim the same name or alias.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("statistic name {name:?} is already registered to {existing}")]
pub struct DuplicateStatisticError {
    /// The contested name or alias.
    pub name: &'static str,
    /// The statistic that registered the name first.
    pub existing: Statistic,
}

/// Resolves statistic names and aliases to [`Statistic`] values.
///
/// The factory is populated at construction from every statistic's canonical
/// name and aliases, and is immutable afterwards; concurrent lookups require
/// no synchronization. Registration fails fast when two statistics claim the
/// same name, which aborts startup rather than silently shadowing a
/// statistic.
#[derive(Clone, Debug)]
pub struct StatisticFactory {
    statistics: HashMap<&'static str, Statistic>,
}

impl StatisticFactory {
    /// Creates a factory with all built-in statistics registered.
    pub fn new() -> Result<Self, DuplicateStatisticError> {
        let mut factory = Self {
            statistics: HashMap::new(),
        };

        for &statistic in Statistic::all() {
            factory.register(statistic)?;
        }

        Ok(factory)
    }

    fn register(&mut self, statistic: Statistic) -> Result<(), DuplicateStatisticError> {
        self.insert(statistic.name(), statistic)?;
        for &alias in statistic.aliases() {
            self.insert(alias, statistic)?;
        }
        Ok(())
    }

    fn insert(&mut self, name: &'static str, statistic: Statistic) -> Result<(), DuplicateStatisticError> {
        match self.statistics.insert(name, statistic) {
            Some(existing) if existing != statistic => {
                Err(DuplicateStatisticError { name, existing })
            }
            _ => Ok(()),
        }
    }

    /// Resolves a case-sensitive statistic name or alias.
    ///
    /// Returns `None` for unknown names; an unknown statistic in
    /// configuration-driven input is an expected, recoverable condition.
    pub fn create_statistic(&self, name: &str) -> Option<Statistic> {
        self.statistics.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_create_statistic() {
        let factory = StatisticFactory::new().unwrap();

        let cases: &[(&[&str], Statistic)] = &[
            (&["mean"], Statistic::Mean),
            (&["sum"], Statistic::Sum),
            (&["count", "n"], Statistic::Count),
            (&["min", "tp0"], Statistic::Min),
            (&["max", "tp100"], Statistic::Max),
            (&["median", "tp50"], Statistic::Median),
            (&["tp90"], Statistic::Tp90),
            (&["tp95"], Statistic::Tp95),
            (&["tp99"], Statistic::Tp99),
            (&["tp99.9"], Statistic::Tp999),
        ];

        for (names, expected) in cases {
            for name in *names {
                assert_eq!(factory.create_statistic(name), Some(*expected), "{name}");
            }
        }
    }

    #[test]
    fn test_unknown_statistic() {
        let factory = StatisticFactory::new().unwrap();
        assert_eq!(factory.create_statistic("notARealStatistic"), None);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let factory = StatisticFactory::new().unwrap();
        assert_eq!(factory.create_statistic("Mean"), None);
    }

    #[test]
    fn test_names_and_aliases_are_disjoint() {
        let mut seen = HashSet::new();
        for &statistic in Statistic::all() {
            assert!(seen.insert(statistic.name()), "{statistic}");
            for &alias in statistic.aliases() {
                assert!(seen.insert(alias), "{alias}");
            }
        }
    }

    #[test]
    fn test_statistic_serde_aliases() {
        let statistic: Statistic = serde_json::from_str(r#""tp0""#).unwrap();
        assert_eq!(statistic, Statistic::Min);

        assert_eq!(serde_json::to_string(&Statistic::Tp999).unwrap(), r#""tp99.9""#);
    }

    #[test]
    fn test_calculate_mean_sum_count() {
        use crate::quantity::Unit;

        let mut samples: Vec<Quantity> = [4.0, 2.0, 6.0]
            .iter()
            .map(|&v| Quantity::new(v, Unit::Millisecond))
            .collect();

        assert_eq!(
            Statistic::Mean.calculate(&mut samples),
            Some(Quantity::new(4.0, Unit::Millisecond))
        );
        assert_eq!(
            Statistic::Sum.calculate(&mut samples),
            Some(Quantity::new(12.0, Unit::Millisecond))
        );
        assert_eq!(
            Statistic::Count.calculate(&mut samples),
            Some(Quantity::unitless(3.0))
        );
    }

    #[test]
    fn test_calculate_percentiles() {
        let mut samples: Vec<Quantity> = (1..=100).map(|v| Quantity::unitless(v as f64)).collect();

        assert_eq!(
            Statistic::Min.calculate(&mut samples),
            Some(Quantity::unitless(1.0))
        );
        assert_eq!(
            Statistic::Max.calculate(&mut samples),
            Some(Quantity::unitless(100.0))
        );
        // Nearest-rank on 100 samples: index = ceil(99 * p / 100).
        assert_eq!(
            Statistic::Median.calculate(&mut samples),
            Some(Quantity::unitless(51.0))
        );
        assert_eq!(
            Statistic::Tp90.calculate(&mut samples),
            Some(Quantity::unitless(91.0))
        );
        assert_eq!(
            Statistic::Tp99.calculate(&mut samples),
            Some(Quantity::unitless(100.0))
        );
        assert_eq!(
            Statistic::Tp999.calculate(&mut samples),
            Some(Quantity::unitless(100.0))
        );
    }

    #[test]
    fn test_calculate_empty() {
        let mut samples: Vec<Quantity> = Vec::new();
        for &statistic in Statistic::all() {
            assert_eq!(statistic.calculate(&mut samples), None, "{statistic}");
        }
    }
}
