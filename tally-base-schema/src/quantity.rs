//! Units and unit-carrying numeric values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The unit of measurement of a [`Quantity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Time in nanoseconds.
    Nanosecond,
    /// Time in microseconds.
    Microsecond,
    /// Time in milliseconds.
    Millisecond,
    /// Time in seconds.
    Second,
    /// Time in minutes.
    Minute,
    /// Time in hours.
    Hour,
    /// Time in days.
    Day,
    /// Size in bits.
    Bit,
    /// Size in bytes.
    Byte,
    /// Size in kilobytes (1,000 bytes).
    Kilobyte,
    /// Size in megabytes (1,000,000 bytes).
    Megabyte,
    /// Size in gigabytes (1,000,000,000 bytes).
    Gigabyte,
}

impl Unit {
    /// Returns the canonical name of this unit.
    pub fn name(self) -> &'static str {
        match self {
            Self::Nanosecond => "nanosecond",
            Self::Microsecond => "microsecond",
            Self::Millisecond => "millisecond",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Bit => "bit",
            Self::Byte => "byte",
            Self::Kilobyte => "kilobyte",
            Self::Megabyte => "megabyte",
            Self::Gigabyte => "gigabyte",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A numeric value with an optional unit of measurement.
///
/// Quantities are immutable. A missing unit marks a dimensionless value, such
/// as a sample count.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Quantity {
    /// The numeric value.
    pub value: f64,
    /// The unit of the value, if any.
    pub unit: Option<Unit>,
}

impl Quantity {
    /// Creates a quantity with a unit.
    pub fn new(value: f64, unit: Unit) -> Self {
        Self {
            value,
            unit: Some(unit),
        }
    }

    /// Creates a dimensionless quantity.
    pub fn unitless(value: f64) -> Self {
        Self { value, unit: None }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Some(unit) => write!(f, "{} {}s", self.value, unit),
            None => write!(f, "{}", self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_display() {
        assert_eq!(Quantity::new(1.5, Unit::Second).to_string(), "1.5 seconds");
        assert_eq!(Quantity::unitless(42.0).to_string(), "42");
    }

    #[test]
    fn test_unit_serde() {
        let unit: Unit = serde_json::from_str(r#""millisecond""#).unwrap();
        assert_eq!(unit, Unit::Millisecond);
    }
}
