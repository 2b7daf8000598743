//! The sink chain.

use std::fmt;

use tally_base_schema::data::{AggregatedData, Condition};

mod derivation;
mod summary;

pub use self::derivation::DerivationSink;
pub use self::summary::{SummarySink, SummarySinkConfig};

/// A pipeline stage consuming batches of aggregated data and conditions.
///
/// Sinks borrow their input: batches are immutable, and a sink that extends a
/// batch forwards a new slice. `record` is invoked concurrently from multiple
/// worker threads and must not block on background work. `close` is called
/// exactly once during shutdown, after in-flight recording has completed;
/// wrapping sinks close their owned resources before delegating.
pub trait Sink: fmt::Debug + Send + Sync {
    /// Returns the name of this sink, used in logs and telemetry.
    fn name(&self) -> &str;

    /// Records one batch of aggregated data and conditions.
    fn record(&self, data: &[AggregatedData], conditions: &[Condition]);

    /// Closes this sink, releasing owned resources.
    fn close(&self);
}

/// Fans every batch out to an ordered list of sinks.
///
/// Each member receives every batch; a member failing to process a batch
/// internally does not prevent delivery to the remaining members, since
/// sinks report their own failures instead of raising them. Closing the
/// multi-sink closes every member once, in order.
#[derive(Debug)]
pub struct MultiSink {
    name: String,
    sinks: Vec<Box<dyn Sink>>,
}

impl MultiSink {
    /// Creates a multi-sink forwarding to `sinks` in order.
    pub fn new(name: impl Into<String>, sinks: Vec<Box<dyn Sink>>) -> Self {
        Self {
            name: name.into(),
            sinks,
        }
    }
}

impl Sink for MultiSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn record(&self, data: &[AggregatedData], conditions: &[Condition]) {
        for sink in &self.sinks {
            sink.record(data, conditions);
        }
    }

    fn close(&self) {
        for sink in &self.sinks {
            sink.close();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::CaptureSink;
    use super::*;

    #[test]
    fn test_multi_sink_fans_out_and_closes_once() {
        let first = CaptureSink::default();
        let second = CaptureSink::default();

        let multi = MultiSink::new(
            "fanout",
            vec![Box::new(first.clone()), Box::new(second.clone())],
        );

        multi.record(&[], &[]);
        assert_eq!(first.batches.lock().len(), 1);
        assert_eq!(second.batches.lock().len(), 1);

        multi.close();
        assert!(first.closed.load(std::sync::atomic::Ordering::Relaxed));
        assert!(second.closed.load(std::sync::atomic::Ordering::Relaxed));
    }
}
