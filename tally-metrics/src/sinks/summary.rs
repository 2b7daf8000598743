//! The periodic summary sink.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tally_base_schema::data::{AggregatedData, Condition};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::statsd::{SinkCounters, SinkGauges};

use super::Sink;

/// Parameters for the [`SummarySink`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SummarySinkConfig {
    /// The interval between summary flushes in milliseconds.
    ///
    /// Defaults to 500; minimum 1.
    pub flush_interval_ms: u64,
}

impl Default for SummarySinkConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 500,
        }
    }
}

/// Accumulates statistics about the data passing through the pipeline and
/// periodically emits them; effectively, this is metrics about metrics.
///
/// `record` never blocks on the flush timer: it increments a monotonic data
/// point counter, inserts into two concurrently-writable sets of distinct
/// metric names and series signatures, and raises a running maximum of data
/// point age. An independent interval task swaps each accumulator for a
/// fresh empty one and only then reads the swapped-out snapshot, so writers
/// never contribute to a structure that is simultaneously being drained. One
/// tick is in flight at a time.
///
/// Emission failure is confined to the telemetry client and never prevents
/// the accumulators from resetting; losing a metrics-about-metrics interval
/// is acceptable, blocking the aggregation path is not.
pub struct SummarySink {
    state: Arc<SummaryState>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SummarySink {
    /// Starts a summary sink and its flush timer.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(name: impl Into<String>, config: &SummarySinkConfig) -> Self {
        let sink = Self::unscheduled(name);
        let flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));

        let state = Arc::clone(&sink.state);
        let mut shutdown_rx = sink.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + flush_interval;
            let mut ticker = tokio::time::interval_at(start, flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => state.flush(),
                }
            }
        });

        *sink.handle.lock() = Some(handle);
        sink
    }

    /// Creates a summary sink without a flush timer.
    ///
    /// Accumulates until [`close`](Sink::close) flushes. Tests use this
    /// directly to drive flushing explicitly.
    fn unscheduled(name: impl Into<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(SummaryState::new(name.into())),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }
}

impl Sink for SummarySink {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn record(&self, data: &[AggregatedData], conditions: &[Condition]) {
        tally_log::debug!(
            "writing aggregated data: sink={} data={} conditions={}",
            self.state.name,
            data.len(),
            conditions.len()
        );

        self.state.observe(Utc::now(), data);
    }

    fn close(&self) {
        // Stop the timer, then flush whatever accumulated since the last
        // tick. The flush lock serializes this final flush against a tick
        // that is already in flight.
        self.shutdown_tx.send(true).ok();
        drop(self.handle.lock().take());

        self.state.flush();
    }
}

impl fmt::Debug for SummarySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummarySink")
            .field("name", &self.state.name)
            .field("data_points", &self.state.data_points.load(Ordering::Relaxed))
            .finish()
    }
}

struct SummaryState {
    name: String,
    data_points: AtomicU64,
    unique_metrics: ArcSwap<papaya::HashSet<String>>,
    unique_series: ArcSwap<papaya::HashSet<String>>,
    max_age_ms: AtomicU64,
    flush_lock: Mutex<()>,
}

impl SummaryState {
    fn new(name: String) -> Self {
        Self {
            name,
            data_points: AtomicU64::new(0),
            unique_metrics: ArcSwap::from_pointee(papaya::HashSet::new()),
            unique_series: ArcSwap::from_pointee(papaya::HashSet::new()),
            max_age_ms: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    fn observe(&self, now: DateTime<Utc>, data: &[AggregatedData]) {
        self.data_points.fetch_add(data.len() as u64, Ordering::Relaxed);

        let unique_metrics = self.unique_metrics.load();
        let unique_series = self.unique_series.load();
        let unique_metrics = unique_metrics.pin();
        let unique_series = unique_series.pin();

        for datum in data {
            unique_metrics.insert(format!("{}.{}", datum.fqdsn.service, datum.fqdsn.metric));
            unique_series.insert(format!(
                "{}.{}.{}.{}.{}.{}",
                datum.fqdsn.cluster,
                datum.host,
                datum.fqdsn.service,
                datum.fqdsn.metric,
                datum.fqdsn.statistic,
                datum.period.as_secs(),
            ));

            // Points whose period has not elapsed yet count as age zero.
            let age = datum.age_millis(now).max(0) as u64;
            self.max_age_ms.fetch_max(age, Ordering::Relaxed);
        }
    }

    /// Swaps all accumulators for fresh ones and emits the swapped-out
    /// snapshot.
    ///
    /// The data point counter swap is exact: every recorded point is
    /// accounted in exactly one flush window. The distinct-name sets
    /// tolerate a writer that loaded the old set racing the swap; its
    /// insert lands in the drained snapshot, as the original counters did.
    fn flush(&self) {
        let _guard = self.flush_lock.lock();

        let data_points = self.data_points.swap(0, Ordering::Relaxed);
        let unique_metrics = swap_set(&self.unique_metrics);
        let unique_series = swap_set(&self.unique_series);
        let max_age_ms = self.max_age_ms.swap(0, Ordering::Relaxed);

        let unique_metrics = unique_metrics.pin().len();
        let unique_series = unique_series.pin().len();

        tally_log::debug!(
            "flushing summary statistics: sink={} data_points={data_points} unique_metrics={unique_metrics} unique_series={unique_series} max_age_ms={max_age_ms}",
            self.name,
        );

        let sink = self.name.as_str();
        tally_statsd::metric!(
            counter(SinkCounters::SummaryDataPoints) += data_points as i64,
            sink = sink,
        );
        tally_statsd::metric!(
            counter(SinkCounters::SummaryUniqueMetrics) += unique_metrics as i64,
            sink = sink,
        );
        tally_statsd::metric!(
            counter(SinkCounters::SummaryUniqueSeries) += unique_series as i64,
            sink = sink,
        );
        tally_statsd::metric!(gauge(SinkGauges::SummaryMaxAge) = max_age_ms, sink = sink);
    }
}

/// Replaces the set in `slot` with a fresh one sized after it, returning the
/// previous set.
fn swap_set(slot: &ArcSwap<papaya::HashSet<String>>) -> Arc<papaya::HashSet<String>> {
    let capacity = slot.load().pin().len();
    slot.swap(Arc::new(papaya::HashSet::with_capacity(capacity)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use tally_base_schema::fqdsn::Fqdsn;
    use tally_base_schema::quantity::Quantity;
    use tally_base_schema::statistics::Statistic;

    use super::*;

    fn datum(metric: &str, statistic: Statistic, host: &str) -> AggregatedData {
        AggregatedData {
            fqdsn: Fqdsn::new("prod", "web", metric, statistic),
            host: host.into(),
            period: StdDuration::from_secs(60),
            period_start: Utc::now() - chrono::Duration::seconds(120),
            value: Quantity::unitless(1.0),
            population_size: 10,
        }
    }

    fn counter_value(captures: &[String], name: &str) -> Option<u64> {
        captures.iter().find_map(|line| {
            let (metric, rest) = line.split_once(':')?;
            if metric != name {
                return None;
            }
            rest.split('|').next()?.parse().ok()
        })
    }

    #[test]
    fn test_flush_reports_and_resets() {
        let sink = SummarySink::unscheduled("console");

        sink.record(
            &[
                datum("latency", Statistic::Mean, "app1"),
                datum("latency", Statistic::Tp99, "app1"),
                datum("requests", Statistic::Count, "app2"),
            ],
            &[],
        );

        let captures = tally_statsd::with_capturing_test_client(|| sink.state.flush());

        assert_eq!(
            counter_value(&captures, "sinks.summary.data_points"),
            Some(3)
        );
        // "web.latency" and "web.requests".
        assert_eq!(
            counter_value(&captures, "sinks.summary.unique_metrics"),
            Some(2)
        );
        // Distinct statistic and host make all three series unique.
        assert_eq!(
            counter_value(&captures, "sinks.summary.unique_series"),
            Some(3)
        );
        // The batch is two minutes stale.
        let age = counter_value(&captures, "sinks.summary.max_age").unwrap();
        assert!(age >= 60_000, "{age}");

        // A tick without new data emits zero for all counters.
        let captures = tally_statsd::with_capturing_test_client(|| sink.state.flush());
        assert_eq!(
            counter_value(&captures, "sinks.summary.data_points"),
            Some(0)
        );
        assert_eq!(
            counter_value(&captures, "sinks.summary.unique_metrics"),
            Some(0)
        );
        assert_eq!(
            counter_value(&captures, "sinks.summary.unique_series"),
            Some(0)
        );
        assert_eq!(counter_value(&captures, "sinks.summary.max_age"), Some(0));
    }

    #[test]
    fn test_unique_metrics_count_distinct_names() {
        let sink = SummarySink::unscheduled("console");

        for index in 0..7 {
            sink.record(&[datum(&format!("metric_{index}"), Statistic::Mean, "app1")], &[]);
        }
        // Repeats do not add new names.
        sink.record(&[datum("metric_0", Statistic::Mean, "app1")], &[]);

        let captures = tally_statsd::with_capturing_test_client(|| sink.state.flush());
        assert_eq!(
            counter_value(&captures, "sinks.summary.unique_metrics"),
            Some(7)
        );
        assert_eq!(
            counter_value(&captures, "sinks.summary.data_points"),
            Some(8)
        );
    }

    #[test]
    fn test_concurrent_writers_account_every_point_once() {
        let sink = Arc::new(SummarySink::unscheduled("console"));

        const WRITERS: usize = 8;
        const BATCHES: usize = 200;

        let mut total = 0u64;
        let captures = tally_statsd::with_capturing_test_client(|| {
            let handles: Vec<_> = (0..WRITERS)
                .map(|writer| {
                    let sink = Arc::clone(&sink);
                    std::thread::spawn(move || {
                        for index in 0..BATCHES {
                            let data =
                                [datum(&format!("metric_{writer}_{index}"), Statistic::Mean, "app1")];
                            sink.record(&data, &[]);
                        }
                    })
                })
                .collect();

            // Flush concurrently with the writers.
            while handles.iter().any(|handle| !handle.is_finished()) {
                sink.state.flush();
            }
            for handle in handles {
                handle.join().unwrap();
            }

            // Account for everything recorded after the last mid-run flush.
            sink.state.flush();
        });

        for line in &captures {
            if let Some(value) = counter_value(std::slice::from_ref(line), "sinks.summary.data_points") {
                total += value;
            }
        }

        assert_eq!(total, (WRITERS * BATCHES) as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_resets_accumulators() {
        let sink = SummarySink::start("console", &SummarySinkConfig::default());

        sink.record(&[datum("latency", Statistic::Mean, "app1")], &[]);
        assert_eq!(sink.state.data_points.load(Ordering::Relaxed), 1);

        // Let the flush interval elapse; the timer task swaps the counters
        // out even though no telemetry client is configured.
        tokio::time::sleep(StdDuration::from_millis(600)).await;

        assert_eq!(sink.state.data_points.load(Ordering::Relaxed), 0);

        sink.close();
    }

    #[test]
    fn test_close_performs_final_flush() {
        let sink = SummarySink::unscheduled("console");
        sink.record(&[datum("latency", Statistic::Mean, "app1")], &[]);

        let captures = tally_statsd::with_capturing_test_client(|| sink.close());
        assert_eq!(
            counter_value(&captures, "sinks.summary.data_points"),
            Some(1)
        );
    }
}
