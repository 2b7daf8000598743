//! The expression-evaluating sink.

use std::fmt;

use tally_base_schema::data::{AggregatedData, Condition};
use tally_base_schema::fqdsn::ClusterServiceKey;
use tally_dynamic_config::{ExpressionConfigManager, SharedPlan};
use tally_expressions::EvaluationContext;

use crate::statsd::{SinkCounters, SinkGauges};

use super::Sink;

/// Computes additional data points from configured expressions.
///
/// On each batch the sink reports newly observed cluster-service keys to its
/// owned [`ExpressionConfigManager`], captures one snapshot of the active
/// plan, and evaluates every expression in plan order against the working set
/// (the original batch plus points derived earlier in the same pass).
/// Successful evaluations append to the working set; failures and absent
/// inputs are counted and skipped without aborting the remaining plan. The
/// full working set and the unchanged conditions are forwarded to the wrapped
/// sink.
///
/// Expression evaluation relies on batch uniformity: every data point of one
/// batch shares the same host, period, and period start, because batches are
/// aggregated per host and period upstream. The evaluation context is taken
/// from the first data point; this precondition is documented, not enforced.
pub struct DerivationSink {
    name: String,
    manager: ExpressionConfigManager,
    plan: SharedPlan,
    cluster_services: papaya::HashSet<ClusterServiceKey>,
    next: Box<dyn Sink>,
}

impl DerivationSink {
    /// Creates a derivation sink wrapping `next`.
    ///
    /// The sink takes ownership of the configuration manager and tears it
    /// down when closed.
    pub fn new(
        name: impl Into<String>,
        manager: ExpressionConfigManager,
        next: Box<dyn Sink>,
    ) -> Self {
        let plan = manager.plan();
        Self {
            name: name.into(),
            manager,
            plan,
            cluster_services: papaya::HashSet::new(),
            next,
        }
    }

    fn discover_cluster_services(&self, data: &[AggregatedData]) {
        let cluster_services = self.cluster_services.pin();
        for datum in data {
            let key = datum.fqdsn.cluster_service();
            if !cluster_services.contains(&key) {
                cluster_services.insert(key.clone());
                self.manager.register_cluster_service(key);
            }
        }

        tally_statsd::metric!(
            gauge(SinkGauges::ClusterServices) = cluster_services.len() as u64,
            sink = self.name.as_str(),
        );
    }

    fn evaluate_expressions(&self, data: &[AggregatedData]) -> Vec<AggregatedData> {
        // One plan snapshot per batch: a mid-batch reload never changes the
        // order this pass evaluates in.
        let plan = self.plan.current();
        let mut working: Vec<AggregatedData> = data.to_vec();

        let Some(first) = data.first() else {
            return working;
        };

        let mut evaluations = 0i64;
        let mut failures = 0i64;
        let mut missing = 0i64;

        for expression in plan.expressions() {
            evaluations += 1;

            let result = {
                let ctx = EvaluationContext {
                    host: &first.host,
                    period: first.period,
                    period_start: first.period_start,
                    data: &working,
                };
                expression.evaluate(&ctx)
            };

            match result {
                Ok(Some(derived)) => working.push(derived),
                Ok(None) => missing += 1,
                Err(error) => {
                    failures += 1;
                    tally_log::warn!(
                        "expression evaluation failed for {}: {}",
                        expression.target(),
                        tally_log::LogError(&error)
                    );
                }
            }
        }

        let sink = self.name.as_str();
        tally_statsd::metric!(counter(SinkCounters::ExpressionEvaluations) += evaluations, sink = sink);
        tally_statsd::metric!(counter(SinkCounters::ExpressionFailures) += failures, sink = sink);
        tally_statsd::metric!(counter(SinkCounters::ExpressionMissing) += missing, sink = sink);

        working
    }
}

impl Sink for DerivationSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn record(&self, data: &[AggregatedData], conditions: &[Condition]) {
        tally_log::debug!(
            "writing aggregated data: sink={} data={} conditions={}",
            self.name,
            data.len(),
            conditions.len()
        );

        self.discover_cluster_services(data);
        let working = self.evaluate_expressions(data);

        self.next.record(&working, conditions);
    }

    fn close(&self) {
        self.manager.shutdown();
        self.next.close();
    }
}

impl fmt::Debug for DerivationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivationSink")
            .field("name", &self.name)
            .field("manager", &self.manager)
            .field("next", &self.next)
            .finish()
    }
}
