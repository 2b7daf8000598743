//! The expression configuration manager.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tally_base_schema::fqdsn::ClusterServiceKey;
use tally_expressions::{EvaluationPlan, ExpressionRegistry};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::source::ExpressionSource;
use crate::statsd::{ConfigCounters, ConfigGauges};
use crate::trigger::Trigger;

/// Parameters for the [`ExpressionConfigManager`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpressionConfigManagerConfig {
    /// The interval between trigger polls in milliseconds.
    ///
    /// Defaults to 30,000 (30 seconds); minimum 1.
    pub poll_interval_ms: u64,
}

impl Default for ExpressionConfigManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
        }
    }
}

/// A hot-swappable handle to the active evaluation plan.
///
/// Readers load a complete, internally consistent plan without blocking;
/// writers replace the slot atomically and never block readers. A reader
/// holding a loaded plan keeps that snapshot valid even while the slot is
/// replaced.
#[derive(Clone, Debug)]
pub struct SharedPlan(Arc<ArcSwap<EvaluationPlan>>);

impl SharedPlan {
    fn new() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(EvaluationPlan::empty())))
    }

    /// Returns the currently active plan.
    pub fn current(&self) -> Arc<EvaluationPlan> {
        self.0.load_full()
    }

    fn store(&self, plan: EvaluationPlan) {
        self.0.store(Arc::new(plan));
    }
}

/// Lifecycle of the configuration subscription.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscriptionState {
    /// No cluster-service key has been observed yet.
    Unsubscribed,
    /// A subscription covering the current key set is being established.
    Subscribing,
    /// The subscription is established; every trigger firing re-fetches.
    Subscribed,
    /// The manager was shut down. Terminal and never re-entered.
    ShutDown,
}

struct Inner {
    registry: ExpressionRegistry,
    source: Arc<dyn ExpressionSource>,
    plan: SharedPlan,
    keys: Mutex<IndexSet<ClusterServiceKey>>,
    state: Mutex<SubscriptionState>,
}

impl Inner {
    fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    fn set_state(&self, next: SubscriptionState) {
        let mut state = self.state.lock();
        if *state != SubscriptionState::ShutDown {
            *state = next;
        }
    }

    /// Runs one reload cycle: fetch, parse, resolve, publish.
    ///
    /// Every failure abandons the cycle and leaves the previously published
    /// plan active.
    async fn reload(&self) {
        let keys: Vec<ClusterServiceKey> = self.keys.lock().iter().cloned().collect();

        let source = Arc::clone(&self.source);
        let loaded = tokio::task::spawn_blocking(move || source.load(&keys)).await;

        let documents = match loaded {
            Ok(Ok(documents)) => documents,
            Ok(Err(error)) => {
                tally_log::warn!(
                    "failed to fetch expression configuration: {}",
                    tally_log::LogError(&error)
                );
                tally_statsd::metric!(counter(ConfigCounters::ReloadFailures) += 1, stage = "fetch");
                return;
            }
            Err(error) => {
                tally_log::warn!("expression configuration fetch task failed: {error}");
                tally_statsd::metric!(counter(ConfigCounters::ReloadFailures) += 1, stage = "fetch");
                return;
            }
        };

        let expressions = match self.registry.parse(documents) {
            Ok(expressions) => expressions,
            Err(error) => {
                tally_log::warn!(
                    "failed to parse expression configuration: {}",
                    tally_log::LogError(&error)
                );
                tally_statsd::metric!(counter(ConfigCounters::ReloadFailures) += 1, stage = "parse");
                return;
            }
        };

        let plan = match EvaluationPlan::resolve(expressions) {
            Ok(plan) => plan,
            Err(error) => {
                tally_log::error!(
                    "rejecting expression update: {}",
                    tally_log::LogError(&error)
                );
                tally_statsd::metric!(
                    counter(ConfigCounters::ReloadFailures) += 1,
                    stage = "resolve"
                );
                return;
            }
        };

        tally_log::info!("updated expression plan with {} expressions", plan.len());
        tally_statsd::metric!(counter(ConfigCounters::ReloadSuccesses) += 1);
        tally_statsd::metric!(gauge(ConfigGauges::ActiveExpressions) = plan.len() as u64);

        self.plan.store(plan);
    }
}

/// Owns the "discover change, fetch, parse, resolve, publish" lifecycle for
/// expression configuration.
///
/// The manager publishes the active plan through a [`SharedPlan`]: a
/// single-slot, read-mostly shared reference that is only ever replaced
/// wholesale, so evaluators never observe a partially updated plan and never
/// wait for a reload to finish.
///
/// Newly observed cluster-service keys grow the configuration scope; each
/// growth re-establishes the subscription and schedules an asynchronous
/// initial load. The injected [`Trigger`] is polled on a fixed interval and
/// a firing runs one reload cycle.
pub struct ExpressionConfigManager {
    inner: Arc<Inner>,
    resubscribe_tx: mpsc::UnboundedSender<()>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpressionConfigManager {
    /// Starts the manager and its background reload task.
    ///
    /// The trigger and source collaborators are owned by the manager for its
    /// entire lifecycle and released on shutdown. Must be called within a
    /// Tokio runtime.
    pub fn start(
        registry: ExpressionRegistry,
        source: Arc<dyn ExpressionSource>,
        trigger: Box<dyn Trigger>,
        config: &ExpressionConfigManagerConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            registry,
            source,
            plan: SharedPlan::new(),
            keys: Mutex::new(IndexSet::new()),
            state: Mutex::new(SubscriptionState::Unsubscribed),
        });

        let (resubscribe_tx, resubscribe_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));

        let handle = tokio::spawn(run(
            Arc::clone(&inner),
            trigger,
            poll_interval,
            resubscribe_rx,
            shutdown_rx,
        ));

        Self {
            inner,
            resubscribe_tx,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Records a newly observed cluster-service key.
    ///
    /// A new key (re)subscribes the configuration scope and schedules an
    /// asynchronous initial load. Loading is asynchronous, so the first few
    /// batches after a discovery may still be evaluated against the previous
    /// plan. Keys registered after shutdown are ignored.
    pub fn register_cluster_service(&self, key: ClusterServiceKey) {
        if self.state() == SubscriptionState::ShutDown {
            return;
        }

        let inserted = self.inner.keys.lock().insert(key.clone());
        if inserted {
            tally_log::debug!("discovered new cluster-service {key}");
            self.resubscribe_tx.send(()).ok();
        }
    }

    /// Returns the handle used to read the currently active plan.
    pub fn plan(&self) -> SharedPlan {
        self.inner.plan.clone()
    }

    /// Returns the number of cluster-service keys observed so far.
    pub fn cluster_service_count(&self) -> usize {
        self.inner.keys.lock().len()
    }

    /// Returns the current subscription state.
    pub fn state(&self) -> SubscriptionState {
        self.inner.state()
    }

    /// Shuts the manager down.
    ///
    /// Releases the subscription and stops in-flight reload work. The last
    /// published plan stays available to readers holding a [`SharedPlan`],
    /// so in-flight evaluations are unaffected. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown_tx.send(true).ok();
    }

    /// Shuts the manager down and waits for the background task to finish.
    pub async fn shutdown_and_join(&self) {
        self.shutdown();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
    }
}

impl fmt::Debug for ExpressionConfigManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionConfigManager")
            .field("state", &self.state())
            .field("cluster_services", &self.cluster_service_count())
            .finish()
    }
}

async fn run(
    inner: Arc<Inner>,
    mut trigger: Box<dyn Trigger>,
    poll_interval: Duration,
    mut resubscribe_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            Some(()) = resubscribe_rx.recv() => {
                // Collapse a burst of newly discovered keys into a single
                // resubscription.
                while resubscribe_rx.try_recv().is_ok() {}

                inner.set_state(SubscriptionState::Subscribing);
                inner.reload().await;
                inner.set_state(SubscriptionState::Subscribed);
            }

            _ = ticker.tick() => {
                if inner.state() != SubscriptionState::Subscribed {
                    continue;
                }

                // The trigger may perform synchronous I/O; keep it off the
                // runtime workers.
                let evaluated = tokio::task::spawn_blocking(move || {
                    let fired = trigger.evaluate();
                    (trigger, fired)
                })
                .await;

                match evaluated {
                    Ok((returned, fired)) => {
                        trigger = returned;
                        if fired {
                            inner.reload().await;
                        }
                    }
                    Err(error) => {
                        tally_log::error!("configuration trigger failed: {error}");
                        break;
                    }
                }
            }
        }
    }

    inner.set_state(SubscriptionState::ShutDown);
}
