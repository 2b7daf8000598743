//! Fully-qualified data-space names and their components.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::statistics::Statistic;

/// A component of a data-space name, such as a cluster or metric name.
///
/// Names are immutable shared strings and can be cloned cheaply. They are
/// value-equal and hashable, so they can be used as map keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Name(Arc<str>);

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<Arc<str>> for Name {
    fn from(value: Arc<str>) -> Self {
        Self(value)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl std::ops::Deref for Name {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl std::borrow::Borrow<str> for Name {
    fn borrow(&self) -> &str {
        std::borrow::Borrow::borrow(&self.0)
    }
}

/// A fully-qualified data-space name.
///
/// Identifies one statistic series: the cluster and service that produced a
/// metric, the metric name, and the statistic computed over it. This is the
/// identity key for both raw and derived data points and for expression
/// targets and dependencies.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Fqdsn {
    /// The cluster that produced the metric.
    pub cluster: Name,
    /// The service that produced the metric.
    pub service: Name,
    /// The metric name.
    pub metric: Name,
    /// The statistic computed over the metric's samples.
    pub statistic: Statistic,
}

impl Fqdsn {
    /// Creates a new fully-qualified data-space name.
    pub fn new(
        cluster: impl Into<Name>,
        service: impl Into<Name>,
        metric: impl Into<Name>,
        statistic: Statistic,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            service: service.into(),
            metric: metric.into(),
            statistic,
        }
    }

    /// Returns the cluster-service partition this series belongs to.
    pub fn cluster_service(&self) -> ClusterServiceKey {
        ClusterServiceKey {
            cluster: self.cluster.clone(),
            service: self.service.clone(),
        }
    }
}

impl fmt::Display for Fqdsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.cluster, self.service, self.metric, self.statistic
        )
    }
}

/// A `{cluster, service}` pair partitioning configuration scope.
///
/// The set of observed keys grows monotonically within a process lifetime;
/// keys are never retired.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ClusterServiceKey {
    /// The cluster name.
    pub cluster: Name,
    /// The service name.
    pub service: Name,
}

impl ClusterServiceKey {
    /// Creates a new cluster-service key.
    pub fn new(cluster: impl Into<Name>, service: impl Into<Name>) -> Self {
        Self {
            cluster: cluster.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ClusterServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.service)
    }
}
