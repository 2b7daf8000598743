//! Expression configuration sources.

use std::error::Error;

use tally_base_schema::fqdsn::ClusterServiceKey;
use tally_expressions::ExpressionDocument;

/// An error fetching expression configuration from its source.
///
/// A source error is treated as "no change this cycle": the previously
/// published plan stays active.
#[derive(Debug, thiserror::Error)]
#[error("failed to load expression configuration")]
pub struct SourceError(#[source] Box<dyn Error + Send + Sync>);

impl SourceError {
    /// Wraps an underlying transport or format error.
    pub fn new(error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self(error.into())
    }
}

/// Provides expression configuration documents for a configuration scope.
///
/// Implementations own transport and wire format; the core only consumes the
/// resulting typed list. [`load`](Self::load) is invoked on a
/// blocking-capable worker, so implementations may perform synchronous I/O.
pub trait ExpressionSource: Send + Sync + 'static {
    /// Loads the documents relevant to the given cluster-service keys.
    fn load(&self, keys: &[ClusterServiceKey]) -> Result<Vec<ExpressionDocument>, SourceError>;
}
