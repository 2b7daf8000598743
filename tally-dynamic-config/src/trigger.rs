//! Change-detection triggers.

/// Decides when to attempt a configuration reload.
///
/// Implementations watch an external resource (a file's modification time, a
/// URI's ETag, ...) and answer whether its content may have changed since the
/// last evaluation.
pub trait Trigger: Send + 'static {
    /// Returns `true` if the watched content may have changed.
    ///
    /// Must return `true` at most once per genuine external change and
    /// `false` otherwise, including on transient failure: an unavailable
    /// source must not look like a change, or connectivity flicker would
    /// cause reload storms. Retry and backoff policy is the implementation's
    /// concern; the caller polls on a fixed schedule.
    fn evaluate(&mut self) -> bool;
}
