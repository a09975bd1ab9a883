use thiserror::Error;

/// Failure kinds surfaced by the estimation pipeline.
///
/// Values are wrapped in `anyhow::Error` on the way up, so call sites keep
/// plain `Result` signatures while callers that care can `downcast_ref` to
/// tell the kinds apart.
#[derive(Debug, Error)]
pub enum EstimateError {
    /// Malformed or empty input data, or an inconsistent sample size.
    #[error("data error: {0}")]
    Data(String),

    /// A pretraining parameter left its configured bounds, or the optimizer
    /// failed to converge.
    #[error("bounds error: {0}")]
    Bounds(String),

    /// Hidden-state balancing produced fewer than two usable cutpoints.
    #[error("discretization error: {0}")]
    Discretization(String),

    /// Engine state diverged from the orchestrator's copies. Unreachable
    /// through the public setters; exists so the invariant stays checkable.
    #[error("sync violation: {0}")]
    Sync(String),
}
