/// Caller-visible and fatal-invariant error kinds raised by the interval
/// engine. Detached and not-found outcomes are not errors — they surface as
/// `Option::None` or a silent removal instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transient intervals cannot be added to an attached collection")]
    TransientIntervalRejected,
    #[error("stickiness other than End requires the intervalStickinessEnabled option")]
    StickinessDisabled,
    #[error("`rangeLabels` cannot be overwritten via changeProperties")]
    RangeLabelsImmutable,
    #[error("position {0} is out of range for the current sequence")]
    PositionOutOfRange(i64),
    #[error("interval belongs to collection `{found}`, not `{expected}`")]
    WrongCollectionLabel { expected: String, found: String },
    #[error("branches must be related")]
    UnrelatedBranches,
    #[error("target commit is not in target branch")]
    TargetNotInBranch,
}

/// Fatal invariant violations: the state machine reached a configuration
/// that should be unreachable. These are programmer errors in the caller or
/// in this crate, never a recoverable condition, so they panic rather than
/// return a `Result`.
#[track_caller]
pub(crate) fn assert_invariant(condition: bool, message: &str) {
    if !condition {
        panic!("interval-collection invariant violated: {message}");
    }
}
