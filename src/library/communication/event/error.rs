use super::QueueClass;
use thiserror::Error;

/// Errors raised by the queue abstraction itself, independent of the backend in use
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Class tag that does not name any known backend
    #[error("unknown queue class '{0}'")]
    UnknownClass(String),
    /// Priority name that does not exist
    #[error("unknown queue priority '{0}'")]
    UnknownPriority(String),
    /// Known class which has no backend configured in this process
    #[error("queue class {0} is not enabled")]
    ClassNotEnabled(QueueClass),
    /// A task with the same fingerprint is still within its uniqueness window
    #[error("an identical task has already been enqueued within its uniqueness window")]
    Duplicate,
    /// Backend returned an entry without a payload
    #[error("queue entry is missing its payload")]
    MissingPayload,
}
