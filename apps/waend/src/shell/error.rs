use thiserror::Error;

use crate::bind::BindError;
use crate::stream::StreamError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("empty command")]
    NullCommand,
    #[error("invalid context: {0}")]
    InvalidContext(String),
    #[error("you're not logged in")]
    AuthRequired,
    #[error("failed to switch context: {0}")]
    FailedToSwitchContext(String),
    #[error("context switch superseded by a newer one")]
    Superseded,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}
