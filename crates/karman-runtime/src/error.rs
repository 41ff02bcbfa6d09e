//! Runtime errors.

use thiserror::Error;

/// The dispatcher is gone
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher task has stopped; no further jobs will run
    #[error("dispatcher stopped")]
    Stopped,
}
