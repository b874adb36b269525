//! Time-keeping frameworks: the free-running counter slot, the one-shot
//! event timer slot, and the calibrated busy-wait.
//!
//! Each framework is an injectable instance; a process-wide instance behind
//! `::system()` backs the unqualified conveniences. Hardware drivers install
//! themselves at attach time, first installation wins.

pub mod counter;
pub mod delay;
pub mod event;
pub mod ticks;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// An arm request carried no deadline.
    #[error("one-shot armed without a deadline")]
    InvalidDeadline,
    /// No hardware has been installed behind the framework yet.
    #[error("no canonical time hardware installed")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, TimerError>;
