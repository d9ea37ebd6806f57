//! Bounded poll loop
//!
//! A retry-less timed loop: re-check a condition on a fixed cadence until it
//! converges, a check reports a fatal error, the deadline elapses, or the
//! caller cancels. The four outcomes are distinct so the caller can map them
//! to distinguishable errors - "ran out of time" must never masquerade as
//! "a resource is broken".

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Verdict of one poll check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// The condition is satisfied; stop polling
    Done,
    /// Not yet; poll again after the next interval
    Pending,
}

/// Terminal outcome of [`poll_until`]
#[derive(Debug)]
pub enum WaitOutcome {
    /// The condition converged
    Converged,
    /// A check reported an unrecoverable failure
    Fatal(Error),
    /// The deadline elapsed before convergence
    TimedOut,
    /// The caller cancelled the wait
    Cancelled,
}

/// A stateful poll check
///
/// Implemented on a struct holding whatever the check needs to carry across
/// ticks (clients, monotonic counters, ...).
#[async_trait]
pub trait PollTick: Send {
    /// Run one check
    ///
    /// An `Err` is treated as fatal and ends the wait immediately.
    async fn tick(&mut self) -> Result<Tick>;
}

/// Poll `tick` every `interval`, bounded by `deadline` and `cancel`
///
/// The first check runs immediately. Cancellation and the deadline are
/// observed between checks, so a cancelled caller gets its answer promptly
/// instead of waiting out the full deadline.
pub async fn poll_until<T: PollTick>(
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
    tick: &mut T,
) -> WaitOutcome {
    let deadline = tokio::time::Instant::now() + deadline;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
            _ = ticker.tick() => match tick.tick().await {
                Ok(Tick::Done) => return WaitOutcome::Converged,
                Ok(Tick::Pending) => {}
                Err(e) => return WaitOutcome::Fatal(e),
            },
        }
    }
}
