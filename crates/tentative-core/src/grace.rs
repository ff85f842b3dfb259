//! Grace-period timer
//!
//! Counts a command's grace period down once per tick and publishes the
//! seconds remaining. The countdown ends early when a signal is armed on the
//! command's [`InterruptGate`]; otherwise it ends in natural expiry.
//!
//! A signal armed before the timer starts is honoured immediately, without
//! publishing a countdown. A signal armed in the same tick as expiry wins over
//! the expiry.

use crate::gate::InterruptGate;
use crate::types::Signal;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};

/// How a grace period ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraceOutcome {
    /// Ran to the end without interruption
    Expired,
    /// Ended by an accepted signal
    Interrupted(Signal),
}

/// Countdown of one grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceTimer {
    secs: u64,
    tick: Duration,
}

impl GraceTimer {
    /// Create timer for `secs` countdown seconds of length `tick`
    #[inline]
    #[must_use]
    pub fn new(secs: u64, tick: Duration) -> Self {
        Self { secs, tick }
    }

    /// Timer with real one-second ticks
    #[inline]
    #[must_use]
    pub fn seconds(secs: u64) -> Self {
        Self::new(secs, Duration::from_secs(1))
    }

    /// Countdown length in seconds
    #[inline]
    #[must_use]
    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// Length of one countdown second
    #[inline]
    #[must_use]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Run the countdown
    ///
    /// `countdown` reads `Some(n)` while `n` seconds remain and `None`
    /// before the start and after the end. The gate is closed on return.
    pub async fn run(
        &self,
        gate: &InterruptGate,
        countdown: &watch::Sender<Option<u64>>,
    ) -> GraceOutcome {
        if let Some(signal) = gate.take_armed() {
            tracing::debug!(signal = signal.name(), "signal armed before grace period");
            countdown.send_replace(None);
            return GraceOutcome::Interrupted(signal);
        }

        let mut remaining = self.secs;
        let mut ticks = time::interval_at(Instant::now() + self.tick, self.tick);
        while remaining > 0 {
            countdown.send_replace(Some(remaining));
            tokio::select! {
                biased;
                () = gate.armed() => {
                    if let Some(signal) = gate.take_armed() {
                        countdown.send_replace(None);
                        return GraceOutcome::Interrupted(signal);
                    }
                }
                _ = ticks.tick() => remaining -= 1,
            }
        }

        countdown.send_replace(None);
        match gate.close() {
            Some(signal) => GraceOutcome::Interrupted(signal),
            None => GraceOutcome::Expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Captured;
    use std::sync::Arc;

    fn countdown() -> (watch::Sender<Option<u64>>, watch::Receiver<Option<u64>>) {
        watch::channel(None)
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_expires_immediately() {
        let gate = InterruptGate::new();
        let (tx, rx) = countdown();
        let start = Instant::now();

        let outcome = GraceTimer::seconds(0).run(&gate, &tx).await;

        assert_eq!(outcome, GraceOutcome::Expired);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(*rx.borrow(), None);
        assert!(gate.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_full_countdown() {
        let gate = InterruptGate::new();
        let (tx, _rx) = countdown();
        let start = Instant::now();

        let outcome = GraceTimer::seconds(3).run(&gate, &tx).await;

        assert_eq!(outcome, GraceOutcome::Expired);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_each_second() {
        let gate = Arc::new(InterruptGate::new());
        let (tx, mut rx) = countdown();

        let timer_gate = Arc::clone(&gate);
        let timer = tokio::spawn(async move { GraceTimer::seconds(3).run(&timer_gate, &tx).await });

        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let value = *rx.borrow_and_update();
            seen.push(value);
            if value.is_none() {
                break;
            }
        }

        assert_eq!(timer.await.unwrap(), GraceOutcome::Expired);
        assert_eq!(seen, vec![Some(3), Some(2), Some(1), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_armed_signal_skips_countdown() {
        let gate = InterruptGate::new();
        gate.deliver(Signal::Cancel).unwrap();
        let (tx, rx) = countdown();
        let start = Instant::now();

        let outcome = GraceTimer::seconds(10).run(&gate, &tx).await;

        assert_eq!(outcome, GraceOutcome::Interrupted(Signal::Cancel));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(*rx.borrow(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_mid_countdown_stops_ticking() {
        let gate = Arc::new(InterruptGate::new());
        let (tx, rx) = countdown();

        let timer_gate = Arc::clone(&gate);
        let timer = tokio::spawn(async move { GraceTimer::seconds(5).run(&timer_gate, &tx).await });

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(*rx.borrow(), Some(3));
        gate.deliver(Signal::Remove).unwrap();

        assert_eq!(timer.await.unwrap(), GraceOutcome::Interrupted(Signal::Remove));
        assert_eq!(*rx.borrow(), None);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*rx.borrow(), None);
        assert_eq!(gate.deliver(Signal::Cancel), Err(crate::error::SignalError::WindowClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn signal_beats_expiry_in_same_tick() {
        let gate = InterruptGate::new();
        let (tx, rx) = countdown();
        let timer = GraceTimer::seconds(1);
        let mut run = Box::pin(timer.run(&gate, &tx));

        assert!(futures::poll!(run.as_mut()).is_pending());
        assert_eq!(*rx.borrow(), Some(1));

        // Last tick is due and the signal lands before the timer is polled again.
        time::advance(Duration::from_secs(1)).await;
        gate.deliver(Signal::Edit(Captured::Abandoned)).unwrap();

        match futures::poll!(run.as_mut()) {
            std::task::Poll::Ready(outcome) => assert_eq!(
                outcome,
                GraceOutcome::Interrupted(Signal::Edit(Captured::Abandoned))
            ),
            std::task::Poll::Pending => panic!("timer still running after its last tick"),
        }
        assert_eq!(*rx.borrow(), None);
        assert!(gate.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn due_tick_without_signal_expires() {
        let gate = InterruptGate::new();
        let (tx, _rx) = countdown();
        let timer = GraceTimer::seconds(1);
        let mut run = Box::pin(timer.run(&gate, &tx));

        assert!(futures::poll!(run.as_mut()).is_pending());
        time::advance(Duration::from_secs(1)).await;

        assert_eq!(
            futures::poll!(run.as_mut()),
            std::task::Poll::Ready(GraceOutcome::Expired)
        );
        assert!(gate.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn short_ticks_compress_time() {
        let gate = InterruptGate::new();
        let (tx, _rx) = countdown();
        let start = Instant::now();

        let timer = GraceTimer::new(4, Duration::from_millis(10));
        assert_eq!(timer.run(&gate, &tx).await, GraceOutcome::Expired);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
