//! Interrupt gate
//!
//! Holds at most one accepted interrupt for a command. Signals may be armed
//! before the grace period starts; the timer picks them up when it begins.
//! Accepting a signal and closing the window happen under the same lock, so
//! a signal is either honoured or rejected back to its sender, never lost.

use crate::error::SignalError;
use crate::types::Signal;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
enum GateState {
    /// Accepting signals; holds the first one delivered
    Open(Option<Signal>),
    /// Window passed; every signal is rejected
    Closed,
}

/// Single-shot interrupt slot of one command
#[derive(Debug)]
pub struct InterruptGate {
    state: Mutex<GateState>,
    wake: Notify,
}

impl InterruptGate {
    /// Create an open gate
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Open(None)),
            wake: Notify::new(),
        }
    }

    /// Offer a signal
    ///
    /// # Errors
    /// - `SignalError::WindowClosed` if the grace period already ended
    /// - `SignalError::AlreadyRedirected` if another signal was accepted first
    pub fn deliver(&self, signal: Signal) -> Result<(), SignalError> {
        {
            let mut state = self.state.lock();
            match &mut *state {
                GateState::Closed => return Err(SignalError::WindowClosed),
                GateState::Open(Some(_)) => return Err(SignalError::AlreadyRedirected),
                GateState::Open(slot) => *slot = Some(signal),
            }
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Whether a signal is armed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        matches!(&*self.state.lock(), GateState::Open(Some(_)))
    }

    /// Whether the window has passed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.lock(), GateState::Closed)
    }

    /// Close the window if a signal is armed, returning it
    pub fn take_armed(&self) -> Option<Signal> {
        let mut state = self.state.lock();
        if !matches!(&*state, GateState::Open(Some(_))) {
            return None;
        }
        match std::mem::replace(&mut *state, GateState::Closed) {
            GateState::Open(signal) => signal,
            GateState::Closed => None,
        }
    }

    /// Close the window unconditionally
    ///
    /// Returns the signal that was armed when the window closed, if any.
    pub fn close(&self) -> Option<Signal> {
        match std::mem::replace(&mut *self.state.lock(), GateState::Closed) {
            GateState::Open(signal) => signal,
            GateState::Closed => None,
        }
    }

    /// Wait until a signal may have been armed
    ///
    /// Wake-ups delivered while nobody waits are kept, so a signal armed
    /// between two waits is not missed.
    pub async fn armed(&self) {
        self.wake.notified().await;
    }
}

impl Default for InterruptGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_wins() {
        let gate = InterruptGate::new();
        assert!(gate.deliver(Signal::Cancel).is_ok());
        assert_eq!(
            gate.deliver(Signal::Remove),
            Err(SignalError::AlreadyRedirected)
        );
        assert_eq!(gate.take_armed(), Some(Signal::Cancel));
    }

    #[test]
    fn closed_gate_rejects() {
        let gate = InterruptGate::new();
        assert_eq!(gate.close(), None);
        assert!(gate.is_closed());
        assert_eq!(gate.deliver(Signal::Cancel), Err(SignalError::WindowClosed));
    }

    #[test]
    fn take_armed_leaves_empty_gate_open() {
        let gate = InterruptGate::new();
        assert_eq!(gate.take_armed(), None);
        assert!(!gate.is_closed());
        assert!(gate.deliver(Signal::Remove).is_ok());
        assert!(gate.is_armed());
    }

    #[test]
    fn close_returns_armed_signal() {
        let gate = InterruptGate::new();
        gate.deliver(Signal::Remove).unwrap();
        assert_eq!(gate.close(), Some(Signal::Remove));
        assert_eq!(gate.deliver(Signal::Cancel), Err(SignalError::WindowClosed));
    }

    #[tokio::test]
    async fn wake_before_wait_is_kept() {
        let gate = InterruptGate::new();
        gate.deliver(Signal::Cancel).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), gate.armed())
            .await
            .unwrap();
    }
}
