//! Turn silence timer
//!
//! Marks a user turn complete after a quiet period. At most one timer is
//! pending; arming again replaces the previous schedule entirely.
//!
//! Firing is delivered as a message on the owner's channel. A message from a
//! schedule that was replaced after it fired but before the owner saw it is
//! rejected by [`SilenceTimer::claim`], so each arm completes at most once.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default quiet period after the last final fragment
pub const DEFAULT_SILENCE: Duration = Duration::from_secs(3);

/// Identifies one arming of the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

struct Pending {
    ticket: Ticket,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Single-slot delayed notification
pub struct SilenceTimer<M> {
    tx: mpsc::UnboundedSender<M>,
    make: fn(Ticket) -> M,
    pending: Option<Pending>,
    issued: u64,
}

impl<M: Send + 'static> SilenceTimer<M> {
    /// Create a timer that posts `make(ticket)` to `tx` when it fires
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<M>, make: fn(Ticket) -> M) -> Self {
        Self {
            tx,
            make,
            pending: None,
            issued: 0,
        }
    }

    /// Cancel any pending schedule and start a new one
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, duration: Duration) -> Ticket {
        self.cancel();

        self.issued += 1;
        let ticket = Ticket(self.issued);
        let message = (self.make)(ticket);
        let tx = self.tx.clone();
        let deadline = Instant::now() + duration;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(message);
        });

        tracing::trace!(ticket = ticket.0, ?duration, "silence timer armed");
        self.pending = Some(Pending {
            ticket,
            deadline,
            handle,
        });
        ticket
    }

    /// Clear the pending schedule, if any
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
            tracing::trace!(ticket = pending.ticket.0, "silence timer cancelled");
        }
    }

    /// Accept a fired ticket if it belongs to the pending schedule
    ///
    /// Returns true exactly once per arm; stale tickets return false.
    pub fn claim(&mut self, ticket: Ticket) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {
                self.pending = None;
                true
            }
            _ => {
                tracing::trace!(ticket = ticket.0, "stale silence ticket ignored");
                false
            }
        }
    }

    /// Whether a schedule is pending
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Time left until the pending schedule fires
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|p| p.deadline.saturating_duration_since(Instant::now()))
    }
}

impl<M> Drop for SilenceTimer<M> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
    }
}
