//! Single outstanding round timer with a generation guard.
//!
//! Timer tasks only hold a weak sender back to the owning actor, so a pending
//! timer never keeps a stopped actor alive. A fired timer carries the
//! generation it was armed with and is discarded if the round moved on, even
//! when aborting the task lost the race against the timer.

use std::time::Duration;

use tokio::{
    sync::mpsc::{UnboundedSender, WeakUnboundedSender},
    task::JoinHandle,
};

/// Deliver `message` to the actor behind `tx` after `delay`, unless the actor is gone.
pub fn spawn_delayed<M>(tx: WeakUnboundedSender<M>, delay: Duration, message: M) -> JoinHandle<()>
where
    M: Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(message);
        }
    })
}

/// Owns the round-expiry timer and the "already resolved" flag of the current round.
#[derive(Debug)]
pub struct RoundScheduler<M> {
    tx: WeakUnboundedSender<M>,
    generation: u64,
    resolved: bool,
    pending: Option<JoinHandle<()>>,
}

impl<M> RoundScheduler<M>
where
    M: Send + 'static,
{
    /// Scheduler delivering its timer messages through `tx`.
    pub fn new(tx: &UnboundedSender<M>) -> Self {
        Self {
            tx: tx.downgrade(),
            generation: 0,
            resolved: true,
            pending: None,
        }
    }

    /// Open a new round and arm its expiry timer, invalidating every earlier timer.
    pub fn arm_round(&mut self, duration: Duration, make: impl FnOnce(u64) -> M) -> u64 {
        self.cancel_pending();
        self.generation += 1;
        self.resolved = false;
        let message = make(self.generation);
        self.pending = Some(spawn_delayed(self.tx.clone(), duration, message));
        self.generation
    }

    /// Schedule a follow-up for the current generation (next round, game start).
    pub fn schedule_after(&mut self, delay: Duration, make: impl FnOnce(u64) -> M) {
        self.cancel_pending();
        let message = make(self.generation);
        self.pending = Some(spawn_delayed(self.tx.clone(), delay, message));
    }

    /// Claim the resolution of the current round. Returns `false` if it was
    /// already claimed.
    pub fn try_resolve(&mut self) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.cancel_pending();
        true
    }

    /// Claim the resolution on behalf of the timer armed for `generation`.
    pub fn try_resolve_expired(&mut self, generation: u64) -> bool {
        self.is_current(generation) && self.try_resolve()
    }

    /// Whether `generation` still designates the latest armed round.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// True while a round is accepting votes.
    pub fn is_open(&self) -> bool {
        !self.resolved
    }

    /// Current generation number.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop any pending timer and invalidate every message already in flight.
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.generation += 1;
        self.resolved = true;
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl<M> Drop for RoundScheduler<M> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Tick {
        Expired(u64),
        Next(u64),
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RoundScheduler::new(&tx);

        let generation = scheduler.arm_round(Duration::from_secs(30), Tick::Expired);
        assert!(scheduler.is_open());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(Tick::Expired(generation)));
        assert!(scheduler.try_resolve_expired(generation));
        assert!(!scheduler.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_is_claimed_once() {
        let (tx, _rx) = mpsc::unbounded_channel::<Tick>();
        let mut scheduler = RoundScheduler::new(&tx);

        let generation = scheduler.arm_round(Duration::from_secs(30), Tick::Expired);
        assert!(scheduler.try_resolve());
        assert!(!scheduler.try_resolve());
        assert!(!scheduler.try_resolve_expired(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_cannot_resolve_new_round() {
        let (tx, _rx) = mpsc::unbounded_channel::<Tick>();
        let mut scheduler = RoundScheduler::new(&tx);

        let first = scheduler.arm_round(Duration::from_secs(30), Tick::Expired);
        let second = scheduler.arm_round(Duration::from_secs(30), Tick::Expired);

        assert!(!scheduler.try_resolve_expired(first));
        assert!(scheduler.is_open());
        assert!(scheduler.try_resolve_expired(second));
    }

    #[tokio::test(start_paused = true)]
    async fn early_resolution_cancels_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RoundScheduler::new(&tx);

        scheduler.arm_round(Duration::from_secs(30), Tick::Expired);
        assert!(scheduler.try_resolve());
        scheduler.schedule_after(Duration::from_secs(5), Tick::Next);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.recv().await, Some(Tick::Next(scheduler.generation())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_invalidates_follow_ups() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RoundScheduler::new(&tx);

        scheduler.schedule_after(Duration::from_secs(1), Tick::Next);
        scheduler.reset();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert!(!scheduler.is_current(0));
    }
}
