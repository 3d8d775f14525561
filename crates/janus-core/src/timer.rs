//! Cancellable timers for actor loops.
//!
//! - [`Timer`]: one re-armable deadline (connection idle watchdog, session
//!   heartbeat)
//! - [`TimerWheel`]: many keyed deadlines on a single
//!   [`DelayQueue`](tokio_util::time::DelayQueue) (per-transaction timeouts)
//!
//! Both are driven from inside a `tokio::select!` loop. Their wait futures
//! stay pending while nothing is armed, so a select branch on a disarmed
//! timer never fires.

use std::collections::HashMap;
use std::future::{pending, poll_fn};
use std::hash::Hash;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use tokio::time::{Instant, Sleep};
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

/// A single cancellable deadline.
#[derive(Debug, Default)]
pub struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    /// A disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) to fire `after` from now.
    pub fn arm(&mut self, after: Duration) {
        let deadline = Instant::now() + after;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
    }

    /// Cancel the pending deadline, if any.
    pub fn disarm(&mut self) {
        self.sleep = None;
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolve when the armed deadline passes; pending forever while disarmed.
    ///
    /// Cancel safe. The timer is disarmed once this resolves.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}

/// Keyed deadlines. Arming an already-armed key resets it.
#[derive(Debug)]
pub struct TimerWheel<K> {
    queue: DelayQueue<K>,
    keys: HashMap<K, Key>,
}

impl<K> Default for TimerWheel<K> {
    fn default() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> TimerWheel<K> {
    /// An empty wheel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to expire `after` from now, replacing any earlier deadline.
    pub fn arm(&mut self, key: K, after: Duration) {
        if let Some(slot) = self.keys.get(&key) {
            self.queue.reset(slot, after);
        } else {
            let slot = self.queue.insert(key.clone(), after);
            let _ = self.keys.insert(key, slot);
        }
    }

    /// Cancel `key`. Returns whether it was armed.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.keys.remove(key) {
            Some(slot) => {
                let _ = self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Whether `key` has a pending deadline.
    pub fn is_armed(&self, key: &K) -> bool {
        self.keys.contains_key(key)
    }

    /// Number of pending deadlines.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve with the next expired key; pending forever while empty.
    ///
    /// Cancel safe: a key is only removed when it is returned.
    pub async fn expired(&mut self) -> K {
        poll_fn(|cx| match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let key = expired.into_inner();
                let _ = self.keys.remove(&key);
                Poll::Ready(key)
            }
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_duration() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_millis(100));
        assert!(timer.is_armed());

        let start = Instant::now();
        timer.fired().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_millis(10));
        timer.disarm();
        let res = timeout(Duration::from_secs(5), timer.fired()).await;
        assert!(res.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_pushes_deadline() {
        let mut timer = Timer::new();
        let start = Instant::now();
        timer.arm(Duration::from_millis(100));
        sleep(Duration::from_millis(60)).await;
        timer.arm(Duration::from_millis(100));
        timer.fired().await;
        assert!(start.elapsed() >= Duration::from_millis(160));
    }

    #[tokio::test(start_paused = true)]
    async fn wheel_expires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        wheel.arm("slow", Duration::from_millis(300));
        wheel.arm("fast", Duration::from_millis(100));
        assert_eq!(wheel.len(), 2);

        assert_eq!(wheel.expired().await, "fast");
        assert_eq!(wheel.expired().await, "slow");
        assert!(wheel.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wheel_cancel_removes_key() {
        let mut wheel = TimerWheel::new();
        wheel.arm(1_u32, Duration::from_millis(50));
        wheel.arm(2_u32, Duration::from_millis(80));
        assert!(wheel.cancel(&1));
        assert!(!wheel.cancel(&1));
        assert!(!wheel.is_armed(&1));

        assert_eq!(wheel.expired().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wheel_rearm_resets_deadline() {
        let mut wheel = TimerWheel::new();
        let start = Instant::now();
        wheel.arm("tx", Duration::from_millis(100));
        wheel.arm("tx", Duration::from_millis(400));
        assert_eq!(wheel.len(), 1);

        assert_eq!(wheel.expired().await, "tx");
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_wheel_stays_pending() {
        let mut wheel: TimerWheel<u8> = TimerWheel::new();
        let res = timeout(Duration::from_secs(1), wheel.expired()).await;
        assert!(res.is_err());
    }
}
