// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-threaded message queue with deferral and virtual-time timers.
//!
//! Time only moves when the owner calls [`Looper::advance_to`]; due timers
//! are then appended to the queue in deadline order. This keeps the state
//! machine deterministic and lets the async session drive it from a
//! monotonic clock.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A queued message plus how often it has been deferred.
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    pub message: M,
    requeues: u32,
}

impl<M> Envelope<M> {
    pub fn new(message: M) -> Self {
        Self { message, requeues: 0 }
    }

    pub fn requeues(&self) -> u32 {
        self.requeues
    }
}

#[derive(Debug)]
struct Timer<M, O> {
    id: TimerId,
    deadline: Duration,
    message: M,
    owner: O,
}

/// Message loop of one session. `O` tags the state that owns a timer.
#[derive(Debug)]
pub struct Looper<M, O> {
    now: Duration,
    queue: VecDeque<Envelope<M>>,
    deferred: Vec<Envelope<M>>,
    timers: Vec<Timer<M, O>>,
    next_timer: u64,
    max_requeue: u32,
}

impl<M, O: Copy + PartialEq> Looper<M, O> {
    pub fn new(max_requeue: u32) -> Self {
        Self {
            now: Duration::ZERO,
            queue: VecDeque::new(),
            deferred: Vec::new(),
            timers: Vec::new(),
            next_timer: 0,
            max_requeue,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn post(&mut self, message: M) {
        self.queue.push_back(Envelope::new(message));
    }

    pub fn next(&mut self) -> Option<Envelope<M>> {
        self.queue.pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Park a message until the next state transition. Returns false, and
    /// drops the message, once it has been requeued too often.
    pub fn defer(&mut self, mut envelope: Envelope<M>) -> bool {
        if envelope.requeues >= self.max_requeue {
            warn!("Dropping message deferred {} times", envelope.requeues);
            return false;
        }
        envelope.requeues += 1;
        self.deferred.push(envelope);
        true
    }

    /// Move deferred messages to the front of the queue, oldest first.
    pub fn requeue_deferred(&mut self) {
        for envelope in self.deferred.drain(..).rev() {
            self.queue.push_front(envelope);
        }
    }

    pub fn has_deferred(&self, pred: impl Fn(&M) -> bool) -> bool {
        self.deferred.iter().any(|e| pred(&e.message))
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn post_delayed(&mut self, message: M, delay: Duration, owner: O) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.push(Timer {
            id,
            deadline: self.now + delay,
            message,
            owner,
        });
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Cancel every timer the predicate selects. Returns how many went.
    pub fn cancel_where(&mut self, pred: impl Fn(&M, O) -> bool) -> usize {
        let before = self.timers.len();
        self.timers.retain(|t| !pred(&t.message, t.owner));
        before - self.timers.len()
    }

    pub fn pending_timers(&self, pred: impl Fn(&M) -> bool) -> usize {
        self.timers.iter().filter(|t| pred(&t.message)).count()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.iter().map(|t| t.deadline).min()
    }

    /// Move time forward and enqueue every timer that came due.
    pub fn advance_to(&mut self, now: Duration) {
        if now > self.now {
            self.now = now;
        }
        let mut due: Vec<Timer<M, O>> = Vec::new();
        let mut i = 0;
        while i < self.timers.len() {
            if self.timers[i].deadline <= self.now {
                due.push(self.timers.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|t| (t.deadline, t.id));
        self.queue.extend(due.into_iter().map(|t| Envelope::new(t.message)));
    }

    pub fn advance(&mut self, by: Duration) {
        self.advance_to(self.now + by);
    }

    /// True when no message is queued.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestLooper = Looper<&'static str, u8>;

    #[test]
    fn test_fifo() {
        let mut looper = TestLooper::new(4);
        looper.post("a");
        looper.post("b");
        assert_eq!(looper.next().map(|e| e.message), Some("a"));
        assert_eq!(looper.next().map(|e| e.message), Some("b"));
        assert!(looper.next().is_none());
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let mut looper = TestLooper::new(4);
        looper.post_delayed("late", Duration::from_millis(200), 0);
        looper.post_delayed("early", Duration::from_millis(100), 0);
        assert_eq!(looper.next_deadline(), Some(Duration::from_millis(100)));

        looper.advance(Duration::from_millis(99));
        assert!(looper.is_idle());

        looper.advance(Duration::from_millis(200));
        assert_eq!(looper.next().map(|e| e.message), Some("early"));
        assert_eq!(looper.next().map(|e| e.message), Some("late"));
        assert_eq!(looper.next_deadline(), None);
    }

    #[test]
    fn test_cancel() {
        let mut looper = TestLooper::new(4);
        let id = looper.post_delayed("timeout", Duration::from_secs(1), 1);
        looper.post_delayed("poll", Duration::from_secs(1), 2);
        assert!(looper.cancel(id));
        assert!(!looper.cancel(id));
        assert_eq!(looper.cancel_where(|_, owner| owner == 2), 1);

        looper.advance(Duration::from_secs(5));
        assert!(looper.is_idle());
    }

    #[test]
    fn test_deferred_requeued_ahead_in_order() {
        let mut looper = TestLooper::new(4);
        looper.post("x");
        looper.post("y");
        looper.post("later");
        let x = looper.next().unwrap();
        let y = looper.next().unwrap();
        assert!(looper.defer(x));
        assert!(looper.defer(y));
        assert!(looper.has_deferred(|m| *m == "y"));

        looper.requeue_deferred();
        assert_eq!(looper.deferred_len(), 0);
        let order: Vec<_> = std::iter::from_fn(|| looper.next().map(|e| e.message)).collect();
        assert_eq!(order, vec!["x", "y", "later"]);
    }

    #[test]
    fn test_defer_is_bounded() {
        let mut looper = TestLooper::new(2);
        looper.post("loop");
        for _ in 0..2 {
            let envelope = looper.next().unwrap();
            assert!(looper.defer(envelope));
            looper.requeue_deferred();
        }
        let envelope = looper.next().unwrap();
        assert_eq!(envelope.requeues(), 2);
        assert!(!looper.defer(envelope));
        assert_eq!(looper.deferred_len(), 0);
    }
}
