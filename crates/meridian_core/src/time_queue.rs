//! # Time Queue
//!
//! Tick-indexed priority queue of cancellable, optionally repeating timers.
//!
//! ## Design
//!
//! ```text
//!   add() ──► Slab<TimerNode> ◄── TimerHandle (stable, generational)
//!                 ▲
//!                 │ handle
//!   BinaryHeap<(time, seq, handle)>   min-heap, lazily cleaned
//! ```
//!
//! - Cancelling only flips the node state. The heap entry stays until it
//!   reaches the top or until more than half of the heap is cancelled, at
//!   which point the heap is rebuilt from the live nodes.
//! - A node is *released* exactly once, when it leaves the queue: after a
//!   one-shot fires, when a cancelled node is popped or purged, or on
//!   [`TimeQueue::clear`]. Released nodes are delivered to
//!   [`TimerHandler::on_release`] at the end of [`TimeQueue::process`].
//! - A handler may need the queue itself (to cancel other timers or add new
//!   ones). Such callers drive the step-wise API instead of `process`:
//!
//! ```rust,ignore
//! queue.purge_if_needed();
//! while let Some(expired) = queue.pop_due(now) {
//!     dispatch(&mut queue, &expired);
//!     queue.finish(expired.handle);
//! }
//! for released in queue.take_released() { ... }
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::trace;

use crate::memory::{Slab, SlabHandle};

/// Tick count the queue is indexed by.
pub type TimeStamp = u64;

/// Opaque user data carried by a timer.
pub type UserData = u64;

/// Lifecycle of a timer node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    /// Waiting in the heap.
    Pending,
    /// Its handler is running right now.
    Executing,
    /// Cancelled; will be released when it leaves the heap.
    Cancelled,
}

/// Stable reference to a timer.
///
/// Survives heap reordering. Once the node has been released the handle is
/// stale and every query on it returns `None`/`false`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(SlabHandle);

/// Receiver of timer callbacks.
pub trait TimerHandler<T> {
    /// Called when the timer fires.
    fn handle_timeout(&mut self, handle: TimerHandle, payload: &T, user_data: UserData);

    /// Called once when the timer node is discarded.
    fn on_release(&mut self, handle: TimerHandle, payload: T, user_data: UserData) {
        let _ = (handle, payload, user_data);
    }
}

/// A timer popped by [`TimeQueue::pop_due`], currently executing.
#[derive(Clone, Debug)]
pub struct ExpiredTimer<T> {
    /// Handle of the timer.
    pub handle: TimerHandle,
    /// Time it was due.
    pub time: TimeStamp,
    /// Copy of the payload.
    pub payload: T,
    /// User data.
    pub user_data: UserData,
}

/// A timer node that has left the queue.
#[derive(Clone, Debug)]
pub struct ReleasedTimer<T> {
    /// Handle the node had. Already stale.
    pub handle: TimerHandle,
    /// The payload, moved out of the node.
    pub payload: T,
    /// User data.
    pub user_data: UserData,
}

struct TimerNode<T> {
    time: TimeStamp,
    interval: TimeStamp,
    payload: T,
    user_data: UserData,
    state: TimerState,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    time: TimeStamp,
    seq: u64,
    handle: TimerHandle,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tick-indexed timer queue.
///
/// `T` is the payload identifying the handler target, typically a small
/// `Copy` struct naming an entity and controller.
pub struct TimeQueue<T> {
    nodes: Slab<TimerNode<T>>,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
    num_cancelled: usize,
    released: Vec<ReleasedTimer<T>>,
}

impl<T> TimeQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Slab::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
            num_cancelled: 0,
            released: Vec::new(),
        }
    }

    /// Number of entries in the heap, cancelled entries included.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if the heap holds no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules a timer.
    ///
    /// # Arguments
    ///
    /// * `start` - Tick of the first expiry
    /// * `interval` - Ticks between repeats, 0 for a one-shot timer
    /// * `payload` - Handler target
    /// * `user_data` - Opaque value handed back on every callback
    pub fn add(
        &mut self,
        start: TimeStamp,
        interval: TimeStamp,
        payload: T,
        user_data: UserData,
    ) -> TimerHandle {
        let handle = TimerHandle(self.nodes.insert(TimerNode {
            time: start,
            interval,
            payload,
            user_data,
            state: TimerState::Pending,
        }));
        self.push(start, handle);
        handle
    }

    /// Cancels a timer.
    ///
    /// Cancelling a timer from inside its own handler is allowed and stops
    /// a repeating timer from being rescheduled.
    ///
    /// # Returns
    ///
    /// False if the handle is stale or the timer was already cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let Some(node) = self.nodes.get_mut(handle.0) else {
            return false;
        };
        match node.state {
            TimerState::Cancelled => false,
            TimerState::Pending => {
                node.state = TimerState::Cancelled;
                self.num_cancelled += 1;
                true
            }
            TimerState::Executing => {
                // Not in the heap; finish() releases it.
                node.state = TimerState::Cancelled;
                true
            }
        }
    }

    /// Returns the state of a timer, or None if it has been released.
    #[must_use]
    pub fn state(&self, handle: TimerHandle) -> Option<TimerState> {
        self.nodes.get(handle.0).map(|n| n.state)
    }

    /// Returns the next expiry time of a live timer.
    #[must_use]
    pub fn time_of(&self, handle: TimerHandle) -> Option<TimeStamp> {
        self.nodes
            .get(handle.0)
            .filter(|n| n.state != TimerState::Cancelled)
            .map(|n| n.time)
    }

    /// Returns the repeat interval of a live timer.
    #[must_use]
    pub fn interval_of(&self, handle: TimerHandle) -> Option<TimeStamp> {
        self.nodes
            .get(handle.0)
            .filter(|n| n.state != TimerState::Cancelled)
            .map(|n| n.interval)
    }

    /// Earliest expiry among pending timers.
    #[must_use]
    pub fn next_expiry(&self) -> Option<TimeStamp> {
        self.heap
            .iter()
            .filter(|e| self.nodes.get(e.handle.0).map(|n| n.state) == Some(TimerState::Pending))
            .map(|e| e.time)
            .min()
    }

    /// Rebuilds the heap without cancelled entries once they make up more
    /// than half of it.
    pub fn purge_if_needed(&mut self) {
        if self.num_cancelled * 2 <= self.heap.len() {
            return;
        }

        let before = self.heap.len();
        let entries = std::mem::take(&mut self.heap).into_vec();
        let mut live = Vec::with_capacity(before - self.num_cancelled.min(before));
        for entry in entries {
            let cancelled = self
                .nodes
                .get(entry.handle.0)
                .map_or(true, |n| n.state == TimerState::Cancelled);
            if cancelled {
                self.release(entry.handle);
            } else {
                live.push(entry);
            }
        }
        self.heap = BinaryHeap::from(live);
        self.num_cancelled = 0;

        trace!(before, after = self.heap.len(), "purged time queue");
    }

    /// Removes and returns the next timer due at or before `now`.
    ///
    /// The timer is left in the [`TimerState::Executing`] state; the caller
    /// must hand it back with [`TimeQueue::finish`] once its handler has run.
    pub fn pop_due(&mut self, now: TimeStamp) -> Option<ExpiredTimer<T>>
    where
        T: Clone,
    {
        loop {
            let top = *self.heap.peek()?;
            let state = self.nodes.get(top.handle.0).map(|n| n.state);

            if state != Some(TimerState::Pending) {
                self.heap.pop();
                self.num_cancelled = self.num_cancelled.saturating_sub(1);
                self.release(top.handle);
                continue;
            }
            if top.time > now {
                return None;
            }

            self.heap.pop();
            let node = &mut self.nodes[top.handle.0];
            node.state = TimerState::Executing;
            return Some(ExpiredTimer {
                handle: top.handle,
                time: top.time,
                payload: node.payload.clone(),
                user_data: node.user_data,
            });
        }
    }

    /// Completes a timer returned by [`TimeQueue::pop_due`].
    ///
    /// A repeating timer that was not cancelled is rescheduled one interval
    /// after its due time; anything else is released.
    pub fn finish(&mut self, handle: TimerHandle) {
        let Some(node) = self.nodes.get_mut(handle.0) else {
            return;
        };
        match node.state {
            TimerState::Executing if node.interval > 0 => {
                node.state = TimerState::Pending;
                node.time += node.interval;
                let time = node.time;
                self.push(time, handle);
            }
            TimerState::Executing | TimerState::Cancelled => self.release(handle),
            TimerState::Pending => debug_assert!(false, "finish() on a pending timer"),
        }
    }

    /// Takes every node released since the last call.
    pub fn take_released(&mut self) -> Vec<ReleasedTimer<T>> {
        std::mem::take(&mut self.released)
    }

    /// Fires every timer due at or before `now`.
    ///
    /// # Returns
    ///
    /// The number of timers fired.
    pub fn process(&mut self, now: TimeStamp, handler: &mut impl TimerHandler<T>) -> usize
    where
        T: Clone,
    {
        self.purge_if_needed();

        let mut fired = 0;
        while let Some(expired) = self.pop_due(now) {
            fired += 1;
            handler.handle_timeout(expired.handle, &expired.payload, expired.user_data);
            self.finish(expired.handle);
        }

        for released in self.take_released() {
            handler.on_release(released.handle, released.payload, released.user_data);
        }
        fired
    }

    /// Discards every timer. All of them are released.
    pub fn clear(&mut self) {
        let handles: Vec<TimerHandle> = self.heap.drain().map(|e| e.handle).collect();
        for handle in handles {
            self.release(handle);
        }
        // Executing nodes are not in the heap.
        let executing: Vec<TimerHandle> = self.nodes.iter().map(|(h, _)| TimerHandle(h)).collect();
        for handle in executing {
            self.release(handle);
        }
        self.num_cancelled = 0;
    }

    fn push(&mut self, time: TimeStamp, handle: TimerHandle) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry { time, seq, handle });
    }

    fn release(&mut self, handle: TimerHandle) {
        if let Some(node) = self.nodes.remove(handle.0) {
            self.released.push(ReleasedTimer {
                handle,
                payload: node.payload,
                user_data: node.user_data,
            });
        }
    }
}

impl<T> Default for TimeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        fired: Vec<(UserData, &'static str)>,
        released: Vec<UserData>,
    }

    impl TimerHandler<&'static str> for Recorder {
        fn handle_timeout(
            &mut self,
            _handle: TimerHandle,
            payload: &&'static str,
            user_data: UserData,
        ) {
            self.fired.push((user_data, *payload));
        }

        fn on_release(
            &mut self,
            _handle: TimerHandle,
            _payload: &'static str,
            user_data: UserData,
        ) {
            self.released.push(user_data);
        }
    }

    #[test]
    fn test_one_shot_fires_once_and_releases() {
        let mut queue = TimeQueue::new();
        let mut recorder = Recorder::default();
        let handle = queue.add(5, 0, "once", 1);

        assert_eq!(queue.process(4, &mut recorder), 0);
        assert_eq!(queue.process(5, &mut recorder), 1);
        assert_eq!(queue.process(100, &mut recorder), 0);

        assert_eq!(recorder.fired, vec![(1, "once")]);
        assert_eq!(recorder.released, vec![1]);
        assert!(queue.state(handle).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeating_timer_reschedules() {
        let mut queue = TimeQueue::new();
        let mut recorder = Recorder::default();
        let handle = queue.add(2, 3, "tick", 9);

        for now in 0..=11 {
            queue.process(now, &mut recorder);
        }
        // Due at 2, 5, 8, 11.
        assert_eq!(recorder.fired.len(), 4);
        assert_eq!(queue.time_of(handle), Some(14));
        assert_eq!(queue.interval_of(handle), Some(3));
        assert!(recorder.released.is_empty());
    }

    #[test]
    fn test_fires_in_time_order() {
        let mut queue = TimeQueue::new();
        let mut recorder = Recorder::default();
        queue.add(7, 0, "c", 3);
        queue.add(1, 0, "a", 1);
        queue.add(4, 0, "b", 2);
        queue.add(4, 0, "b2", 4);

        queue.process(10, &mut recorder);
        let order: Vec<&str> = recorder.fired.iter().map(|(_, p)| *p).collect();
        assert_eq!(order, vec!["a", "b", "b2", "c"]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut queue = TimeQueue::new();
        let mut recorder = Recorder::default();
        let handle = queue.add(3, 0, "x", 1);

        assert!(queue.cancel(handle));
        assert!(!queue.cancel(handle));
        assert_eq!(queue.state(handle), Some(TimerState::Cancelled));

        queue.process(10, &mut recorder);
        assert!(recorder.fired.is_empty());
        assert_eq!(recorder.released, vec![1]);
        assert!(!queue.cancel(handle));
    }

    #[test]
    fn test_cancel_from_inside_handler_stops_repeat() {
        let mut queue = TimeQueue::new();
        let handle = queue.add(1, 1, "repeat", 0);
        let mut fired = 0;

        for now in 1..10 {
            queue.purge_if_needed();
            while let Some(expired) = queue.pop_due(now) {
                fired += 1;
                assert_eq!(queue.state(expired.handle), Some(TimerState::Executing));
                if fired == 3 {
                    assert!(queue.cancel(expired.handle));
                }
                queue.finish(expired.handle);
            }
        }

        assert_eq!(fired, 3);
        assert_eq!(queue.take_released().len(), 1);
        assert!(queue.state(handle).is_none());
    }

    #[test]
    fn test_purge_threshold() {
        let mut queue = TimeQueue::new();
        let mut recorder = Recorder::default();
        let handles: Vec<TimerHandle> = (0..50).map(|i| queue.add(1000, 0, "p", i)).collect();

        for handle in &handles[..34] {
            assert!(queue.cancel(*handle));
        }
        assert_eq!(queue.size(), 50);

        queue.process(0, &mut recorder);
        assert!(queue.size() < 25);
        assert_eq!(queue.size(), 16);
        assert_eq!(recorder.released.len(), 34);
        assert!(recorder.fired.is_empty());
    }

    #[test]
    fn test_next_expiry_skips_cancelled() {
        let mut queue: TimeQueue<&str> = TimeQueue::new();
        let early = queue.add(2, 0, "early", 0);
        queue.add(9, 0, "late", 0);
        assert_eq!(queue.next_expiry(), Some(2));

        queue.cancel(early);
        assert_eq!(queue.next_expiry(), Some(9));
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut queue = TimeQueue::new();
        let mut recorder = Recorder::default();
        queue.add(1, 1, "a", 1);
        let b = queue.add(2, 0, "b", 2);
        queue.cancel(b);

        queue.clear();
        assert!(queue.is_empty());
        let mut released: Vec<UserData> =
            queue.take_released().into_iter().map(|r| r.user_data).collect();
        released.sort_unstable();
        assert_eq!(released, vec![1, 2]);

        queue.process(10, &mut recorder);
        assert!(recorder.fired.is_empty());
    }
}
