//! Prioritized blocking message queue of one renderer thread.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Message, Priority};

/// Result of a blocking pop.
#[derive(Debug)]
pub enum PopOutcome {
    /// A message was dequeued.
    Message(Message),
    /// The timeout elapsed with the queue empty.
    TimedOut,
    /// The queue was closed and fully drained.
    Closed,
}

#[derive(Default)]
struct QueueState {
    // One FIFO per priority tier, High first.
    tiers: [std::collections::VecDeque<Message>; 3],
    // Messages matched by the filter, in original posting order.
    held_back: Vec<(Priority, Message)>,
    filter: Option<Box<dyn Fn(&Message) -> bool + Send>>,
    closed: bool,
}

impl QueueState {
    fn tier(priority: Priority) -> usize {
        match priority {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    fn pop(&mut self) -> Option<Message> {
        self.tiers.iter_mut().find_map(|tier| tier.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.tiers.iter().all(|tier| tier.is_empty())
    }
}

/// Multi-producer single-consumer queue with three priority tiers and an
/// installable filter.
///
/// While a filter is installed, matching messages (already queued or posted
/// later) are held back invisibly to the consumer; removing the filter
/// re-delivers them ahead of other messages of their tier. This is how
/// context-dependent messages survive a graphics context loss.
pub struct MessageQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    /// Creates an open, empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    /// Posts a message. Posting to a closed queue drops the message.
    pub fn post(&self, priority: Priority, message: Message) {
        let mut state = self.state.lock();
        if state.closed {
            log::trace!("dropping message posted to a closed queue");
            return;
        }

        if state.filter.as_ref().is_some_and(|f| f(&message)) {
            state.held_back.push((priority, message));
            return;
        }

        state.tiers[QueueState::tier(priority)].push_back(message);
        drop(state);
        self.available.notify_one();
    }

    /// Dequeues the next message, blocking up to `timeout` (forever when
    /// `None`) while the queue is empty.
    pub fn pop_blocking(&self, timeout: Option<Duration>) -> PopOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            if let Some(message) = state.pop() {
                return PopOutcome::Message(message);
            }
            if state.closed {
                return PopOutcome::Closed;
            }

            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        return match state.pop() {
                            Some(message) => PopOutcome::Message(message),
                            None if state.closed => PopOutcome::Closed,
                            None => PopOutcome::TimedOut,
                        };
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Dequeues a message only if one is immediately available.
    pub fn try_pop(&self) -> Option<Message> {
        self.state.lock().pop()
    }

    /// Installs a filter. Messages for which the predicate returns true are
    /// held back until [`remove_filter`](Self::remove_filter); already queued
    /// matches are pulled out of their tiers immediately.
    pub fn set_filter(&self, filter: Box<dyn Fn(&Message) -> bool + Send>) {
        let mut state = self.state.lock();

        for tier_index in 0..state.tiers.len() {
            let mut kept = std::collections::VecDeque::new();
            while let Some(message) = state.tiers[tier_index].pop_front() {
                if filter(&message) {
                    let priority = match tier_index {
                        0 => Priority::High,
                        1 => Priority::Normal,
                        _ => Priority::Low,
                    };
                    state.held_back.push((priority, message));
                } else {
                    kept.push_back(message);
                }
            }
            state.tiers[tier_index] = kept;
        }

        state.filter = Some(filter);
    }

    /// Removes the filter and re-delivers held-back messages at the front of
    /// their tiers, preserving their relative order.
    pub fn remove_filter(&self) {
        let mut state = self.state.lock();
        state.filter = None;

        let held_back = std::mem::take(&mut state.held_back);
        for (priority, message) in held_back.into_iter().rev() {
            state.tiers[QueueState::tier(priority)].push_front(message);
        }

        let notify = !state.is_empty();
        drop(state);
        if notify {
            self.available.notify_one();
        }
    }

    /// Closes the queue. Pending messages stay poppable; once drained,
    /// [`pop_blocking`](Self::pop_blocking) returns [`PopOutcome::Closed`].
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Removes and returns every pending message, held-back ones included.
    /// Each message is returned exactly once, whether or not the queue is
    /// closed.
    pub fn drain(&self) -> Vec<Message> {
        let mut state = self.state.lock();
        let mut drained = Vec::new();
        for tier in state.tiers.iter_mut() {
            drained.extend(tier.drain(..));
        }
        drained.extend(state.held_back.drain(..).map(|(_, message)| message));
        drained
    }

    /// Returns true when the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
