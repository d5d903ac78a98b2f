//! Virtual time and the event queue.
//!
//! All time in the simulator is virtual and counted in nanoseconds. A CPU
//! advances it by converting the machine cycles it spends into nanoseconds
//! (see [`Core::add_cycles`]), and devices schedule their future activity
//! as [`Event`]s on the queue.
//!
//! The core types here are:
//! - [`EventQueue`]: the ordered list of pending events plus the current time.
//! - [`Scheduler`]: a cloneable, shared handle to an [`EventQueue`], which devices
//!     keep so they can schedule and cancel their own events.
//!
//! [`Core::add_cycles`]: crate::sim::Core::add_cycles

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::lock;

/// Identifies the receiver of an event.
///
/// Each device that wants callbacks asks the queue for its own handler ID
/// and reports it from [`Device::event_handler`].
///
/// [`Device::event_handler`]: crate::sim::device::Device::event_handler
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct HandlerId(u32);

/// A scheduled callback.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Event {
    /// Who receives the callback.
    pub handler: HandlerId,
    /// A value passed back to the handler, so one handler can keep several kinds of event apart.
    pub param: isize,
    /// The virtual time (in ns) at which the event is due.
    pub due: u64,
}

/// The ordered list of pending events.
///
/// Events are kept sorted by due time. Events due at the same time
/// stay in the order they were scheduled in.
///
/// Event slots are recycled through a free list rather than reallocated.
#[derive(Debug, Default)]
pub struct EventQueue {
    now: u64,
    next_due: u64,
    slots: Vec<Event>,
    pending: VecDeque<usize>,
    free: Vec<usize>,
    next_handler: u32,
}

impl EventQueue {
    /// Creates an empty queue at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new handler identity.
    pub fn new_handler(&mut self) -> HandlerId {
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        id
    }

    /// The current virtual time in ns.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// The due time of the earliest pending event, or `0` when nothing is pending.
    pub fn next_event_time(&self) -> u64 {
        self.next_due
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The number of pending events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// The number of recycled event slots waiting to be reused.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Whether the earliest pending event is due now.
    pub fn is_due(&self) -> bool {
        !self.pending.is_empty() && self.next_due <= self.now
    }

    fn sync_next(&mut self) {
        self.next_due = self.pending.front()
            .map_or(0, |&i| self.slots[i].due);
    }

    fn alloc(&mut self, ev: Event) -> usize {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = ev;
                i
            },
            None => {
                self.slots.push(ev);
                self.slots.len() - 1
            }
        }
    }

    /// Schedules an event `delay` ns from now.
    ///
    /// A delay of zero is treated as one, so an event is never due
    /// at the instant it was scheduled.
    pub fn schedule(&mut self, handler: HandlerId, param: isize, delay: u64) {
        let due = self.now.saturating_add(delay.max(1));
        let slot = self.alloc(Event { handler, param, due });

        // insert after every event due at or before this one
        let pos = self.pending.partition_point(|&i| self.slots[i].due <= due);
        self.pending.insert(pos, slot);
        self.sync_next();
    }

    /// Removes every pending event matching the predicate, returning how many were removed.
    fn remove_where(&mut self, mut pred: impl FnMut(&Event) -> bool) -> usize {
        let before = self.pending.len();
        let Self { slots, pending, free, .. } = self;
        pending.retain(|&i| match pred(&slots[i]) {
            true => {
                free.push(i);
                false
            },
            false => true,
        });
        self.sync_next();
        before - self.pending.len()
    }

    /// Cancels all events with this handler and parameter.
    ///
    /// Returns the number of events cancelled.
    pub fn cancel(&mut self, handler: HandlerId, param: isize) -> usize {
        self.remove_where(|e| e.handler == handler && e.param == param)
    }

    /// Cancels all events with this handler, whatever their parameter.
    pub fn cancel_handler(&mut self, handler: HandlerId) -> usize {
        self.remove_where(|e| e.handler == handler)
    }

    /// Cancels every pending event. The current time is unchanged.
    pub fn cancel_all_events(&mut self) {
        self.remove_where(|_| true);
    }

    /// Cancels every pending event, discards the free list and sets the time back to zero.
    pub fn clear_events(&mut self) {
        self.pending.clear();
        self.free.clear();
        self.slots.clear();
        self.now = 0;
        self.next_due = 0;
    }

    /// Whether an event with this handler and parameter is pending.
    pub fn is_pending(&self, handler: HandlerId, param: isize) -> bool {
        self.pending.iter()
            .any(|&i| self.slots[i].handler == handler && self.slots[i].param == param)
    }

    /// The due time of the first pending event with this handler and parameter.
    pub fn due_time(&self, handler: HandlerId, param: isize) -> Option<u64> {
        self.pending.iter()
            .map(|&i| self.slots[i])
            .find(|e| e.handler == handler && e.param == param)
            .map(|e| e.due)
    }

    /// Advances the current time by `delta` ns.
    pub fn add_time(&mut self, delta: u64) {
        self.now = self.now.saturating_add(delta);
    }

    /// Moves the current time forward to `time`.
    ///
    /// Time never runs backwards; a target in the past is logged and ignored.
    pub fn jump_ahead(&mut self, time: u64) {
        match time < self.now {
            true  => tracing::warn!(now = self.now, target = time, "ignoring attempt to move time backwards"),
            false => self.now = time,
        }
    }

    /// Removes and returns the earliest event, if it is due.
    pub fn pop_due(&mut self) -> Option<Event> {
        if !self.is_due() { return None };

        let slot = self.pending.pop_front()?;
        self.free.push(slot);
        self.sync_next();
        Some(self.slots[slot])
    }

    /// Dispatches every due event in order.
    ///
    /// The dispatcher receives the queue back, so a callback can schedule
    /// follow-up events (which are dispatched in the same call if they are also due).
    pub fn do_events(&mut self, mut dispatch: impl FnMut(&mut Self, Event)) {
        while let Some(ev) = self.pop_due() {
            dispatch(self, ev);
        }
    }
}

/// A shared handle to an [`EventQueue`].
///
/// The CPU and every device that schedules events hold clones of the same scheduler.
#[derive(Clone, Debug, Default)]
pub struct Scheduler(Arc<Mutex<EventQueue>>);

impl Scheduler {
    /// Creates a handle to a fresh, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the underlying queue.
    pub fn lock(&self) -> MutexGuard<'_, EventQueue> {
        lock(&self.0)
    }

    /// Allocates a new handler identity.
    pub fn new_handler(&self) -> HandlerId {
        self.lock().new_handler()
    }

    /// The current virtual time in ns.
    pub fn now(&self) -> u64 {
        self.lock().now()
    }

    /// See [`EventQueue::schedule`].
    pub fn schedule(&self, handler: HandlerId, param: isize, delay: u64) {
        self.lock().schedule(handler, param, delay)
    }

    /// See [`EventQueue::cancel`].
    pub fn cancel(&self, handler: HandlerId, param: isize) -> usize {
        self.lock().cancel(handler, param)
    }

    /// See [`EventQueue::is_pending`].
    pub fn is_pending(&self, handler: HandlerId, param: isize) -> bool {
        self.lock().is_pending(handler, param)
    }

    /// See [`EventQueue::add_time`].
    pub fn add_time(&self, delta: u64) {
        self.lock().add_time(delta)
    }

    /// Whether the earliest pending event is due now.
    pub fn is_due(&self) -> bool {
        self.lock().is_due()
    }

    /// Dispatches every due event in order.
    ///
    /// The queue is unlocked while each event is dispatched, so the
    /// receiving device can use its own scheduler handle to schedule or cancel events.
    pub fn do_events(&self, mut dispatch: impl FnMut(Event)) {
        loop {
            let Some(ev) = self.lock().pop_due() else { break };
            dispatch(ev);
        }
    }

    /// Whether both handles refer to the same queue.
    pub fn same_queue(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
