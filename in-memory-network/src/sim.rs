//! Simulated time and the event scheduler
//!
//! Everything in the network happens as an event on a single timeline. Events are processed in
//! timestamp order; events scheduled for the same instant run in the order they were scheduled.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

/// A point on the simulated timeline, measured in nanoseconds since the start of the simulation
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000_000_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1e9).round() as u64)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// The time elapsed since `earlier`, or zero if `earlier` is in the future
    pub fn saturating_duration_since(&self, earlier: SimTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> Self::Output {
        let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        SimTime(self.0.saturating_add(nanos))
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration::from_nanos(self.0 - rhs.0)
    }
}

/// A queue of pending events, ordered by the instant at which they should run
pub struct Scheduler<E> {
    now: SimTime,
    next_sequence: u64,
    pending: BinaryHeap<PendingEvent<E>>,
    processed_events: u64,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_sequence: 0,
            pending: BinaryHeap::new(),
            processed_events: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// The number of events that have been handed out by [`Scheduler::next_before`]
    pub fn processed_events(&self) -> u64 {
        self.processed_events
    }

    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    /// Schedules an event to run after `delay` has elapsed
    pub fn schedule(&mut self, delay: Duration, event: E) {
        let at = self.now + delay;
        self.schedule_at(at, event);
    }

    /// Schedules an event to run at the provided instant
    ///
    /// Instants in the past are clamped to the current time, so the timeline never goes backwards.
    pub fn schedule_at(&mut self, at: SimTime, event: E) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.push(PendingEvent {
            at: at.max(self.now),
            sequence,
            event,
        });
    }

    /// Pops the next event, as long as it is scheduled at or before `stop`, advancing the clock
    /// to the event's instant
    pub fn next_before(&mut self, stop: SimTime) -> Option<E> {
        if self.pending.peek()?.at > stop {
            return None;
        }

        let next = self.pending.pop()?;
        self.now = next.at;
        self.processed_events += 1;
        Some(next.event)
    }

    /// Moves the clock forward to `instant` without processing anything
    pub fn advance_to(&mut self, instant: SimTime) {
        self.now = self.now.max(instant);
    }
}

struct PendingEvent<E> {
    at: SimTime,
    sequence: u64,
    event: E,
}

impl<E> Eq for PendingEvent<E> {}

impl<E> PartialEq<Self> for PendingEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> PartialOrd<Self> for PendingEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for PendingEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Note: the order is reversed, so the "max" event is the next one to run
        other
            .at
            .cmp(&self.at)
            .then(other.sequence.cmp(&self.sequence))
    }
}
