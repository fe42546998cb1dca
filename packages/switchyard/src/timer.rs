//! Timer identifiers and the deadline-ordered timer set of an event loop.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZero;
use std::time::{Duration, Instant};

/// Identifies one timer armed on an event loop.
///
/// Identifiers are assigned from a per-loop counter that starts at 1 and only ever increases, so
/// an identifier is never reused within the lifetime of a loop. A stale identifier (of a timer
/// that has fired or been stopped) is harmless to pass to
/// [`HandlerCore::stop_timer()`][crate::HandlerCore::stop_timer].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TimerId(NonZero<u64>);

impl TimerId {
    pub(crate) fn from_raw(value: NonZero<u64>) -> Self {
        Self(value)
    }

    /// The numeric value of the identifier.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TimerId {
    #[cfg_attr(test, mutants::skip)] // No API contract for display output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a timer fires once or keeps firing at a fixed interval.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum TimerMode {
    /// The timer fires once, after which its identifier becomes stale.
    OneShot,

    /// The timer fires every time its interval elapses, until stopped.
    ///
    /// The next deadline is computed from the moment the timer fired, so a worker that falls
    /// behind skips missed ticks instead of delivering them in a burst.
    Repeating,
}

#[derive(Debug)]
struct Timer<O> {
    owner: O,
    interval: Duration,
    mode: TimerMode,
}

/// The armed timers of one event loop, ordered by deadline.
///
/// Timers that share a deadline are ordered by identifier, so the one armed first fires first.
/// The owner type is the loop's handler slot; it is a parameter so the ordering logic stands on
/// its own.
#[derive(Debug)]
pub(crate) struct TimerSet<O> {
    by_deadline: BTreeMap<(Instant, TimerId), Timer<O>>,
    deadlines: foldhash::HashMap<TimerId, Instant>,
    next_id: u64,
}

impl<O: Clone> TimerSet<O> {
    pub(crate) fn new() -> Self {
        Self {
            by_deadline: BTreeMap::new(),
            deadlines: foldhash::HashMap::default(),
            next_id: 1,
        }
    }

    /// Arms a timer that first expires at `now + interval`.
    ///
    /// Returns the new identifier and whether the timer became the earliest deadline of the
    /// set. A deadline the platform clock cannot represent is clamped to the latest one it can.
    pub(crate) fn insert(
        &mut self,
        owner: O,
        now: Instant,
        interval: Duration,
        mode: TimerMode,
    ) -> (TimerId, bool) {
        let deadline = deadline_after(now, interval);
        let id = self.allocate_id();

        let is_earliest = self
            .by_deadline
            .first_key_value()
            .is_none_or(|(&(earliest, _), _)| deadline < earliest);

        self.by_deadline.insert(
            (deadline, id),
            Timer {
                owner,
                interval,
                mode,
            },
        );
        self.deadlines.insert(id, deadline);

        (id, is_earliest)
    }

    /// Disarms a timer. Returns `false` if no timer with this identifier is armed.
    pub(crate) fn remove(&mut self, id: TimerId) -> bool {
        let Some(deadline) = self.deadlines.remove(&id) else {
            return false;
        };

        self.by_deadline.remove(&(deadline, id));
        true
    }

    /// The owner of an armed timer.
    pub(crate) fn owner(&self, id: TimerId) -> Option<&O> {
        let deadline = self.deadlines.get(&id)?;

        self.by_deadline
            .get(&(*deadline, id))
            .map(|timer| &timer.owner)
    }

    /// Disarms every timer whose owner matches `predicate`, returning how many were disarmed.
    pub(crate) fn remove_where(&mut self, mut predicate: impl FnMut(&O) -> bool) -> usize {
        let before = self.by_deadline.len();
        let deadlines = &mut self.deadlines;

        self.by_deadline.retain(|&(_, id), timer| {
            let remove = predicate(&timer.owner);

            if remove {
                deadlines.remove(&id);
            }

            !remove
        });

        before.saturating_sub(self.by_deadline.len())
    }

    /// The deadline of the timer that expires next.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline
            .first_key_value()
            .map(|(&(deadline, _), _)| deadline)
    }

    /// Takes the earliest timer whose deadline is at or before `now`.
    ///
    /// A one-shot timer is disarmed; a repeating timer is re-armed at `now + interval`. A
    /// zero-interval repeating timer is therefore expired again immediately and keeps queued
    /// events waiting until it is stopped.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, O)> {
        let entry = self.by_deadline.first_entry()?;

        if entry.key().0 > now {
            return None;
        }

        let ((_, id), timer) = entry.remove_entry();
        let owner = timer.owner.clone();

        match timer.mode {
            TimerMode::Repeating => {
                let deadline = deadline_after(now, timer.interval);
                self.by_deadline.insert((deadline, id), timer);
                self.deadlines.insert(id, deadline);
            }
            TimerMode::OneShot => {
                self.deadlines.remove(&id);
            }
        }

        Some((id, owner))
    }

    /// Disarms every timer.
    pub(crate) fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }

    fn allocate_id(&mut self) -> TimerId {
        let id = NonZero::new(self.next_id)
            .map(TimerId)
            .unwrap_or_else(|| unreachable!("timer identifiers start at 1 and only increase"));

        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| unreachable!("64-bit timer identifiers cannot be exhausted"));

        id
    }
}

/// `now + interval`, or the latest representable instant on the way there if the sum
/// overflows the platform clock.
fn deadline_after(now: Instant, interval: Duration) -> Instant {
    let mut step = interval;

    loop {
        if let Some(deadline) = now.checked_add(step) {
            return deadline;
        }

        // Terminates: a zero step always fits.
        step = step.checked_div(2).unwrap_or_default();
    }
}

impl<O: Clone> Default for TimerSet<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(TimerId: Send, Sync, Copy);
    assert_impl_all!(TimerMode: Send, Sync, Copy);

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn identifiers_start_at_one_and_increase() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (first, _) = timers.insert("a", now, MS, TimerMode::OneShot);
        let (second, _) = timers.insert("a", now, MS, TimerMode::OneShot);

        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 2);
        assert!(first < second);
    }

    #[test]
    fn insert_reports_new_earliest() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (_, earliest) = timers.insert("a", now, 10 * MS, TimerMode::OneShot);
        assert!(earliest);

        let (_, earliest) = timers.insert("a", now, 20 * MS, TimerMode::OneShot);
        assert!(!earliest);

        let (_, earliest) = timers.insert("a", now, 5 * MS, TimerMode::OneShot);
        assert!(earliest);

        assert_eq!(timers.next_deadline(), Some(now + 5 * MS));
        assert_eq!(timers.len(), 3);
    }

    #[test]
    fn zero_interval_repeating_stays_expired() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, _) = timers.insert("a", now, Duration::ZERO, TimerMode::Repeating);

        for _ in 0..3 {
            assert_eq!(timers.pop_expired(now), Some((id, "a")));
        }

        assert_eq!(timers.len(), 1);
        assert!(timers.remove(id));
        assert_eq!(timers.pop_expired(now), None);
    }

    #[test]
    fn unrepresentable_deadline_is_clamped() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, earliest) = timers.insert("a", now, Duration::MAX, TimerMode::OneShot);

        assert!(earliest);
        assert!(timers.next_deadline().is_some_and(|deadline| deadline > now));
        assert_eq!(timers.pop_expired(now), None);
        assert_eq!(timers.owner(id), Some(&"a"));
    }

    #[test]
    fn unrepresentable_repeat_is_clamped_on_rearm() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, _) = timers.insert("a", now, Duration::MAX, TimerMode::Repeating);
        let deadline = timers.next_deadline().unwrap();

        assert_eq!(timers.pop_expired(deadline), Some((id, "a")));
        assert_eq!(timers.owner(id), Some(&"a"));
        assert!(timers.next_deadline().is_some_and(|next| next >= deadline));
    }

    #[test]
    fn zero_interval_one_shot_expires_immediately() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, _) = timers
            .insert("a", now, Duration::ZERO, TimerMode::OneShot);

        assert_eq!(timers.pop_expired(now), Some((id, "a")));
    }

    #[test]
    fn pop_expired_respects_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, _) = timers.insert("a", now, 10 * MS, TimerMode::OneShot);

        assert_eq!(timers.pop_expired(now + 9 * MS), None);
        assert_eq!(timers.pop_expired(now + 10 * MS), Some((id, "a")));
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn ties_fire_in_identifier_order() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (first, _) = timers.insert("a", now, 5 * MS, TimerMode::OneShot);
        let (second, _) = timers.insert("b", now, 5 * MS, TimerMode::OneShot);
        let (third, _) = timers.insert("c", now, 5 * MS, TimerMode::OneShot);

        let later = now + 5 * MS;
        assert_eq!(timers.pop_expired(later), Some((first, "a")));
        assert_eq!(timers.pop_expired(later), Some((second, "b")));
        assert_eq!(timers.pop_expired(later), Some((third, "c")));
        assert_eq!(timers.pop_expired(later), None);
    }

    #[test]
    fn earlier_deadline_wins_over_lower_identifier() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (slow, _) = timers.insert("slow", now, 20 * MS, TimerMode::OneShot);
        let (fast, _) = timers.insert("fast", now, 10 * MS, TimerMode::OneShot);

        let later = now + 30 * MS;
        assert_eq!(timers.pop_expired(later), Some((fast, "fast")));
        assert_eq!(timers.pop_expired(later), Some((slow, "slow")));
    }

    #[test]
    fn repeating_timer_is_rearmed_from_fire_time() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, _) = timers.insert("a", now, 10 * MS, TimerMode::Repeating);

        // Fired late: the next deadline counts from the actual fire time.
        let fired_at = now + 35 * MS;
        assert_eq!(timers.pop_expired(fired_at), Some((id, "a")));
        assert_eq!(timers.next_deadline(), Some(fired_at + 10 * MS));
        assert_eq!(timers.pop_expired(fired_at), None);
        assert_eq!(timers.owner(id), Some(&"a"));
    }

    #[test]
    fn remove_is_idempotent() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, _) = timers.insert("a", now, MS, TimerMode::Repeating);

        assert!(timers.remove(id));
        assert!(!timers.remove(id));
        assert!(timers.owner(id).is_none());
        assert!(timers.pop_expired(now + 100 * MS).is_none());
    }

    #[test]
    fn remove_after_one_shot_fired_is_noop() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (fired, _) = timers.insert("a", now, MS, TimerMode::OneShot);
        let (other, _) = timers.insert("a", now, 50 * MS, TimerMode::OneShot);

        assert_eq!(timers.pop_expired(now + MS), Some((fired, "a")));
        assert!(!timers.remove(fired));

        assert_eq!(timers.len(), 1);
        assert_eq!(timers.owner(other), Some(&"a"));
    }

    #[test]
    fn remove_where_filters_by_owner() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (a1, _) = timers.insert("a", now, MS, TimerMode::OneShot);
        let (b1, _) = timers.insert("b", now, 2 * MS, TimerMode::Repeating);
        let (a2, _) = timers.insert("a", now, 3 * MS, TimerMode::Repeating);

        assert_eq!(timers.remove_where(|owner| *owner == "a"), 2);

        assert!(timers.owner(a1).is_none());
        assert!(timers.owner(a2).is_none());
        assert_eq!(timers.owner(b1), Some(&"b"));
        assert!(!timers.remove(a1));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn clear_disarms_everything() {
        let now = Instant::now();
        let mut timers = TimerSet::new();

        let (id, _) = timers.insert("a", now, MS, TimerMode::OneShot);
        timers.clear();

        assert!(timers.is_empty());
        assert!(!timers.remove(id));
    }
}
