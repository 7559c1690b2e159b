//! Bounded history of state-machine activity.
//!
//! Each state machine keeps a small ring of timestamped records so the console
//! can show what happened recently without any allocation. Records carry the
//! time spent since the previous record, which for state entries is the dwell
//! time of the state that was left.

use core::fmt;

use heapless::HistoryBuf;

use crate::timer::Milliseconds;

/// Identifier assigned to each record, wrapping on overflow.
pub type EventId = u32;

/// Default number of records retained per recorder.
pub const HISTORY_CAPACITY: usize = 16;

/// Record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<E> {
    pub id: EventId,
    pub timestamp: Milliseconds,
    pub event: E,
    pub since_previous: Option<Milliseconds>,
}

impl<E: fmt::Display> fmt::Display for TelemetryRecord<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{} {}", self.id, self.timestamp, self.event)?;
        if let Some(elapsed) = self.since_previous {
            write!(f, " (+{elapsed})")?;
        }
        Ok(())
    }
}

/// Records events into a fixed-size ring buffer.
pub struct TelemetryRecorder<E, const CAPACITY: usize = HISTORY_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord<E>, CAPACITY>,
    last_recorded_at: Option<Milliseconds>,
    next_event_id: EventId,
}

impl<E: Copy, const CAPACITY: usize> TelemetryRecorder<E, CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_recorded_at: None,
            next_event_id: 0,
        }
    }

    /// Iterates over the retained records in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<E>> + '_ {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<E>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total number of records ever written, including overwritten ones.
    #[must_use]
    pub const fn recorded(&self) -> EventId {
        self.next_event_id
    }

    pub fn record(&mut self, event: E, timestamp: Milliseconds) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        let since_previous = self
            .last_recorded_at
            .map(|previous| timestamp.wrapping_since(previous));
        self.last_recorded_at = Some(timestamp);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            since_previous,
        });

        id
    }
}

impl<E: Copy, const CAPACITY: usize> Default for TelemetryRecorder<E, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum Phase {
        Idle,
        Busy,
    }

    impl fmt::Display for Phase {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Phase::Idle => "idle",
                Phase::Busy => "busy",
            })
        }
    }

    #[test]
    fn records_elapsed_between_events() {
        let mut recorder = TelemetryRecorder::<Phase, 4>::new();

        assert_eq!(recorder.record(Phase::Idle, Milliseconds::new(100)), 0);
        assert_eq!(recorder.latest().expect("first").since_previous, None);

        assert_eq!(recorder.record(Phase::Busy, Milliseconds::new(250)), 1);
        let second = recorder.latest().copied().expect("second");
        assert_eq!(second.event, Phase::Busy);
        assert_eq!(second.since_previous, Some(Milliseconds::new(150)));
    }

    #[test]
    fn ring_keeps_most_recent_records() {
        let mut recorder = TelemetryRecorder::<Phase, 2>::new();
        for tick in 0..5 {
            let phase = if tick % 2 == 0 { Phase::Idle } else { Phase::Busy };
            recorder.record(phase, Milliseconds::new(tick * 10));
        }

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.recorded(), 5);
        let ids: heapless::Vec<EventId, 2> = recorder.oldest_first().map(|r| r.id).collect();
        assert_eq!(ids.as_slice(), &[3, 4]);
    }

    #[test]
    fn record_renders_with_dwell_time() {
        let mut recorder = TelemetryRecorder::<Phase>::new();
        recorder.record(Phase::Idle, Milliseconds::new(5));
        recorder.record(Phase::Busy, Milliseconds::new(12));

        let mut text: heapless::String<48> = heapless::String::new();
        write!(text, "{}", recorder.latest().expect("record")).expect("fits");
        assert_eq!(text.as_str(), "#1 @12ms busy (+7ms)");
    }
}
