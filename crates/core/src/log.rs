//! Append-only event log.
//!
//! The log is the single source of truth for downstream analytics. It only
//! grows: there is no way to edit or remove an entry, corrections are new
//! events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};
use crate::Time;

/// In-memory append-only event log ordered by `(timestamp, sequence)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
    next_sequence: u64,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, assigning its sequence number. Returns the sequence.
    pub fn append(&mut self, mut event: Event) -> u64 {
        self.next_sequence += 1;
        event.sequence = self.next_sequence;

        // Keep timestamp order even if a producer hands us a late event.
        let late = self
            .events
            .last()
            .map_or(false, |last| event.timestamp < last.timestamp);
        if late {
            let at = self.events.partition_point(|e| e.timestamp <= event.timestamp);
            self.events.insert(at, event);
        } else {
            self.events.push(event);
        }
        self.next_sequence
    }

    /// Append several events in order.
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.append(event);
        }
    }

    /// Events at or after `from`, in order.
    pub fn since(&self, from: Time) -> EventCursor<'_> {
        let start = self.events.partition_point(|e| e.timestamp < from);
        EventCursor::new(&self.events[start..])
    }

    /// Events in `[from, to)`, in order.
    pub fn between(&self, from: Time, to: Time) -> EventCursor<'_> {
        let start = self.events.partition_point(|e| e.timestamp < from);
        let end = self.events.partition_point(|e| e.timestamp < to).max(start);
        EventCursor::new(&self.events[start..end])
    }

    /// All events in order.
    pub fn iter(&self) -> EventCursor<'_> {
        EventCursor::new(&self.events)
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Highest sequence number handed out.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Flow counts and sampled indicators bucketed by simulated hour.
    pub fn hourly_flow(&self) -> Vec<HourlyFlow> {
        hourly_flow(self.events.iter())
    }
}

/// Lazy, restartable cursor over a contiguous run of log entries.
#[derive(Debug, Clone)]
pub struct EventCursor<'a> {
    slice: &'a [Event],
    pos: usize,
}

impl<'a> EventCursor<'a> {
    fn new(slice: &'a [Event]) -> Self {
        Self { slice, pos: 0 }
    }

    /// Go back to the first event of the range.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Total events in the range, consumed or not.
    pub fn range_len(&self) -> usize {
        self.slice.len()
    }
}

impl<'a> Iterator for EventCursor<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.slice.get(self.pos)?;
        self.pos += 1;
        Some(event)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.slice.len() - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for EventCursor<'_> {}

/// Flow counts and department indicators for one simulated hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyFlow {
    /// Start of the hour
    pub hour: Option<Time>,
    /// Patients arriving
    pub arrivals: usize,
    /// Patients placed in rooms
    pub allocations: usize,
    /// Patients discharged or transferred
    pub exits: usize,
    /// Overflow reports
    pub overflows: usize,
    /// Metrics samples taken in the hour
    pub samples: usize,
    /// Mean saturation percentage over the samples
    pub mean_saturation: f64,
    /// Mean of the sampled mean waits, in minutes
    pub mean_wait_minutes: f64,
}

/// Bucket events by simulated hour. Input must be in timestamp order.
pub fn hourly_flow<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<HourlyFlow> {
    let mut buckets: BTreeMap<i64, HourlyFlow> = BTreeMap::new();

    for event in events {
        let secs = event.timestamp.timestamp();
        let hour_start = secs - secs.rem_euclid(3600);
        let bucket = buckets.entry(hour_start).or_insert_with(|| HourlyFlow {
            hour: chrono::DateTime::from_timestamp(hour_start, 0),
            ..HourlyFlow::default()
        });

        match &event.kind {
            EventKind::Arrival { .. } => bucket.arrivals += 1,
            EventKind::Allocation { .. } => bucket.allocations += 1,
            EventKind::Discharge { .. } | EventKind::Transfer { .. } => bucket.exits += 1,
            EventKind::Overflow { .. } => bucket.overflows += 1,
            EventKind::MetricsSample {
                saturation_rate,
                mean_wait_minutes,
                ..
            } => {
                // Running sums, divided once the hour is complete.
                bucket.samples += 1;
                bucket.mean_saturation += saturation_rate;
                bucket.mean_wait_minutes += mean_wait_minutes;
            }
            _ => {}
        }
    }

    buckets
        .into_values()
        .map(|mut bucket| {
            if bucket.samples > 0 {
                let n = bucket.samples as f64;
                bucket.mean_saturation /= n;
                bucket.mean_wait_minutes /= n;
            }
            bucket
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PatientId;
    use chrono::{Duration, TimeZone, Utc};

    fn arrival(at: Time, id: &str) -> Event {
        Event::system(at, EventKind::Arrival { patient: PatientId::new(id) })
    }

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let mut log = EventLog::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(log.append(arrival(t0, "P1")), 1);
        assert_eq!(log.append(arrival(t0, "P2")), 2);
        assert_eq!(log.len(), 2);

        let seqs: Vec<u64> = log.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_since_is_ordered_and_restartable() {
        let mut log = EventLog::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        for i in 0..5 {
            log.append(arrival(t0 + Duration::minutes(i * 10), &format!("P{}", i)));
        }

        let mut cursor = log.since(t0 + Duration::minutes(20));
        assert_eq!(cursor.range_len(), 3);
        let first: Vec<String> = cursor.by_ref().map(|e| e.kind.patient().unwrap().to_string()).collect();
        assert_eq!(first, vec!["P2", "P3", "P4"]);
        assert_eq!(cursor.next(), None);

        cursor.rewind();
        assert_eq!(cursor.count(), 3);

        let window: Vec<_> = log.between(t0, t0 + Duration::minutes(15)).collect();
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_late_event_keeps_timestamp_order() {
        let mut log = EventLog::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        log.append(arrival(t0 + Duration::minutes(30), "late"));
        log.append(arrival(t0, "early"));

        let order: Vec<_> = log.iter().map(|e| e.kind.patient().unwrap().to_string()).collect();
        assert_eq!(order, vec!["early", "late"]);
        // Sequence still reflects append order.
        assert_eq!(log.iter().next().unwrap().sequence, 2);
    }

    #[test]
    fn test_hourly_flow_buckets() {
        let mut log = EventLog::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        log.append(arrival(t0, "P1"));
        log.append(arrival(t0 + Duration::minutes(50), "P2"));
        log.append(Event::agent(
            t0 + Duration::minutes(70),
            EventKind::Discharge { patient: PatientId::new("P1"), room: None, rule: None },
        ));

        let flow = log.hourly_flow();
        assert_eq!(flow.len(), 2);
        assert_eq!(flow[0].arrivals, 2);
        assert_eq!(flow[0].hour, Some(t0));
        assert_eq!(flow[1].exits, 1);
    }

    #[test]
    fn test_hourly_flow_averages_metrics_samples() {
        let mut log = EventLog::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let sample = |at, saturation_rate, mean_wait_minutes| {
            Event::system(
                at,
                EventKind::MetricsSample {
                    saturation_rate,
                    waiting: 0,
                    mean_wait_minutes,
                },
            )
        };
        log.append(sample(t0, 50.0, 10.0));
        log.append(sample(t0 + Duration::minutes(15), 100.0, 30.0));
        log.append(arrival(t0 + Duration::minutes(20), "P1"));
        log.append(arrival(t0 + Duration::minutes(65), "P2"));

        let flow = log.hourly_flow();
        assert_eq!(flow.len(), 2);
        assert_eq!(flow[0].samples, 2);
        assert!((flow[0].mean_saturation - 75.0).abs() < 1e-9);
        assert!((flow[0].mean_wait_minutes - 20.0).abs() < 1e-9);
        assert_eq!(flow[0].arrivals, 1);

        // An hour without samples reports zero rather than NaN.
        assert_eq!(flow[1].samples, 0);
        assert_eq!(flow[1].mean_saturation, 0.0);
    }
}
