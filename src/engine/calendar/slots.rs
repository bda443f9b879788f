// Available-slot derivation (§4.2): given a working window and a set of busy
// intervals, produce the maximal ordered list of `[t, t+d)` slots aligned to
// 30-minute boundaries that don't intersect any busy interval.

use crate::atoms::constants::SLOT_ALIGNMENT_MINUTES;
use crate::atoms::types::{BusyInterval, TimeSlot};
use chrono::{DateTime, Duration, Utc};

pub fn derive_slots(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration: Duration,
    busy: &[BusyInterval],
) -> Vec<TimeSlot> {
    if duration <= Duration::zero() || window_start >= window_end {
        return Vec::new();
    }

    let step = Duration::minutes(SLOT_ALIGNMENT_MINUTES);
    let mut slots = Vec::new();
    let mut t = window_start;

    while t + duration <= window_end {
        let candidate = TimeSlot { start: t, end: t + duration };
        if !busy.iter().any(|b| intervals_intersect(candidate.start, candidate.end, b.start, b.end)) {
            slots.push(candidate);
        }
        t += step;
    }

    slots
}

fn intervals_intersect(a_start: DateTime<Utc>, a_end: DateTime<Utc>, b_start: DateTime<Utc>, b_end: DateTime<Utc>) -> bool {
    a_start < b_end && b_start < a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn t(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, min, 0).unwrap()
    }

    #[test]
    fn slots_disjoint_from_busy_intervals() {
        let busy = vec![
            BusyInterval { start: t(9, 0), end: t(10, 0) },
            BusyInterval { start: t(11, 0), end: t(12, 0) },
        ];
        let slots = derive_slots(t(9, 0), t(18, 0), Duration::hours(1), &busy);

        for slot in &slots {
            assert!(slot.start >= t(9, 0) && slot.end <= t(18, 0));
            for b in &busy {
                assert!(!intervals_intersect(slot.start, slot.end, b.start, b.end));
            }
        }
        assert!(slots.iter().any(|s| s.start == t(10, 0)));
        assert!(slots.iter().any(|s| s.start == t(12, 0)));
        assert!(!slots.iter().any(|s| s.start == t(9, 0)));
    }

    #[test]
    fn slots_align_to_thirty_minutes() {
        let slots = derive_slots(t(9, 0), t(11, 0), Duration::minutes(30), &[]);
        for slot in &slots {
            assert_eq!(slot.start.minute() % 30, 0);
        }
    }
}
