use chrono::NaiveDate;

use crate::limits::MIN_BOOKABLE_MINUTES;
use crate::model::*;

/// Windows held by active reservations on `date`, in start order.
pub fn booked_windows(rs: &ResourceState, date: NaiveDate) -> Vec<Slot> {
    rs.day(date)
        .iter()
        .filter(|r| r.is_active())
        .map(|r| r.slot())
        .collect()
}

/// Operating window minus everything active reservations hold on `date`.
pub fn free_windows(rs: &ResourceState, date: NaiveDate) -> Vec<Slot> {
    let Ok(window) = rs.resource.operating_window() else {
        return Vec::new();
    };
    // day buckets are already sorted by start
    let booked = merge_overlapping(&booked_windows(rs, date));
    subtract_slots(&[window], &booked)
}

pub fn day_status(rs: &ResourceState, date: NaiveDate) -> DayAvailability {
    let booked_count = rs.day(date).iter().filter(|r| r.is_active()).count();
    let status = if booked_count == 0 {
        DayStatus::Available
    } else if free_windows(rs, date)
        .iter()
        .any(|s| s.duration_minutes() >= MIN_BOOKABLE_MINUTES)
    {
        DayStatus::Limited
    } else {
        DayStatus::Full
    };
    DayAvailability {
        date,
        status,
        booked_count,
    }
}

/// Merge sorted overlapping/touching slots into disjoint slots.
pub fn merge_overlapping(sorted: &[Slot]) -> Vec<Slot> {
    let mut merged: Vec<Slot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start() <= last.end() {
                *last = Slot::between(last.start(), last.end().max(slot.end()));
                continue;
            }
        merged.push(slot);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_slots(base: &[Slot], to_remove: &[Slot]) -> Vec<Slot> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start();
        let current_end = b.end();

        while ri < to_remove.len() && to_remove[ri].end() <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start() < current_end {
            let r = &to_remove[j];
            if r.start() > current_start {
                result.push(Slot::between(current_start, r.start()));
            }
            current_start = current_start.max(r.end());
            j += 1;
        }

        if current_start < current_end {
            result.push(Slot::between(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn state_with(slots: &[(Slot, ReservationStatus)]) -> (ResourceState, NaiveDate) {
        let court = court();
        let date = d(2024, 1, 1);
        let mut rs = ResourceState::new(court.clone());
        for &(s, status) in slots {
            rs.upsert(reservation(court.id, date, s, status));
        }
        (rs, date)
    }

    #[test]
    fn merge_touching_and_nested() {
        let merged = merge_overlapping(&[
            slot(8, 0, 9, 0),
            slot(9, 0, 10, 0),
            slot(9, 30, 9, 45),
            slot(11, 0, 12, 0),
        ]);
        assert_eq!(merged, vec![slot(8, 0, 10, 0), slot(11, 0, 12, 0)]);
    }

    #[test]
    fn subtract_middle_and_edges() {
        let free = subtract_slots(
            &[slot(6, 0, 22, 0)],
            &[slot(6, 0, 7, 0), slot(10, 0, 11, 30), slot(21, 0, 22, 0)],
        );
        assert_eq!(free, vec![slot(7, 0, 10, 0), slot(11, 30, 21, 0)]);
    }

    #[test]
    fn subtract_everything() {
        assert!(subtract_slots(&[slot(10, 0, 12, 0)], &[slot(9, 0, 13, 0)]).is_empty());
    }

    #[test]
    fn free_windows_skip_cancelled() {
        let (rs, date) = state_with(&[
            (slot(10, 0, 11, 0), ReservationStatus::Confirmed),
            (slot(11, 0, 12, 0), ReservationStatus::PendingPayment),
            (slot(14, 0, 15, 0), ReservationStatus::Cancelled),
        ]);
        assert_eq!(
            free_windows(&rs, date),
            vec![slot(6, 0, 10, 0), slot(12, 0, 22, 0)]
        );
        assert_eq!(booked_windows(&rs, date), vec![slot(10, 0, 11, 0), slot(11, 0, 12, 0)]);
    }

    #[test]
    fn empty_day_is_available() {
        let (rs, date) = state_with(&[(slot(10, 0, 11, 0), ReservationStatus::Cancelled)]);
        let day = day_status(&rs, date);
        assert_eq!(day.status, DayStatus::Available);
        assert_eq!(day.booked_count, 0);
        assert_eq!(free_windows(&rs, date), vec![slot(6, 0, 22, 0)]);
    }

    #[test]
    fn partially_booked_is_limited() {
        let (rs, date) = state_with(&[(slot(10, 0, 11, 0), ReservationStatus::Confirmed)]);
        let day = day_status(&rs, date);
        assert_eq!(day.status, DayStatus::Limited);
        assert_eq!(day.booked_count, 1);
    }

    #[test]
    fn only_short_gaps_left_is_full() {
        let (rs, date) = state_with(&[
            (slot(6, 0, 14, 0), ReservationStatus::Confirmed),
            (slot(14, 30, 22, 0), ReservationStatus::PendingPayment),
        ]);
        assert_eq!(free_windows(&rs, date), vec![slot(14, 0, 14, 30)]);
        assert_eq!(day_status(&rs, date).status, DayStatus::Full);
    }
}
