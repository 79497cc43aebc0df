use chrono::{Datelike, NaiveDate};

use crate::models::availability::parse_time;
use crate::models::{Booking, BookingStatus, Business, Service, Staff, TimeSlot};

/// Candidate start times are generated on this grid, starting at opening time.
pub const SLOT_STEP_MINUTES: u32 = 30;

/// Half-open intervals `[a_start, a_end)` and `[b_start, b_end)` overlap.
pub fn overlaps(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start < b_end && b_start < a_end
}

/// Bookable slots for one staff member on `date`, in ascending start order.
pub fn compute_slots(
    business: &Business,
    service: &Service,
    staff: &Staff,
    date: NaiveDate,
    existing_bookings: &[Booking],
) -> Vec<TimeSlot> {
    let day = date.weekday();
    if !staff.works_on(day) {
        return Vec::new();
    }

    let Some(hours) = business.opening_hours.for_day(day) else {
        return Vec::new();
    };

    if service.duration == 0 {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut start = hours.open;
    while let Some(end) = start.checked_add(service.duration).filter(|end| *end <= hours.close) {
        let slot = TimeSlot {
            staff_id: staff.id.clone(),
            staff_name: staff.name.clone(),
            start,
            end,
        };
        if is_slot_free(&slot, date, existing_bookings) {
            slots.push(slot);
        }
        start += SLOT_STEP_MINUTES;
    }

    slots
}

/// Slots for every given staff member, concatenated in the order the staff are given.
pub fn compute_slots_for_staff(
    business: &Business,
    service: &Service,
    staff: &[Staff],
    date: NaiveDate,
    existing_bookings: &[Booking],
) -> Vec<TimeSlot> {
    staff
        .iter()
        .flat_map(|member| compute_slots(business, service, member, date, existing_bookings))
        .collect()
}

/// True when no non-cancelled booking for the slot's staff member on `date` overlaps it.
pub fn is_slot_free(candidate: &TimeSlot, date: NaiveDate, existing_bookings: &[Booking]) -> bool {
    existing_bookings
        .iter()
        .filter(|b| b.status != BookingStatus::Cancelled)
        .filter(|b| b.staff_id == candidate.staff_id && b.date == date)
        .all(|b| match parse_time(&b.start_time) {
            Ok(b_start) => !overlaps(
                candidate.start,
                candidate.end,
                b_start,
                b_start.saturating_add(b.duration),
            ),
            Err(e) => {
                // An unreadable booking still blocks its staff member's day
                tracing::warn!(booking_id = %b.id, error = %e, "booking has invalid start time");
                false
            }
        })
}
