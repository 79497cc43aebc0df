use serde::{Deserialize, Serialize};

/// A bookable interval for one staff member. Minutes since midnight, `end` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub staff_id: String,
    pub staff_name: String,
    pub start: u32,
    pub end: u32,
}

impl TimeSlot {
    pub fn to_available(&self) -> AvailableSlot {
        AvailableSlot {
            staff_name: self.staff_name.clone(),
            start_time: format_time(self.start),
            end_time: format_time(self.end),
        }
    }
}

/// Slot shape returned by `find_available_slots`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    pub staff_name: String,
    pub start_time: String,
    pub end_time: String,
}

/// Parses a 24-hour `HH:mm` string into minutes since midnight.
pub fn parse_time(s: &str) -> anyhow::Result<u32> {
    let (hour, minute) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid time format: {s}"))?;
    let hour: u32 = hour
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    if hour > 23 || minute > 59 {
        return Err(anyhow::anyhow!("time out of range: {s}"));
    }
    Ok(hour * 60 + minute)
}

pub fn format_time(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
