use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single day's opening window, in minutes since midnight. `close` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayHours {
    pub open: u32,
    pub close: u32,
}

impl DayHours {
    pub fn new(open: u32, close: u32) -> anyhow::Result<Self> {
        if close <= open || close > 24 * 60 {
            anyhow::bail!("invalid opening window: {open}..{close}");
        }
        Ok(Self { open, close })
    }
}

impl FromStr for DayHours {
    type Err = anyhow::Error;

    /// Parses `"09:00 AM - 06:00 PM"`. A closing time of 12:00 AM means midnight at the end of the day.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (open, close) = s
            .split_once(" - ")
            .ok_or_else(|| anyhow::anyhow!("expected \"open - close\" in: {s}"))?;
        let close = match parse_12h(close)? {
            0 => 24 * 60,
            minutes => minutes,
        };
        Self::new(parse_12h(open)?, close)
    }
}

impl fmt::Display for DayHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", format_12h(self.open), format_12h(self.close))
    }
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Weekly opening hours. A weekday without an entry is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpeningHours {
    days: BTreeMap<u32, DayHours>,
}

impl OpeningHours {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_day(mut self, day: Weekday, hours: DayHours) -> Self {
        self.days.insert(day.num_days_from_monday(), hours);
        self
    }

    pub fn for_day(&self, day: Weekday) -> Option<DayHours> {
        self.days.get(&day.num_days_from_monday()).copied()
    }

    /// Parses weekday-name to hours-text pairs, failing on the first unreadable entry.
    pub fn parse(raw: &BTreeMap<String, String>) -> anyhow::Result<Self> {
        let mut hours = Self::new();
        for (day, text) in raw {
            if let Some((day, window)) = parse_entry(day, text)? {
                hours = hours.with_day(day, window);
            }
        }
        Ok(hours)
    }
}

fn parse_entry(day: &str, text: &str) -> anyhow::Result<Option<(Weekday, DayHours)>> {
    let weekday: Weekday = day
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid weekday: {day}"))?;
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("closed") {
        return Ok(None);
    }
    Ok(Some((weekday, text.parse()?)))
}

impl Serialize for OpeningHours {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<String, String> = self
            .days
            .iter()
            .filter_map(|(idx, hours)| {
                let day = WEEK.get(*idx as usize)?;
                Some((weekday_name(*day).to_string(), hours.to_string()))
            })
            .collect();
        map.serialize(serializer)
    }
}

/// Stored documents decode leniently: an unreadable entry is logged and that day is closed.
impl<'de> Deserialize<'de> for OpeningHours {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut hours = OpeningHours::new();
        for (day, text) in &raw {
            match parse_entry(day, text) {
                Ok(Some((day, window))) => hours = hours.with_day(day, window),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(day = %day, hours = %text, error = %e, "unreadable opening hours, treating day as closed");
                }
            }
        }
        Ok(hours)
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Serde adapter for lists of full weekday names (`["Monday", "Tuesday"]`).
pub mod weekday_names {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(days: &[Weekday], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(days.iter().map(|d| super::weekday_name(*d)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Weekday>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| {
                s.parse::<Weekday>()
                    .map_err(|_| serde::de::Error::custom(format!("invalid weekday: {s}")))
            })
            .collect()
    }
}

fn parse_12h(s: &str) -> anyhow::Result<u32> {
    let s = s.trim();
    let (clock, meridiem) = s
        .rsplit_once(' ')
        .ok_or_else(|| anyhow::anyhow!("missing AM/PM in: {s}"))?;
    let (hour, minute) = clock
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid time format: {s}"))?;
    let hour: u32 = hour
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    if !(1..=12).contains(&hour) || minute > 59 {
        anyhow::bail!("time out of range: {s}");
    }

    // 12 AM is midnight, 12 PM is noon
    let hour = match meridiem.to_ascii_uppercase().as_str() {
        "AM" => hour % 12,
        "PM" => hour % 12 + 12,
        _ => anyhow::bail!("expected AM or PM in: {s}"),
    };
    Ok(hour * 60 + minute)
}

fn format_12h(minutes: u32) -> String {
    let hour = (minutes / 60) % 24;
    let minute = minutes % 60;
    let meridiem = if hour < 12 { "AM" } else { "PM" };
    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{display_hour:02}:{minute:02} {meridiem}")
}
