//! Reward period calendar computation.
//!
//! A period is the half-open interval `[start, end)` of the natural calendar
//! unit (week, month, quarter, semester, year) that contains a reference
//! instant, with boundaries at local midnight in the configured zone.

use chrono::{
    DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{AppError, ConfigError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardPeriodType {
    Week,
    #[default]
    Month,
    Quarter,
    Semester,
    Year,
}

impl RewardPeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "WEEK",
            Self::Month => "MONTH",
            Self::Quarter => "QUARTER",
            Self::Semester => "SEMESTER",
            Self::Year => "YEAR",
        }
    }

    /// First day of the period containing `date`, and the first day of the next one.
    #[must_use]
    pub fn bounds_of(&self, date: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Week => {
                let offset = u64::from(date.weekday().num_days_from_monday());
                let start = date - Days::new(offset);
                (start, start + Days::new(7))
            }
            Self::Month => month_bounds(date, 1),
            Self::Quarter => month_bounds(date, 3),
            Self::Semester => month_bounds(date, 6),
            Self::Year => month_bounds(date, 12),
        }
    }

    /// Computes the period containing `instant` in zone `tz`.
    pub fn period_of<Tz: TimeZone>(&self, tz: &Tz, instant: DateTime<Utc>) -> RewardPeriod
    where
        Tz::Offset: std::fmt::Display,
    {
        let local_date = instant.with_timezone(tz).date_naive();
        let (start, end) = self.bounds_of(local_date);
        RewardPeriod {
            period_type: *self,
            time_zone: tz_label(tz, instant),
            start: local_midnight(tz, start),
            end: local_midnight(tz, end),
        }
    }
}

impl std::str::FromStr for RewardPeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WEEK" => Ok(Self::Week),
            "MONTH" => Ok(Self::Month),
            "QUARTER" => Ok(Self::Quarter),
            "SEMESTER" => Ok(Self::Semester),
            "YEAR" => Ok(Self::Year),
            _ => Err(format!("Invalid reward period type: {}", s)),
        }
    }
}

impl std::fmt::Display for RewardPeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Half-open reward interval `[start, end)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct RewardPeriod {
    pub period_type: RewardPeriodType,
    /// Zone the boundaries were computed in, e.g. `+02:00` or `Europe/Paris`
    pub time_zone: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RewardPeriod {
    #[must_use]
    pub fn start_seconds(&self) -> i64 {
        self.start.timestamp()
    }

    #[must_use]
    pub fn end_seconds(&self) -> i64 {
        self.end.timestamp()
    }

    /// Instant in the middle of the period, stable under zone shifts of a few hours.
    #[must_use]
    pub fn median_seconds(&self) -> i64 {
        self.start_seconds() + (self.end_seconds() - self.start_seconds()) / 2
    }

    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }
}

/// Zone reward period boundaries are computed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardTimeZone {
    Fixed(FixedOffset),
    /// IANA zone, boundaries follow its daylight saving rules
    Named(Tz),
}

impl RewardTimeZone {
    /// Instant of local midnight starting `date`, or the first instant after
    /// it when midnight falls into a DST gap.
    #[must_use]
    pub fn midnight_of(&self, date: NaiveDate) -> DateTime<Utc> {
        match self {
            Self::Fixed(tz) => local_midnight(tz, date),
            Self::Named(tz) => local_midnight(tz, date),
        }
    }

    /// The period of `period_type` containing `instant`.
    #[must_use]
    pub fn period_of(&self, period_type: RewardPeriodType, instant: DateTime<Utc>) -> RewardPeriod {
        match self {
            Self::Fixed(tz) => period_type.period_of(tz, instant),
            Self::Named(tz) => RewardPeriod {
                time_zone: tz.name().to_string(),
                ..period_type.period_of(tz, instant)
            },
        }
    }
}

/// Parses a configured zone: an IANA name such as `Europe/Paris`, or a fixed
/// offset given as `UTC`, `Z`, `+02:00`, `-0530` or `+2`.
pub fn parse_time_zone(value: &str) -> Result<RewardTimeZone, AppError> {
    let trimmed = value.trim();
    if let Some(offset) = parse_offset(trimmed) {
        return Ok(RewardTimeZone::Fixed(offset));
    }
    trimmed
        .parse::<Tz>()
        .map(RewardTimeZone::Named)
        .map_err(|_| {
            AppError::Config(ConfigError::InvalidValue {
                key: "time_zone".to_string(),
                message: format!("unsupported zone '{}'", value),
            })
        })
}

fn parse_offset(trimmed: &str) -> Option<FixedOffset> {
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return FixedOffset::east_opt(0);
    }
    let body = trimmed
        .strip_prefix("UTC")
        .or_else(|| trimmed.strip_prefix("GMT"))
        .unwrap_or(trimmed);
    let (sign, digits) = match body.chars().next() {
        Some('+') => (1, &body[1..]),
        Some('-') => (-1, &body[1..]),
        _ => return None,
    };
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn month_bounds(date: NaiveDate, span: u32) -> (NaiveDate, NaiveDate) {
    let first_month = ((date.month() - 1) / span) * span + 1;
    let start = NaiveDate::from_ymd_opt(date.year(), first_month, 1).unwrap_or(date);
    let end = start.checked_add_months(Months::new(span)).unwrap_or(start);
    (start, end)
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST gap
        None => tz.from_utc_datetime(&naive).with_timezone(&Utc),
    }
}

fn tz_label<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    instant.with_timezone(tz).offset().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_quarter_of_mid_may() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let period = RewardPeriodType::Quarter.period_of(&tz, utc(2024, 5, 15, 12));
        assert_eq!(period.start, utc(2024, 4, 1, 0));
        assert_eq!(period.end, utc(2024, 7, 1, 0));
    }

    #[test]
    fn test_week_is_monday_to_monday() {
        let tz = FixedOffset::east_opt(0).unwrap();
        // 2024-05-15 is a Wednesday
        let period = RewardPeriodType::Week.period_of(&tz, utc(2024, 5, 15, 9));
        assert_eq!(period.start, utc(2024, 5, 13, 0));
        assert_eq!(period.end, utc(2024, 5, 20, 0));

        let same = RewardPeriodType::Week.period_of(&tz, utc(2024, 5, 19, 23));
        assert_eq!(period, same);
    }

    #[test]
    fn test_week_boundary_belongs_to_new_period() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let boundary = utc(2024, 5, 20, 0);
        let period = RewardPeriodType::Week.period_of(&tz, boundary);
        assert_eq!(period.start, boundary);
        assert!(period.contains(boundary));

        let before = RewardPeriodType::Week.period_of(&tz, boundary - Duration::seconds(1));
        assert_eq!(before.end, boundary);
        assert!(!before.contains(boundary));
    }

    #[test]
    fn test_month_semester_year() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let instant = utc(2023, 11, 30, 18);

        let month = RewardPeriodType::Month.period_of(&tz, instant);
        assert_eq!((month.start, month.end), (utc(2023, 11, 1, 0), utc(2023, 12, 1, 0)));

        let semester = RewardPeriodType::Semester.period_of(&tz, instant);
        assert_eq!(
            (semester.start, semester.end),
            (utc(2023, 7, 1, 0), utc(2024, 1, 1, 0))
        );

        let year = RewardPeriodType::Year.period_of(&tz, instant);
        assert_eq!((year.start, year.end), (utc(2023, 1, 1, 0), utc(2024, 1, 1, 0)));
    }

    #[test]
    fn test_zone_shifts_boundaries() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        // 23:00 UTC on Jun 30 is already July 1st in +02:00
        let period = RewardPeriodType::Month.period_of(&tz, utc(2024, 6, 30, 23));
        assert_eq!(period.start, utc(2024, 6, 30, 22));
        assert_eq!(period.end, utc(2024, 7, 31, 22));
        assert_eq!(period.time_zone, "+02:00");
    }

    #[test]
    fn test_period_is_pure() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let instant = utc(2024, 2, 29, 3);
        let a = RewardPeriodType::Quarter.period_of(&tz, instant);
        let b = RewardPeriodType::Quarter.period_of(&tz, instant);
        assert_eq!(a, b);
        assert!(a.contains(instant));
        assert!(a.median_seconds() > a.start_seconds());
        assert!(a.median_seconds() < a.end_seconds());
    }

    fn offset_of(zone: RewardTimeZone) -> i32 {
        match zone {
            RewardTimeZone::Fixed(offset) => offset.local_minus_utc(),
            RewardTimeZone::Named(tz) => panic!("expected a fixed offset, got {}", tz),
        }
    }

    #[test]
    fn test_parse_time_zone() {
        assert_eq!(offset_of(parse_time_zone("UTC").unwrap()), 0);
        assert_eq!(offset_of(parse_time_zone("+02:00").unwrap()), 7200);
        assert_eq!(offset_of(parse_time_zone("-0530").unwrap()), -19800);
        assert_eq!(offset_of(parse_time_zone("UTC+1").unwrap()), 3600);
        assert_eq!(
            parse_time_zone("Europe/Paris").unwrap(),
            RewardTimeZone::Named(chrono_tz::Europe::Paris)
        );
        assert!(parse_time_zone("+25:00").is_err());
        assert!(parse_time_zone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_named_zone_follows_daylight_saving() {
        let paris = parse_time_zone("Europe/Paris").unwrap();
        // Paris is on +01:00 in March and on +02:00 from the last Sunday of March
        let march = paris.period_of(RewardPeriodType::Month, utc(2024, 3, 15, 12));
        assert_eq!(march.start, utc(2024, 2, 29, 23));
        assert_eq!(march.end, utc(2024, 3, 31, 22));
        assert_eq!(march.time_zone, "Europe/Paris");

        let april = paris.period_of(RewardPeriodType::Month, march.end);
        assert_eq!(april.start, march.end);
        assert_eq!(
            paris.midnight_of(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
            utc(2024, 3, 31, 22)
        );
    }

    #[test]
    fn test_period_type_parsing() {
        use std::str::FromStr;
        assert_eq!(
            RewardPeriodType::from_str("quarter").unwrap(),
            RewardPeriodType::Quarter
        );
        assert_eq!(RewardPeriodType::Semester.to_string(), "SEMESTER");
        assert!(RewardPeriodType::from_str("DAY").is_err());
    }
}
