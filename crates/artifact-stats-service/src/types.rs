//! Values that flow through the caches and out of the service.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::caching::CacheError;

/// A calendar month, written as `yyyy-MM`.
///
/// Statistics are only ever requested with month granularity, so the start of a query window
/// is a [`YearMonth`] and not a full date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// July 2019, when the first statistics were collected.
    pub const STATS_EPOCH: Self = Self {
        year: 2019,
        month: 7,
    };

    /// Creates a new [`YearMonth`], `month` being 1-based.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// The month containing the given instant.
    pub fn of(instant: DateTime<Utc>) -> Self {
        Self {
            year: instant.year(),
            month: instant.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Number of whole months from `self` up to `other`.
    ///
    /// Negative if `other` lies before `self`.
    pub fn months_until(&self, other: YearMonth) -> i64 {
        (i64::from(other.year) - i64::from(self.year)) * 12 + i64::from(other.month)
            - i64::from(self.month)
    }

    /// The compact `yyyyMM` form used by the statistics API.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// The first day of this month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CacheError::InvalidQuery(format!("'{s}' is not a valid yyyy-MM period"));

        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Download statistics of a single artifact, as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub group_id: String,
    pub artifact_id: String,
    pub total: i64,
    /// One slot per month of the requested window, oldest first.
    pub timeline: Vec<i64>,
}

impl StatsPayload {
    /// The most recent month of the timeline.
    pub fn trailing_value(&self) -> Option<i64> {
        self.timeline.last().copied()
    }
}

/// The merged statistics of every artifact a query matched.
///
/// Leading months in which none of the artifacts had a single download are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub total_downloads: i64,
    pub downloads_for_month: Vec<Option<i64>>,
}

/// The most recent release of an artifact, if the upstream knows of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestRelease(pub Option<String>);

/// One row of the project catalog: `[group:artifact, alias, color, site]`.
pub type ProjectInfo = [String; 4];

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_year_month() {
        let period: YearMonth = "2019-07".parse().unwrap();
        assert_eq!(period, YearMonth::new(2019, 7).unwrap());
        assert_eq!(period.to_string(), "2019-07");
        assert_eq!(period.compact(), "201907");

        assert!("2019-13".parse::<YearMonth>().is_err());
        assert!("2019".parse::<YearMonth>().is_err());
        assert!("19-07".parse::<YearMonth>().is_err());
        assert!(matches!(
            "garbage".parse::<YearMonth>(),
            Err(CacheError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_months_until() {
        let start = YearMonth::new(2019, 7).unwrap();
        let today = Utc.with_ymd_and_hms(2021, 3, 12, 10, 0, 0).unwrap();

        assert_eq!(start.months_until(YearMonth::of(today)), 20);
        assert_eq!(start.months_until(start), 0);
        assert_eq!(YearMonth::of(today).months_until(start), -20);
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let period = YearMonth::new(2020, 1).unwrap();
        let json = serde_json::to_string(&period).unwrap();
        assert_eq!(json, "\"2020-01\"");
        assert_eq!(serde_json::from_str::<YearMonth>(&json).unwrap(), period);
    }
}
