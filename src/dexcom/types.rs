use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Length of the window the readings query covers, ending at the last
/// reading the data range reports.
pub const QUERY_WINDOW: TimeDelta = TimeDelta::hours(2);

const QUERY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse an API `systemTime`. Values come both with and without an offset
/// and fractional seconds. Values without an offset are UTC.
pub fn parse_system_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc()))
}

/// Response of `GET /v2/users/self/dataRange`. Only the glucose range is of
/// interest.
#[derive(Debug, Clone, Deserialize)]
pub struct DataRange {
    /// Range of glucose readings. Absent when the user has no readings.
    pub egvs: Option<TimeRange>,
}

/// First and last moment of a data range.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeRange {
    /// The most recent moment covered.
    pub end: RangeMoment,
}

/// A moment in a [`TimeRange`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeMoment {
    /// Device-independent UTC time.
    pub system_time: String,
}

/// Response of `GET /v3/users/self/egvs`.
#[derive(Debug, Clone, Deserialize)]
pub struct EgvsResponse {
    /// Readings in the requested window, newest first.
    pub records: Vec<EgvRecord>,
}

/// A single glucose record as returned by the API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgvRecord {
    /// Glucose value. Null for readings the sensor could not quantify.
    pub value: Option<i64>,
    /// When the reading was taken.
    pub system_time: String,
}

/// A glucose reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reading {
    /// Glucose value in mg/dL.
    pub value: i64,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

/// The `[start, end]` window of a readings query, both at whole-second
/// precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl QueryWindow {
    /// The [`QUERY_WINDOW`] long window ending at `end`. Fractional seconds
    /// of `end` are dropped.
    pub fn ending_at(end: DateTime<Utc>) -> Self {
        let end = end.trunc_subsecs(0);
        Self {
            start: end - QUERY_WINDOW,
            end,
        }
    }

    /// Start of the window.
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End of the window.
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// The `startDate` and `endDate` query parameters.
    pub fn query_params(&self) -> [(&'static str, String); 2] {
        [
            ("startDate", self.start.format(QUERY_FORMAT).to_string()),
            ("endDate", self.end.format(QUERY_FORMAT).to_string()),
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_system_time_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 15).unwrap();

        assert_eq!(parse_system_time("2024-03-01T12:30:15").unwrap(), expected);
        assert_eq!(parse_system_time("2024-03-01T12:30:15Z").unwrap(), expected);
        assert_eq!(
            parse_system_time("2024-03-01T14:30:15+02:00").unwrap(),
            expected
        );
        assert_eq!(
            parse_system_time("2024-03-01T12:30:15.250")
                .unwrap()
                .trunc_subsecs(0),
            expected
        );
        assert!(parse_system_time("yesterday").is_err());
    }

    #[test]
    fn window_is_two_hours_without_fractions() {
        let end = parse_system_time("2024-03-01T12:30:15.999Z").unwrap();
        let window = QueryWindow::ending_at(end);

        assert_eq!(window.end() - window.start(), TimeDelta::seconds(7200));
        assert_eq!(
            window.query_params(),
            [
                ("startDate", "2024-03-01T10:30:15".to_string()),
                ("endDate", "2024-03-01T12:30:15".to_string()),
            ]
        );
    }

    #[test]
    fn window_crosses_midnight() {
        let end = parse_system_time("2024-03-01T01:00:00").unwrap();
        let [(_, start), _] = QueryWindow::ending_at(end).query_params();
        assert_eq!(start, "2024-02-29T23:00:00");
    }

    #[test]
    fn data_range_without_egvs() {
        let range: DataRange = serde_json::from_str(r#"{ "egvs": null }"#).unwrap();
        assert!(range.egvs.is_none());

        let range: DataRange = serde_json::from_str(
            r#"{
                "calibrations": null,
                "egvs": {
                    "start": { "systemTime": "2024-02-01T00:00:00", "displayTime": "2024-02-01T01:00:00" },
                    "end": { "systemTime": "2024-03-01T12:30:15", "displayTime": "2024-03-01T13:30:15" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(range.egvs.unwrap().end.system_time, "2024-03-01T12:30:15");
    }
}
