//! CSV export of attendance records.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::AttendanceRecord;
use crate::error::{Error, Result};

pub const CSV_HEADER: [&str; 4] = ["User ID", "Name", "Date", "Time"];

const DATE_FORMAT: &str = "%-m/%-d/%Y";
const TIME_FORMAT: &str = "%-I:%M:%S %p";

pub fn export_file_name(from_date: &str, to_date: &str) -> String {
    format!("attendance_{}_to_{}.csv", from_date, to_date)
}

/// Split a server timestamp into display date and time in `tz`.
/// Timestamps without an offset are taken as wall-clock time in `tz`.
/// Unparseable timestamps are passed through as the date.
pub fn local_date_time<Tz: TimeZone>(timestamp: &str, tz: &Tz) -> (String, String)
where
    Tz::Offset: std::fmt::Display,
{
    let parsed = DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(tz))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(timestamp, fmt).ok())
                .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        });

    match parsed {
        Some(dt) => (dt.format(DATE_FORMAT).to_string(), dt.format(TIME_FORMAT).to_string()),
        None => (timestamp.to_string(), String::new()),
    }
}

/// Render records as CSV. Fields containing separators, quotes or line
/// breaks are quoted, so every row keeps exactly four columns.
pub fn to_csv<Tz: TimeZone>(records: &[AttendanceRecord], tz: &Tz) -> Result<String>
where
    Tz::Offset: std::fmt::Display,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for record in records {
        let (date, time) = local_date_time(&record.timestamp, tz);
        writer
            .write_record([record.user_id.as_str(), record.name.as_str(), date.as_str(), time.as_str()])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    String::from_utf8(bytes).map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

/// Write the report into `dir` under its conventional file name.
pub fn export_csv<Tz: TimeZone>(
    records: &[AttendanceRecord],
    tz: &Tz,
    from_date: &str,
    to_date: &str,
    dir: &Path,
) -> Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let content = to_csv(records, tz)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(from_date, to_date));
    fs::write(&path, content)?;
    info!("Exported {} attendance record(s) to {:?}", records.len(), path);
    Ok(path)
}

fn csv_error(e: csv::Error) -> Error {
    Error::Io(std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn record(user_id: &str, name: &str, timestamp: &str) -> AttendanceRecord {
        AttendanceRecord {
            id: 1,
            user_id: user_id.to_string(),
            name: name.to_string(),
            timestamp: timestamp.to_string(),
        }
    }

    fn columns(line: &str) -> usize {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes())
            .records()
            .next()
            .unwrap()
            .unwrap()
            .len()
    }

    #[test]
    fn embedded_comma_keeps_column_count() {
        let csv = to_csv(&[record("u1,", "Bob", "2024-01-01T10:00:00Z")], &Utc).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "User ID,Name,Date,Time");
        assert_eq!(lines[1], "\"u1,\",Bob,1/1/2024,10:00:00 AM");
        assert_eq!(columns(lines[1]), 4);
    }

    #[test]
    fn quotes_and_newlines_are_escaped() {
        let csv = to_csv(&[record("u2", "Ann \"Jo\"\nSmith", "2024-03-05T18:30:15Z")], &Utc).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[1], "Ann \"Jo\"\nSmith");
        assert_eq!(&row[2], "3/5/2024");
        assert_eq!(&row[3], "6:30:15 PM");
    }

    #[test]
    fn converts_into_target_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            local_date_time("2024-12-31T23:30:00Z", &tz),
            ("1/1/2025".to_string(), "1:30:00 AM".to_string())
        );
        assert_eq!(
            local_date_time("2024-06-01 08:05:09", &tz),
            ("6/1/2024".to_string(), "8:05:09 AM".to_string())
        );
        assert_eq!(local_date_time("yesterday", &tz), ("yesterday".to_string(), String::new()));
    }

    #[test]
    fn writes_conventionally_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = export_csv(
            &[record("u1", "Bob", "2024-01-01T10:00:00Z")],
            &Utc,
            "2024-01-01",
            "2024-01-31",
            dir.path(),
        )
        .unwrap();

        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("attendance_2024-01-01_to_2024-01-31.csv"));
        assert_eq!(fs::read_to_string(path).unwrap().lines().count(), 2);
    }
}
