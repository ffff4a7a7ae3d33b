//! Attendance records and the append-only CSV log.
//!
//! The log has the columns `Name,Time,Status`. The header is written exactly
//! once, when the file is first created (or found empty); every later append
//! writes a single data row.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STATUS_PRESENT: &str = "Present";
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const LOG_HEADER: [&str; 3] = ["Name", "Time", "Status"];

#[derive(Error, Debug)]
pub enum LogError {
    #[error("attendance log io ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One row of the attendance log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub name: String,
    pub timestamp: NaiveDateTime,
    pub status: String,
}

impl AttendanceRecord {
    pub fn present(name: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            timestamp,
            status: STATUS_PRESENT.to_string(),
        }
    }

    pub fn time_string(&self) -> String {
        self.timestamp.format(TIME_FORMAT).to_string()
    }

    fn to_csv_row(&self) -> String {
        let time = self.time_string();
        csv_row(&[self.name.as_str(), time.as_str(), self.status.as_str()])
    }
}

/// Destination for attendance records.
pub trait AttendanceSink {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), LogError>;
}

impl AttendanceSink for Vec<AttendanceRecord> {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), LogError> {
        self.push(record.clone());
        Ok(())
    }
}

/// CSV attendance log on disk.
#[derive(Debug, Clone)]
pub struct AttendanceLog {
    path: PathBuf,
}

impl AttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> LogError {
        LogError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Read every well-formed record in the log. A missing log is empty.
    pub fn read_records(&self) -> Result<Vec<AttendanceRecord>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;

        let mut records = Vec::new();
        for (row_no, row) in parse_csv(&content).into_iter().enumerate() {
            if row_no == 0 && row == LOG_HEADER {
                continue;
            }
            match row.as_slice() {
                [name, time, status] => match NaiveDateTime::parse_from_str(time, TIME_FORMAT) {
                    Ok(timestamp) => records.push(AttendanceRecord {
                        name: name.clone(),
                        timestamp,
                        status: status.clone(),
                    }),
                    Err(e) => tracing::warn!(row = row_no, error = %e, "skipping log row with bad time"),
                },
                _ => tracing::warn!(row = row_no, fields = row.len(), "skipping malformed log row"),
            }
        }
        Ok(records)
    }

    /// Names already marked present on `date`.
    pub fn names_on(&self, date: NaiveDate) -> Result<HashSet<String>, LogError> {
        Ok(self
            .read_records()?
            .into_iter()
            .filter(|r| r.timestamp.date() == date && r.status == STATUS_PRESENT)
            .map(|r| r.name)
            .collect())
    }
}

impl AttendanceSink for AttendanceLog {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;

        let len = file.metadata().map_err(|e| self.io_err(e))?.len();
        let fresh = len == 0;

        let mut out = String::new();
        if fresh {
            out.push_str(&csv_row(&LOG_HEADER));
        } else if !ends_with_newline(&mut file).map_err(|e| self.io_err(e))? {
            out.push('\n');
        }
        out.push_str(&record.to_csv_row());

        file.write_all(out.as_bytes()).map_err(|e| self.io_err(e))?;
        file.flush().map_err(|e| self.io_err(e))?;

        tracing::debug!(path = %self.path.display(), header = fresh, "appended attendance row");
        Ok(())
    }
}

/// Whether a non-empty file's last byte is a line feed.
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_row(fields: &[&str]) -> String {
    let mut row = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
    row.push('\n');
    row
}

/// Split CSV text into rows of fields, honoring double-quoted fields.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => quoted = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_fresh_log_gets_header_then_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::new(dir.path().join("Attendance_Log.csv"));

        log.append(&AttendanceRecord::present("Alice", at(9, 15))).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "Name,Time,Status\nAlice,2024-03-05 09:15:00,Present\n");
    }

    #[test]
    fn test_existing_log_gets_no_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "Name,Time,Status\nBob,2024-03-04 08:00:00,Present\n").unwrap();

        let mut log = AttendanceLog::new(&path);
        log.append(&AttendanceRecord::present("Alice", at(9, 15))).unwrap();
        log.append(&AttendanceRecord::present("Carol", at(9, 20))).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("Name,Time,Status").count(), 1);
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_fresh_and_existing_converge() {
        let dir = tempfile::tempdir().unwrap();
        let fresh_path = dir.path().join("fresh.csv");
        let existing_path = dir.path().join("existing.csv");

        let mut fresh = AttendanceLog::new(&fresh_path);
        fresh.append(&AttendanceRecord::present("Alice", at(9, 0))).unwrap();

        fs::write(&existing_path, "Name,Time,Status\n").unwrap();
        let mut existing = AttendanceLog::new(&existing_path);
        existing.append(&AttendanceRecord::present("Alice", at(9, 0))).unwrap();

        assert_eq!(
            fs::read_to_string(&fresh_path).unwrap(),
            fs::read_to_string(&existing_path).unwrap()
        );
    }

    #[test]
    fn test_empty_file_treated_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "").unwrap();

        let mut log = AttendanceLog::new(&path);
        log.append(&AttendanceRecord::present("Dan", at(10, 0))).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("Name,Time,Status\n"));
    }

    #[test]
    fn test_quoting_round_trips_through_reader() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::new(dir.path().join("q.csv"));
        log.append(&AttendanceRecord::present("Doe, \"JD\" Jane", at(11, 30))).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("\"Doe, \"\"JD\"\" Jane\""));

        let records = log.read_records().unwrap();
        assert_eq!(records, vec![AttendanceRecord::present("Doe, \"JD\" Jane", at(11, 30))]);
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AttendanceLog::new(dir.path().join("none.csv"));
        assert!(log.read_records().unwrap().is_empty());
    }

    #[test]
    fn test_names_on_filters_by_date_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(
            &path,
            "Name,Time,Status\n\
             Alice,2024-03-05 09:00:00,Present\n\
             Bob,2024-03-04 09:00:00,Present\n\
             Carol,not a time,Present\n\
             broken row\n\
             Dan,2024-03-05 17:45:10,Present\n",
        )
        .unwrap();

        let log = AttendanceLog::new(&path);
        let names = log.names_on(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()).unwrap();
        let mut names: Vec<_> = names.into_iter().collect();
        names.sort();
        assert_eq!(names, vec!["Alice".to_string(), "Dan".to_string()]);
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<AttendanceRecord> = Vec::new();
        AttendanceSink::append(&mut sink, &AttendanceRecord::present("Alice", at(9, 0))).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].status, STATUS_PRESENT);
    }

    #[test]
    fn test_append_terminates_unfinished_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Attendance_Log.csv");
        fs::write(&path, "Name,Time,Status\nBob,2024-03-04 08:00:00,Present").unwrap();

        let mut log = AttendanceLog::new(&path);
        log.append(&AttendanceRecord::present("Alice", at(9, 0))).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "Name,Time,Status\nBob,2024-03-04 08:00:00,Present\nAlice,2024-03-05 09:00:00,Present\n"
        );
        let names: Vec<_> = log.read_records().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Bob", "Alice"]);
    }
}
