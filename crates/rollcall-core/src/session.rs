//! Attendance session: matching plus first-seen deduplication.
//!
//! A session owns the descriptor table, the matcher and threshold, the set of
//! names already credited, and the sink new records are written to. Each
//! accepted identity produces at most one record per session.

use crate::attendance::{AttendanceLog, AttendanceRecord, AttendanceSink, LogError};
use crate::table::DescriptorTable;
use crate::types::{BoundingBox, Descriptor, EuclideanMatcher, Matcher};
use crate::vision::Detection;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("attendance log: {0}")]
    Log(#[from] LogError),
}

/// How long a name stays credited once marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// Only within the current process run.
    #[default]
    Session,
    /// For the calendar day: the seen-set is seeded from today's log rows.
    ///
    /// A run left going past midnight starts the new day with an empty seen-set.
    Day,
}

impl std::str::FromStr for DedupScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "day" => Ok(Self::Day),
            other => Err(format!("unknown dedup scope {other:?} (expected \"session\" or \"day\")")),
        }
    }
}

/// Outcome of observing one face descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// First sighting this session; a record was appended.
    Marked { record: AttendanceRecord, distance: f32 },
    /// Recognized, but already credited.
    AlreadyMarked { name: String, distance: f32 },
    /// No table entry within the threshold. `nearest` is absent for an empty table.
    Unknown { nearest: Option<f32> },
}

impl Recognition {
    pub fn name(&self) -> Option<&str> {
        match self {
            Recognition::Marked { record, .. } => Some(&record.name),
            Recognition::AlreadyMarked { name, .. } => Some(name),
            Recognition::Unknown { .. } => None,
        }
    }

    pub fn label(&self) -> &str {
        self.name().unwrap_or("Unknown")
    }
}

/// Recognition outcome for one located face in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutcome {
    pub face: BoundingBox,
    pub recognition: Recognition,
}

pub struct AttendanceSession<S, M = EuclideanMatcher> {
    table: DescriptorTable,
    matcher: M,
    threshold: f32,
    seen: HashSet<String>,
    /// Set when the seen-set is tied to a calendar day.
    day: Option<NaiveDate>,
    sink: S,
}

impl<S: AttendanceSink> AttendanceSession<S, EuclideanMatcher> {
    pub fn new(table: DescriptorTable, threshold: f32, sink: S) -> Self {
        Self::with_matcher(table, EuclideanMatcher, threshold, sink)
    }
}

impl<S: AttendanceSink, M: Matcher> AttendanceSession<S, M> {
    pub fn with_matcher(table: DescriptorTable, matcher: M, threshold: f32, sink: S) -> Self {
        if table.is_empty() {
            tracing::warn!("no known face descriptors loaded; all faces will be reported as Unknown");
        }
        Self {
            table,
            matcher,
            threshold,
            seen: HashSet::new(),
            day: None,
            sink,
        }
    }

    pub fn table(&self) -> &DescriptorTable {
        &self.table
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    pub fn marked_count(&self) -> usize {
        self.seen.len()
    }

    /// Names credited so far, sorted.
    pub fn marked_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.seen.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Pre-credit names without writing records.
    pub fn seed_seen<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.seen.extend(names);
    }

    /// Pre-credit everyone the log already shows present on `date`.
    ///
    /// The seen-set then belongs to `date`: the first observation on a later
    /// date clears it.
    pub fn seed_from_log(&mut self, log: &AttendanceLog, date: NaiveDate) -> Result<usize, SessionError> {
        let names = log.names_on(date)?;
        let count = names.len();
        self.seed_seen(names);
        self.day = Some(date);
        tracing::info!(count, %date, "seeded seen-set from attendance log");
        Ok(count)
    }

    /// Observe one descriptor at wall-clock time `now`.
    ///
    /// A new identity is appended to the sink before it enters the seen-set;
    /// if the append fails the identity stays unmarked.
    ///
    /// A descriptor that is not [well formed](Descriptor::is_well_formed) is
    /// never matched and reports `Unknown` with no nearest distance.
    pub fn observe_at(&mut self, descriptor: &Descriptor, now: NaiveDateTime) -> Result<Recognition, SessionError> {
        if !descriptor.is_well_formed() {
            tracing::warn!(len = descriptor.len(), "malformed descriptor ignored");
            return Ok(Recognition::Unknown { nearest: None });
        }

        self.roll_day(now.date());

        let result = self.matcher.compare(descriptor, &self.table, self.threshold);

        let (Some(name), Some(candidate)) = (result.name, result.candidate) else {
            return Ok(Recognition::Unknown {
                nearest: result.candidate.map(|c| c.distance),
            });
        };

        if self.seen.contains(&name) {
            return Ok(Recognition::AlreadyMarked {
                name,
                distance: candidate.distance,
            });
        }

        let record = AttendanceRecord::present(name, now);
        self.sink.append(&record)?;
        self.seen.insert(record.name.clone());

        tracing::info!(
            name = %record.name,
            time = %record.time_string(),
            distance = candidate.distance,
            "marked present"
        );

        Ok(Recognition::Marked {
            record,
            distance: candidate.distance,
        })
    }

    fn roll_day(&mut self, today: NaiveDate) {
        match self.day {
            Some(day) if day != today => {
                tracing::info!(from = %day, to = %today, cleared = self.seen.len(), "new day; attendance reset");
                self.seen.clear();
                self.day = Some(today);
            }
            _ => {}
        }
    }

    pub fn observe(&mut self, descriptor: &Descriptor) -> Result<Recognition, SessionError> {
        self.observe_at(descriptor, chrono::Local::now().naive_local())
    }

    /// Observe every face of one frame. Faces without a well-formed descriptor
    /// are skipped.
    pub fn observe_frame_at(
        &mut self,
        detections: &[Detection],
        now: NaiveDateTime,
    ) -> Result<Vec<FaceOutcome>, SessionError> {
        let mut outcomes = Vec::with_capacity(detections.len());
        for detection in detections {
            let Some(descriptor) = detection.descriptor.as_ref().filter(|d| d.is_well_formed()) else {
                tracing::trace!(x = detection.face.x, y = detection.face.y, "face without usable descriptor skipped");
                continue;
            };
            let recognition = self.observe_at(descriptor, now)?;
            outcomes.push(FaceOutcome {
                face: detection.face,
                recognition,
            });
        }
        Ok(outcomes)
    }

    pub fn observe_frame(&mut self, detections: &[Detection]) -> Result<Vec<FaceOutcome>, SessionError> {
        self.observe_frame_at(detections, chrono::Local::now().naive_local())
    }
}
