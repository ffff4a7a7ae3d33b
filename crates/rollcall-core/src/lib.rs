//! rollcall-core — face attendance decision logic.
//!
//! Nearest-neighbor matching of face descriptors against a persisted table,
//! per-session first-seen attendance logging, and the enrollment and
//! table-building pipelines. Face location and descriptor computation are
//! consumed through the [`FaceLocator`] and [`FaceEncoder`] traits.

pub mod attendance;
pub mod builder;
pub mod capture;
pub mod engine;
pub mod enroll;
pub mod sample;
pub mod session;
pub mod table;
pub mod types;
pub mod vision;

pub use attendance::{AttendanceLog, AttendanceRecord, AttendanceSink};
pub use capture::{Backoff, FrameSource};
pub use sample::{Identity, SampleName};
pub use session::{AttendanceSession, DedupScope, FaceOutcome, Recognition};
pub use table::DescriptorTable;
pub use types::{
    BoundingBox, Candidate, Descriptor, EuclideanMatcher, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD,
    DESCRIPTOR_DIM,
};
pub use vision::{Detection, FaceEncoder, FaceLocator, VisionError};
