//! Live recognition loop: one frame at a time, until stopped.

use crate::attendance::AttendanceSink;
use crate::capture::{read_frame, Backoff, FrameSource};
use crate::session::{AttendanceSession, FaceOutcome, SessionError};
use crate::types::Matcher;
use crate::vision::{detect_and_encode, FaceEncoder, FaceLocator, VisionError};
use std::sync::atomic::AtomicBool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("vision: {0}")]
    Vision(#[from] VisionError),
    #[error("session: {0}")]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub faces: u64,
    pub unknown: u64,
}

/// Run recognition until `stop` is set.
///
/// Each iteration reads a frame (retrying failed reads), locates and encodes
/// faces, and feeds them to the session. `on_frame` sees the outcomes of every
/// frame that had at least one encodable face. Locator, encoder and log
/// failures end the loop with an error.
pub fn run_attendance<F, S, M>(
    source: &mut F,
    locator: &mut dyn FaceLocator,
    encoder: &mut dyn FaceEncoder,
    session: &mut AttendanceSession<S, M>,
    stop: &AtomicBool,
    mut on_frame: impl FnMut(&[FaceOutcome]),
) -> Result<RunSummary, EngineError>
where
    F: FrameSource,
    S: AttendanceSink,
    M: Matcher,
{
    let mut backoff = Backoff::default();
    let mut summary = RunSummary::default();

    while let Some(frame) = read_frame(source, &mut backoff, stop) {
        summary.frames += 1;

        let detections = detect_and_encode(locator, encoder, &frame)?;
        if detections.is_empty() {
            continue;
        }

        let outcomes = session.observe_frame(&detections)?;
        summary.faces += outcomes.len() as u64;
        summary.unknown += outcomes.iter().filter(|o| o.recognition.name().is_none()).count() as u64;

        if !outcomes.is_empty() {
            on_frame(&outcomes);
        }
    }

    tracing::info!(
        frames = summary.frames,
        faces = summary.faces,
        marked = session.marked_count(),
        "recognition loop stopped"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceRecord;
    use crate::capture::fakes::ScriptedFrames;
    use crate::session::Recognition;
    use crate::table::DescriptorTable;
    use crate::types::{Descriptor, DEFAULT_MATCH_THRESHOLD, DESCRIPTOR_DIM};
    use crate::vision::fakes::{face_at, ScriptedLocator, XEncoder};
    use image::GrayImage;

    struct BrokenLocator;

    impl FaceLocator for BrokenLocator {
        fn locate(&mut self, _image: &GrayImage) -> Result<Vec<crate::BoundingBox>, VisionError> {
            Err(VisionError::Inference("detector crashed".into()))
        }
    }

    fn table() -> DescriptorTable {
        // XEncoder puts the box x into value 0, so x = 0.1 lands near Alice.
        let mut t = DescriptorTable::default();
        t.push("Alice", Descriptor::zeros());
        t.push("Bob", Descriptor::new(vec![10.0; DESCRIPTOR_DIM]));
        t
    }

    #[test]
    fn test_loop_marks_each_identity_once() {
        let stop = AtomicBool::new(false);
        let mut frames = ScriptedFrames::frames(4, &stop);
        let mut locator = ScriptedLocator::new(vec![
            vec![face_at(0.1, 50.0)],
            vec![face_at(0.1, 50.0), face_at(-1.0, 50.0)],
            vec![],
            vec![face_at(5.0, 50.0)],
        ]);
        let mut session = AttendanceSession::new(table(), DEFAULT_MATCH_THRESHOLD, Vec::<AttendanceRecord>::new());

        let mut seen_labels = Vec::new();
        let summary = run_attendance(&mut frames, &mut locator, &mut XEncoder, &mut session, &stop, |outcomes| {
            seen_labels.extend(outcomes.iter().map(|o| o.recognition.label().to_string()));
        })
        .unwrap();

        assert_eq!(summary, RunSummary { frames: 4, faces: 3, unknown: 1 });
        assert_eq!(seen_labels, vec!["Alice", "Alice", "Unknown"]);
        assert_eq!(session.sink().len(), 1);
        assert_eq!(session.sink()[0].name, "Alice");
    }

    #[test]
    fn test_loop_with_empty_table_never_records() {
        let stop = AtomicBool::new(false);
        let mut frames = ScriptedFrames::frames(2, &stop);
        let mut locator = ScriptedLocator::new(vec![vec![face_at(0.0, 50.0)], vec![face_at(0.0, 50.0)]]);
        let mut session =
            AttendanceSession::new(DescriptorTable::default(), DEFAULT_MATCH_THRESHOLD, Vec::<AttendanceRecord>::new());

        let mut outcomes_seen = Vec::new();
        run_attendance(&mut frames, &mut locator, &mut XEncoder, &mut session, &stop, |o| {
            outcomes_seen.extend(o.iter().map(|o| o.recognition.clone()));
        })
        .unwrap();

        assert!(session.sink().is_empty());
        assert!(outcomes_seen.iter().all(|r| *r == Recognition::Unknown { nearest: None }));
    }

    #[test]
    fn test_loop_surfaces_locator_failure() {
        let stop = AtomicBool::new(false);
        let mut frames = ScriptedFrames::frames(1, &stop);
        let mut session = AttendanceSession::new(table(), DEFAULT_MATCH_THRESHOLD, Vec::<AttendanceRecord>::new());

        let err = run_attendance(&mut frames, &mut BrokenLocator, &mut XEncoder, &mut session, &stop, |_| {})
            .unwrap_err();
        assert!(matches!(err, EngineError::Vision(VisionError::Inference(_))));
    }

    #[test]
    fn test_loop_exits_immediately_when_stopped() {
        let stop = AtomicBool::new(true);
        let mut frames = ScriptedFrames::frames(3, &stop);
        let mut locator = ScriptedLocator::default();
        let mut session = AttendanceSession::new(table(), DEFAULT_MATCH_THRESHOLD, Vec::<AttendanceRecord>::new());

        let summary =
            run_attendance(&mut frames, &mut locator, &mut XEncoder, &mut session, &stop, |_| {}).unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(locator.calls, 0);
    }
}
