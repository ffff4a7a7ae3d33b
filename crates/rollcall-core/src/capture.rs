//! Frame acquisition with retry on transient read failures.

use image::GrayImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const READ_RETRY_INITIAL: Duration = Duration::from_millis(200);
const READ_RETRY_MAX: Duration = Duration::from_secs(2);

/// Anything that yields grayscale frames: a live camera or a test script.
pub trait FrameSource {
    type Error: std::fmt::Display;

    fn next_frame(&mut self) -> Result<GrayImage, Self::Error>;
}

/// Exponential backoff: doubles from `initial` up to `max`, reset on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns a longer one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(READ_RETRY_INITIAL, READ_RETRY_MAX)
    }
}

/// Read one frame, retrying failed reads until one succeeds or `stop` is set.
///
/// Returns `None` only when stopped.
pub fn read_frame<F: FrameSource>(
    source: &mut F,
    backoff: &mut Backoff,
    stop: &AtomicBool,
) -> Option<GrayImage> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match source.next_frame() {
            Ok(frame) => {
                backoff.reset();
                return Some(frame);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "failed to read frame; retrying");
                std::thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::VecDeque;

    /// Replays scripted reads; once exhausted, sets `stop_when_done` and fails.
    pub struct ScriptedFrames<'a> {
        pub reads: VecDeque<Result<GrayImage, String>>,
        pub stop_when_done: &'a AtomicBool,
    }

    impl<'a> ScriptedFrames<'a> {
        pub fn new(reads: Vec<Result<GrayImage, String>>, stop_when_done: &'a AtomicBool) -> Self {
            Self {
                reads: reads.into(),
                stop_when_done,
            }
        }

        pub fn frames(count: usize, stop_when_done: &'a AtomicBool) -> Self {
            Self::new((0..count).map(|_| Ok(GrayImage::new(64, 48))).collect(), stop_when_done)
        }
    }

    impl FrameSource for ScriptedFrames<'_> {
        type Error = String;

        fn next_frame(&mut self) -> Result<GrayImage, String> {
            match self.reads.pop_front() {
                Some(read) => read,
                None => {
                    self.stop_when_done.store(true, Ordering::Relaxed);
                    Err("script exhausted".into())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::ScriptedFrames;
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(200), Duration::from_secs(2));
        let delays: Vec<u128> = (0..6).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 2000, 2000]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut b = Backoff::default();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_read_frame_retries_transient_failure() {
        let stop = AtomicBool::new(false);
        let mut source = ScriptedFrames::new(
            vec![Err("busy".into()), Err("busy".into()), Ok(GrayImage::new(2, 2))],
            &stop,
        );
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2));

        let frame = read_frame(&mut source, &mut backoff, &stop).unwrap();
        assert_eq!(frame.dimensions(), (2, 2));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1), "success resets backoff");
    }

    #[test]
    fn test_read_frame_honors_stop() {
        let stop = AtomicBool::new(true);
        let mut source = ScriptedFrames::frames(1, &stop);
        assert!(read_frame(&mut source, &mut Backoff::default(), &stop).is_none());
        assert_eq!(source.reads.len(), 1, "no read after stop");
    }

    #[test]
    fn test_read_frame_stops_while_failing() {
        let stop = AtomicBool::new(false);
        let mut source = ScriptedFrames::new(vec![], &stop);
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1));
        assert!(read_frame(&mut source, &mut backoff, &stop).is_none());
    }
}
