//! The sign recording state machine.
//!
//! A [`SignRecorder`] is either idle or recording a gesture attempt. While recording, every frame
//! passed to [`SignRecorder::on_frame`] is converted to features and buffered. When the recording
//! ends (explicitly, or because the watchdog limit was reached), the buffered gesture is
//! classified and the result is kept as the current detection until the next recording starts.
//!
//! The recorder itself is owned by a single thread (the capture worker). Other threads observe it
//! through a [`RecorderHandle`], which only performs atomic reads.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::feature::FeatureExtractor;
use crate::landmark::LandmarkFrame;
use crate::library::SignLibrary;
use crate::matcher::{Label, MatchResult, SequenceMatcher};
use crate::sequence::RecordingBuffer;
use crate::timer::Timer;

/// Recording limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    max_duration_ms: u64,
    max_frames: Option<usize>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: 3000,
            max_frames: Some(150),
        }
    }
}

impl RecorderConfig {
    /// Sets the time after which a recording is stopped automatically.
    #[inline]
    pub fn max_duration(self, max_duration: Duration) -> Self {
        Self {
            max_duration_ms: max_duration.as_millis().try_into().unwrap_or(u64::MAX),
            ..self
        }
    }

    /// Sets the number of buffered frames after which a recording is stopped automatically.
    ///
    /// This bounds the time the matcher needs to classify a gesture.
    #[inline]
    pub fn max_frames(self, max_frames: Option<usize>) -> Self {
        Self { max_frames, ..self }
    }

    pub fn max_duration_limit(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn max_frames_limit(&self) -> Option<usize> {
        self.max_frames
    }
}

/// Whether a recording is in progress, and its buffer if so.
enum RecorderState {
    Idle,
    Recording {
        buffer: RecordingBuffer,
        started: Instant,
    },
}

/// The result of feeding a frame to the [`SignRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderUpdate {
    /// The classification, if the recording ended during this frame.
    pub detection: Option<MatchResult>,
    /// Whether the recorder is still recording after this frame.
    pub recording: bool,
}

/// Detection slot value: nothing classified in the current cycle.
const NO_DETECTION: usize = usize::MAX;
/// Detection slot value: the last gesture was not recognized.
const UNKNOWN: usize = usize::MAX - 1;

struct Shared {
    recording: AtomicBool,
    /// Library index of the detected sign, or one of the sentinels above.
    detection: AtomicUsize,
    /// Number of classifications published so far.
    detections: AtomicU64,
}

/// Cloneable, thread-safe read access to a [`SignRecorder`]'s state.
#[derive(Clone)]
pub struct RecorderHandle {
    shared: Arc<Shared>,
    library: Arc<SignLibrary>,
}

impl RecorderHandle {
    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    /// Returns the label of the last completed recording.
    ///
    /// Returns `None` before the first recording finished, and while a new recording is in
    /// progress.
    pub fn current_detection(&self) -> Option<Label> {
        match self.shared.detection.load(Ordering::Acquire) {
            NO_DETECTION => None,
            UNKNOWN => Some(Label::Unknown),
            index => self.library.label_at(index).cloned().map(Label::Sign),
        }
    }

    /// Returns the number of recordings that have been classified so far.
    pub fn detection_count(&self) -> u64 {
        self.shared.detections.load(Ordering::Acquire)
    }
}

/// The recording state machine.
pub struct SignRecorder {
    extractor: FeatureExtractor,
    matcher: SequenceMatcher,
    library: Arc<SignLibrary>,
    config: RecorderConfig,
    state: RecorderState,
    last_result: Option<MatchResult>,
    shared: Arc<Shared>,
}

impl SignRecorder {
    pub fn new(
        library: Arc<SignLibrary>,
        extractor: FeatureExtractor,
        matcher: SequenceMatcher,
        config: RecorderConfig,
    ) -> Self {
        match library.dimension() {
            Some(dim) if dim != extractor.dimension() => log::warn!(
                "reference library has {} features per frame, but the extractor produces {}; \
                 no sign will ever be recognized",
                dim,
                extractor.dimension(),
            ),
            None => log::warn!("reference library is empty; every gesture will be unknown"),
            _ => {}
        }

        Self {
            extractor,
            matcher,
            library,
            config,
            state: RecorderState::Idle,
            last_result: None,
            shared: Arc::new(Shared {
                recording: AtomicBool::new(false),
                detection: AtomicUsize::new(NO_DETECTION),
                detections: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a recorder with default features, matcher and limits.
    pub fn with_library(library: Arc<SignLibrary>) -> Self {
        Self::new(
            library,
            FeatureExtractor::default(),
            SequenceMatcher::default(),
            RecorderConfig::default(),
        )
    }

    pub fn library(&self) -> &Arc<SignLibrary> {
        &self.library
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn matcher(&self) -> &SequenceMatcher {
        &self.matcher
    }

    /// Returns a handle that other threads can use to observe this recorder.
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            shared: self.shared.clone(),
            library: self.library.clone(),
        }
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        self.extractor.timers().chain(self.matcher.timers())
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    /// Returns the label of the last completed recording, see
    /// [`RecorderHandle::current_detection`].
    pub fn current_detection(&self) -> Option<Label> {
        self.last_result.as_ref().map(|res| res.label().clone())
    }

    pub fn last_result(&self) -> Option<&MatchResult> {
        self.last_result.as_ref()
    }

    /// Number of frames buffered by the current recording (0 when idle).
    pub fn buffered_frames(&self) -> usize {
        match &self.state {
            RecorderState::Idle => 0,
            RecorderState::Recording { buffer, .. } => buffer.len(),
        }
    }

    /// Starts a new recording.
    ///
    /// Returns `false` and does nothing if a recording is already in progress. The current
    /// detection is cleared when a new recording starts.
    pub fn start_recording(&mut self) -> bool {
        if self.is_recording() {
            log::debug!("start_recording: already recording, ignoring");
            return false;
        }

        let capacity = self.config.max_frames.unwrap_or(0);
        self.state = RecorderState::Recording {
            buffer: RecordingBuffer::with_capacity(capacity),
            started: Instant::now(),
        };
        self.last_result = None;
        self.shared.detection.store(NO_DETECTION, Ordering::Release);
        self.shared.recording.store(true, Ordering::Release);
        log::debug!("recording started");
        true
    }

    /// Stops the current recording and classifies it.
    ///
    /// Returns `None` if no recording was in progress.
    pub fn stop_recording(&mut self) -> Option<MatchResult> {
        let RecorderState::Recording { buffer, started } =
            std::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return None;
        };
        self.shared.recording.store(false, Ordering::Release);

        let sequence = buffer.finish();
        log::debug!(
            "recording stopped after {} frames ({:.2?})",
            sequence.len(),
            started.elapsed(),
        );

        let result = self.matcher.match_sequence(&sequence, &self.library);
        self.publish(&result);
        self.last_result = Some(result.clone());
        Some(result)
    }

    /// Starts a recording when idle, stops it otherwise.
    ///
    /// Returns the classification if a recording was stopped.
    pub fn toggle_recording(&mut self) -> Option<MatchResult> {
        if self.is_recording() {
            self.stop_recording()
        } else {
            self.start_recording();
            None
        }
    }

    /// Processes the estimator result of the next video frame.
    ///
    /// While idle, the frame is ignored. While recording, its features are appended to the
    /// recording, and if that makes the recording reach its duration or frame limit, the
    /// recording is stopped and classified immediately.
    pub fn on_frame(&mut self, frame: &LandmarkFrame) -> RecorderUpdate {
        let RecorderState::Recording { buffer, .. } = &mut self.state else {
            return RecorderUpdate {
                detection: None,
                recording: false,
            };
        };
        buffer.push(self.extractor.extract(frame));
        log::trace!("buffered frame {}", buffer.len());

        let detection = self.poll_watchdog();
        RecorderUpdate {
            recording: detection.is_none(),
            detection,
        }
    }

    /// Stops the recording if it reached its duration or frame limit.
    ///
    /// This is checked by [`SignRecorder::on_frame`], but should also be called periodically when
    /// no frames are coming in, so that a recording can't stay open forever.
    pub fn poll_watchdog(&mut self) -> Option<MatchResult> {
        let RecorderState::Recording { buffer, started } = &self.state else {
            return None;
        };
        let timed_out = started.elapsed() >= self.config.max_duration_limit();
        let full = self.config.max_frames.map_or(false, |max| buffer.len() >= max);
        if !(timed_out || full) {
            return None;
        }

        log::debug!(
            "recording limit reached ({})",
            if full { "frames" } else { "duration" }
        );
        self.stop_recording()
    }

    /// Discards any recording in progress and forgets the current detection.
    pub fn reset(&mut self) {
        self.state = RecorderState::Idle;
        self.last_result = None;
        self.shared.recording.store(false, Ordering::Release);
        self.shared.detection.store(NO_DETECTION, Ordering::Release);
    }

    fn publish(&self, result: &MatchResult) {
        let slot = match result.label() {
            Label::Sign(label) => self.library.index_of(label).unwrap_or(UNKNOWN),
            Label::Unknown => UNKNOWN,
        };
        self.shared.detection.store(slot, Ordering::Release);
        self.shared.detections.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::library::ReferenceSign;
    use crate::sequence::GestureSequence;
    use crate::test::gesture;

    fn wave() -> Vec<LandmarkFrame> {
        gesture((0..12).map(|i| (i as f32 * 0.6).sin()))
    }

    fn curl() -> Vec<LandmarkFrame> {
        gesture((0..12).map(|i| -(i as f32) * 0.25))
    }

    fn recorder(config: RecorderConfig) -> SignRecorder {
        let extractor = FeatureExtractor::default();
        let template = |frames: Vec<LandmarkFrame>| -> GestureSequence {
            frames.iter().map(|f| extractor.extract(f)).collect()
        };
        let library = SignLibrary::from_signs([
            ReferenceSign::new("wave", vec![template(wave())]),
            ReferenceSign::new("curl", vec![template(curl())]),
        ]);
        SignRecorder::new(
            Arc::new(library),
            extractor,
            SequenceMatcher::default(),
            config,
        )
    }

    fn record(recorder: &mut SignRecorder, frames: &[LandmarkFrame]) -> Option<MatchResult> {
        recorder.start_recording();
        for frame in frames {
            let update = recorder.on_frame(frame);
            assert!(update.recording);
            assert_eq!(update.detection, None);
        }
        recorder.stop_recording()
    }

    #[test]
    fn idle_frames_are_ignored() {
        let mut recorder = recorder(RecorderConfig::default());
        let update = recorder.on_frame(&wave()[0]);
        assert_eq!(
            update,
            RecorderUpdate {
                detection: None,
                recording: false
            }
        );
        assert_eq!(recorder.buffered_frames(), 0);
        assert_eq!(recorder.current_detection(), None);
        assert_eq!(recorder.stop_recording(), None);
    }

    #[test]
    fn classifies_on_stop() {
        let mut recorder = recorder(RecorderConfig::default());
        let handle = recorder.handle();

        let result = record(&mut recorder, &wave()).unwrap();
        assert_eq!(result.label().sign(), Some("wave"));
        assert_eq!(handle.current_detection(), Some(Label::Sign("wave".into())));
        assert!(!handle.is_recording());

        let result = record(&mut recorder, &curl()).unwrap();
        assert_eq!(result.label().sign(), Some("curl"));
        assert_eq!(recorder.current_detection(), Some(Label::Sign("curl".into())));
        assert_eq!(handle.detection_count(), 2);
    }

    #[test]
    fn start_is_idempotent() {
        let frames = wave();

        let mut once = recorder(RecorderConfig::default());
        once.start_recording();
        for frame in &frames[..6] {
            once.on_frame(frame);
        }

        let mut twice = recorder(RecorderConfig::default());
        assert!(twice.start_recording());
        for frame in &frames[..6] {
            twice.on_frame(frame);
        }
        assert!(!twice.start_recording());
        assert_eq!(twice.buffered_frames(), 6);

        for frame in &frames[6..] {
            once.on_frame(frame);
            twice.on_frame(frame);
        }
        assert_eq!(once.stop_recording(), twice.stop_recording());
    }

    #[test]
    fn empty_recording_is_unknown() {
        let mut recorder = recorder(RecorderConfig::default());
        let handle = recorder.handle();
        recorder.start_recording();
        assert!(handle.is_recording());
        let result = recorder.stop_recording().unwrap();
        assert_eq!(result, MatchResult::unknown());
        assert_eq!(handle.current_detection(), Some(Label::Unknown));
    }

    #[test]
    fn unrecognized_gesture_is_unknown() {
        let mut recorder = recorder(RecorderConfig::default());
        let frames = gesture((0..12).map(|i| if i % 2 == 0 { 4.0 } else { -4.0 }));
        let result = record(&mut recorder, &frames).unwrap();
        assert!(result.label().is_unknown());
        assert!(result.score().is_some());
    }

    #[test]
    fn frame_limit_stops_recording() {
        let mut recorder = recorder(RecorderConfig::default().max_frames(Some(12)));
        let handle = recorder.handle();
        recorder.start_recording();
        let frames = wave();
        for frame in &frames[..11] {
            assert!(recorder.on_frame(frame).recording);
        }
        let update = recorder.on_frame(&frames[11]);
        assert!(!update.recording);
        assert_eq!(update.detection.unwrap().label().sign(), Some("wave"));
        assert!(!handle.is_recording());
    }

    #[test]
    fn duration_limit_stops_recording() {
        let mut recorder =
            recorder(RecorderConfig::default().max_duration(Duration::from_millis(20)));
        recorder.start_recording();
        recorder.on_frame(&wave()[0]);
        assert_eq!(recorder.poll_watchdog(), None);

        thread::sleep(Duration::from_millis(40));
        let result = recorder.poll_watchdog().unwrap();
        // A single frame is too short to classify.
        assert_eq!(result, MatchResult::unknown());
        assert!(!recorder.is_recording());
    }

    #[test]
    fn new_recording_clears_detection() {
        let mut recorder = recorder(RecorderConfig::default());
        let handle = recorder.handle();
        record(&mut recorder, &wave());
        assert!(handle.current_detection().is_some());

        assert_eq!(recorder.toggle_recording(), None);
        assert!(handle.is_recording());
        assert_eq!(handle.current_detection(), None);
        assert_eq!(recorder.current_detection(), None);

        recorder.on_frame(&wave()[0]);
        recorder.reset();
        assert!(!handle.is_recording());
        assert_eq!(recorder.buffered_frames(), 0);
        assert_eq!(recorder.toggle_recording(), None);
        assert!(recorder.toggle_recording().is_some());
    }
}
