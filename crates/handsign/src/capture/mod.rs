//! The capture loop: video source → pose estimator → recorder → debounced events.
//!
//! A [`CaptureLoop`] owns a [`VideoSource`], a [`PoseEstimator`] and a [`SignRecorder`]. It can
//! be driven synchronously ([`CaptureLoop::run`], [`CaptureLoop::run_once`]) or moved onto a
//! dedicated thread with [`CaptureWorker::spawn`].
//!
//! The UI never touches the recorder directly. It sends commands and reads the recorder state
//! through a [`CaptureControl`], and receives [`CaptureEvent`]s over a channel.

mod recorded;
mod worker;

use std::{
    any::Any,
    ops::ControlFlow,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::debounce::Debouncer;
use crate::drop::defer;
use crate::error::SessionError;
use crate::landmark::LandmarkFrame;
use crate::matcher::{Label, MatchResult};
use crate::recorder::{RecorderHandle, SignRecorder};
use crate::timer::FpsCounter;

pub use recorded::{read_clip, Passthrough, RecordedLandmarks};
pub use worker::{CaptureWorker, StopOutcome};

/// A source of video frames, such as a webcam.
pub trait VideoSource {
    type Frame;

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` when the stream has ended. Errors are treated as transient: the capture
    /// loop retries, and only gives up after several consecutive failures.
    fn read(&mut self) -> anyhow::Result<Option<Self::Frame>>;
}

/// Computes body landmarks from a video frame.
///
/// Body parts that can not be detected in the frame are left absent in the returned
/// [`LandmarkFrame`]. That is not an error.
pub trait PoseEstimator {
    type Frame;

    fn estimate(&mut self, frame: &Self::Frame) -> anyhow::Result<LandmarkFrame>;
}

/// Recording state shown on top of the video by a display layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub recording: bool,
    pub detection: Option<Label>,
}

/// Receives every processed frame, for display purposes.
pub trait FrameObserver<F> {
    /// Called once per frame. `landmarks` is `None` if estimation failed for this frame.
    fn observe(&mut self, frame: &F, landmarks: Option<&LandmarkFrame>, overlay: &Overlay);
}

impl<F, T: FnMut(&F, Option<&LandmarkFrame>, &Overlay)> FrameObserver<F> for T {
    fn observe(&mut self, frame: &F, landmarks: Option<&LandmarkFrame>, overlay: &Overlay) {
        self(frame, landmarks, overlay)
    }
}

/// Timing and failure handling of the [`CaptureLoop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    frame_interval_ms: u64,
    error_backoff_ms: u64,
    max_consecutive_failures: u32,
    debounce_interval_ms: u64,
    join_timeout_ms: u64,
    event_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 33,
            error_backoff_ms: 100,
            max_consecutive_failures: 10,
            debounce_interval_ms: 1500,
            join_timeout_ms: 2000,
            event_capacity: 64,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

impl CaptureConfig {
    /// Sets the target time between two loop iterations.
    ///
    /// A zero interval processes frames as fast as the source delivers them, which is what batch
    /// runs over recorded streams want.
    #[inline]
    pub fn frame_interval(self, interval: Duration) -> Self {
        Self {
            frame_interval_ms: millis(interval),
            ..self
        }
    }

    /// Sets the time to wait after the video source failed to deliver a frame.
    #[inline]
    pub fn error_backoff(self, backoff: Duration) -> Self {
        Self {
            error_backoff_ms: millis(backoff),
            ..self
        }
    }

    /// Sets the number of consecutive source failures after which the session is aborted.
    #[inline]
    pub fn max_consecutive_failures(self, max: u32) -> Self {
        Self {
            max_consecutive_failures: max.max(1),
            ..self
        }
    }

    /// Sets the minimum time between two dispatches of the same detected label.
    #[inline]
    pub fn debounce_interval(self, interval: Duration) -> Self {
        Self {
            debounce_interval_ms: millis(interval),
            ..self
        }
    }

    /// Sets how long dropping a [`CaptureWorker`] waits for its thread to exit.
    #[inline]
    pub fn join_timeout(self, timeout: Duration) -> Self {
        Self {
            join_timeout_ms: millis(timeout),
            ..self
        }
    }

    /// Sets how many unread [`CaptureEvent`]s are kept.
    ///
    /// When the queue is full, the oldest unread event is discarded to make room for the new one,
    /// so a consumer that never reads events does not make the queue grow.
    #[inline]
    pub fn event_capacity(self, capacity: usize) -> Self {
        Self {
            event_capacity: capacity,
            ..self
        }
    }

    pub fn frame_interval_duration(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn error_backoff_duration(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn max_consecutive_failures_limit(&self) -> u32 {
        self.max_consecutive_failures.max(1)
    }

    pub fn debounce_interval_duration(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn join_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn event_capacity_limit(&self) -> usize {
        self.event_capacity.max(1)
    }
}

/// A request from the UI to the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleRecording,
    StartRecording,
    StopRecording,
    /// Discards the current recording and detection.
    Reset,
}

/// How a capture session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The session was asked to stop.
    Stopped,
    /// The video source ran out of frames.
    EndOfStream,
}

pub type SessionResult = Result<SessionEnd, SessionError>;

/// A notification sent from the capture loop to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// A classified gesture passed the debouncer.
    Detection(Label),
    /// A recording started (`true`) or ended (`false`).
    Recording(bool),
    /// The capture loop exited. No further events will be sent.
    Ended(SessionResult),
}

/// A snapshot of the capture loop's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames successfully read from the video source.
    pub frames_processed: u64,
    /// Frames the video source failed to deliver.
    pub read_failures: u64,
    /// Frames for which landmark estimation or the recorder update failed, and classifications
    /// that panicked.
    pub frame_errors: u64,
    /// Completed classifications, including suppressed and unknown ones.
    pub detections: u64,
    /// Whether the loop is currently running.
    pub running: bool,
}

#[derive(Default)]
struct SharedStats {
    frames_processed: AtomicU64,
    read_failures: AtomicU64,
    frame_errors: AtomicU64,
    detections: AtomicU64,
    running: AtomicBool,
}

impl SharedStats {
    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Acquire),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A cloneable handle the UI uses to steer a [`CaptureLoop`].
///
/// Recording commands are processed by the loop at the start of its next iteration, so
/// [`CaptureControl::is_recording`] reflects them only after that.
#[derive(Clone)]
pub struct CaptureControl {
    commands: Sender<Command>,
    recorder: RecorderHandle,
    stats: Arc<SharedStats>,
}

impl CaptureControl {
    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("capture loop is gone, dropping {:?}", command);
        }
    }

    pub fn toggle_recording(&self) {
        self.send(Command::ToggleRecording);
    }

    pub fn start_recording(&self) {
        self.send(Command::StartRecording);
    }

    pub fn stop_recording(&self) {
        self.send(Command::StopRecording);
    }

    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Returns the label of the last classified gesture, see
    /// [`RecorderHandle::current_detection`].
    pub fn current_detection(&self) -> Option<Label> {
        self.recorder.current_detection()
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.snapshot()
    }
}

type BoxedObserver<F> = Box<dyn FrameObserver<F> + Send>;

/// Drives a [`VideoSource`] and a [`PoseEstimator`] and feeds the results to a [`SignRecorder`].
pub struct CaptureLoop<S: VideoSource, E: PoseEstimator<Frame = S::Frame>> {
    source: S,
    estimator: E,
    recorder: SignRecorder,
    observer: Option<BoxedObserver<S::Frame>>,
    config: CaptureConfig,
    debouncer: Debouncer,
    fps: FpsCounter,
    consecutive_failures: u32,
    was_recording: bool,
    stop: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    commands: Receiver<Command>,
    command_sender: Sender<Command>,
    events: Sender<CaptureEvent>,
    event_receiver: Receiver<CaptureEvent>,
}

impl<S: VideoSource, E: PoseEstimator<Frame = S::Frame>> CaptureLoop<S, E> {
    pub fn new(source: S, estimator: E, recorder: SignRecorder, config: CaptureConfig) -> Self {
        let (command_sender, commands) = crossbeam::channel::unbounded();
        let (events, event_receiver) = crossbeam::channel::bounded(config.event_capacity_limit());
        Self {
            source,
            estimator,
            debouncer: Debouncer::new(config.debounce_interval_duration()),
            was_recording: recorder.is_recording(),
            recorder,
            observer: None,
            config,
            fps: FpsCounter::new("capture"),
            consecutive_failures: 0,
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SharedStats::default()),
            commands,
            command_sender,
            events,
            event_receiver,
        }
    }

    /// Installs a [`FrameObserver`] that is handed every frame along with its landmarks.
    pub fn with_observer<O: FrameObserver<S::Frame> + Send + 'static>(self, observer: O) -> Self {
        Self {
            observer: Some(Box::new(observer)),
            ..self
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn recorder(&self) -> &SignRecorder {
        &self.recorder
    }

    pub fn control(&self) -> CaptureControl {
        CaptureControl {
            commands: self.command_sender.clone(),
            recorder: self.recorder.handle(),
            stats: self.stats.clone(),
        }
    }

    /// Returns a receiver for the [`CaptureEvent`]s emitted by this loop.
    ///
    /// All receivers share one bounded queue, so each event is delivered to only one of them.
    /// Events nobody reads are discarded oldest first once [`CaptureConfig::event_capacity`] is
    /// reached.
    pub fn events(&self) -> Receiver<CaptureEvent> {
        self.event_receiver.clone()
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.snapshot()
    }

    /// Returns the flag that makes [`CaptureLoop::run`] exit when set.
    pub(crate) fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs the loop until it is stopped, the stream ends, or the video source keeps failing.
    ///
    /// A [`CaptureEvent::Ended`] event with the result is emitted before returning.
    pub fn run(&mut self) -> SessionResult {
        log::info!("capture loop starting");
        self.stats.running.store(true, Ordering::Release);
        let stats = self.stats.clone();
        let _guard = defer(move || {
            stats.running.store(false, Ordering::Release);
            log::info!("capture loop exiting");
        });

        let result = loop {
            let start = Instant::now();
            if let ControlFlow::Break(result) = self.run_once() {
                break result;
            }
            self.fps.tick_with(self.recorder.timers());

            let remaining = self
                .config
                .frame_interval_duration()
                .saturating_sub(start.elapsed());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        };

        match &result {
            Ok(end) => log::info!("capture session ended: {:?}", end),
            Err(e) => log::error!("capture session failed: {}", e),
        }
        self.emit(CaptureEvent::Ended(result.clone()));
        result
    }

    /// Performs a single iteration of the loop: processes pending commands, then reads and
    /// processes one frame.
    ///
    /// Returns [`ControlFlow::Break`] with the session result once the session is over. This does
    /// not sleep between frames (except after a source failure) and does not emit
    /// [`CaptureEvent::Ended`].
    pub fn run_once(&mut self) -> ControlFlow<SessionResult> {
        if self.stop.load(Ordering::Acquire) {
            return ControlFlow::Break(Ok(SessionEnd::Stopped));
        }

        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command);
        }

        let expired = self.guarded("recording limit", SignRecorder::poll_watchdog);
        if let Some(result) = expired.flatten() {
            self.classified(result);
        }
        self.report_recording();

        let frame = match self.source.read() {
            Ok(Some(frame)) => {
                self.consecutive_failures = 0;
                frame
            }
            Ok(None) => {
                log::debug!("end of video stream");
                if let Some(result) = self
                    .guarded("final recording", SignRecorder::stop_recording)
                    .flatten()
                {
                    self.classified(result);
                }
                self.report_recording();
                return ControlFlow::Break(Ok(SessionEnd::EndOfStream));
            }
            Err(e) => {
                SharedStats::bump(&self.stats.read_failures);
                self.consecutive_failures += 1;
                log::warn!(
                    "failed to read frame ({}/{}): {}",
                    self.consecutive_failures,
                    self.config.max_consecutive_failures_limit(),
                    e,
                );
                if self.consecutive_failures >= self.config.max_consecutive_failures_limit() {
                    return ControlFlow::Break(Err(SessionError::CameraFailure {
                        consecutive_failures: self.consecutive_failures,
                        last_error: format!("{:#}", e),
                    }));
                }
                thread::sleep(self.config.error_backoff_duration());
                return ControlFlow::Continue(());
            }
        };
        SharedStats::bump(&self.stats.frames_processed);

        let estimator = &mut self.estimator;
        let recorder = &mut self.recorder;
        let processed = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<_> {
            let landmarks = estimator.estimate(&frame)?;
            let update = recorder.on_frame(&landmarks);
            Ok((landmarks, update))
        }))
        .map_err(panic_error)
        .and_then(|res| res);

        let landmarks = match processed {
            Ok((landmarks, update)) => {
                if let Some(result) = update.detection {
                    self.classified(result);
                }
                Some(landmarks)
            }
            Err(e) => {
                SharedStats::bump(&self.stats.frame_errors);
                log::error!("failed to process frame: {:#}", e);
                None
            }
        };
        self.report_recording();

        if let Some(observer) = &mut self.observer {
            let overlay = Overlay {
                recording: self.recorder.is_recording(),
                detection: self.recorder.current_detection(),
            };
            observer.observe(&frame, landmarks.as_ref(), &overlay);
        }

        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: Command) {
        log::debug!("command: {:?}", command);
        let result = match command {
            Command::ToggleRecording => self
                .guarded("toggling recording", SignRecorder::toggle_recording)
                .flatten(),
            Command::StartRecording => {
                self.recorder.start_recording();
                None
            }
            Command::StopRecording => self
                .guarded("stopping recording", SignRecorder::stop_recording)
                .flatten(),
            Command::Reset => {
                self.recorder.reset();
                self.debouncer.reset();
                None
            }
        };
        if let Some(result) = result {
            self.classified(result);
        }
    }

    /// Calls `f` on the recorder, catching panics.
    ///
    /// A panic is logged and counted as a frame error, and yields `None`. The recorder leaves the
    /// recording state before classifying, so a failed classification leaves it idle.
    fn guarded<T>(&mut self, what: &str, f: impl FnOnce(&mut SignRecorder) -> T) -> Option<T> {
        let recorder = &mut self.recorder;
        match catch_unwind(AssertUnwindSafe(|| f(recorder))) {
            Ok(value) => Some(value),
            Err(payload) => {
                SharedStats::bump(&self.stats.frame_errors);
                log::error!("{} failed: {:#}", what, panic_error(payload));
                None
            }
        }
    }

    /// Passes a new classification through the debouncer.
    fn classified(&mut self, result: MatchResult) {
        SharedStats::bump(&self.stats.detections);
        let label = result.into_label();
        if self.debouncer.offer(&label, Instant::now()) {
            log::info!("detected: {}", label);
            self.emit(CaptureEvent::Detection(label));
        }
    }

    fn report_recording(&mut self) {
        let recording = self.recorder.is_recording();
        if recording != self.was_recording {
            self.was_recording = recording;
            self.emit(CaptureEvent::Recording(recording));
        }
    }

    /// Queues `event` without blocking, discarding the oldest unread event if the queue is full.
    fn emit(&self, mut event: CaptureEvent) {
        loop {
            match self.events.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(stale) = self.event_receiver.try_recv() {
                        log::trace!("event queue full, discarding {:?}", stale);
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    match payload.downcast::<String>() {
        Ok(string) => anyhow::Error::msg(*string),
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => anyhow::Error::msg(*s),
            Err(_) => anyhow::anyhow!("<unknown panic message>"),
        },
    }
}
