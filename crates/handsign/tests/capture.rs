use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use handsign::{
    capture::{
        CaptureConfig, CaptureEvent, CaptureWorker, Passthrough, PoseEstimator, SessionEnd,
        StopOutcome, VideoSource,
    },
    landmark::LandmarkFrame,
    library::SignLibrary,
    recorder::SignRecorder,
    SessionError,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn recorder() -> SignRecorder {
    SignRecorder::with_library(Arc::new(SignLibrary::empty()))
}

fn config() -> CaptureConfig {
    CaptureConfig::default()
        .frame_interval(Duration::from_millis(1))
        .error_backoff(Duration::from_millis(1))
}

/// Delivers `frames` empty frames (forever if `None`), then ends the stream.
///
/// Records the name of the thread that drops it.
struct Camera {
    frames: Option<usize>,
    dropped_on: Arc<Mutex<Option<String>>>,
}

impl Camera {
    fn new(frames: Option<usize>) -> (Self, Arc<Mutex<Option<String>>>) {
        let dropped_on = Arc::new(Mutex::new(None));
        let camera = Self {
            frames,
            dropped_on: dropped_on.clone(),
        };
        (camera, dropped_on)
    }
}

impl VideoSource for Camera {
    type Frame = LandmarkFrame;

    fn read(&mut self) -> anyhow::Result<Option<LandmarkFrame>> {
        match &mut self.frames {
            Some(0) => Ok(None),
            Some(n) => {
                *n -= 1;
                Ok(Some(LandmarkFrame::empty()))
            }
            None => Ok(Some(LandmarkFrame::empty())),
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        *self.dropped_on.lock().unwrap() = thread::current().name().map(str::to_string);
    }
}

struct Unplugged;

impl VideoSource for Unplugged {
    type Frame = LandmarkFrame;

    fn read(&mut self) -> anyhow::Result<Option<LandmarkFrame>> {
        anyhow::bail!("no such device")
    }
}

struct Broken;

impl VideoSource for Broken {
    type Frame = LandmarkFrame;

    fn read(&mut self) -> anyhow::Result<Option<LandmarkFrame>> {
        panic!("driver bug")
    }
}

struct Slow(Duration);

impl PoseEstimator for Slow {
    type Frame = LandmarkFrame;

    fn estimate(&mut self, frame: &LandmarkFrame) -> anyhow::Result<LandmarkFrame> {
        thread::sleep(self.0);
        Ok(frame.clone())
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < TIMEOUT, "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn toggled_recording_is_classified() {
    let (camera, _) = Camera::new(None);
    let worker = CaptureWorker::start(camera, Passthrough, recorder(), config()).unwrap();
    let control = worker.control();

    control.toggle_recording();
    assert_eq!(
        worker.events().recv_timeout(TIMEOUT).unwrap(),
        CaptureEvent::Recording(true)
    );
    assert!(control.is_recording());

    let frames = worker.status().frames_processed;
    wait_until(|| worker.status().frames_processed >= frames + 6);
    control.toggle_recording();

    // Empty library: the gesture can't be anything but unknown.
    assert_eq!(
        worker.events().recv_timeout(TIMEOUT).unwrap(),
        CaptureEvent::Detection(handsign::Label::Unknown)
    );
    assert_eq!(
        worker.events().recv_timeout(TIMEOUT).unwrap(),
        CaptureEvent::Recording(false)
    );
    assert_eq!(control.current_detection(), Some(handsign::Label::Unknown));

    let status = worker.status();
    assert!(status.running);
    assert_eq!(status.detections, 1);

    assert_eq!(
        worker.stop(TIMEOUT),
        StopOutcome::Joined(Ok(SessionEnd::Stopped))
    );
    assert!(!control.stats().running);
}

#[test]
fn end_of_stream_releases_source_on_worker_thread() {
    let (camera, dropped_on) = Camera::new(Some(3));
    let mut worker = CaptureWorker::start(camera, Passthrough, recorder(), config()).unwrap();

    assert_eq!(
        worker.events().recv_timeout(TIMEOUT).unwrap(),
        CaptureEvent::Ended(Ok(SessionEnd::EndOfStream))
    );
    wait_until(|| worker.result().is_some());
    assert_eq!(worker.result(), Some(&Ok(SessionEnd::EndOfStream)));
    assert_eq!(worker.status().frames_processed, 3);
    assert_eq!(dropped_on.lock().unwrap().as_deref(), Some("capture"));

    assert_eq!(
        worker.stop(TIMEOUT),
        StopOutcome::Joined(Ok(SessionEnd::EndOfStream))
    );
}

#[test]
fn dropping_worker_stops_it() {
    let (camera, dropped_on) = Camera::new(None);
    let worker = CaptureWorker::start(camera, Passthrough, recorder(), config()).unwrap();
    wait_until(|| worker.status().frames_processed > 0);

    drop(worker);
    assert_eq!(dropped_on.lock().unwrap().as_deref(), Some("capture"));
}

#[test]
fn unplugged_camera_fails_session() {
    let worker = CaptureWorker::start(
        Unplugged,
        Passthrough,
        recorder(),
        config().max_consecutive_failures(3),
    )
    .unwrap();

    let expected = Err(SessionError::CameraFailure {
        consecutive_failures: 3,
        last_error: "no such device".into(),
    });
    assert_eq!(
        worker.events().recv_timeout(TIMEOUT).unwrap(),
        CaptureEvent::Ended(expected.clone())
    );
    assert_eq!(worker.status().read_failures, 3);
    assert_eq!(worker.stop(TIMEOUT), StopOutcome::Joined(expected));
}

#[test]
fn panicking_source_is_reported() {
    let mut worker = CaptureWorker::start(Broken, Passthrough, recorder(), config()).unwrap();
    wait_until(|| worker.result().is_some());
    assert_eq!(worker.result(), Some(&Err(SessionError::WorkerPanicked)));
    assert!(!worker.status().running);
    // The loop never got to report its end.
    assert!(worker.events().is_empty());
    assert_eq!(
        worker.stop(TIMEOUT),
        StopOutcome::Joined(Err(SessionError::WorkerPanicked))
    );
}

#[test]
fn stop_gives_up_on_stuck_worker() {
    let (camera, _) = Camera::new(None);
    let estimator = Slow(Duration::from_millis(500));
    let worker = CaptureWorker::start(camera, estimator, recorder(), config()).unwrap();
    wait_until(|| worker.status().running);

    let start = Instant::now();
    assert_eq!(worker.stop(Duration::from_millis(20)), StopOutcome::TimedOut);
    assert!(start.elapsed() < Duration::from_millis(400));
}
