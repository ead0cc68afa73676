use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::SessionError;
use crate::recorder::SignRecorder;

use super::{
    CaptureConfig, CaptureControl, CaptureEvent, CaptureLoop, CaptureStats, PoseEstimator,
    SessionResult, VideoSource,
};

/// Result of [`CaptureWorker::stop`].
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// The worker thread exited with this result.
    Joined(SessionResult),
    /// The worker thread did not exit in time and was detached.
    TimedOut,
}

/// A [`CaptureLoop`] running on its own thread.
///
/// When dropped, the loop is asked to stop and the thread is joined, waiting at most for the
/// configured join timeout.
pub struct CaptureWorker {
    control: CaptureControl,
    events: Receiver<CaptureEvent>,
    stop: Arc<AtomicBool>,
    done: Receiver<SessionResult>,
    result: Option<SessionResult>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl CaptureWorker {
    /// Spawns a thread named `capture` that runs `capture_loop` until it ends.
    ///
    /// The loop, including its video source and estimator, is dropped on the worker thread.
    pub fn spawn<S, E>(mut capture_loop: CaptureLoop<S, E>) -> io::Result<Self>
    where
        S: VideoSource + Send + 'static,
        E: PoseEstimator<Frame = S::Frame> + Send + 'static,
    {
        let control = capture_loop.control();
        let events = capture_loop.events();
        let stop = capture_loop.stop_flag();
        let join_timeout = capture_loop.config().join_timeout_duration();
        // Capacity of 1 means sending the result never blocks.
        let (done_sender, done) = crossbeam::channel::bounded(1);

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let result = capture_loop.run();
                    drop(capture_loop);
                    result
                }))
                .unwrap_or_else(|_| {
                    log::error!("capture loop panicked");
                    Err(SessionError::WorkerPanicked)
                });
                done_sender.send(result).ok();
            })?;

        Ok(Self {
            control,
            events,
            stop,
            done,
            result: None,
            handle: Some(handle),
            join_timeout,
        })
    }

    /// Convenience wrapper around [`CaptureLoop::new`] and [`CaptureWorker::spawn`].
    pub fn start<S, E>(
        source: S,
        estimator: E,
        recorder: SignRecorder,
        config: CaptureConfig,
    ) -> io::Result<Self>
    where
        S: VideoSource + Send + 'static,
        E: PoseEstimator<Frame = S::Frame> + Send + 'static,
    {
        Self::spawn(CaptureLoop::new(source, estimator, recorder, config))
    }

    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    pub fn events(&self) -> &Receiver<CaptureEvent> {
        &self.events
    }

    pub fn status(&self) -> CaptureStats {
        self.control.stats()
    }

    /// Returns the session result if the loop has exited on its own.
    pub fn result(&mut self) -> Option<&SessionResult> {
        if self.result.is_none() {
            match self.done.try_recv() {
                Ok(result) => self.result = Some(result),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.result = Some(Err(SessionError::WorkerPanicked))
                }
            }
        }
        self.result.as_ref()
    }

    /// Asks the loop to stop and waits up to `timeout` for the thread to exit.
    pub fn stop(mut self, timeout: Duration) -> StopOutcome {
        self.shutdown(timeout)
    }

    fn shutdown(&mut self, timeout: Duration) -> StopOutcome {
        self.stop.store(true, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return match self.result.clone() {
                Some(result) => StopOutcome::Joined(result),
                None => StopOutcome::TimedOut,
            };
        };

        let result = match self.result.take() {
            Some(result) => result,
            None => match self.done.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Disconnected) => Err(SessionError::WorkerPanicked),
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "capture thread did not exit within {:?}, detaching it",
                        timeout
                    );
                    return StopOutcome::TimedOut;
                }
            },
        };

        // The thread has sent its result, so it is about to exit.
        handle.join().ok();
        self.result = Some(result.clone());
        StopOutcome::Joined(result)
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown(self.join_timeout);
        }
    }
}
